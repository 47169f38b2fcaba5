//! Vulkan rendering backend
//!
//! Every native handle is owned by exactly one RAII wrapper; teardown order follows
//! field declaration order, so the device outlives everything created from it.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptors;
pub mod device_selection;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex_layout;

pub use buffer::{Buffer, HostMapping, StagingBuffer};
pub use commands::CommandPool;
pub use context::{BufferDesc, GpuContext};
pub use descriptors::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter};
pub use device_selection::{QueueFamilyIndices, SwapchainSupport};
pub use error::{VulkanError, VulkanResult};
pub use frame::{FramebufferSource, MAX_FRAMES_IN_FLIGHT};
pub use pipeline::{GraphicsPipeline, PipelineConfig, PipelineLayout};
pub use render_pass::RenderPass;
pub use renderer::{Renderer, VulkanRenderer};
pub use shader::{ShaderModule, ShaderSet};
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSync, Semaphore};
pub use vertex_layout::VulkanVertexLayout;
