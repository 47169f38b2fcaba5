//! # Rendering
//!
//! - **Window**: GLFW window, surface creation and framebuffer events
//! - **Mesh**: vertex format and device-local geometry
//! - **Vulkan**: GPU context, swapchain, frame protocol, buffers and descriptors

pub mod mesh;
pub mod vulkan;
pub mod window;

pub use mesh::{DrawCommand, Index, Mesh, MeshId, Vertex};
pub use vulkan::{GpuContext, Renderer, VulkanError, VulkanRenderer, VulkanResult};
pub use window::{Window, WindowError, WindowEvent};
