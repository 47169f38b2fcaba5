//! Frame protocol vocabulary shared by the swapchain and the renderer
//!
//! The renderer only sees the swapchain and the device through [`PresentChain`]
//! and [`FrameBackend`]. Both Vulkan implementations live in `swapchain.rs`;
//! tests drive the renderer with in-memory implementations.

use super::error::VulkanResult;
use ash::vk;

/// Number of frames the CPU may record ahead of the GPU.
///
/// Every per-frame array (command buffers, sync objects) is sized from this.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Color the swapchain render pass clears to
pub const CLEAR_COLOR: [f32; 4] = [0.01, 0.01, 0.01, 1.0];

/// Depth/stencil the swapchain render pass clears to
pub const CLEAR_DEPTH_STENCIL: vk::ClearDepthStencilValue = vk::ClearDepthStencilValue {
    depth: 1.0,
    stencil: 0,
};

/// Clear values for the color and depth attachments, in attachment order
pub fn clear_values() -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: CLEAR_COLOR },
        },
        vk::ClearValue {
            depth_stencil: CLEAR_DEPTH_STENCIL,
        },
    ]
}

/// Result of asking the presentation engine for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready to be rendered to
    Acquired {
        /// Index into the swapchain images
        image_index: u32,
        /// The swapchain still works but no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swapchain can no longer present to the surface
    OutOfDate,
}

/// Result of submitting and presenting a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented, but the swapchain should be rebuilt
    Suboptimal,
    /// Not presented, the swapchain must be rebuilt
    OutOfDate,
}

impl PresentOutcome {
    /// Map the result of `vkQueuePresentKHR`
    pub fn from_present_result(result: Result<bool, vk::Result>) -> Result<Self, vk::Result> {
        match result {
            Ok(false) => Ok(Self::Presented),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(Self::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(other) => Err(other),
        }
    }

    /// Whether the swapchain has to be recreated after this present
    pub fn needs_recreation(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

impl AcquireOutcome {
    /// Map the result of `vkAcquireNextImageKHR`
    pub fn from_acquire_result(result: Result<(u32, bool), vk::Result>) -> Result<Self, vk::Result> {
        match result {
            Ok((image_index, suboptimal)) => Ok(Self::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(other) => Err(other),
        }
    }
}

/// Frame-in-flight index that wraps at [`MAX_FRAMES_IN_FLIGHT`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounter {
    index: usize,
}

impl FrameCounter {
    /// Current slot
    pub fn index(self) -> usize {
        self.index
    }

    /// Move to the next slot
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % MAX_FRAMES_IN_FLIGHT;
    }
}

/// Something that can report the drawable size and block for platform events
pub trait FramebufferSource {
    /// Current framebuffer size in pixels, zero while minimized
    fn framebuffer_extent(&self) -> vk::Extent2D;

    /// Block until the platform delivers at least one event
    fn wait_events(&mut self);
}

/// The presentable image chain as the renderer uses it
pub trait PresentChain {
    /// Wait for the current frame slot, then acquire the next image
    fn acquire_next_image(&mut self) -> VulkanResult<AcquireOutcome>;

    /// Submit recorded work for `image_index` and present it.
    ///
    /// Advances the frame slot whatever the outcome.
    fn submit_command_buffers(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> VulkanResult<PresentOutcome>;

    /// Render pass shared by every framebuffer
    fn render_pass(&self) -> vk::RenderPass;

    /// Framebuffer for a swapchain image
    fn framebuffer(&self, image_index: u32) -> VulkanResult<vk::Framebuffer>;

    /// Size of the swapchain images
    fn extent(&self) -> vk::Extent2D;

    /// Color image format
    fn image_format(&self) -> vk::Format;

    /// Depth attachment format
    fn depth_format(&self) -> vk::Format;

    /// Number of presentable images
    fn image_count(&self) -> usize;

    /// True when both color and depth formats match `other`
    fn compare_swap_formats(&self, other: &Self) -> bool
    where
        Self: Sized,
    {
        self.image_format() == other.image_format() && self.depth_format() == other.depth_format()
    }
}

/// Device-side operations the renderer needs besides the swapchain
pub trait FrameBackend {
    /// Swapchain type produced by this backend
    type Chain: PresentChain;

    /// Build a swapchain for `extent`, reusing `previous` as the platform's old swapchain
    fn create_chain(&self, extent: vk::Extent2D, previous: Option<&Self::Chain>) -> VulkanResult<Self::Chain>;

    /// Block until the device has finished all submitted work
    fn wait_idle(&self) -> VulkanResult<()>;

    /// Allocate primary command buffers from the long-lived pool
    fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>>;

    /// Return command buffers to the long-lived pool
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);

    /// Start recording
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Finish recording
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Begin `render_pass` on `framebuffer`, clearing with [`clear_values`] and
    /// setting viewport and scissor to cover `extent`
    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    );

    /// End the active render pass
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
}

/// Viewport covering `extent` with the full depth range
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}
