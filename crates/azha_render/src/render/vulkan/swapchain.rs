//! Vulkan swapchain management
//!
//! Owns the presentable images with everything sized from them: color views,
//! per-image depth buffers, the shared render pass, framebuffers, and the
//! per-frame-in-flight synchronization objects. Recreation builds a new
//! [`Swapchain`] with the old handle as a hint and then drops the old one.

use super::context::GpuContext;
use super::error::{VulkanError, VulkanResult};
use super::frame::{
    clear_values, full_scissor, full_viewport, AcquireOutcome, FrameBackend, FrameCounter, PresentChain,
    PresentOutcome, MAX_FRAMES_IN_FLIGHT,
};
use super::framebuffer::{DepthResources, Framebuffer, ImageView};
use super::render_pass::RenderPass;
use super::sync::{FrameSync, ImageFenceTable};
use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;
use std::sync::Arc;

/// Surface format used whenever the surface offers it
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Pick the preferred sRGB format, else whatever the surface lists first
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    available
        .iter()
        .copied()
        .find(|candidate| {
            candidate.format == PREFERRED_SURFACE_FORMAT.format
                && candidate.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| available.first().copied())
        .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))
}

/// Mailbox when available, otherwise FIFO which every implementation supports
pub fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the window's framebuffer size clamped into the
/// surface limits when the surface leaves the choice to us
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent
            .width
            .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: window_extent
            .height
            .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// One more than the minimum, capped at the maximum (zero means no maximum)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Concurrent sharing across both families when they differ, exclusive otherwise
pub fn sharing_mode_for(graphics_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics_family == present_family {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![graphics_family, present_family])
    }
}

struct SwapchainHandle {
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
}

impl Drop for SwapchainHandle {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Swapchain and its dependent resources.
///
/// Fields are declared in teardown order: render pass, sync objects,
/// framebuffers, depth buffers, image views, swapchain.
pub struct Swapchain {
    render_pass: RenderPass,
    frames: Vec<FrameSync>,
    framebuffers: Vec<Framebuffer>,
    depth_resources: Vec<DepthResources>,
    image_views: Vec<ImageView>,
    handle: SwapchainHandle,
    images_in_flight: ImageFenceTable,
    frame: FrameCounter,
    image_format: vk::Format,
    depth_format: vk::Format,
    extent: vk::Extent2D,
    context: Arc<GpuContext>,
}

impl Swapchain {
    /// Build a swapchain for the surface of `context`.
    ///
    /// `window_extent` is only used when the surface does not dictate its size.
    /// `old_swapchain` lets the platform hand images over from a chain being replaced.
    pub fn new(
        context: Arc<GpuContext>,
        window_extent: vk::Extent2D,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> VulkanResult<Self> {
        let support = context.query_swapchain_support()?;
        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, window_extent);
        let image_count = choose_image_count(&support.capabilities);

        log::debug!(
            "Swapchain choices: {:?}/{:?}, {:?}, {}x{}, {} images requested",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            extent.width,
            extent.height,
            image_count
        );

        let (graphics_family, present_family) = context.find_queue_families()?.complete()?;
        let (sharing_mode, queue_family_indices) = sharing_mode_for(graphics_family, present_family);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or_else(vk::SwapchainKHR::null));

        let loader = context.swapchain_loader().clone();
        let swapchain = unsafe { loader.create_swapchain(&create_info, None).map_err(VulkanError::Api)? };
        let handle = SwapchainHandle { loader, swapchain };

        let images = unsafe {
            handle
                .loader
                .get_swapchain_images(handle.swapchain)
                .map_err(VulkanError::Api)?
        };

        let device = context.device().clone();

        let image_views = images
            .iter()
            .map(|&image| ImageView::new(device.clone(), image, surface_format.format, vk::ImageAspectFlags::COLOR))
            .collect::<VulkanResult<Vec<_>>>()?;

        let depth_format = context.find_depth_format()?;
        let depth_resources = images
            .iter()
            .map(|_| DepthResources::new(Arc::clone(&context), depth_format, extent))
            .collect::<VulkanResult<Vec<_>>>()?;

        let render_pass = RenderPass::new_swapchain_pass(device.clone(), surface_format.format, depth_format)?;

        let framebuffers = image_views
            .iter()
            .zip(&depth_resources)
            .map(|(view, depth)| {
                Framebuffer::new(
                    device.clone(),
                    render_pass.handle(),
                    &[view.handle(), depth.view()],
                    extent,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<VulkanResult<Vec<_>>>()?;

        log::info!(
            "Created swapchain {}x{} with {} images ({:?}, depth {:?})",
            extent.width,
            extent.height,
            images.len(),
            surface_format.format,
            depth_format
        );

        Ok(Self {
            render_pass,
            frames,
            framebuffers,
            depth_resources,
            image_views,
            handle,
            images_in_flight: ImageFenceTable::new(images.len()),
            frame: FrameCounter::default(),
            image_format: surface_format.format,
            depth_format,
            extent,
            context,
        })
    }

    /// Native swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle.swapchain
    }

    /// Width over height of the swapchain images
    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    /// Frame slot the next acquire will use
    pub fn current_frame(&self) -> usize {
        self.frame.index()
    }

    fn submit_and_present(&mut self, command_buffer: vk::CommandBuffer, image_index: u32) -> VulkanResult<PresentOutcome> {
        let device = self.context.device();

        let frame = &self.frames[self.frame.index()];

        // Another frame slot may still be drawing into this image
        if let Some(fence) = self.images_in_flight.fence_to_wait(image_index, frame.in_flight.handle()) {
            unsafe {
                device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .map_err(VulkanError::Api)?;
            }
        }

        self.images_in_flight.claim(image_index, frame.in_flight.handle())?;

        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [frame.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        frame.in_flight.reset()?;

        unsafe {
            device
                .queue_submit(self.context.graphics_queue(), &[submit_info], frame.in_flight.handle())
                .map_err(VulkanError::Api)?;
        }

        let swapchains = [self.handle.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.handle
                .loader
                .queue_present(self.context.present_queue(), &present_info)
        };

        PresentOutcome::from_present_result(result).map_err(VulkanError::Api)
    }
}

impl PresentChain for Swapchain {
    fn acquire_next_image(&mut self) -> VulkanResult<AcquireOutcome> {
        let frame = &self.frames[self.frame.index()];
        frame.in_flight.wait(u64::MAX)?;

        let result = unsafe {
            self.handle.loader.acquire_next_image(
                self.handle.swapchain,
                u64::MAX,
                frame.image_available.handle(),
                vk::Fence::null(),
            )
        };

        AcquireOutcome::from_acquire_result(result).map_err(VulkanError::Api)
    }

    fn submit_command_buffers(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> VulkanResult<PresentOutcome> {
        let outcome = self.submit_and_present(command_buffer, image_index);
        self.frame.advance();
        outcome
    }

    fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    fn framebuffer(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
            .ok_or_else(|| {
                VulkanError::protocol(format!(
                    "Framebuffer index {} out of bounds ({} images)",
                    image_index,
                    self.framebuffers.len()
                ))
            })
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn image_format(&self) -> vk::Format {
        self.image_format
    }

    fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    fn image_count(&self) -> usize {
        self.image_views.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Failed to wait for device idle before destroying swapchain: {}", e);
        }
        log::debug!(
            "Destroying swapchain {}x{} ({} images)",
            self.extent.width,
            self.extent.height,
            self.image_views.len()
        );
    }
}

impl FrameBackend for Arc<GpuContext> {
    type Chain = Swapchain;

    fn create_chain(&self, extent: vk::Extent2D, previous: Option<&Swapchain>) -> VulkanResult<Swapchain> {
        Swapchain::new(Arc::clone(self), extent, previous.map(Swapchain::handle))
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        GpuContext::wait_idle(self)
    }

    fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        self.command_pool().allocate_command_buffers(count)
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        self.command_pool().free_command_buffers(command_buffers);
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.device()
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.device().end_command_buffer(command_buffer).map_err(VulkanError::Api) }
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) {
        let clear_values = clear_values();
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(full_scissor(extent))
            .clear_values(&clear_values);

        let device = self.device();
        unsafe {
            device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(command_buffer, 0, &[full_viewport(extent)]);
            device.cmd_set_scissor(command_buffer, 0, &[full_scissor(extent)]);
        }
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device().cmd_end_render_pass(command_buffer);
        }
    }
}
