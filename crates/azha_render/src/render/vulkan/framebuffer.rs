//! Framebuffers, image views and per-image depth buffers
//!
//! Each wrapper destroys its own handle when dropped; the swapchain decides the order.

use super::context::GpuContext;
use super::error::{VulkanError, VulkanResult};
use ash::{vk, Device};
use std::sync::Arc;

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a new framebuffer
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let framebuffer_create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .create_framebuffer(&framebuffer_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, framebuffer })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// 2D image view over the first mip level and layer
pub struct ImageView {
    device: Device,
    view: vk::ImageView,
}

impl ImageView {
    /// Create a view of `image` for `aspect`
    pub fn new(device: Device, image: vk::Image, format: vk::Format, aspect: vk::ImageAspectFlags) -> VulkanResult<Self> {
        let create_info = view_create_info(image, format, aspect);

        let view = unsafe {
            device
                .create_image_view(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, view })
    }

    /// Get the image view handle
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

/// Depth image, its allocation and its view
pub struct DepthResources {
    context: Arc<GpuContext>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
}

impl DepthResources {
    /// Create a device-local depth buffer covering `extent`
    pub fn new(context: Arc<GpuContext>, format: vk::Format, extent: vk::Extent2D) -> VulkanResult<Self> {
        let image_info = depth_image_info(format, extent);
        let (image, mut allocation) = context.create_image(&image_info)?;

        let view_info = view_create_info(image, format, vk::ImageAspectFlags::DEPTH);
        let view = match unsafe { context.device().create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    context.allocator().destroy_image(image, &mut allocation);
                }
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            context,
            image,
            allocation,
            view,
        })
    }

    /// Depth image view
    pub fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for DepthResources {
    fn drop(&mut self) {
        unsafe {
            self.context.device().destroy_image_view(self.view, None);
            self.context.allocator().destroy_image(self.image, &mut self.allocation);
        }
    }
}

/// Create info for a single-sampled optimal-tiling depth attachment
pub fn depth_image_info(format: vk::Format, extent: vk::Extent2D) -> vk::ImageCreateInfo {
    vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(vk::SampleCountFlags::TYPE_1)
        .build()
}

fn view_create_info(image: vk::Image, format: vk::Format, aspect: vk::ImageAspectFlags) -> vk::ImageViewCreateInfo {
    vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(single_level_range(aspect))
        .build()
}

fn single_level_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
