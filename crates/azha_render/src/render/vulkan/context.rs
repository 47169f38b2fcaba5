//! GPU context: instance, surface, device, queues, allocator and command pools
//!
//! Every wrapper destroys its own handle on drop. [`GpuContext`] declares its
//! fields so that Rust drops them in the reverse of their creation order:
//! command pools, allocator, device, surface, instance.

use super::commands::CommandPool;
use super::device_selection::{
    required_device_extensions, select_physical_device, DeviceCandidate, QueueFamilyIndices, SwapchainSupport,
};
use super::error::{VulkanError, VulkanResult};
use super::instance::VulkanInstance;
use crate::config::RendererConfig;
use crate::render::window::Window;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};
use std::collections::BTreeSet;
use vk_mem::Alloc;

/// Surface handle and its extension loader
pub struct SurfaceHandle {
    loader: Surface,
    surface: vk::SurfaceKHR,
}

impl SurfaceHandle {
    fn new(instance: &VulkanInstance, window: &Window) -> VulkanResult<Self> {
        let loader = Surface::new(instance.entry(), instance.instance());
        let surface = window
            .create_surface(instance.instance().handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Surface creation: {}", e)))?;
        Ok(Self { loader, surface })
    }

    /// Surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader
    pub fn loader(&self) -> &Surface {
        &self.loader
    }
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a new logical device with one queue per distinct family
    pub fn new(instance: &Instance, physical_device: vk::PhysicalDevice, indices: QueueFamilyIndices) -> VulkanResult<Self> {
        let (graphics_family, present_family) = indices.complete()?;
        let unique_families: BTreeSet<u32> = [graphics_family, present_family].into_iter().collect();

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const std::ffi::c_char> =
            required_device_extensions().iter().map(|name| name.as_ptr()).collect();
        let device_features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical_device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Parameters for [`GpuContext::create_buffer`]
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: vk::DeviceSize,
    /// How the buffer will be used
    pub usage: vk::BufferUsageFlags,
    /// Memory properties the allocation must have
    pub properties: vk::MemoryPropertyFlags,
    /// Placement hint for the allocator
    pub memory_usage: vk_mem::MemoryUsage,
    /// Extra allocator flags
    pub allocation_flags: vk_mem::AllocationCreateFlags,
}

/// Owner of the device and everything created directly from it
pub struct GpuContext {
    transient_pool: CommandPool,
    command_pool: CommandPool,
    allocator: vk_mem::Allocator,
    device: LogicalDevice,
    physical_device: DeviceCandidate,
    surface: SurfaceHandle,
    instance: VulkanInstance,
}

impl GpuContext {
    /// Create the instance and surface for `window`, pick a GPU, and create the device,
    /// allocator and command pools
    pub fn new(window: &Window, config: &RendererConfig) -> VulkanResult<Self> {
        let window_extensions = window
            .required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to get required extensions: {}", e)))?;

        let instance = VulkanInstance::new(&window_extensions, config)?;
        let surface = SurfaceHandle::new(&instance, window)?;
        let physical_device = select_physical_device(instance.instance(), surface.loader(), surface.handle())?;
        let device = LogicalDevice::new(
            instance.instance(),
            physical_device.device,
            physical_device.queue_families,
        )?;

        let allocator_info = vk_mem::AllocatorCreateInfo::new(instance.instance(), &device.device, physical_device.device)
            .flags(vk_mem::AllocatorCreateFlags::EXT_MEMORY_BUDGET);
        let allocator = vk_mem::Allocator::new(allocator_info).map_err(VulkanError::Api)?;

        let command_pool = CommandPool::new_resettable(device.device.clone(), device.graphics_family)?;
        let transient_pool = CommandPool::new_transient(device.device.clone(), device.graphics_family)?;

        log::info!(
            "GPU context ready (graphics family {}, present family {})",
            device.graphics_family,
            device.present_family
        );

        Ok(Self {
            transient_pool,
            command_pool,
            allocator,
            device,
            physical_device,
            surface,
            instance,
        })
    }

    /// Vulkan instance
    pub fn instance(&self) -> &Instance {
        self.instance.instance()
    }

    /// Logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Selected physical device
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device.device
    }

    /// Name of the selected GPU
    pub fn device_name(&self) -> &str {
        &self.physical_device.name
    }

    /// Rendering surface
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.handle()
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Queue used for upload copies
    pub fn transfer_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Graphics and present family indices
    pub fn queue_families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics_family: Some(self.device.graphics_family),
            present_family: Some(self.device.present_family),
        }
    }

    /// Memory allocator
    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.allocator
    }

    /// Long-lived pool for per-frame command buffers
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Pool for one-shot transfer commands
    pub fn transient_command_pool(&self) -> &CommandPool {
        &self.transient_pool
    }

    /// Query the surface for the current capabilities, formats and present modes
    pub fn query_swapchain_support(&self) -> VulkanResult<SwapchainSupport> {
        SwapchainSupport::query(self.surface.loader(), self.surface.handle(), self.physical_device.device)
    }

    /// Re-scan queue families for the selected device
    pub fn find_queue_families(&self) -> VulkanResult<QueueFamilyIndices> {
        QueueFamilyIndices::query(
            self.instance(),
            self.surface.loader(),
            self.surface.handle(),
            self.physical_device.device,
        )
    }

    /// First format in `candidates` supporting `features` with `tiling`
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> VulkanResult<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|&format| {
                let properties = unsafe {
                    self.instance()
                        .get_physical_device_format_properties(self.physical_device.device, format)
                };
                format_supports(properties, tiling, features)
            })
            .ok_or_else(|| VulkanError::InitializationFailed(format!("None of {:?} support {:?}", candidates, features)))
    }

    /// Depth format for the swapchain's depth attachments
    pub fn find_depth_format(&self) -> VulkanResult<vk::Format> {
        self.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Create a buffer and its memory through the allocator
    pub fn create_buffer(&self, desc: &BufferDesc) -> VulkanResult<(vk::Buffer, vk_mem::Allocation)> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: desc.memory_usage,
            flags: desc.allocation_flags,
            required_flags: desc.properties,
            ..Default::default()
        };

        unsafe {
            self.allocator
                .create_buffer(&buffer_info, &allocation_info)
                .map_err(VulkanError::Allocation)
        }
    }

    /// Create a device-local image and its memory through the allocator
    pub fn create_image(&self, image_info: &vk::ImageCreateInfo) -> VulkanResult<(vk::Image, vk_mem::Allocation)> {
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ..Default::default()
        };

        unsafe {
            self.allocator
                .create_image(image_info, &allocation_info)
                .map_err(VulkanError::Allocation)
        }
    }

    /// Block until the device has no pending work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Failed to wait for device idle during shutdown: {}", e);
        }
        log::debug!("Destroying GPU context for {}", self.physical_device.name);
    }
}

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Whether `properties` offer `features` for `tiling`
pub fn format_supports(properties: vk::FormatProperties, tiling: vk::ImageTiling, features: vk::FormatFeatureFlags) -> bool {
    match tiling {
        vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
        vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_support_respects_tiling() {
        let properties = vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::empty(),
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::FormatFeatureFlags::SAMPLED_IMAGE,
            buffer_features: vk::FormatFeatureFlags::empty(),
        };

        assert!(format_supports(
            properties,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
        ));
        assert!(!format_supports(
            properties,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
        ));
    }

    #[test]
    fn test_depth_candidates_prefer_pure_depth() {
        assert_eq!(DEPTH_FORMAT_CANDIDATES[0], vk::Format::D32_SFLOAT);
        assert!(DEPTH_FORMAT_CANDIDATES.contains(&vk::Format::D24_UNORM_S8_UINT));
    }
}
