//! Physical device discovery and suitability scoring
//!
//! Vulkan is queried once per device into a [`DeviceCandidate`]; scoring and
//! selection then work on plain data.

use super::error::{VulkanError, VulkanResult};
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use std::ffi::{CStr, CString};

/// Device extensions every selected GPU must support
pub fn required_device_extensions() -> [&'static CStr; 2] {
    [SwapchainLoader::name(), vk::ExtMemoryBudgetFn::name()]
}

/// Queue families used for rendering and presentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with graphics support
    pub graphics_family: Option<u32>,
    /// First family able to present to the surface
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan families in order, taking the first match for each role.
    ///
    /// `families` yields `(queue flags, can present to the surface)` per family index.
    pub fn find(families: impl IntoIterator<Item = (vk::QueueFlags, bool)>) -> Self {
        let mut indices = Self::default();

        for (index, (flags, present_support)) in families.into_iter().enumerate() {
            let index = index as u32;

            if indices.graphics_family.is_none() && flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics_family = Some(index);
            }
            if indices.present_family.is_none() && present_support {
                indices.present_family = Some(index);
            }
            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    /// Query queue families of `device` against `surface`
    pub fn query(
        instance: &ash::Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> VulkanResult<Self> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut described = Vec::with_capacity(families.len());
        for (index, family) in families.iter().enumerate() {
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index as u32, surface)
                    .map_err(VulkanError::Api)?
            };
            described.push((family.queue_flags, present_support));
        }

        Ok(Self::find(described))
    }

    /// Both roles are filled
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Both families, or an error when incomplete
    pub fn complete(&self) -> VulkanResult<(u32, u32)> {
        match (self.graphics_family, self.present_family) {
            (Some(graphics), Some(present)) => Ok((graphics, present)),
            _ => Err(VulkanError::NoSuitableDevice),
        }
    }
}

/// Surface capabilities, formats and present modes for one device
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupport {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format and color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Query the surface right now. Results are never cached since they change with
    /// the window and the display mode.
    pub fn query(surface_loader: &Surface, surface: vk::SurfaceKHR, device: vk::PhysicalDevice) -> VulkanResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(device, surface)
                    .map_err(VulkanError::Api)?,
                formats: surface_loader
                    .get_physical_device_surface_formats(device, surface)
                    .map_err(VulkanError::Api)?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(device, surface)
                    .map_err(VulkanError::Api)?,
            })
        }
    }

    /// At least one format and one present mode
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Everything scoring needs to know about one physical device
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    /// Vulkan handle
    pub device: vk::PhysicalDevice,
    /// Reported name
    pub name: String,
    /// Discrete, integrated, virtual, ...
    pub device_type: vk::PhysicalDeviceType,
    /// Largest supported 2D image dimension
    pub max_image_dimension_2d: u32,
    /// Geometry shader support
    pub geometry_shader: bool,
    /// Queue families found for the surface
    pub queue_families: QueueFamilyIndices,
    /// Every extension in [`required_device_extensions`] is available
    pub extensions_supported: bool,
    /// Surface support, only queried when the extensions are present
    pub swapchain_support: Option<SwapchainSupport>,
}

impl DeviceCandidate {
    /// Gather properties, features, queues, extensions and surface support
    pub fn query(
        instance: &ash::Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let available = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let available: Vec<CString> = available
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
            .collect();
        let extensions_supported = extensions_supported(&available);

        let swapchain_support = if extensions_supported {
            Some(SwapchainSupport::query(surface_loader, surface, device)?)
        } else {
            None
        };

        Ok(Self {
            device,
            name,
            device_type: properties.device_type,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            geometry_shader: features.geometry_shader == vk::TRUE,
            queue_families: QueueFamilyIndices::query(instance, surface_loader, surface, device)?,
            extensions_supported,
            swapchain_support,
        })
    }
}

/// True when every required device extension appears in `available`
pub fn extensions_supported(available: &[CString]) -> bool {
    required_device_extensions()
        .iter()
        .all(|required| available.iter().any(|name| name.as_c_str() == *required))
}

/// Suitability score; negative means the device can't be used at all
pub fn rate_device_suitability(candidate: &DeviceCandidate) -> i64 {
    let swapchain_adequate = candidate
        .swapchain_support
        .as_ref()
        .map_or(false, SwapchainSupport::is_adequate);

    if !candidate.geometry_shader
        || !candidate.queue_families.is_complete()
        || !candidate.extensions_supported
        || !swapchain_adequate
    {
        return -1;
    }

    let type_bonus = match candidate.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        _ => 0,
    };

    type_bonus + i64::from(candidate.max_image_dimension_2d)
}

/// Index of the best candidate. The earliest one wins ties.
pub fn select_best_candidate(candidates: &[DeviceCandidate]) -> VulkanResult<usize> {
    if candidates.is_empty() {
        return Err(VulkanError::NoDevice);
    }

    let (best_index, best_score) = candidates
        .iter()
        .map(rate_device_suitability)
        .enumerate()
        .fold((0, i64::MIN), |best, (index, score)| if score > best.1 { (index, score) } else { best });

    for candidate in candidates {
        log::debug!("GPU '{}' scored {}", candidate.name, rate_device_suitability(candidate));
    }

    if best_score < 0 {
        return Err(VulkanError::NoSuitableDevice);
    }

    Ok(best_index)
}

/// Enumerate every physical device and pick the most suitable one
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
) -> VulkanResult<DeviceCandidate> {
    let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };
    if devices.is_empty() {
        return Err(VulkanError::NoDevice);
    }

    let mut candidates = devices
        .into_iter()
        .map(|device| DeviceCandidate::query(instance, surface_loader, surface, device))
        .collect::<VulkanResult<Vec<_>>>()?;

    let best = select_best_candidate(&candidates)?;
    let selected = candidates.swap_remove(best);
    log::info!("Selected GPU: {}", selected.name);

    Ok(selected)
}
