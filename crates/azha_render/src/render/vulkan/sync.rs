//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for semaphores and fences, the per-frame-in-flight triple, and
//! the table that tracks which fence currently owns each swapchain image.

use super::error::{VulkanError, VulkanResult};
use ash::{vk, Device};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Wait for fence
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Reset fence
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]).map_err(VulkanError::Api) }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Frame synchronization objects for in-flight frame management
pub struct FrameSync {
    /// Signaled when the acquired image may be rendered to
    pub image_available: Semaphore,
    /// Signaled when rendering is done and the image may be presented
    pub render_finished: Semaphore,
    /// Signaled when the GPU has finished this frame slot's work
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects, with the fence already signaled
    pub fn new(device: Device) -> VulkanResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }
}

/// Which in-flight fence last claimed each swapchain image.
///
/// The presentation engine may hand images out in any order, so a frame slot
/// can acquire an image that another slot's submission is still drawing into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFenceTable {
    fences: Vec<vk::Fence>,
}

impl ImageFenceTable {
    /// A table with no image claimed
    pub fn new(image_count: usize) -> Self {
        Self {
            fences: vec![vk::Fence::null(); image_count],
        }
    }

    /// Fence currently responsible for `image_index`, if any
    pub fn get(&self, image_index: u32) -> Option<vk::Fence> {
        self.fences
            .get(image_index as usize)
            .copied()
            .filter(|fence| *fence != vk::Fence::null())
    }

    /// Fence a submit into `image_index` must wait on before `current` takes it over.
    ///
    /// `current` was already waited on when the image was acquired, so an image it
    /// still owns needs no further wait.
    pub fn fence_to_wait(&self, image_index: u32, current: vk::Fence) -> Option<vk::Fence> {
        self.get(image_index).filter(|fence| *fence != current)
    }

    /// Record that `fence` now owns `image_index`, returning the fence it replaced
    pub fn claim(&mut self, image_index: u32, fence: vk::Fence) -> VulkanResult<Option<vk::Fence>> {
        let slot = self.fences.get_mut(image_index as usize).ok_or_else(|| {
            VulkanError::protocol(format!("Image index {} is outside the swapchain", image_index))
        })?;

        let previous = std::mem::replace(slot, fence);
        Ok(Some(previous).filter(|fence| *fence != vk::Fence::null()))
    }

    /// Number of swapchain images tracked
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    /// True when the swapchain has no images
    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_new_table_has_no_owners() {
        let table = ImageFenceTable::new(3);
        assert_eq!(table.len(), 3);
        assert!((0..3).all(|index| table.get(index).is_none()));
    }

    #[test]
    fn test_claim_returns_previous_owner() {
        let mut table = ImageFenceTable::new(3);
        let first = vk::Fence::from_raw(0x10);
        let second = vk::Fence::from_raw(0x20);

        assert_eq!(table.claim(1, first).unwrap(), None);
        assert_eq!(table.get(1), Some(first));

        // Frame slots and image indices diverge: a second slot picks up image 1
        assert_eq!(table.claim(1, second).unwrap(), Some(first));
        assert_eq!(table.get(1), Some(second));
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn test_claim_out_of_range_is_rejected() {
        let mut table = ImageFenceTable::new(2);
        let result = table.claim(2, vk::Fence::from_raw(0x10));
        assert!(matches!(result, Err(VulkanError::ProtocolViolation { .. })));
    }

    #[test]
    fn test_fresh_image_needs_no_wait() {
        let table = ImageFenceTable::new(3);
        assert_eq!(table.fence_to_wait(1, vk::Fence::from_raw(1)), None);
    }

    #[test]
    fn test_image_held_by_other_slot_is_waited_on() {
        let mut table = ImageFenceTable::new(3);
        let slot_a = vk::Fence::from_raw(1);
        let slot_b = vk::Fence::from_raw(2);

        table.claim(2, slot_a).unwrap();

        assert_eq!(table.fence_to_wait(2, slot_b), Some(slot_a));
        assert_eq!(table.fence_to_wait(2, slot_a), None);
        assert_eq!(table.fence_to_wait(0, slot_b), None);
        assert_eq!(table.fence_to_wait(7, slot_b), None);
    }
}
