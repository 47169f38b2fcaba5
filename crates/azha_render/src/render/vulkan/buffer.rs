//! GPU buffers backed by allocator memory, host mapping and upload copies
//!
//! Host writes follow a strict `map` → `write` → `unmap` sequence. The state
//! machine lives in [`HostMapping`] so it can be exercised against plain host
//! memory.

use super::context::{BufferDesc, GpuContext};
use super::error::{VulkanError, VulkanResult};
use ash::vk;
use std::ptr::NonNull;
use std::sync::Arc;

/// Mapping state of one buffer: capacity, whether the memory is host accessible,
/// and the live host pointer while mapped
#[derive(Debug)]
pub struct HostMapping {
    capacity: vk::DeviceSize,
    mappable: bool,
    mapped: Option<NonNull<u8>>,
}

impl HostMapping {
    /// Track a buffer of `capacity` bytes allocated with `properties`
    pub fn new(capacity: vk::DeviceSize, properties: vk::MemoryPropertyFlags) -> Self {
        Self {
            capacity,
            mappable: properties
                .intersects(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT),
            mapped: None,
        }
    }

    /// Fail unless a new mapping may be created
    pub fn check_can_map(&self) -> VulkanResult<()> {
        if self.mapped.is_some() {
            return Err(VulkanError::AlreadyMapped);
        }
        if !self.mappable {
            return Err(VulkanError::NotMappable);
        }
        Ok(())
    }

    /// Record the pointer returned by the allocator
    ///
    /// # Safety
    ///
    /// `ptr` must be null or valid for writes of `capacity` bytes until [`Self::end`]
    /// is called.
    pub(crate) unsafe fn begin(&mut self, ptr: *mut u8) -> VulkanResult<NonNull<u8>> {
        self.check_can_map()?;
        let ptr = NonNull::new(ptr).ok_or(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    /// Copy `data` to the start of the mapped region
    pub fn write(&mut self, data: &[u8]) -> VulkanResult<()> {
        let ptr = self.mapped.ok_or(VulkanError::NotMapped)?;

        let requested = data.len() as vk::DeviceSize;
        if requested > self.capacity {
            return Err(VulkanError::SizeExceeded {
                requested,
                capacity: self.capacity,
            });
        }

        // SAFETY: `begin` requires the region to hold `capacity` bytes until `end`
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());
        }
        Ok(())
    }

    /// Drop the host pointer; fails when nothing is mapped
    pub fn end(&mut self) -> VulkanResult<()> {
        self.mapped.take().map(|_| ()).ok_or(VulkanError::NotMapped)
    }

    /// Whether a mapping is active
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Whether the memory allows host access at all
    pub fn is_mappable(&self) -> bool {
        self.mappable
    }

    /// Buffer size in bytes
    pub fn capacity(&self) -> vk::DeviceSize {
        self.capacity
    }
}

/// Linear GPU buffer with its allocation
pub struct Buffer {
    context: Arc<GpuContext>,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    mapping: HostMapping,
}

impl Buffer {
    /// Allocate a buffer through the context's allocator
    pub fn new(context: Arc<GpuContext>, desc: &BufferDesc) -> VulkanResult<Self> {
        let (buffer, allocation) = context.create_buffer(desc)?;

        Ok(Self {
            mapping: HostMapping::new(desc.size, desc.properties),
            context,
            buffer,
            allocation,
        })
    }

    /// Device-local buffer filled later through a staging copy
    pub fn device_local(context: Arc<GpuContext>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        Self::new(
            context,
            &BufferDesc {
                size,
                usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                memory_usage: vk_mem::MemoryUsage::AutoPreferDevice,
                allocation_flags: vk_mem::AllocationCreateFlags::WITHIN_BUDGET,
            },
        )
    }

    /// Map the whole buffer into host memory
    pub fn map(&mut self) -> VulkanResult<NonNull<u8>> {
        self.mapping.check_can_map()?;

        let ptr = unsafe {
            self.context
                .allocator()
                .map_memory(&mut self.allocation)
                .map_err(VulkanError::Api)?
        };

        // SAFETY: the allocator maps the whole allocation, at least `size` bytes,
        // and it stays mapped until `unmap`
        match unsafe { self.mapping.begin(ptr) } {
            Ok(ptr) => Ok(ptr),
            Err(e) => {
                unsafe {
                    self.context.allocator().unmap_memory(&mut self.allocation);
                }
                Err(e)
            }
        }
    }

    /// Copy `data` to the start of the mapped buffer
    pub fn write(&mut self, data: &[u8]) -> VulkanResult<()> {
        self.mapping.write(data)
    }

    /// Copy a slice of plain values to the start of the mapped buffer
    pub fn write_slice<T: bytemuck::Pod>(&mut self, data: &[T]) -> VulkanResult<()> {
        self.write(bytemuck::cast_slice(data))
    }

    /// Release the host mapping
    pub fn unmap(&mut self) -> VulkanResult<()> {
        self.mapping.end()?;
        unsafe {
            self.context.allocator().unmap_memory(&mut self.allocation);
        }
        Ok(())
    }

    /// Copy all of `src` into `dst` with a one-shot command buffer and wait for it.
    ///
    /// Host writes to `src` are made visible to the transfer before the copy and the
    /// copied range of `dst` is made visible to any later access afterwards.
    pub fn copy(context: &GpuContext, src: &Buffer, dst: &Buffer) -> VulkanResult<()> {
        let size = copy_size(src.size(), dst.size())?;
        context
            .transient_command_pool()
            .submit_single_time(context.transfer_queue(), |device, command_buffer| {
                let before_copy = vk::BufferMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::HOST_WRITE)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(src.handle())
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
                    .build();

                let after_copy = vk::BufferMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(dst.handle())
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
                    .build();

                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                };

                unsafe {
                    device.cmd_pipeline_barrier(
                        command_buffer,
                        vk::PipelineStageFlags::HOST,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[before_copy],
                        &[],
                    );
                    device.cmd_copy_buffer(command_buffer, src.handle(), dst.handle(), &[region]);
                    device.cmd_pipeline_barrier(
                        command_buffer,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[after_copy],
                        &[],
                    );
                }
            })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.mapping.capacity()
    }

    /// Whether the memory allows host mapping
    pub fn is_mappable(&self) -> bool {
        self.mapping.is_mappable()
    }

    /// Whether a host mapping is active
    pub fn is_mapped(&self) -> bool {
        self.mapping.is_mapped()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.mapping.is_mapped() {
            log::warn!("Buffer {:?} dropped while mapped", self.buffer);
            if self.unmap().is_err() {
                log::error!("Failed to unmap buffer {:?}", self.buffer);
            }
        }
        unsafe {
            self.context
                .allocator()
                .destroy_buffer(self.buffer, &mut self.allocation);
        }
    }
}

/// Bytes moved by a whole-buffer copy; the source must fit in the destination
pub fn copy_size(src_size: vk::DeviceSize, dst_size: vk::DeviceSize) -> VulkanResult<vk::DeviceSize> {
    if src_size > dst_size {
        return Err(VulkanError::SizeExceeded {
            requested: src_size,
            capacity: dst_size,
        });
    }
    Ok(src_size)
}

/// Host-visible transfer source used for a single upload
pub struct StagingBuffer {
    buffer: Buffer,
}

impl StagingBuffer {
    /// Allocate a staging buffer of `size` bytes
    pub fn new(context: Arc<GpuContext>, size: vk::DeviceSize) -> VulkanResult<Self> {
        let buffer = Buffer::new(
            context,
            &BufferDesc {
                size,
                usage: vk::BufferUsageFlags::TRANSFER_SRC,
                properties: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                memory_usage: vk_mem::MemoryUsage::AutoPreferHost,
                allocation_flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_ALLOW_TRANSFER_INSTEAD
                    | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
                    | vk_mem::AllocationCreateFlags::WITHIN_BUDGET,
            },
        )?;

        Ok(Self { buffer })
    }

    /// Staging buffer already holding `data`, mapped and unmapped again
    pub fn with_data(context: Arc<GpuContext>, data: &[u8]) -> VulkanResult<Self> {
        let mut staging = Self::new(context, data.len() as vk::DeviceSize)?;
        staging.buffer.map()?;
        staging.buffer.write(data)?;
        staging.buffer.unmap()?;
        Ok(staging)
    }

    /// Copy the staged bytes into `dst` and consume the staging buffer
    pub fn upload_to(self, context: &GpuContext, dst: &Buffer) -> VulkanResult<()> {
        Buffer::copy(context, &self.buffer, dst)
    }

    /// The underlying buffer
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// The underlying buffer, for manual map/write/unmap
    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }
}

/// Upload `data` into a new device-local buffer with `usage` through a staging buffer
pub fn upload_device_local(
    context: &Arc<GpuContext>,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> VulkanResult<Buffer> {
    let staging = StagingBuffer::with_data(Arc::clone(context), data)?;
    let buffer = Buffer::device_local(Arc::clone(context), data.len() as vk::DeviceSize, usage)?;
    staging.upload_to(context, &buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_visible() -> vk::MemoryPropertyFlags {
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
    }

    #[test]
    fn test_write_before_map_fails() {
        let mut mapping = HostMapping::new(16, host_visible());
        assert!(matches!(mapping.write(&[1, 2, 3]), Err(VulkanError::NotMapped)));
    }

    #[test]
    fn test_double_map_fails() {
        let mut backing = vec![0u8; 16];
        let mut mapping = HostMapping::new(16, host_visible());

        unsafe { mapping.begin(backing.as_mut_ptr()) }.unwrap();
        assert!(matches!(mapping.check_can_map(), Err(VulkanError::AlreadyMapped)));
        assert!(matches!(unsafe { mapping.begin(backing.as_mut_ptr()) }, Err(VulkanError::AlreadyMapped)));
    }

    #[test]
    fn test_unmap_without_map_fails() {
        let mut mapping = HostMapping::new(16, host_visible());
        assert!(matches!(mapping.end(), Err(VulkanError::NotMapped)));
    }

    #[test]
    fn test_device_local_memory_is_not_mappable() {
        let mapping = HostMapping::new(16, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert!(!mapping.is_mappable());
        assert!(matches!(mapping.check_can_map(), Err(VulkanError::NotMappable)));
    }

    #[test]
    fn test_either_host_flag_makes_memory_mappable() {
        assert!(HostMapping::new(4, vk::MemoryPropertyFlags::HOST_VISIBLE).is_mappable());
        assert!(HostMapping::new(4, vk::MemoryPropertyFlags::HOST_COHERENT).is_mappable());
    }

    #[test]
    fn test_write_is_byte_exact() {
        let mut backing = vec![0u8; 8];
        let mut mapping = HostMapping::new(8, host_visible());
        let data = [0xde, 0xad, 0xbe, 0xef, 0x01];

        unsafe { mapping.begin(backing.as_mut_ptr()) }.unwrap();
        mapping.write(&data).unwrap();
        mapping.end().unwrap();

        assert_eq!(&backing[..5], &data);
        assert_eq!(&backing[5..], &[0, 0, 0]);
        assert!(!mapping.is_mapped());
    }

    #[test]
    fn test_oversized_write_is_rejected_untouched() {
        let mut backing = vec![0u8; 4];
        let mut mapping = HostMapping::new(4, host_visible());

        unsafe { mapping.begin(backing.as_mut_ptr()) }.unwrap();
        let result = mapping.write(&[1, 2, 3, 4, 5]);

        assert!(matches!(
            result,
            Err(VulkanError::SizeExceeded {
                requested: 5,
                capacity: 4
            })
        ));
        assert_eq!(backing, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_remap_after_unmap() {
        let mut backing = vec![0u8; 4];
        let mut mapping = HostMapping::new(4, host_visible());

        unsafe { mapping.begin(backing.as_mut_ptr()) }.unwrap();
        mapping.write(&[1, 1, 1, 1]).unwrap();
        mapping.end().unwrap();

        unsafe { mapping.begin(backing.as_mut_ptr()) }.unwrap();
        mapping.write(&[2, 2]).unwrap();
        mapping.end().unwrap();

        assert_eq!(backing, vec![2, 2, 1, 1]);
    }

    #[test]
    fn test_null_mapping_pointer_is_an_error() {
        let mut mapping = HostMapping::new(4, host_visible());
        assert!(unsafe { mapping.begin(std::ptr::null_mut()) }.is_err());
        assert!(!mapping.is_mapped());
    }

    #[test]
    fn test_write_never_exceeds_declared_capacity() {
        let mut arena = [0u8; 8];
        let mut mapping = HostMapping::new(4, host_visible());

        unsafe { mapping.begin(arena.as_mut_ptr()) }.unwrap();
        assert!(matches!(
            mapping.write(&[0xAA; 8]),
            Err(VulkanError::SizeExceeded {
                requested: 8,
                capacity: 4
            })
        ));
        mapping.write(&[0xAA; 4]).unwrap();
        mapping.end().unwrap();

        assert_eq!(arena, [0xAA, 0xAA, 0xAA, 0xAA, 0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_size_accepts_fitting_source() {
        assert_eq!(copy_size(64, 64).unwrap(), 64);
        assert_eq!(copy_size(16, 64).unwrap(), 16);
    }

    #[test]
    fn test_copy_size_rejects_larger_source() {
        assert!(matches!(
            copy_size(128, 64),
            Err(VulkanError::SizeExceeded {
                requested: 128,
                capacity: 64
            })
        ));
    }
}
