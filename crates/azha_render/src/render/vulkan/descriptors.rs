//! Descriptor set layouts, pools and writers
//!
//! Writes are checked against the layout's binding table when they are queued,
//! so a bad binding index or a multi-descriptor binding is rejected before the
//! pool or the device is touched.

use super::error::{VulkanError, VulkanResult};
use ash::{vk, Device};
use std::collections::HashMap;

/// Bindings of a descriptor set layout keyed by binding index
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    bindings: HashMap<u32, vk::DescriptorSetLayoutBinding>,
}

impl BindingTable {
    /// Binding registered at `index`
    pub fn get(&self, index: u32) -> Option<&vk::DescriptorSetLayoutBinding> {
        self.bindings.get(&index)
    }

    /// Whether `index` is registered
    pub fn contains(&self, index: u32) -> bool {
        self.bindings.contains_key(&index)
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True when no binding is registered
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings ordered by index
    pub fn sorted(&self) -> Vec<vk::DescriptorSetLayoutBinding> {
        let mut bindings: Vec<_> = self.bindings.values().copied().collect();
        bindings.sort_by_key(|binding| binding.binding);
        bindings
    }

    fn single_descriptor(&self, index: u32) -> VulkanResult<&vk::DescriptorSetLayoutBinding> {
        let binding = self
            .bindings
            .get(&index)
            .ok_or(VulkanError::UnknownBinding { binding: index })?;

        if binding.descriptor_count != 1 {
            return Err(VulkanError::UnsupportedDescriptorCount {
                binding: index,
                count: binding.descriptor_count,
            });
        }
        Ok(binding)
    }
}

/// Descriptor set layout builder for creating reusable layouts
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutBuilder {
    table: BindingTable,
}

impl DescriptorSetLayoutBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register binding `index`; each index may only be used once
    pub fn add_binding(
        mut self,
        index: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> VulkanResult<Self> {
        if self.table.contains(index) {
            return Err(VulkanError::DuplicateBinding { binding: index });
        }

        let binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(index)
            .descriptor_type(descriptor_type)
            .descriptor_count(count)
            .stage_flags(stage_flags)
            .build();
        self.table.bindings.insert(index, binding);
        Ok(self)
    }

    /// Bindings registered so far
    pub fn bindings(&self) -> &BindingTable {
        &self.table
    }

    /// Create the layout
    pub fn build(self, device: Device) -> VulkanResult<DescriptorSetLayout> {
        let bindings = self.table.sorted();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(DescriptorSetLayout {
            device,
            layout,
            table: self.table,
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
    table: BindingTable,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Bindings the layout was built from
    pub fn bindings(&self) -> &BindingTable {
        &self.table
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool with a fixed capacity
pub struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a pool holding at most `max_sets` sets drawn from `pool_sizes`
    pub fn new(
        device: Device,
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VulkanResult<Self> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(flags)
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, pool })
    }

    /// Allocate one set; `None` when the pool is exhausted or fragmented
    pub fn allocate_descriptor(&self, layout: vk::DescriptorSetLayout) -> Option<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        match unsafe { self.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets.into_iter().next(),
            Err(e) => {
                log::warn!("Failed to allocate descriptor set: {:?}", e);
                None
            }
        }
    }

    /// Return sets to the pool; requires `FREE_DESCRIPTOR_SET`
    pub fn free_descriptors(&self, descriptors: &[vk::DescriptorSet]) -> VulkanResult<()> {
        if descriptors.is_empty() {
            return Ok(());
        }
        unsafe {
            self.device
                .free_descriptor_sets(self.pool, descriptors)
                .map_err(VulkanError::Api)
        }
    }

    /// Invalidate every set allocated from this pool
    pub fn reset_pool(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum DescriptorInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    info: DescriptorInfo,
}

/// Validated writes waiting to be applied to a set
#[derive(Debug, Clone, Default)]
pub struct DescriptorWrites {
    writes: Vec<PendingWrite>,
}

impl DescriptorWrites {
    /// Queue a buffer write for `binding`
    pub fn push_buffer(&mut self, table: &BindingTable, binding: u32, info: vk::DescriptorBufferInfo) -> VulkanResult<()> {
        self.push(table, binding, DescriptorInfo::Buffer(info))
    }

    /// Queue an image write for `binding`
    pub fn push_image(&mut self, table: &BindingTable, binding: u32, info: vk::DescriptorImageInfo) -> VulkanResult<()> {
        self.push(table, binding, DescriptorInfo::Image(info))
    }

    fn push(&mut self, table: &BindingTable, binding: u32, info: DescriptorInfo) -> VulkanResult<()> {
        let layout_binding = table.single_descriptor(binding)?;
        self.writes.push(PendingWrite {
            binding,
            descriptor_type: layout_binding.descriptor_type,
            info,
        });
        Ok(())
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Native write structures targeting `set`.
    ///
    /// The returned structures point into `self` and must not outlive it.
    pub fn resolve(&self, set: vk::DescriptorSet) -> Vec<vk::WriteDescriptorSet> {
        self.writes
            .iter()
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.descriptor_type);

                match &write.info {
                    DescriptorInfo::Buffer(info) => builder.buffer_info(std::slice::from_ref(info)).build(),
                    DescriptorInfo::Image(info) => builder.image_info(std::slice::from_ref(info)).build(),
                }
            })
            .collect()
    }
}

/// Fills descriptor sets of one layout from one pool
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    writes: DescriptorWrites,
}

impl<'a> DescriptorWriter<'a> {
    /// Writer for sets of `layout` allocated from `pool`
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: DescriptorWrites::default(),
        }
    }

    /// Bind a buffer range at `binding`
    pub fn write_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> VulkanResult<Self> {
        self.writes.push_buffer(self.layout.bindings(), binding, info)?;
        Ok(self)
    }

    /// Bind an image at `binding`
    pub fn write_image(mut self, binding: u32, info: vk::DescriptorImageInfo) -> VulkanResult<Self> {
        self.writes.push_image(self.layout.bindings(), binding, info)?;
        Ok(self)
    }

    /// Allocate a set and apply the queued writes; `None` when the pool is exhausted
    pub fn build(&self) -> Option<vk::DescriptorSet> {
        let set = self.pool.allocate_descriptor(self.layout.handle())?;
        self.overwrite(set);
        Some(set)
    }

    /// Apply the queued writes to an existing set
    pub fn overwrite(&self, set: vk::DescriptorSet) {
        let writes = self.writes.resolve(set);
        unsafe {
            self.pool.device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn uniform_and_sampler() -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX, 1)
            .unwrap()
            .add_binding(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
                1,
            )
            .unwrap()
            .add_binding(2, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::ALL_GRAPHICS, 4)
            .unwrap()
    }

    fn buffer_info() -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: vk::Buffer::from_raw(0x42),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    #[test]
    fn test_duplicate_binding_is_rejected() {
        let result = uniform_and_sampler().add_binding(
            1,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
            1,
        );
        assert!(matches!(result, Err(VulkanError::DuplicateBinding { binding: 1 })));
    }

    #[test]
    fn test_bindings_are_recorded_in_index_order() {
        let builder = uniform_and_sampler();
        let sorted = builder.bindings().sorted();

        assert_eq!(sorted.iter().map(|b| b.binding).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(sorted[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sorted[2].descriptor_count, 4);
        assert_eq!(sorted[0].stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_write_to_unknown_binding_fails_before_queueing() {
        let builder = uniform_and_sampler();
        let mut writes = DescriptorWrites::default();

        let result = writes.push_buffer(builder.bindings(), 7, buffer_info());

        assert!(matches!(result, Err(VulkanError::UnknownBinding { binding: 7 })));
        assert!(writes.is_empty());
    }

    #[test]
    fn test_write_to_array_binding_is_unsupported() {
        let builder = uniform_and_sampler();
        let mut writes = DescriptorWrites::default();

        let result = writes.push_buffer(builder.bindings(), 2, buffer_info());

        assert!(matches!(
            result,
            Err(VulkanError::UnsupportedDescriptorCount { binding: 2, count: 4 })
        ));
        assert!(writes.is_empty());
    }

    #[test]
    fn test_resolved_writes_take_type_from_layout() {
        let builder = uniform_and_sampler();
        let mut writes = DescriptorWrites::default();
        writes.push_buffer(builder.bindings(), 0, buffer_info()).unwrap();
        writes
            .push_image(
                builder.bindings(),
                1,
                vk::DescriptorImageInfo {
                    sampler: vk::Sampler::from_raw(0x7),
                    image_view: vk::ImageView::from_raw(0x8),
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            )
            .unwrap();

        let set = vk::DescriptorSet::from_raw(0x99);
        let resolved = writes.resolve(set);

        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|write| write.dst_set == set && write.descriptor_count == 1));

        assert_eq!(resolved[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert!(!resolved[0].p_buffer_info.is_null());
        assert!(resolved[0].p_image_info.is_null());

        assert_eq!(resolved[1].dst_binding, 1);
        assert_eq!(resolved[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert!(!resolved[1].p_image_info.is_null());
    }

    #[test]
    fn test_overwrite_retargets_every_write() {
        let builder = uniform_and_sampler();
        let mut writes = DescriptorWrites::default();
        writes.push_buffer(builder.bindings(), 0, buffer_info()).unwrap();

        let first = writes.resolve(vk::DescriptorSet::from_raw(1));
        let second = writes.resolve(vk::DescriptorSet::from_raw(2));

        assert_eq!(first[0].dst_set, vk::DescriptorSet::from_raw(1));
        assert_eq!(second[0].dst_set, vk::DescriptorSet::from_raw(2));
    }
}
