//! Descriptor layouts, pools, writes and the per-texture set cache

use std::collections::HashMap;

use ash::vk;

use super::texture::TextureId;
use crate::render::device::{
    BufferHandle, DescriptorPoolHandle, DescriptorResource, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorWrite, GpuDevice, ImageHandle, LayoutBinding, PoolSize, SamplerHandle,
};
use crate::render::RenderResult;

/// Builds a descriptor set layout one binding at a time
#[derive(Debug, Default, Clone)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<LayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Empty layout
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, binding: u32, descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(LayoutBinding { binding, descriptor_type, count: 1, stages });
        self
    }

    /// Uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, stages)
    }

    /// Uniform buffer addressed with a dynamic offset at bind time
    pub fn add_dynamic_uniform_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, stages)
    }

    /// Combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stages)
    }

    /// Create the layout
    pub fn build(self, device: &mut dyn GpuDevice) -> RenderResult<DescriptorSetLayout> {
        let handle = device.create_descriptor_set_layout(&self.bindings)?;
        Ok(DescriptorSetLayout { handle, bindings: self.bindings })
    }
}

/// A created layout and the bindings it was built from
#[derive(Debug, Clone)]
pub struct DescriptorSetLayout {
    handle: DescriptorSetLayoutHandle,
    bindings: Vec<LayoutBinding>,
}

impl DescriptorSetLayout {
    /// Device handle
    pub fn handle(&self) -> DescriptorSetLayoutHandle {
        self.handle
    }

    /// Bindings in declaration order
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    /// Release the layout
    pub fn destroy(&self, device: &mut dyn GpuDevice) {
        device.destroy_descriptor_set_layout(self.handle);
    }
}

/// Sizes a pool for a known number of sets per layout
#[derive(Debug, Default, Clone)]
pub struct DescriptorPoolBuilder {
    sizes: HashMap<vk::DescriptorType, u32>,
    max_sets: u32,
}

impl DescriptorPoolBuilder {
    /// Pool with no capacity yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve room for `sets` sets of `layout`
    pub fn reserve(mut self, layout: &DescriptorSetLayout, sets: u32) -> Self {
        for binding in layout.bindings() {
            *self.sizes.entry(binding.descriptor_type).or_insert(0) += binding.count * sets;
        }
        self.max_sets += sets;
        self
    }

    /// Create the pool
    pub fn build(self, device: &mut dyn GpuDevice) -> RenderResult<DescriptorPoolHandle> {
        let mut sizes: Vec<_> = self
            .sizes
            .into_iter()
            .map(|(descriptor_type, count)| PoolSize { descriptor_type, count })
            .collect();
        sizes.sort_by_key(|size| size.descriptor_type.as_raw());
        device.create_descriptor_pool(&sizes, self.max_sets)
    }
}

/// Collects writes for one set
#[derive(Debug, Default, Clone)]
pub struct DescriptorWriter {
    writes: Vec<DescriptorWrite>,
}

impl DescriptorWriter {
    /// No writes
    pub fn new() -> Self {
        Self::default()
    }

    /// Whole-record uniform buffer write
    pub fn uniform_buffer(mut self, binding: u32, buffer: BufferHandle, range: u64) -> Self {
        self.writes.push(DescriptorWrite {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            resource: DescriptorResource::Buffer { buffer, offset: 0, range },
        });
        self
    }

    /// Dynamic uniform buffer write; `range` is one record
    pub fn dynamic_uniform_buffer(mut self, binding: u32, buffer: BufferHandle, range: u64) -> Self {
        self.writes.push(DescriptorWrite {
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            resource: DescriptorResource::Buffer { buffer, offset: 0, range },
        });
        self
    }

    /// Sampled image write
    pub fn image(mut self, binding: u32, image: ImageHandle, sampler: SamplerHandle, layout: vk::ImageLayout) -> Self {
        self.writes.push(DescriptorWrite {
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            resource: DescriptorResource::SampledImage { image, sampler, layout },
        });
        self
    }

    /// Apply the writes to `set`
    pub fn update(self, device: &mut dyn GpuDevice, set: DescriptorSetHandle) -> RenderResult<()> {
        device.update_descriptor_set(set, &self.writes)
    }

    /// Allocate a set of `layout` from `pool` and apply the writes to it
    pub fn allocate(
        self,
        device: &mut dyn GpuDevice,
        pool: DescriptorPoolHandle,
        layout: &DescriptorSetLayout,
    ) -> RenderResult<DescriptorSetHandle> {
        let set = device.allocate_descriptor_set(pool, layout.handle())?;
        self.update(device, set)?;
        Ok(set)
    }
}

/// One sampler set per texture, created on first use and reused until the
/// owning pool is destroyed
#[derive(Debug, Default)]
pub struct TextureDescriptorCache {
    sets: HashMap<TextureId, DescriptorSetHandle>,
}

impl TextureDescriptorCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Set for `texture`, allocating and writing it on the first request
    pub fn get_or_create(
        &mut self,
        device: &mut dyn GpuDevice,
        pool: DescriptorPoolHandle,
        layout: &DescriptorSetLayout,
        texture: TextureId,
        image: ImageHandle,
        sampler: SamplerHandle,
    ) -> RenderResult<DescriptorSetHandle> {
        if let Some(&set) = self.sets.get(&texture) {
            return Ok(set);
        }
        let set = DescriptorWriter::new()
            .image(0, image, sampler, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .allocate(device, pool, layout)?;
        self.sets.insert(texture, set);
        Ok(set)
    }

    /// Cached set for `texture`
    pub fn get(&self, texture: TextureId) -> Option<DescriptorSetHandle> {
        self.sets.get(&texture).copied()
    }

    /// Cached sets
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Forget every set; call when the pool they came from is destroyed
    pub fn clear(&mut self) {
        self.sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::headless::HeadlessDevice;
    use crate::render::device::{ImageDesc, SamplerDesc};
    use slotmap::SlotMap;

    #[test]
    fn pool_reserves_per_layout_binding() {
        let mut device = HeadlessDevice::new(4, 4, 2);
        let layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .build(&mut device)
            .unwrap();
        let pool = DescriptorPoolBuilder::new().reserve(&layout, 2).build(&mut device).unwrap();

        for _ in 0..2 {
            device.allocate_descriptor_set(pool, layout.handle()).unwrap();
        }
        assert!(device.allocate_descriptor_set(pool, layout.handle()).is_err());
    }

    #[test]
    fn texture_sets_are_created_once_per_texture() {
        let mut device = HeadlessDevice::new(4, 4, 2);
        let layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .build(&mut device)
            .unwrap();
        let pool = DescriptorPoolBuilder::new().reserve(&layout, 4).build(&mut device).unwrap();
        let image = device
            .create_image(&ImageDesc {
                label: "texture",
                width: 2,
                height: 2,
                format: vk::Format::R8G8B8A8_SRGB,
                usage: vk::ImageUsageFlags::SAMPLED,
                mip_levels: 1,
                array_layers: 1,
            })
            .unwrap();
        let sampler = device.create_sampler(&SamplerDesc::texture()).unwrap();

        let mut ids: SlotMap<TextureId, ()> = SlotMap::with_key();
        let (a, b) = (ids.insert(()), ids.insert(()));
        let mut cache = TextureDescriptorCache::new();

        let first = cache.get_or_create(&mut device, pool, &layout, a, image, sampler).unwrap();
        let again = cache.get_or_create(&mut device, pool, &layout, a, image, sampler).unwrap();
        let other = cache.get_or_create(&mut device, pool, &layout, b, image, sampler).unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(cache.len(), 2);
        assert_eq!(device.resource_counts().descriptor_sets, 2);
    }
}
