//! # Render passes
//!
//! The frame is drawn by three passes, each owning its render pass, pipeline,
//! framebuffers and descriptor state:
//!
//! - [`shadow::ShadowPass`]: cascaded depth into one layered image
//! - [`geometry::GeometryPass`]: scene into the [`gbuffer::GBuffer`]
//! - [`lighting::LightingPass`]: full-screen shading into the swapchain image

pub mod gbuffer;
pub mod geometry;
pub mod lighting;
pub mod shadow;

use std::path::{Path, PathBuf};

use crate::render::device::{BufferDesc, BufferHandle, DescriptorPoolHandle, DescriptorSetHandle, GpuDevice};
use crate::render::resources::descriptor::{DescriptorPoolBuilder, DescriptorSetLayout, DescriptorWriter};
use crate::render::{RenderError, RenderResult};

/// Compiled shader `name` inside `shader_dir`
pub(crate) fn shader_path(shader_dir: &Path, name: &str) -> PathBuf {
    shader_dir.join(name)
}

/// A set of host-visible uniform buffers, each bound through its own
/// descriptor set at binding 0
///
/// Passes keep one entry per swapchain image for data rewritten every frame,
/// or a single entry for data that only changes on resize.
#[derive(Debug)]
pub struct UniformSets {
    label: &'static str,
    size: u64,
    pool: Option<DescriptorPoolHandle>,
    buffers: Vec<BufferHandle>,
    sets: Vec<DescriptorSetHandle>,
}

impl UniformSets {
    /// `count` buffers of `size` bytes with sets of `layout`, whose binding 0
    /// must be a plain uniform buffer
    pub fn new(
        device: &mut dyn GpuDevice,
        label: &'static str,
        layout: &DescriptorSetLayout,
        size: u64,
        count: u32,
    ) -> RenderResult<Self> {
        let pool = DescriptorPoolBuilder::new().reserve(layout, count).build(device)?;
        let mut uniforms = Self { label, size, pool: Some(pool), buffers: Vec::new(), sets: Vec::new() };
        for _ in 0..count {
            if let Err(err) = uniforms.push(device, layout) {
                uniforms.destroy(device);
                return Err(err);
            }
        }
        Ok(uniforms)
    }

    fn push(&mut self, device: &mut dyn GpuDevice, layout: &DescriptorSetLayout) -> RenderResult<()> {
        let pool = self.pool.ok_or_else(|| RenderError::invalid(format!("{} sets already destroyed", self.label)))?;
        let buffer = device.create_buffer(&BufferDesc::uniform(self.label, self.size))?;
        self.buffers.push(buffer);
        let set = DescriptorWriter::new().uniform_buffer(0, buffer, self.size).allocate(device, pool, layout)?;
        self.sets.push(set);
        Ok(())
    }

    /// Number of buffer/set pairs
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// True when created with a count of zero
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Set for entry `index`
    pub fn set(&self, index: u32) -> RenderResult<DescriptorSetHandle> {
        self.sets
            .get(index as usize)
            .copied()
            .ok_or_else(|| RenderError::ResourceNotFound(format!("{} set {}", self.label, index)))
    }

    /// Buffer for entry `index`
    pub fn buffer(&self, index: u32) -> Option<BufferHandle> {
        self.buffers.get(index as usize).copied()
    }

    /// Overwrite entry `index` from offset 0
    pub fn write(&self, device: &mut dyn GpuDevice, index: u32, data: &[u8]) -> RenderResult<()> {
        let buffer = self
            .buffer(index)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("{} buffer {}", self.label, index)))?;
        device.write_buffer(buffer, 0, data)
    }

    /// Overwrite every entry
    pub fn write_all(&self, device: &mut dyn GpuDevice, data: &[u8]) -> RenderResult<()> {
        for &buffer in &self.buffers {
            device.write_buffer(buffer, 0, data)?;
        }
        Ok(())
    }

    /// Release buffers and the pool (and with it every set); later calls do nothing
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        self.sets.clear();
        for buffer in self.buffers.drain(..) {
            device.destroy_buffer(buffer);
        }
        if let Some(pool) = self.pool.take() {
            device.destroy_descriptor_pool(pool);
        }
    }
}
