//! # Headless device
//!
//! [`GpuDevice`] without a GPU. Objects are bookkeeping entries, buffers are
//! byte vectors and submitted work completes the moment it is submitted.
//! Every submission is kept for inspection and checked against the usage
//! rules the Vulkan validation layers enforce for this renderer: render pass
//! nesting, bound state at draw time, descriptor layout compatibility,
//! dynamic offset alignment and range, fence and semaphore signaling.
//!
//! Violations never abort; they accumulate in [`HeadlessDevice::validation_errors`].

use std::collections::HashMap;

use ash::vk;
use slotmap::SlotMap;

use super::{
    AcquireOutcome, BufferDesc, BufferHandle, Command, CommandBufferHandle, DescriptorPoolHandle, DescriptorResource,
    DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite, DeviceLimits, FenceHandle, FramebufferDesc,
    FramebufferHandle, GpuDevice, ImageDesc, ImageHandle, LayoutBinding, MemoryLocation, PipelineDesc, PipelineHandle,
    PoolSize, PresentOutcome, RenderPassDesc, RenderPassHandle, SamplerDesc, SamplerHandle, SemaphoreHandle, Submission,
    SwapchainInfo,
};
use crate::render::{RenderError, RenderResult};

struct BufferEntry {
    label: &'static str,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    data: Vec<u8>,
}

struct ImageEntry {
    desc: ImageDesc,
    swapchain: bool,
    uploaded: bool,
}

struct PoolEntry {
    max_sets: u32,
    sets: Vec<DescriptorSetHandle>,
}

struct SetEntry {
    pool: DescriptorPoolHandle,
    layout: DescriptorSetLayoutHandle,
    bindings: HashMap<u32, DescriptorResource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Initial,
    Recording,
    Executable,
}

struct CommandBufferEntry {
    state: RecordState,
    commands: Vec<Command>,
}

/// A submission as the headless queue saw it
#[derive(Debug, Clone)]
pub struct SubmittedWork {
    /// Commands, in recording order
    pub commands: Vec<Command>,
    /// Render pass label for each command, `None` outside a pass
    pub pass_labels: Vec<Option<&'static str>>,
    /// Waited semaphores
    pub waits: Vec<SemaphoreHandle>,
    /// Signaled semaphores
    pub signals: Vec<SemaphoreHandle>,
    /// Signaled fence
    pub fence: Option<FenceHandle>,
}

/// Live objects per kind; swapchain images are owned by the swapchain and
/// not counted
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCounts {
    /// Buffers
    pub buffers: usize,
    /// Images
    pub images: usize,
    /// Samplers
    pub samplers: usize,
    /// Descriptor set layouts
    pub descriptor_set_layouts: usize,
    /// Descriptor pools
    pub descriptor_pools: usize,
    /// Descriptor sets
    pub descriptor_sets: usize,
    /// Render passes
    pub render_passes: usize,
    /// Framebuffers
    pub framebuffers: usize,
    /// Pipelines
    pub pipelines: usize,
    /// Command buffers
    pub command_buffers: usize,
    /// Fences
    pub fences: usize,
    /// Semaphores
    pub semaphores: usize,
}

/// Recording device for tests and GPU-less tooling
pub struct HeadlessDevice {
    limits: DeviceLimits,
    swapchain: SwapchainInfo,
    swapchain_images: Vec<ImageHandle>,
    buffers: SlotMap<BufferHandle, BufferEntry>,
    images: SlotMap<ImageHandle, ImageEntry>,
    samplers: SlotMap<SamplerHandle, SamplerDesc>,
    layouts: SlotMap<DescriptorSetLayoutHandle, Vec<LayoutBinding>>,
    pools: SlotMap<DescriptorPoolHandle, PoolEntry>,
    sets: SlotMap<DescriptorSetHandle, SetEntry>,
    render_passes: SlotMap<RenderPassHandle, RenderPassDesc>,
    framebuffers: SlotMap<FramebufferHandle, FramebufferDesc>,
    pipelines: SlotMap<PipelineHandle, PipelineDesc>,
    command_buffers: SlotMap<CommandBufferHandle, CommandBufferEntry>,
    fences: SlotMap<FenceHandle, bool>,
    semaphores: SlotMap<SemaphoreHandle, bool>,
    submissions: Vec<SubmittedWork>,
    presented: Vec<u32>,
    next_image: u32,
    stale_acquires: u32,
    stale_presents: u32,
    submit_failure: Option<vk::Result>,
    max_extent: Option<vk::Extent2D>,
    swapchain_recreations: usize,
    uploads: usize,
    validation_errors: Vec<String>,
}

impl HeadlessDevice {
    /// Device with a `width` x `height` swapchain of `image_count` images
    pub fn new(width: u32, height: u32, image_count: u32) -> Self {
        let mut device = Self {
            limits: DeviceLimits { min_uniform_buffer_offset_alignment: 256, max_push_constants_size: 128 },
            swapchain: SwapchainInfo { width, height, format: vk::Format::B8G8R8A8_SRGB, image_count },
            swapchain_images: Vec::new(),
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            layouts: SlotMap::with_key(),
            pools: SlotMap::with_key(),
            sets: SlotMap::with_key(),
            render_passes: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            command_buffers: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            submissions: Vec::new(),
            presented: Vec::new(),
            next_image: 0,
            stale_acquires: 0,
            stale_presents: 0,
            submit_failure: None,
            max_extent: None,
            swapchain_recreations: 0,
            uploads: 0,
            validation_errors: Vec::new(),
        };
        device.build_swapchain_images();
        device
    }

    /// Override the reported limits
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Clamp recreated swapchains to `width` x `height`, as a surface with a
    /// fixed current extent does
    pub fn with_max_extent(mut self, width: u32, height: u32) -> Self {
        self.max_extent = Some(vk::Extent2D { width, height });
        self
    }

    /// Number of `recreate_swapchain` calls so far
    pub fn swapchain_recreations(&self) -> usize {
        self.swapchain_recreations
    }

    /// Make the next `count` acquires report a stale swapchain
    pub fn inject_stale_acquire(&mut self, count: u32) {
        self.stale_acquires += count;
    }

    /// Make the next `count` presents report a stale swapchain
    pub fn inject_stale_present(&mut self, count: u32) {
        self.stale_presents += count;
    }

    /// Make the next submit fail with `result`
    pub fn inject_submit_failure(&mut self, result: vk::Result) {
        self.submit_failure = Some(result);
    }

    /// Live objects per kind
    pub fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            buffers: self.buffers.len(),
            images: self.images.values().filter(|image| !image.swapchain).count(),
            samplers: self.samplers.len(),
            descriptor_set_layouts: self.layouts.len(),
            descriptor_pools: self.pools.len(),
            descriptor_sets: self.sets.len(),
            render_passes: self.render_passes.len(),
            framebuffers: self.framebuffers.len(),
            pipelines: self.pipelines.len(),
            command_buffers: self.command_buffers.len(),
            fences: self.fences.len(),
            semaphores: self.semaphores.len(),
        }
    }

    /// Every submission since creation or the last [`Self::clear_submissions`]
    pub fn submissions(&self) -> &[SubmittedWork] {
        &self.submissions
    }

    /// Forget recorded submissions and presents
    pub fn clear_submissions(&mut self) {
        self.submissions.clear();
        self.presented.clear();
    }

    /// Commands recorded inside render passes labeled `label`
    pub fn commands_in_pass(&self, label: &str) -> Vec<&Command> {
        self.submissions
            .iter()
            .flat_map(|work| work.commands.iter().zip(&work.pass_labels))
            .filter(|(_, pass)| **pass == Some(label))
            .map(|(command, _)| command)
            .collect()
    }

    /// Draw and indexed-draw calls issued inside passes labeled `label`
    pub fn draw_count(&self, label: &str) -> usize {
        self.commands_in_pass(label)
            .into_iter()
            .filter(|command| matches!(command, Command::Draw { .. } | Command::DrawIndexed { .. }))
            .count()
    }

    /// Image indices presented, in order
    pub fn presented(&self) -> &[u32] {
        &self.presented
    }

    /// Contents of a buffer
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(buffer).map(|entry| entry.data.as_slice())
    }

    /// Buffers created with `label`, in no particular order
    pub fn buffers_labeled(&self, label: &str) -> Vec<BufferHandle> {
        self.buffers.iter().filter(|(_, entry)| entry.label == label).map(|(handle, _)| handle).collect()
    }

    /// Whether pixels were uploaded to `image`
    pub fn is_uploaded(&self, image: ImageHandle) -> bool {
        self.images.get(image).is_some_and(|entry| entry.uploaded)
    }

    /// Staging uploads performed (buffers and textures)
    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    /// Usage-rule violations observed so far
    pub fn validation_errors(&self) -> &[String] {
        &self.validation_errors
    }

    fn violation(&mut self, message: String) {
        log::error!("headless validation: {}", message);
        self.validation_errors.push(message);
    }

    fn build_swapchain_images(&mut self) {
        for image in self.swapchain_images.drain(..) {
            self.images.remove(image);
        }
        for _ in 0..self.swapchain.image_count {
            let desc = ImageDesc {
                label: "swapchain",
                width: self.swapchain.width,
                height: self.swapchain.height,
                format: self.swapchain.format,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                mip_levels: 1,
                array_layers: 1,
            };
            let handle = self.images.insert(ImageEntry { desc, swapchain: true, uploaded: false });
            self.swapchain_images.push(handle);
        }
        self.next_image = 0;
    }

    fn signal_semaphore(&mut self, semaphore: SemaphoreHandle, misuse: &str) -> RenderResult<()> {
        match self.semaphores.get(semaphore).copied() {
            Some(false) => self.semaphores[semaphore] = true,
            Some(true) => self.violation(misuse.to_string()),
            None => return Err(RenderError::ResourceNotFound("semaphore".into())),
        }
        Ok(())
    }

    fn consume_semaphore(&mut self, semaphore: SemaphoreHandle, misuse: &str) -> RenderResult<()> {
        match self.semaphores.get(semaphore).copied() {
            Some(true) => self.semaphores[semaphore] = false,
            Some(false) => self.violation(misuse.to_string()),
            None => return Err(RenderError::ResourceNotFound("semaphore".into())),
        }
        Ok(())
    }

    fn remove_checked<K: slotmap::Key, V>(&mut self, map_name: &str, removed: Option<V>, key: K) {
        if removed.is_none() {
            self.violation(format!("destroyed unknown or already destroyed {map_name} {key:?}"));
        }
    }

    fn validate_commands(&mut self, commands: &[Command]) -> Vec<Option<&'static str>> {
        let mut labels = Vec::with_capacity(commands.len());
        let mut pass: Option<&'static str> = None;
        let mut pipeline: Option<PipelineHandle> = None;
        let mut vertex_bound = false;
        let mut index_bound = false;
        let mut errors = Vec::new();

        for command in commands {
            match command {
                Command::BeginRenderPass { render_pass, framebuffer, clear_values, .. } => {
                    if pass.is_some() {
                        errors.push("render pass begun inside another render pass".to_string());
                    }
                    match (self.render_passes.get(*render_pass), self.framebuffers.get(*framebuffer)) {
                        (Some(rp), Some(fb)) => {
                            if fb.render_pass != *render_pass {
                                errors.push(format!("framebuffer not created for render pass '{}'", rp.label));
                            }
                            let attachments = rp.color_attachments.len() + usize::from(rp.depth_attachment.is_some());
                            if clear_values.len() != attachments {
                                errors.push(format!(
                                    "render pass '{}' has {} attachments but {} clear values",
                                    rp.label,
                                    attachments,
                                    clear_values.len()
                                ));
                            }
                            pass = Some(rp.label);
                        }
                        _ => errors.push("begin render pass with destroyed render pass or framebuffer".to_string()),
                    }
                }
                Command::EndRenderPass => {
                    if pass.is_none() {
                        errors.push("end render pass outside a render pass".to_string());
                    }
                }
                Command::BindPipeline(handle) => {
                    if !self.pipelines.contains_key(*handle) {
                        errors.push("bound destroyed pipeline".to_string());
                    }
                    pipeline = Some(*handle);
                }
                Command::BindVertexBuffer(buffer) => {
                    vertex_bound = true;
                    if !self.buffers.get(*buffer).is_some_and(|b| b.usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER)) {
                        errors.push("bound a buffer without vertex usage as vertex buffer".to_string());
                    }
                }
                Command::BindIndexBuffer(buffer) => {
                    index_bound = true;
                    if !self.buffers.get(*buffer).is_some_and(|b| b.usage.contains(vk::BufferUsageFlags::INDEX_BUFFER)) {
                        errors.push("bound a buffer without index usage as index buffer".to_string());
                    }
                }
                Command::BindDescriptorSets { pipeline, first_set, sets, dynamic_offsets } => {
                    self.check_descriptor_binding(*pipeline, *first_set, sets, dynamic_offsets, &mut errors);
                }
                Command::PushConstants { pipeline, data, .. } => {
                    let range = self.pipelines.get(*pipeline).and_then(|p| p.push_constants);
                    match range {
                        Some(range) if data.len() <= range.size as usize => {}
                        _ => errors.push(format!("push constants of {} bytes exceed the pipeline range", data.len())),
                    }
                }
                Command::Draw { .. } => {
                    if pass.is_none() || pipeline.is_none() {
                        errors.push("draw outside a render pass or without a pipeline".to_string());
                    }
                }
                Command::DrawIndexed { .. } => {
                    if pass.is_none() || pipeline.is_none() {
                        errors.push("indexed draw outside a render pass or without a pipeline".to_string());
                    }
                    if !vertex_bound || !index_bound {
                        errors.push("indexed draw without vertex and index buffers".to_string());
                    }
                }
                Command::SetViewport(_) | Command::SetScissor(_) => {}
            }

            labels.push(pass);
            if matches!(command, Command::EndRenderPass) {
                pass = None;
            }
        }

        if pass.is_some() {
            errors.push("command buffer ends inside a render pass".to_string());
        }
        for error in errors {
            self.violation(error);
        }
        labels
    }

    fn check_descriptor_binding(
        &self,
        pipeline: PipelineHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
        errors: &mut Vec<String>,
    ) {
        let Some(pipeline) = self.pipelines.get(pipeline) else {
            errors.push("descriptor sets bound against a destroyed pipeline".to_string());
            return;
        };
        let alignment = self.limits.min_uniform_buffer_offset_alignment;
        let mut offsets = dynamic_offsets.iter();

        for (i, set_handle) in sets.iter().enumerate() {
            let index = first_set as usize + i;
            let Some(set) = self.sets.get(*set_handle) else {
                errors.push(format!("set {index} was freed"));
                continue;
            };
            if pipeline.set_layouts.get(index) != Some(&set.layout) {
                errors.push(format!("set {index} layout incompatible with pipeline '{}'", pipeline.label));
            }
            let Some(layout) = self.layouts.get(set.layout) else {
                errors.push(format!("set {index} layout was destroyed"));
                continue;
            };

            for binding in layout {
                let written = set.bindings.get(&binding.binding);
                if written.is_none() {
                    errors.push(format!("set {index} binding {} never written", binding.binding));
                }
                if binding.descriptor_type != vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC {
                    continue;
                }
                let Some(&offset) = offsets.next() else {
                    errors.push(format!("missing dynamic offset for set {index} binding {}", binding.binding));
                    continue;
                };
                if u64::from(offset) % alignment != 0 {
                    errors.push(format!("dynamic offset {offset} not aligned to {alignment}"));
                }
                if let Some(DescriptorResource::Buffer { buffer, offset: base, range }) = written {
                    let size = self.buffers.get(*buffer).map_or(0, |b| b.data.len() as u64);
                    if base + u64::from(offset) + range > size {
                        errors.push(format!("dynamic offset {offset} reads past the end of a {size} byte buffer"));
                    }
                }
            }
        }

        if offsets.next().is_some() {
            errors.push("more dynamic offsets than dynamic bindings".to_string());
        }
    }
}

impl GpuDevice for HeadlessDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        let size = usize::try_from(desc.size).map_err(|_| RenderError::invalid("buffer size overflows usize"))?;
        Ok(self.buffers.insert(BufferEntry {
            label: desc.label,
            usage: desc.usage,
            location: desc.location,
            data: vec![0; size],
        }))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let entry = self.buffers.get_mut(buffer).ok_or_else(|| RenderError::ResourceNotFound("buffer".into()))?;
        if entry.location != MemoryLocation::HostVisible {
            return Err(RenderError::invalid(format!("buffer '{}' is not host visible", entry.label)));
        }
        let start = usize::try_from(offset).map_err(|_| RenderError::invalid("offset overflows usize"))?;
        let end = start + data.len();
        if end > entry.data.len() {
            return Err(RenderError::invalid(format!(
                "write of {} bytes at {} overflows buffer '{}' ({} bytes)",
                data.len(),
                start,
                entry.label,
                entry.data.len()
            )));
        }
        entry.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> RenderResult<()> {
        let entry = self.buffers.get_mut(buffer).ok_or_else(|| RenderError::ResourceNotFound("buffer".into()))?;
        if data.len() > entry.data.len() {
            return Err(RenderError::invalid(format!("upload overflows buffer '{}'", entry.label)));
        }
        entry.data[..data.len()].copy_from_slice(data);
        self.uploads += 1;
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let removed = self.buffers.remove(buffer);
        self.remove_checked("buffer", removed, buffer);
    }

    fn create_image(&mut self, desc: &ImageDesc) -> RenderResult<ImageHandle> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 || desc.array_layers == 0 {
            return Err(RenderError::invalid(format!("image '{}' has a zero dimension", desc.label)));
        }
        Ok(self.images.insert(ImageEntry { desc: desc.clone(), swapchain: false, uploaded: false }))
    }

    fn upload_texture(&mut self, image: ImageHandle, pixels: &[u8]) -> RenderResult<()> {
        let entry = self.images.get_mut(image).ok_or_else(|| RenderError::ResourceNotFound("image".into()))?;
        let expected = (entry.desc.width * entry.desc.height * 4) as usize;
        if pixels.len() != expected {
            return Err(RenderError::invalid(format!(
                "texture '{}' expects {} bytes, got {}",
                entry.desc.label,
                expected,
                pixels.len()
            )));
        }
        entry.uploaded = true;
        self.uploads += 1;
        Ok(())
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if self.images.get(image).is_some_and(|entry| entry.swapchain) {
            self.violation("destroyed a swapchain-owned image".to_string());
            return;
        }
        let removed = self.images.remove(image);
        self.remove_checked("image", removed, image);
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> RenderResult<SamplerHandle> {
        Ok(self.samplers.insert(*desc))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        let removed = self.samplers.remove(sampler);
        self.remove_checked("sampler", removed, sampler);
    }

    fn create_descriptor_set_layout(&mut self, bindings: &[LayoutBinding]) -> RenderResult<DescriptorSetLayoutHandle> {
        Ok(self.layouts.insert(bindings.to_vec()))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        let removed = self.layouts.remove(layout);
        self.remove_checked("descriptor set layout", removed, layout);
    }

    fn create_descriptor_pool(&mut self, sizes: &[PoolSize], max_sets: u32) -> RenderResult<DescriptorPoolHandle> {
        if sizes.is_empty() || max_sets == 0 {
            return Err(RenderError::invalid("descriptor pool with no capacity"));
        }
        Ok(self.pools.insert(PoolEntry { max_sets, sets: Vec::new() }))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let removed = self.pools.remove(pool);
        if let Some(entry) = &removed {
            for set in &entry.sets {
                self.sets.remove(*set);
            }
        }
        self.remove_checked("descriptor pool", removed, pool);
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle> {
        if !self.layouts.contains_key(layout) {
            return Err(RenderError::ResourceNotFound("descriptor set layout".into()));
        }
        let entry = self.pools.get(pool).ok_or_else(|| RenderError::ResourceNotFound("descriptor pool".into()))?;
        if entry.sets.len() >= entry.max_sets as usize {
            return Err(RenderError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        let set = self.sets.insert(SetEntry { pool, layout, bindings: HashMap::new() });
        if let Some(entry) = self.pools.get_mut(pool) {
            entry.sets.push(set);
        }
        Ok(set)
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RenderResult<()> {
        let entry = self.sets.get(set).ok_or_else(|| RenderError::ResourceNotFound("descriptor set".into()))?;
        if !self.pools.contains_key(entry.pool) {
            return Err(RenderError::ResourceNotFound("descriptor pool".into()));
        }
        let layout = self.layouts.get(entry.layout).ok_or_else(|| RenderError::ResourceNotFound("layout".into()))?;
        for write in writes {
            let declared = layout.iter().find(|b| b.binding == write.binding);
            if declared.map(|b| b.descriptor_type) != Some(write.descriptor_type) {
                return Err(RenderError::invalid(format!(
                    "binding {} written as {:?} but declared as {:?}",
                    write.binding,
                    write.descriptor_type,
                    declared.map(|b| b.descriptor_type)
                )));
            }
            let resource_live = match write.resource {
                DescriptorResource::Buffer { buffer, .. } => self.buffers.contains_key(buffer),
                DescriptorResource::SampledImage { image, sampler, .. } => {
                    self.images.contains_key(image) && self.samplers.contains_key(sampler)
                }
            };
            if !resource_live {
                return Err(RenderError::ResourceNotFound(format!("resource for binding {}", write.binding)));
            }
        }
        if let Some(entry) = self.sets.get_mut(set) {
            for write in writes {
                entry.bindings.insert(write.binding, write.resource);
            }
        }
        Ok(())
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> RenderResult<RenderPassHandle> {
        Ok(self.render_passes.insert(desc.clone()))
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) {
        let removed = self.render_passes.remove(render_pass);
        self.remove_checked("render pass", removed, render_pass);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> RenderResult<FramebufferHandle> {
        let rp = self
            .render_passes
            .get(desc.render_pass)
            .ok_or_else(|| RenderError::ResourceNotFound("render pass".into()))?;
        let expected = rp.color_attachments.len() + usize::from(rp.depth_attachment.is_some());
        if desc.attachments.len() != expected {
            return Err(RenderError::invalid(format!(
                "framebuffer for '{}' needs {} attachments, got {}",
                rp.label,
                expected,
                desc.attachments.len()
            )));
        }
        for image in &desc.attachments {
            let entry = self.images.get(*image).ok_or_else(|| RenderError::ResourceNotFound("attachment".into()))?;
            if entry.desc.width < desc.width || entry.desc.height < desc.height || entry.desc.array_layers < desc.layers {
                return Err(RenderError::invalid(format!("attachment '{}' smaller than framebuffer", entry.desc.label)));
            }
        }
        Ok(self.framebuffers.insert(desc.clone()))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        let removed = self.framebuffers.remove(framebuffer);
        self.remove_checked("framebuffer", removed, framebuffer);
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> RenderResult<PipelineHandle> {
        if !self.render_passes.contains_key(desc.render_pass) {
            return Err(RenderError::ResourceNotFound("render pass".into()));
        }
        if desc.set_layouts.iter().any(|layout| !self.layouts.contains_key(*layout)) {
            return Err(RenderError::ResourceNotFound("descriptor set layout".into()));
        }
        if desc.push_constants.is_some_and(|range| range.size > self.limits.max_push_constants_size) {
            return Err(RenderError::invalid(format!("pipeline '{}' push constants exceed the limit", desc.label)));
        }
        Ok(self.pipelines.insert(desc.clone()))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        let removed = self.pipelines.remove(pipeline);
        self.remove_checked("pipeline", removed, pipeline);
    }

    fn allocate_command_buffer(&mut self) -> RenderResult<CommandBufferHandle> {
        Ok(self.command_buffers.insert(CommandBufferEntry { state: RecordState::Initial, commands: Vec::new() }))
    }

    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle) {
        let removed = self.command_buffers.remove(command_buffer);
        self.remove_checked("command buffer", removed, command_buffer);
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        let entry = self
            .command_buffers
            .get_mut(command_buffer)
            .ok_or_else(|| RenderError::ResourceNotFound("command buffer".into()))?;
        entry.state = RecordState::Recording;
        entry.commands.clear();
        Ok(())
    }

    fn record(&mut self, command_buffer: CommandBufferHandle, command: Command) -> RenderResult<()> {
        let entry = self
            .command_buffers
            .get_mut(command_buffer)
            .ok_or_else(|| RenderError::ResourceNotFound("command buffer".into()))?;
        if entry.state != RecordState::Recording {
            return Err(RenderError::invalid("command buffer is not recording"));
        }
        entry.commands.push(command);
        Ok(())
    }

    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        let entry = self
            .command_buffers
            .get_mut(command_buffer)
            .ok_or_else(|| RenderError::ResourceNotFound("command buffer".into()))?;
        if entry.state != RecordState::Recording {
            return Err(RenderError::invalid("command buffer is not recording"));
        }
        entry.state = RecordState::Executable;
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceHandle> {
        Ok(self.fences.insert(signaled))
    }

    fn wait_fence(&mut self, fence: FenceHandle) -> RenderResult<()> {
        match self.fences.get(fence).copied() {
            Some(true) => Ok(()),
            Some(false) => {
                self.violation("waited on a fence that no pending work will signal".to_string());
                Ok(())
            }
            None => Err(RenderError::ResourceNotFound("fence".into())),
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> RenderResult<()> {
        let signaled = self.fences.get_mut(fence).ok_or_else(|| RenderError::ResourceNotFound("fence".into()))?;
        *signaled = false;
        Ok(())
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        let removed = self.fences.remove(fence);
        self.remove_checked("fence", removed, fence);
    }

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle> {
        Ok(self.semaphores.insert(false))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        let removed = self.semaphores.remove(semaphore);
        self.remove_checked("semaphore", removed, semaphore);
    }

    fn submit(&mut self, submission: &Submission<'_>) -> RenderResult<()> {
        if let Some(result) = self.submit_failure.take() {
            return Err(RenderError::Api(result));
        }

        let commands = {
            let entry = self
                .command_buffers
                .get(submission.command_buffer)
                .ok_or_else(|| RenderError::ResourceNotFound("command buffer".into()))?;
            if entry.state != RecordState::Executable {
                return Err(RenderError::invalid("submitted a command buffer that is not executable"));
            }
            entry.commands.clone()
        };
        let pass_labels = self.validate_commands(&commands);

        for (semaphore, _) in submission.waits {
            self.consume_semaphore(*semaphore, "waited on a semaphore nothing signaled")?;
        }
        for semaphore in submission.signals {
            self.signal_semaphore(*semaphore, "signaled a semaphore that is already signaled")?;
        }
        if let Some(fence) = submission.fence {
            match self.fences.get(fence).copied() {
                Some(false) => self.fences[fence] = true,
                Some(true) => self.violation("submitted with a fence that was not reset".to_string()),
                None => return Err(RenderError::ResourceNotFound("fence".into())),
            }
        }

        self.submissions.push(SubmittedWork {
            commands,
            pass_labels,
            waits: submission.waits.iter().map(|(semaphore, _)| *semaphore).collect(),
            signals: submission.signals.to_vec(),
            fence: submission.fence,
        });
        Ok(())
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        Ok(())
    }

    fn swapchain_info(&self) -> SwapchainInfo {
        self.swapchain
    }

    fn swapchain_images(&self) -> Vec<ImageHandle> {
        self.swapchain_images.clone()
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::invalid("swapchain extent must be non-zero"));
        }
        let max = self.max_extent.unwrap_or(vk::Extent2D { width, height });
        self.swapchain.width = width.min(max.width);
        self.swapchain.height = height.min(max.height);
        self.swapchain_recreations += 1;
        self.build_swapchain_images();
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> RenderResult<AcquireOutcome> {
        if self.stale_acquires > 0 {
            self.stale_acquires -= 1;
            return Ok(AcquireOutcome::Stale);
        }
        self.signal_semaphore(signal, "acquire signaled a semaphore that is already signaled")?;
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.swapchain.image_count;
        Ok(AcquireOutcome::Image(index))
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<PresentOutcome> {
        self.consume_semaphore(wait, "present waited on a semaphore nothing signaled")?;
        if image_index >= self.swapchain.image_count {
            return Err(RenderError::invalid(format!("present of image {image_index} out of range")));
        }
        if self.stale_presents > 0 {
            self.stale_presents -= 1;
            return Ok(PresentOutcome::Stale);
        }
        self.presented.push(image_index);
        Ok(PresentOutcome::Presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::{AttachmentDesc, ClearValue, PushConstantRange};

    fn color_pass(device: &mut HeadlessDevice) -> (RenderPassHandle, FramebufferHandle) {
        let render_pass = device
            .create_render_pass(&RenderPassDesc {
                label: "test",
                color_attachments: vec![AttachmentDesc::cleared(
                    vk::Format::B8G8R8A8_SRGB,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                )],
                depth_attachment: None,
                dependencies: Vec::new(),
            })
            .unwrap();
        let image = device.swapchain_images()[0];
        let framebuffer = device
            .create_framebuffer(&FramebufferDesc { render_pass, attachments: vec![image], width: 64, height: 64, layers: 1 })
            .unwrap();
        (render_pass, framebuffer)
    }

    fn pipeline(device: &mut HeadlessDevice, render_pass: RenderPassHandle) -> PipelineHandle {
        device
            .create_pipeline(&PipelineDesc {
                label: "test",
                render_pass,
                stages: Vec::new(),
                vertex_bindings: Vec::new(),
                vertex_attributes: Vec::new(),
                color_attachment_count: 1,
                depth_test: false,
                depth_clamp: false,
                cull_mode: vk::CullModeFlags::NONE,
                set_layouts: Vec::new(),
                push_constants: Some(PushConstantRange { stages: vk::ShaderStageFlags::VERTEX, size: 64 }),
            })
            .unwrap()
    }

    #[test]
    fn draw_outside_render_pass_is_reported() {
        let mut device = HeadlessDevice::new(64, 64, 2);
        let (render_pass, _) = color_pass(&mut device);
        let pipeline = pipeline(&mut device, render_pass);
        let cmd = device.allocate_command_buffer().unwrap();

        device.begin_command_buffer(cmd).unwrap();
        device.record(cmd, Command::BindPipeline(pipeline)).unwrap();
        device.record(cmd, Command::Draw { vertex_count: 3, instance_count: 1 }).unwrap();
        device.end_command_buffer(cmd).unwrap();
        device.submit(&Submission { command_buffer: cmd, waits: &[], signals: &[], fence: None }).unwrap();

        assert_eq!(device.validation_errors().len(), 1);
    }

    #[test]
    fn draws_are_attributed_to_their_pass() {
        let mut device = HeadlessDevice::new(64, 64, 2);
        let (render_pass, framebuffer) = color_pass(&mut device);
        let pipeline = pipeline(&mut device, render_pass);
        let cmd = device.allocate_command_buffer().unwrap();
        let fence = device.create_fence(false).unwrap();

        device.begin_command_buffer(cmd).unwrap();
        device
            .record(
                cmd,
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    extent: vk::Extent2D { width: 64, height: 64 },
                    clear_values: vec![ClearValue::Color([0.0; 4])],
                },
            )
            .unwrap();
        device.record(cmd, Command::BindPipeline(pipeline)).unwrap();
        device.record(cmd, Command::Draw { vertex_count: 3, instance_count: 1 }).unwrap();
        device.record(cmd, Command::EndRenderPass).unwrap();
        device.end_command_buffer(cmd).unwrap();
        device.submit(&Submission { command_buffer: cmd, waits: &[], signals: &[], fence: Some(fence) }).unwrap();

        assert_eq!(device.draw_count("test"), 1);
        assert!(device.validation_errors().is_empty());

        // Submitting again without a reset is a usage error.
        device.submit(&Submission { command_buffer: cmd, waits: &[], signals: &[], fence: Some(fence) }).unwrap();
        assert_eq!(device.validation_errors().len(), 1);
    }

    #[test]
    fn semaphore_chain_is_checked() {
        let mut device = HeadlessDevice::new(64, 64, 2);
        let acquired = device.create_semaphore().unwrap();
        let rendered = device.create_semaphore().unwrap();

        let AcquireOutcome::Image(index) = device.acquire_next_image(acquired).unwrap() else {
            panic!("expected an image");
        };
        device.present(index, rendered).unwrap();

        assert_eq!(device.validation_errors().len(), 1);
    }

    #[test]
    fn stale_injection_is_consumed_once() {
        let mut device = HeadlessDevice::new(64, 64, 2);
        let semaphore = device.create_semaphore().unwrap();
        device.inject_stale_acquire(1);

        assert_eq!(device.acquire_next_image(semaphore).unwrap(), AcquireOutcome::Stale);
        assert_eq!(device.acquire_next_image(semaphore).unwrap(), AcquireOutcome::Image(0));
    }

    #[test]
    fn pool_capacity_is_enforced() {
        let mut device = HeadlessDevice::new(64, 64, 2);
        let layout = device
            .create_descriptor_set_layout(&[LayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
            }])
            .unwrap();
        let pool = device
            .create_descriptor_pool(&[PoolSize { descriptor_type: vk::DescriptorType::UNIFORM_BUFFER, count: 1 }], 1)
            .unwrap();

        device.allocate_descriptor_set(pool, layout).unwrap();
        assert!(matches!(
            device.allocate_descriptor_set(pool, layout),
            Err(RenderError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
        ));

        device.destroy_descriptor_pool(pool);
        assert_eq!(device.resource_counts().descriptor_sets, 0);
    }
}
