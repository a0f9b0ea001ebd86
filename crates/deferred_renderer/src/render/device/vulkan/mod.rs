//! # Vulkan backend
//!
//! [`GpuDevice`] on top of `ash`. The device borrows the instance, adapter,
//! logical device and surface from a [`VulkanContext`] and owns everything it
//! creates from them: the swapchain, a command pool, a pipeline cache and every
//! object handed out through the trait. Objects still alive when the device is
//! dropped are destroyed then, after the queue drains.

mod commands;
pub mod context;
pub mod memory;
mod pipeline;
pub mod swapchain;
mod upload;

use ash::vk;
use slotmap::SlotMap;

pub use context::VulkanContext;

use self::swapchain::Swapchain;
use self::upload::{create_raw_buffer, write_mapped, Transfer};
use super::{
    AcquireOutcome, BufferDesc, BufferHandle, Command, CommandBufferHandle, DescriptorPoolHandle, DescriptorResource,
    DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite, DeviceLimits, FenceHandle, FramebufferDesc,
    FramebufferHandle, GpuDevice, ImageDesc, ImageHandle, LayoutBinding, MemoryLocation, PipelineDesc, PipelineHandle,
    PoolSize, PresentOutcome, RenderPassDesc, RenderPassHandle, SamplerDesc, SamplerHandle, SemaphoreHandle, Submission,
    SwapchainInfo,
};
use crate::core::config::EngineProperties;
use crate::render::{RenderError, RenderResult};

struct RawBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    location: MemoryLocation,
    size: u64,
}

struct RawImage {
    desc: ImageDesc,
    image: vk::Image,
    view: vk::ImageView,
    /// `None` for swapchain images
    memory: Option<vk::DeviceMemory>,
}

struct RawSet {
    set: vk::DescriptorSet,
    pool: DescriptorPoolHandle,
}

struct RawPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

/// Vulkan implementation of [`GpuDevice`]
pub struct VulkanDevice {
    context: VulkanContext,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    properties: vk::PhysicalDeviceProperties,
    requested_images: u32,
    vsync: bool,
    command_pool: vk::CommandPool,
    pipeline_cache: vk::PipelineCache,
    swapchain: Swapchain,
    swapchain_images: Vec<ImageHandle>,
    buffers: SlotMap<BufferHandle, RawBuffer>,
    images: SlotMap<ImageHandle, RawImage>,
    samplers: SlotMap<SamplerHandle, vk::Sampler>,
    layouts: SlotMap<DescriptorSetLayoutHandle, vk::DescriptorSetLayout>,
    pools: SlotMap<DescriptorPoolHandle, vk::DescriptorPool>,
    sets: SlotMap<DescriptorSetHandle, RawSet>,
    render_passes: SlotMap<RenderPassHandle, vk::RenderPass>,
    framebuffers: SlotMap<FramebufferHandle, vk::Framebuffer>,
    pipelines: SlotMap<PipelineHandle, RawPipeline>,
    command_buffers: SlotMap<CommandBufferHandle, vk::CommandBuffer>,
    fences: SlotMap<FenceHandle, vk::Fence>,
    semaphores: SlotMap<SemaphoreHandle, vk::Semaphore>,
}

fn missing(kind: &str) -> RenderError {
    RenderError::ResourceNotFound(kind.to_string())
}

impl VulkanDevice {
    /// Create the device-owned objects and a `width` x `height` swapchain
    pub fn new(context: &VulkanContext, props: &EngineProperties, width: u32, height: u32) -> RenderResult<Self> {
        let context = context.clone();
        let (memory_properties, properties) = unsafe {
            (
                context.instance.get_physical_device_memory_properties(context.physical_device),
                context.instance.get_physical_device_properties(context.physical_device),
            )
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.graphics_queue_family);
        let command_pool =
            unsafe { context.device.create_command_pool(&pool_info, None) }.map_err(RenderError::Api)?;

        let pipeline_cache =
            match unsafe { context.device.create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None) } {
                Ok(cache) => cache,
                Err(err) => {
                    unsafe { context.device.destroy_command_pool(command_pool, None) };
                    return Err(RenderError::Api(err));
                }
            };

        let swapchain = match Swapchain::new(
            &context,
            props.requested_images,
            props.vsync,
            width,
            height,
            vk::SwapchainKHR::null(),
        ) {
            Ok(swapchain) => swapchain,
            Err(err) => {
                unsafe {
                    context.device.destroy_pipeline_cache(pipeline_cache, None);
                    context.device.destroy_command_pool(command_pool, None);
                }
                return Err(err);
            }
        };

        let mut device = Self {
            context,
            memory_properties,
            properties,
            requested_images: props.requested_images,
            vsync: props.vsync,
            command_pool,
            pipeline_cache,
            swapchain,
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
        };
        device.register_swapchain_images();

        let name = unsafe { std::ffi::CStr::from_ptr(device.properties.device_name.as_ptr()) };
        log::info!("Vulkan device ready on {}", name.to_string_lossy());
        Ok(device)
    }

    fn device(&self) -> &ash::Device {
        &self.context.device
    }

    fn transfer(&self) -> Transfer<'_> {
        Transfer {
            device: &self.context.device,
            memory_properties: &self.memory_properties,
            queue: self.context.graphics_queue,
            command_pool: self.command_pool,
        }
    }

    fn register_swapchain_images(&mut self) {
        for handle in self.swapchain_images.drain(..) {
            self.images.remove(handle);
        }
        let extent = self.swapchain.extent();
        let format = self.swapchain.format();
        for (image, view) in self.swapchain.images() {
            let desc = ImageDesc {
                label: "swapchain",
                width: extent.width,
                height: extent.height,
                format,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                mip_levels: 1,
                array_layers: 1,
            };
            let handle = self.images.insert(RawImage { desc, image, view, memory: None });
            self.swapchain_images.push(handle);
        }
    }

    fn create_view(&self, image: vk::Image, desc: &ImageDesc) -> RenderResult<vk::ImageView> {
        let view_type = if desc.array_layers > 1 { vk::ImageViewType::TYPE_2D_ARRAY } else { vk::ImageViewType::TYPE_2D };
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect(),
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.array_layers,
            });
        unsafe { self.device().create_image_view(&create_info, None) }.map_err(RenderError::Api)
    }

    fn supports_linear_blit(&self, format: vk::Format) -> bool {
        let properties = unsafe {
            self.context.instance.get_physical_device_format_properties(self.context.physical_device, format)
        };
        properties.optimal_tiling_features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }
}

impl GpuDevice for VulkanDevice {
    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            min_uniform_buffer_offset_alignment: self.properties.limits.min_uniform_buffer_offset_alignment,
            max_push_constants_size: self.properties.limits.max_push_constants_size,
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        let (usage, flags) = match desc.location {
            MemoryLocation::DeviceLocal => {
                (desc.usage | vk::BufferUsageFlags::TRANSFER_DST, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            }
            MemoryLocation::HostVisible => {
                (desc.usage, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
            }
        };
        let (buffer, memory) = create_raw_buffer(self.device(), &self.memory_properties, desc.size, usage, flags)?;
        log::trace!("Created buffer '{}' ({} bytes)", desc.label, desc.size);
        Ok(self.buffers.insert(RawBuffer { buffer, memory, location: desc.location, size: desc.size }))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let raw = self.buffers.get(buffer).ok_or_else(|| missing("buffer"))?;
        if raw.location != MemoryLocation::HostVisible {
            return Err(RenderError::invalid("write_buffer on a device-local buffer"));
        }
        if offset + data.len() as u64 > raw.size {
            return Err(RenderError::invalid(format!(
                "write of {} bytes at {} overruns buffer of {} bytes",
                data.len(),
                offset,
                raw.size
            )));
        }
        write_mapped(self.device(), raw.memory, offset, data)
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> RenderResult<()> {
        let raw = self.buffers.get(buffer).ok_or_else(|| missing("buffer"))?;
        if data.len() as u64 > raw.size {
            return Err(RenderError::invalid("upload larger than buffer"));
        }
        match raw.location {
            MemoryLocation::HostVisible => write_mapped(self.device(), raw.memory, 0, data),
            MemoryLocation::DeviceLocal => self.transfer().copy_to_buffer(raw.buffer, data),
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(raw) = self.buffers.remove(buffer) {
            unsafe {
                self.device().destroy_buffer(raw.buffer, None);
                self.device().free_memory(raw.memory, None);
            }
        }
    }

    fn create_image(&mut self, desc: &ImageDesc) -> RenderResult<ImageHandle> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D { width: desc.width, height: desc.height, depth: 1 })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device().create_image(&create_info, None) }.map_err(RenderError::Api)?;

        let memory = match memory::allocate_image_memory(
            self.device(),
            &self.memory_properties,
            image,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device().destroy_image(image, None) };
                return Err(err);
            }
        };

        let view = match self.create_view(image, desc) {
            Ok(view) => view,
            Err(err) => {
                unsafe {
                    self.device().destroy_image(image, None);
                    self.device().free_memory(memory, None);
                }
                return Err(err);
            }
        };

        Ok(self.images.insert(RawImage { desc: desc.clone(), image, view, memory: Some(memory) }))
    }

    fn upload_texture(&mut self, image: ImageHandle, pixels: &[u8]) -> RenderResult<()> {
        let raw = self.images.get(image).ok_or_else(|| missing("image"))?;
        let desc = &raw.desc;
        if pixels.len() != (desc.width * desc.height * 4) as usize {
            return Err(RenderError::invalid(format!("texture '{}' pixel data has the wrong size", desc.label)));
        }
        if !desc.usage.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            return Err(RenderError::invalid(format!("texture '{}' is not a transfer destination", desc.label)));
        }
        if desc.mip_levels > 1 && !self.supports_linear_blit(desc.format) {
            return Err(RenderError::invalid(format!("{:?} does not support linear blits for mipmaps", desc.format)));
        }
        self.transfer().upload_image(raw.image, desc.width, desc.height, desc.mip_levels, pixels)
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if self.swapchain_images.contains(&image) {
            log::warn!("Ignoring destroy of a swapchain image");
            return;
        }
        if let Some(raw) = self.images.remove(image) {
            unsafe {
                self.device().destroy_image_view(raw.view, None);
                self.device().destroy_image(raw.image, None);
                if let Some(memory) = raw.memory {
                    self.device().free_memory(memory, None);
                }
            }
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> RenderResult<SamplerHandle> {
        let anisotropy = desc.anisotropy && self.context.sampler_anisotropy;
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(if desc.filter == vk::Filter::LINEAR {
                vk::SamplerMipmapMode::LINEAR
            } else {
                vk::SamplerMipmapMode::NEAREST
            })
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy { self.properties.limits.max_sampler_anisotropy } else { 1.0 })
            .border_color(desc.border_color)
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(desc.max_lod);
        let sampler = unsafe { self.device().create_sampler(&create_info, None) }.map_err(RenderError::Api)?;
        Ok(self.samplers.insert(sampler))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if let Some(sampler) = self.samplers.remove(sampler) {
            unsafe { self.device().destroy_sampler(sampler, None) };
        }
    }

    fn create_descriptor_set_layout(&mut self, bindings: &[LayoutBinding]) -> RenderResult<DescriptorSetLayoutHandle> {
        let bindings: Vec<_> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout =
            unsafe { self.device().create_descriptor_set_layout(&create_info, None) }.map_err(RenderError::Api)?;
        Ok(self.layouts.insert(layout))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        if let Some(layout) = self.layouts.remove(layout) {
            unsafe { self.device().destroy_descriptor_set_layout(layout, None) };
        }
    }

    fn create_descriptor_pool(&mut self, sizes: &[PoolSize], max_sets: u32) -> RenderResult<DescriptorPoolHandle> {
        let sizes: Vec<_> = sizes
            .iter()
            .map(|size| vk::DescriptorPoolSize { ty: size.descriptor_type, descriptor_count: size.count })
            .collect();
        let create_info = vk::DescriptorPoolCreateInfo::builder().pool_sizes(&sizes).max_sets(max_sets);
        let pool = unsafe { self.device().create_descriptor_pool(&create_info, None) }.map_err(RenderError::Api)?;
        Ok(self.pools.insert(pool))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        if let Some(raw) = self.pools.remove(pool) {
            self.sets.retain(|_, set| set.pool != pool);
            unsafe { self.device().destroy_descriptor_pool(raw, None) };
        }
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle> {
        let raw_pool = *self.pools.get(pool).ok_or_else(|| missing("descriptor pool"))?;
        let raw_layout = *self.layouts.get(layout).ok_or_else(|| missing("descriptor set layout"))?;
        let layouts = [raw_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder().descriptor_pool(raw_pool).set_layouts(&layouts);
        let sets = unsafe { self.device().allocate_descriptor_sets(&allocate_info) }.map_err(RenderError::Api)?;
        Ok(self.sets.insert(RawSet { set: sets[0], pool }))
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RenderResult<()> {
        let raw_set = self.sets.get(set).ok_or_else(|| missing("descriptor set"))?.set;

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        for write in writes {
            match write.resource {
                DescriptorResource::Buffer { buffer, offset, range } => {
                    let buffer = self.buffers.get(buffer).ok_or_else(|| missing("buffer"))?.buffer;
                    buffer_infos.push(vk::DescriptorBufferInfo { buffer, offset, range });
                }
                DescriptorResource::SampledImage { image, sampler, layout } => {
                    let image_view = self.images.get(image).ok_or_else(|| missing("image"))?.view;
                    let sampler = *self.samplers.get(sampler).ok_or_else(|| missing("sampler"))?;
                    image_infos.push(vk::DescriptorImageInfo { sampler, image_view, image_layout: layout });
                }
            }
        }

        let (mut next_buffer, mut next_image) = (0, 0);
        let vk_writes: Vec<_> = writes
            .iter()
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(raw_set)
                    .dst_binding(write.binding)
                    .descriptor_type(write.descriptor_type);
                match write.resource {
                    DescriptorResource::Buffer { .. } => {
                        next_buffer += 1;
                        builder.buffer_info(&buffer_infos[next_buffer - 1..next_buffer]).build()
                    }
                    DescriptorResource::SampledImage { .. } => {
                        next_image += 1;
                        builder.image_info(&image_infos[next_image - 1..next_image]).build()
                    }
                }
            })
            .collect();

        unsafe { self.device().update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> RenderResult<RenderPassHandle> {
        let render_pass = pipeline::create_render_pass(self.device(), desc)?;
        log::debug!("Created render pass '{}'", desc.label);
        Ok(self.render_passes.insert(render_pass))
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) {
        if let Some(render_pass) = self.render_passes.remove(render_pass) {
            unsafe { self.device().destroy_render_pass(render_pass, None) };
        }
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> RenderResult<FramebufferHandle> {
        let render_pass = *self.render_passes.get(desc.render_pass).ok_or_else(|| missing("render pass"))?;
        let views = desc
            .attachments
            .iter()
            .map(|&image| self.images.get(image).map(|raw| raw.view).ok_or_else(|| missing("attachment image")))
            .collect::<RenderResult<Vec<_>>>()?;
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&views)
            .width(desc.width)
            .height(desc.height)
            .layers(desc.layers);
        let framebuffer = unsafe { self.device().create_framebuffer(&create_info, None) }.map_err(RenderError::Api)?;
        Ok(self.framebuffers.insert(framebuffer))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(framebuffer) = self.framebuffers.remove(framebuffer) {
            unsafe { self.device().destroy_framebuffer(framebuffer, None) };
        }
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> RenderResult<PipelineHandle> {
        let render_pass = *self.render_passes.get(desc.render_pass).ok_or_else(|| missing("render pass"))?;
        let set_layouts = desc
            .set_layouts
            .iter()
            .map(|&layout| self.layouts.get(layout).copied().ok_or_else(|| missing("descriptor set layout")))
            .collect::<RenderResult<Vec<_>>>()?;
        let (pipeline, layout) =
            pipeline::create_pipeline(self.device(), self.pipeline_cache, desc, render_pass, &set_layouts)?;
        Ok(self.pipelines.insert(RawPipeline { pipeline, layout }))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(raw) = self.pipelines.remove(pipeline) {
            unsafe {
                self.device().destroy_pipeline(raw.pipeline, None);
                self.device().destroy_pipeline_layout(raw.layout, None);
            }
        }
    }

    fn allocate_command_buffer(&mut self) -> RenderResult<CommandBufferHandle> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device().allocate_command_buffers(&allocate_info) }.map_err(RenderError::Api)?;
        Ok(self.command_buffers.insert(buffers[0]))
    }

    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle) {
        if let Some(raw) = self.command_buffers.remove(command_buffer) {
            unsafe { self.device().free_command_buffers(self.command_pool, &[raw]) };
        }
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        let raw = *self.command_buffers.get(command_buffer).ok_or_else(|| missing("command buffer"))?;
        unsafe {
            self.device()
                .reset_command_buffer(raw, vk::CommandBufferResetFlags::empty())
                .map_err(RenderError::Api)?;
            self.device()
                .begin_command_buffer(raw, &vk::CommandBufferBeginInfo::default())
                .map_err(RenderError::Api)
        }
    }

    fn record(&mut self, command_buffer: CommandBufferHandle, command: Command) -> RenderResult<()> {
        let raw = *self.command_buffers.get(command_buffer).ok_or_else(|| missing("command buffer"))?;
        self.record_raw(raw, command)
    }

    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        let raw = *self.command_buffers.get(command_buffer).ok_or_else(|| missing("command buffer"))?;
        unsafe { self.device().end_command_buffer(raw) }.map_err(RenderError::Api)
    }

    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceHandle> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.device().create_fence(&create_info, None) }.map_err(RenderError::Api)?;
        Ok(self.fences.insert(fence))
    }

    fn wait_fence(&mut self, fence: FenceHandle) -> RenderResult<()> {
        let raw = *self.fences.get(fence).ok_or_else(|| missing("fence"))?;
        unsafe { self.device().wait_for_fences(&[raw], true, u64::MAX) }.map_err(RenderError::Api)
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> RenderResult<()> {
        let raw = *self.fences.get(fence).ok_or_else(|| missing("fence"))?;
        unsafe { self.device().reset_fences(&[raw]) }.map_err(RenderError::Api)
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if let Some(fence) = self.fences.remove(fence) {
            unsafe { self.device().destroy_fence(fence, None) };
        }
    }

    fn create_semaphore(&mut self) -> RenderResult<SemaphoreHandle> {
        let semaphore = unsafe { self.device().create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .map_err(RenderError::Api)?;
        Ok(self.semaphores.insert(semaphore))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        if let Some(semaphore) = self.semaphores.remove(semaphore) {
            unsafe { self.device().destroy_semaphore(semaphore, None) };
        }
    }

    fn submit(&mut self, submission: &Submission<'_>) -> RenderResult<()> {
        let command_buffers =
            [*self.command_buffers.get(submission.command_buffer).ok_or_else(|| missing("command buffer"))?];
        let mut wait_semaphores = Vec::with_capacity(submission.waits.len());
        let mut wait_stages = Vec::with_capacity(submission.waits.len());
        for &(semaphore, stage) in submission.waits {
            wait_semaphores.push(*self.semaphores.get(semaphore).ok_or_else(|| missing("semaphore"))?);
            wait_stages.push(stage);
        }
        let signal_semaphores = submission
            .signals
            .iter()
            .map(|&semaphore| self.semaphores.get(semaphore).copied().ok_or_else(|| missing("semaphore")))
            .collect::<RenderResult<Vec<_>>>()?;
        let fence = match submission.fence {
            Some(fence) => *self.fences.get(fence).ok_or_else(|| missing("fence"))?,
            None => vk::Fence::null(),
        };

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe { self.device().queue_submit(self.context.graphics_queue, &[submit_info], fence) }
            .map_err(RenderError::Api)
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        unsafe { self.device().device_wait_idle() }.map_err(RenderError::Api)
    }

    fn swapchain_info(&self) -> SwapchainInfo {
        let extent = self.swapchain.extent();
        SwapchainInfo {
            width: extent.width,
            height: extent.height,
            format: self.swapchain.format(),
            image_count: self.swapchain.image_count(),
        }
    }

    fn swapchain_images(&self) -> Vec<ImageHandle> {
        self.swapchain_images.clone()
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::invalid("swapchain extent must be non-zero"));
        }
        self.wait_idle()?;
        let replacement =
            Swapchain::new(&self.context, self.requested_images, self.vsync, width, height, self.swapchain.handle())?;
        let mut retired = std::mem::replace(&mut self.swapchain, replacement);
        retired.destroy(&self.context.device);
        self.register_swapchain_images();
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> RenderResult<AcquireOutcome> {
        let semaphore = *self.semaphores.get(signal).ok_or_else(|| missing("semaphore"))?;
        Ok(match self.swapchain.acquire(semaphore)? {
            Some(index) => AcquireOutcome::Image(index),
            None => AcquireOutcome::Stale,
        })
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> RenderResult<PresentOutcome> {
        let semaphore = *self.semaphores.get(wait).ok_or_else(|| missing("semaphore"))?;
        let presented = self.swapchain.present(self.context.graphics_queue, image_index, semaphore)?;
        Ok(if presented { PresentOutcome::Presented } else { PresentOutcome::Stale })
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let device = self.context.device.clone();
        unsafe {
            let _ = device.device_wait_idle();

            for (_, raw) in self.pipelines.drain() {
                device.destroy_pipeline(raw.pipeline, None);
                device.destroy_pipeline_layout(raw.layout, None);
            }
            for (_, framebuffer) in self.framebuffers.drain() {
                device.destroy_framebuffer(framebuffer, None);
            }
            for (_, render_pass) in self.render_passes.drain() {
                device.destroy_render_pass(render_pass, None);
            }
            self.sets.clear();
            for (_, pool) in self.pools.drain() {
                device.destroy_descriptor_pool(pool, None);
            }
            for (_, layout) in self.layouts.drain() {
                device.destroy_descriptor_set_layout(layout, None);
            }
            for (_, sampler) in self.samplers.drain() {
                device.destroy_sampler(sampler, None);
            }
            for (_, raw) in self.images.drain() {
                if let Some(memory) = raw.memory {
                    device.destroy_image_view(raw.view, None);
                    device.destroy_image(raw.image, None);
                    device.free_memory(memory, None);
                }
            }
            for (_, raw) in self.buffers.drain() {
                device.destroy_buffer(raw.buffer, None);
                device.free_memory(raw.memory, None);
            }
            for (_, fence) in self.fences.drain() {
                device.destroy_fence(fence, None);
            }
            for (_, semaphore) in self.semaphores.drain() {
                device.destroy_semaphore(semaphore, None);
            }
            self.command_buffers.clear();
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_pipeline_cache(self.pipeline_cache, None);
        }
        self.swapchain.destroy(&device);
        log::debug!("Vulkan device destroyed");
    }
}
