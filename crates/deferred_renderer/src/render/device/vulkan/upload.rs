//! Staging transfers
//!
//! Every transfer records into a one-shot command buffer, submits it and waits
//! on a fence before returning, so the staging buffer can be released
//! immediately.

use ash::vk;

use super::memory::allocate_buffer_memory;
use crate::render::{RenderError, RenderResult};

/// Raw buffer with its bound memory
pub(super) fn create_raw_buffer(
    device: &ash::Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    size: u64,
    usage: vk::BufferUsageFlags,
    flags: vk::MemoryPropertyFlags,
) -> RenderResult<(vk::Buffer, vk::DeviceMemory)> {
    let create_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { device.create_buffer(&create_info, None) }.map_err(RenderError::Api)?;
    match allocate_buffer_memory(device, memory_properties, buffer, flags) {
        Ok(memory) => Ok((buffer, memory)),
        Err(err) => {
            unsafe { device.destroy_buffer(buffer, None) };
            Err(err)
        }
    }
}

/// Copy `data` into host-visible `memory` at `offset`
pub(super) fn write_mapped(device: &ash::Device, memory: vk::DeviceMemory, offset: u64, data: &[u8]) -> RenderResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    unsafe {
        let ptr = device
            .map_memory(memory, offset, data.len() as u64, vk::MemoryMapFlags::empty())
            .map_err(RenderError::Api)?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
        device.unmap_memory(memory);
    }
    Ok(())
}

/// Everything a blocking transfer needs
pub(super) struct Transfer<'a> {
    pub device: &'a ash::Device,
    pub memory_properties: &'a vk::PhysicalDeviceMemoryProperties,
    pub queue: vk::Queue,
    pub command_pool: vk::CommandPool,
}

struct Staging<'a> {
    device: &'a ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
}

impl Drop for Staging<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

impl<'a> Transfer<'a> {
    fn staging(&self, data: &[u8]) -> RenderResult<Staging<'a>> {
        let (buffer, memory) = create_raw_buffer(
            self.device,
            self.memory_properties,
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let staging = Staging { device: self.device, buffer, memory };
        write_mapped(self.device, memory, 0, data)?;
        Ok(staging)
    }

    fn one_shot(&self, record: impl FnOnce(vk::CommandBuffer)) -> RenderResult<()> {
        let device = self.device;
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = unsafe { device.allocate_command_buffers(&allocate_info) }.map_err(RenderError::Api)?;
        let command_buffer = command_buffers[0];

        let result = (|| {
            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(command_buffer, &begin_info) }?;
            record(command_buffer);
            unsafe { device.end_command_buffer(command_buffer) }?;

            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }?;
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
            let submitted = unsafe {
                device
                    .queue_submit(self.queue, &[submit_info], fence)
                    .and_then(|()| device.wait_for_fences(&[fence], true, u64::MAX))
            };
            unsafe { device.destroy_fence(fence, None) };
            submitted
        })();

        unsafe { device.free_command_buffers(self.command_pool, &command_buffers) };
        result.map_err(RenderError::Api)
    }

    /// Copy `data` into the device-local `dst`
    pub fn copy_to_buffer(&self, dst: vk::Buffer, data: &[u8]) -> RenderResult<()> {
        let staging = self.staging(data)?;
        self.one_shot(|cmd| unsafe {
            let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size: data.len() as u64 };
            self.device.cmd_copy_buffer(cmd, staging.buffer, dst, &[region]);

            let barrier = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ)
                .build();
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        })
    }

    /// Upload RGBA8 `pixels` into mip 0 of `image`, blit the remaining mips
    /// and leave every level shader-readable
    pub fn upload_image(
        &self,
        image: vk::Image,
        width: u32,
        height: u32,
        mip_levels: u32,
        pixels: &[u8],
    ) -> RenderResult<()> {
        let staging = self.staging(pixels)?;
        let device = self.device;

        self.one_shot(|cmd| unsafe {
            transition(
                device,
                cmd,
                image,
                0,
                mip_levels,
                (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
                (vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::TRANSFER),
            );

            let region = vk::BufferImageCopy::builder()
                .image_subresource(color_layers(0))
                .image_extent(vk::Extent3D { width, height, depth: 1 })
                .build();
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let (mut mip_width, mut mip_height) = (mip_dimension(width), mip_dimension(height));
            for level in 1..mip_levels {
                transition(
                    device,
                    cmd,
                    image,
                    level - 1,
                    1,
                    (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
                    (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_READ),
                    (vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::TRANSFER),
                );

                let next_width = (mip_width / 2).max(1);
                let next_height = (mip_height / 2).max(1);
                let blit = vk::ImageBlit::builder()
                    .src_subresource(color_layers(level - 1))
                    .src_offsets([vk::Offset3D::default(), vk::Offset3D { x: mip_width, y: mip_height, z: 1 }])
                    .dst_subresource(color_layers(level))
                    .dst_offsets([vk::Offset3D::default(), vk::Offset3D { x: next_width, y: next_height, z: 1 }])
                    .build();
                device.cmd_blit_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );

                transition(
                    device,
                    cmd,
                    image,
                    level - 1,
                    1,
                    (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                    (vk::AccessFlags::TRANSFER_READ, vk::AccessFlags::SHADER_READ),
                    (vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::FRAGMENT_SHADER),
                );

                mip_width = next_width;
                mip_height = next_height;
            }

            transition(
                device,
                cmd,
                image,
                mip_levels - 1,
                1,
                (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ),
                (vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::FRAGMENT_SHADER),
            );
        })
    }
}

fn mip_dimension(size: u32) -> i32 {
    i32::try_from(size).unwrap_or(i32::MAX)
}

fn color_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

unsafe fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    base_mip_level: u32,
    level_count: u32,
    layouts: (vk::ImageLayout, vk::ImageLayout),
    access: (vk::AccessFlags, vk::AccessFlags),
    stages: (vk::PipelineStageFlags, vk::PipelineStageFlags),
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(layouts.0)
        .new_layout(layouts.1)
        .src_access_mask(access.0)
        .dst_access_mask(access.1)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build();
    device.cmd_pipeline_barrier(cmd, stages.0, stages.1, vk::DependencyFlags::empty(), &[], &[], &[barrier]);
}
