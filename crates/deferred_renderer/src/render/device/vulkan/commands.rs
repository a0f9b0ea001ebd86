//! Translation of recorded [`Command`]s into Vulkan calls

use ash::vk;

use super::VulkanDevice;
use crate::render::device::Command;
use crate::render::{RenderError, RenderResult};

fn missing(kind: &str) -> RenderError {
    RenderError::ResourceNotFound(kind.to_string())
}

impl VulkanDevice {
    pub(super) fn record_raw(&self, cmd: vk::CommandBuffer, command: Command) -> RenderResult<()> {
        let device = &self.context.device;
        match command {
            Command::BeginRenderPass { render_pass, framebuffer, extent, clear_values } => {
                let render_pass = *self.render_passes.get(render_pass).ok_or_else(|| missing("render pass"))?;
                let framebuffer = *self.framebuffers.get(framebuffer).ok_or_else(|| missing("framebuffer"))?;
                let clear_values: Vec<_> = clear_values.into_iter().map(|value| value.to_vk()).collect();
                let begin_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(framebuffer)
                    .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent })
                    .clear_values(&clear_values);
                unsafe { device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE) };
            }
            Command::EndRenderPass => unsafe { device.cmd_end_render_pass(cmd) },
            Command::BindPipeline(pipeline) => {
                let pipeline = self.pipelines.get(pipeline).ok_or_else(|| missing("pipeline"))?;
                unsafe { device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline) };
            }
            Command::SetViewport(viewport) => unsafe { device.cmd_set_viewport(cmd, 0, &[viewport]) },
            Command::SetScissor(scissor) => unsafe { device.cmd_set_scissor(cmd, 0, &[scissor]) },
            Command::BindVertexBuffer(buffer) => {
                let buffer = self.buffers.get(buffer).ok_or_else(|| missing("vertex buffer"))?;
                unsafe { device.cmd_bind_vertex_buffers(cmd, 0, &[buffer.buffer], &[0]) };
            }
            Command::BindIndexBuffer(buffer) => {
                let buffer = self.buffers.get(buffer).ok_or_else(|| missing("index buffer"))?;
                unsafe { device.cmd_bind_index_buffer(cmd, buffer.buffer, 0, vk::IndexType::UINT32) };
            }
            Command::BindDescriptorSets { pipeline, first_set, sets, dynamic_offsets } => {
                let layout = self.pipelines.get(pipeline).ok_or_else(|| missing("pipeline"))?.layout;
                let sets = sets
                    .into_iter()
                    .map(|set| self.sets.get(set).map(|entry| entry.set).ok_or_else(|| missing("descriptor set")))
                    .collect::<RenderResult<Vec<_>>>()?;
                unsafe {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        layout,
                        first_set,
                        &sets,
                        &dynamic_offsets,
                    );
                }
            }
            Command::PushConstants { pipeline, stages, data } => {
                let layout = self.pipelines.get(pipeline).ok_or_else(|| missing("pipeline"))?.layout;
                unsafe { device.cmd_push_constants(cmd, layout, stages, 0, &data) };
            }
            Command::Draw { vertex_count, instance_count } => unsafe {
                device.cmd_draw(cmd, vertex_count, instance_count, 0, 0);
            },
            Command::DrawIndexed { index_count, instance_count } => unsafe {
                device.cmd_draw_indexed(cmd, index_count, instance_count, 0, 0, 0);
            },
        }
        Ok(())
    }
}
