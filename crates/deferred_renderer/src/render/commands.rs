//! Typed command recording
//!
//! [`CommandRecorder`] begins a command buffer on creation and tracks whether a
//! render pass is open so passes can't end a buffer mid-pass.

use ash::vk;

use crate::render::device::{
    BufferHandle, ClearValue, Command, CommandBufferHandle, DescriptorSetHandle, FramebufferHandle, GpuDevice,
    PipelineHandle, RenderPassHandle,
};
use crate::render::{RenderError, RenderResult};

/// Viewport covering `extent` with Y pointing up
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Viewport covering `extent`
pub fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Records [`Command`]s into one command buffer
pub struct CommandRecorder<'a> {
    device: &'a mut dyn GpuDevice,
    command_buffer: CommandBufferHandle,
    in_render_pass: bool,
}

impl<'a> CommandRecorder<'a> {
    /// Reset and begin `command_buffer`
    pub fn begin(device: &'a mut dyn GpuDevice, command_buffer: CommandBufferHandle) -> RenderResult<Self> {
        device.begin_command_buffer(command_buffer)?;
        Ok(Self { device, command_buffer, in_render_pass: false })
    }

    fn push(&mut self, command: Command) -> RenderResult<&mut Self> {
        self.device.record(self.command_buffer, command)?;
        Ok(self)
    }

    /// Begin a render pass covering `extent`
    pub fn begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: vk::Extent2D,
        clear_values: &[ClearValue],
    ) -> RenderResult<&mut Self> {
        if self.in_render_pass {
            return Err(RenderError::invalid("render pass already active"));
        }
        self.in_render_pass = true;
        self.push(Command::BeginRenderPass { render_pass, framebuffer, extent, clear_values: clear_values.to_vec() })
    }

    /// End the active render pass
    pub fn end_render_pass(&mut self) -> RenderResult<&mut Self> {
        if !self.in_render_pass {
            return Err(RenderError::invalid("no active render pass"));
        }
        self.in_render_pass = false;
        self.push(Command::EndRenderPass)
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> RenderResult<&mut Self> {
        self.push(Command::BindPipeline(pipeline))
    }

    /// Set viewport and a scissor covering `extent`
    pub fn set_viewport(&mut self, viewport: vk::Viewport, extent: vk::Extent2D) -> RenderResult<&mut Self> {
        self.push(Command::SetViewport(viewport))?;
        self.push(Command::SetScissor(vk::Rect2D { offset: vk::Offset2D::default(), extent }))
    }

    /// Bind the vertex buffer at binding 0
    pub fn bind_vertex_buffer(&mut self, buffer: BufferHandle) -> RenderResult<&mut Self> {
        self.push(Command::BindVertexBuffer(buffer))
    }

    /// Bind a `u32` index buffer
    pub fn bind_index_buffer(&mut self, buffer: BufferHandle) -> RenderResult<&mut Self> {
        self.push(Command::BindIndexBuffer(buffer))
    }

    /// Bind `sets` starting at set 0
    pub fn bind_descriptor_sets(
        &mut self,
        pipeline: PipelineHandle,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    ) -> RenderResult<&mut Self> {
        self.push(Command::BindDescriptorSets {
            pipeline,
            first_set: 0,
            sets: sets.to_vec(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        })
    }

    /// Push `data` at offset 0
    pub fn push_constants(
        &mut self,
        pipeline: PipelineHandle,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) -> RenderResult<&mut Self> {
        self.push(Command::PushConstants { pipeline, stages, data: data.to_vec() })
    }

    /// Non-indexed draw
    pub fn draw(&mut self, vertex_count: u32) -> RenderResult<&mut Self> {
        self.push(Command::Draw { vertex_count, instance_count: 1 })
    }

    /// Indexed draw
    pub fn draw_indexed(&mut self, index_count: u32) -> RenderResult<&mut Self> {
        self.push(Command::DrawIndexed { index_count, instance_count: 1 })
    }

    /// End the command buffer
    pub fn finish(self) -> RenderResult<()> {
        if self.in_render_pass {
            return Err(RenderError::invalid("command buffer ended inside a render pass"));
        }
        self.device.end_command_buffer(self.command_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::headless::HeadlessDevice;

    #[test]
    fn flipped_viewport_starts_at_bottom() {
        let viewport = flipped_viewport(vk::Extent2D { width: 800, height: 600 });
        assert_eq!(viewport.y, 600.0);
        assert_eq!(viewport.height, -600.0);
        assert_eq!(viewport.width, 800.0);
    }

    #[test]
    fn finish_inside_render_pass_is_rejected() {
        let mut device = HeadlessDevice::new(4, 4, 2);
        let command_buffer = device.allocate_command_buffer().unwrap();
        let mut recorder = CommandRecorder::begin(&mut device, command_buffer).unwrap();
        assert!(recorder.end_render_pass().is_err());

        recorder.in_render_pass = true;
        assert!(matches!(recorder.finish(), Err(RenderError::InvalidOperation { .. })));
    }
}
