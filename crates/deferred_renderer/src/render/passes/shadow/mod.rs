//! Cascaded shadow pass
//!
//! Opaque geometry is drawn once per frame into a depth image with one layer
//! per cascade; the geometry shader replicates every triangle into each
//! layer using the cascade matrices from the shadow uniform.

pub mod cascade;

use ash::vk;

pub use cascade::{compute_cascades, split_fractions, Cascade, CascadeShadows, SPLIT_LAMBDA};

use super::{shader_path, UniformSets};
use crate::core::config::EngineProperties;
use crate::foundation::math::to_cols_array;
use crate::render::commands::{flipped_viewport, CommandRecorder};
use crate::render::device::{
    AttachmentDesc, ClearValue, CommandBufferHandle, FramebufferDesc, FramebufferHandle, GpuDevice, ImageDesc,
    ImageHandle, PipelineDesc, PipelineHandle, PushConstantRange, RenderPassDesc, RenderPassHandle, ShaderStageDesc,
};
use crate::render::resources::descriptor::{DescriptorSetLayout, DescriptorSetLayoutBuilder};
use crate::render::resources::model::GpuModel;
use crate::render::resources::uniform::{ModelPushConstant, ShadowUniform, SHADOW_MAP_CASCADE_COUNT};
use crate::render::resources::vertex::Vertex;
use crate::render::RenderResult;
use crate::scene::Scene;

/// Depth format of the cascade array
pub const SHADOW_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Label of the shadow render pass
pub const SHADOW_PASS: &str = "shadow";

#[allow(clippy::cast_possible_truncation)]
const CASCADE_LAYERS: u32 = SHADOW_MAP_CASCADE_COUNT as u32;

fn shadow_render_pass() -> RenderPassDesc {
    RenderPassDesc {
        label: SHADOW_PASS,
        color_attachments: Vec::new(),
        depth_attachment: Some(AttachmentDesc::cleared(
            SHADOW_DEPTH_FORMAT,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        )),
        dependencies: vec![
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                src_access_mask: vk::AccessFlags::SHADER_READ,
                dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::SHADER_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
        ],
    }
}

/// Layered shadow map, its pipeline and the per-image cascade uniforms
pub struct ShadowPass {
    size: u32,
    render_pass: RenderPassHandle,
    depth: ImageHandle,
    framebuffer: FramebufferHandle,
    layout: DescriptorSetLayout,
    pipeline: PipelineHandle,
    uniforms: UniformSets,
    cascades: CascadeShadows,
}

impl ShadowPass {
    /// Create the shadow map at `shadow_map_size` with uniforms for
    /// `image_count` swapchain images
    pub fn new(device: &mut dyn GpuDevice, props: &EngineProperties, image_count: u32) -> RenderResult<Self> {
        let size = props.shadow_map_size;
        let render_pass = device.create_render_pass(&shadow_render_pass())?;
        let depth = device.create_image(&ImageDesc {
            label: "shadow map",
            width: size,
            height: size,
            format: SHADOW_DEPTH_FORMAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            mip_levels: 1,
            array_layers: CASCADE_LAYERS,
        })?;
        let framebuffer = device.create_framebuffer(&FramebufferDesc {
            render_pass,
            attachments: vec![depth],
            width: size,
            height: size,
            layers: CASCADE_LAYERS,
        })?;
        let layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::GEOMETRY)
            .build(device)?;
        let pipeline = device.create_pipeline(&PipelineDesc {
            label: SHADOW_PASS,
            render_pass,
            stages: vec![
                ShaderStageDesc {
                    stage: vk::ShaderStageFlags::VERTEX,
                    path: shader_path(&props.shader_dir, "shadow.vert.spv"),
                    specialization: None,
                },
                ShaderStageDesc {
                    stage: vk::ShaderStageFlags::GEOMETRY,
                    path: shader_path(&props.shader_dir, "shadow.geom.spv"),
                    specialization: None,
                },
            ],
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::position_attribute_descriptions(),
            color_attachment_count: 0,
            depth_test: true,
            depth_clamp: true,
            cull_mode: vk::CullModeFlags::NONE,
            set_layouts: vec![layout.handle()],
            push_constants: Some(PushConstantRange {
                stages: vk::ShaderStageFlags::VERTEX,
                size: std::mem::size_of::<ModelPushConstant>() as u32,
            }),
        })?;
        let uniforms = UniformSets::new(
            device,
            "shadow cascades",
            &layout,
            std::mem::size_of::<ShadowUniform>() as u64,
            image_count,
        )?;

        log::debug!("Shadow map {}x{} with {} cascades", size, size, SHADOW_MAP_CASCADE_COUNT);
        Ok(Self { size, render_pass, depth, framebuffer, layout, pipeline, uniforms, cascades: CascadeShadows::new() })
    }

    /// Depth array sampled by the lighting pass
    pub fn depth_image(&self) -> ImageHandle {
        self.depth
    }

    /// Current cascades
    pub fn cascades(&self) -> &CascadeShadows {
        &self.cascades
    }

    /// Refit cascades for the scene if it changed and write them into the
    /// uniform of `image_index`
    pub fn update(&mut self, device: &mut dyn GpuDevice, scene: &Scene, image_index: u32) -> RenderResult<()> {
        self.cascades.update(scene);
        self.uniforms.write(device, image_index, bytemuck::bytes_of(&self.cascades.shadow_uniform()))
    }

    /// Force a refit on the next update
    pub fn invalidate(&mut self) {
        self.cascades.invalidate();
    }

    /// Rebuild per-image uniforms for a new swapchain image count
    pub fn recreate_uniforms(&mut self, device: &mut dyn GpuDevice, image_count: u32) -> RenderResult<()> {
        self.uniforms.destroy(device);
        self.uniforms = UniformSets::new(
            device,
            "shadow cascades",
            &self.layout,
            std::mem::size_of::<ShadowUniform>() as u64,
            image_count,
        )?;
        Ok(())
    }

    /// Record the cascade depth pass for `image_index`
    ///
    /// Models without entities and transparent materials are not drawn.
    pub fn record(
        &self,
        device: &mut dyn GpuDevice,
        command_buffer: CommandBufferHandle,
        image_index: u32,
        models: &[GpuModel],
        scene: &Scene,
    ) -> RenderResult<()> {
        let extent = vk::Extent2D { width: self.size, height: self.size };
        let set = self.uniforms.set(image_index)?;

        let mut recorder = CommandRecorder::begin(device, command_buffer)?;
        recorder
            .begin_render_pass(self.render_pass, self.framebuffer, extent, &[ClearValue::Depth(1.0)])?
            .set_viewport(flipped_viewport(extent), extent)?
            .bind_pipeline(self.pipeline)?
            .bind_descriptor_sets(self.pipeline, &[set], &[])?;

        for model in models {
            let entities = scene.entities_by_model_id(&model.model_id);
            if entities.is_empty() {
                continue;
            }
            for material in model.materials.iter().filter(|material| !material.transparent) {
                for mesh in &material.meshes {
                    recorder.bind_vertex_buffer(mesh.vertex_buffer)?.bind_index_buffer(mesh.index_buffer)?;
                    for entity in entities {
                        let push = ModelPushConstant { model: to_cols_array(entity.model_matrix()) };
                        recorder
                            .push_constants(self.pipeline, vk::ShaderStageFlags::VERTEX, bytemuck::bytes_of(&push))?
                            .draw_indexed(mesh.index_count)?;
                    }
                }
            }
        }

        recorder.end_render_pass()?;
        recorder.finish()
    }

    /// Release every object, reverse creation order
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        self.uniforms.destroy(device);
        device.destroy_pipeline(self.pipeline);
        self.layout.destroy(device);
        device.destroy_framebuffer(self.framebuffer);
        device.destroy_image(self.depth);
        device.destroy_render_pass(self.render_pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::device::headless::HeadlessDevice;
    use crate::render::device::{Command, Submission};
    use crate::scene::Light;

    fn props() -> EngineProperties {
        EngineProperties::default().with_shadows(512, 0.0005, false)
    }

    #[test]
    fn shadow_map_is_layered_per_cascade() {
        let mut device = HeadlessDevice::new(64, 64, 2);
        let mut pass = ShadowPass::new(&mut device, &props(), 2).unwrap();
        let command_buffer = device.allocate_command_buffer().unwrap();
        let scene = Scene::new(&props(), 64, 64);

        pass.record(&mut device, command_buffer, 1, &[], &scene).unwrap();
        device
            .submit(&Submission { command_buffer, waits: &[], signals: &[], fence: None })
            .unwrap();

        let commands = device.commands_in_pass(SHADOW_PASS);
        assert!(commands.iter().any(|c| matches!(c,
            Command::SetViewport(v) if v.width == 512.0 && v.height == -512.0)));
        assert!(device.validation_errors().is_empty());

        pass.destroy(&mut device);
        device.free_command_buffer(command_buffer);
        let counts = device.resource_counts();
        assert_eq!((counts.images, counts.buffers, counts.pipelines, counts.framebuffers), (0, 0, 0, 0));
    }

    #[test]
    fn update_writes_the_cascades_of_one_image() {
        let mut device = HeadlessDevice::new(64, 64, 3);
        let mut pass = ShadowPass::new(&mut device, &props(), 3).unwrap();
        let mut scene = Scene::new(&props(), 64, 64);
        scene
            .set_lights(vec![Light::directional(Vec3::new(0.0, 1.0, 0.5), Vec3::repeat(1.0), 1.0)])
            .unwrap();

        pass.update(&mut device, &scene, 2).unwrap();

        let expected = pass.cascades().shadow_uniform();
        let written = device.buffer_data(pass.uniforms.buffer(2).unwrap()).unwrap();
        assert_eq!(written, bytemuck::bytes_of(&expected));
        assert!(device.buffer_data(pass.uniforms.buffer(0).unwrap()).unwrap().iter().all(|&b| b == 0));
    }
}
