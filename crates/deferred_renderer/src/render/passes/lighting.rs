//! Lighting pass
//!
//! A single full-screen triangle samples the G-buffer and the cascade shadow
//! map and writes the shaded result straight into the acquired swapchain
//! image. Sets: attachments (0), lights (1), inverse matrices (2) and
//! cascades (3); everything but the attachments is kept per swapchain image.

use ash::vk;

use super::gbuffer::GBuffer;
use super::{shader_path, UniformSets};
use crate::core::config::EngineProperties;
use crate::render::commands::{viewport, CommandRecorder};
use crate::render::device::{
    AttachmentDesc, ClearValue, CommandBufferHandle, DescriptorPoolHandle, DescriptorSetHandle, FramebufferDesc,
    FramebufferHandle, GpuDevice, ImageHandle, PipelineDesc, PipelineHandle, RenderPassDesc, RenderPassHandle,
    SamplerDesc, SamplerHandle, ShaderStageDesc, SpecializationConstants,
};
use crate::render::resources::descriptor::{
    DescriptorPoolBuilder, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter,
};
use crate::render::resources::uniform::{
    CascadesUniform, InverseMatricesUniform, LightsUniform, SHADOW_MAP_CASCADE_COUNT,
};
use crate::render::{RenderError, RenderResult};
use crate::scene::{Scene, MAX_LIGHTS};

/// Label of the lighting render pass
pub const LIGHTING_PASS: &str = "lighting";

/// Sampled attachments: albedo, normal, pbr, depth, shadow map
const ATTACHMENT_BINDINGS: u32 = 5;

const LIGHTS_SIZE: u64 = std::mem::size_of::<LightsUniform>() as u64;
const INVERSE_SIZE: u64 = std::mem::size_of::<InverseMatricesUniform>() as u64;
const CASCADES_SIZE: u64 = std::mem::size_of::<CascadesUniform>() as u64;

fn lighting_render_pass(format: vk::Format) -> RenderPassDesc {
    RenderPassDesc {
        label: LIGHTING_PASS,
        color_attachments: vec![AttachmentDesc::cleared(format, vk::ImageLayout::PRESENT_SRC_KHR)],
        depth_attachment: None,
        dependencies: vec![vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        }],
    }
}

/// Fragment-stage specialization: light slots, cascade count, PCF, depth
/// bias and the cascade debug view, in constant-id order
fn lighting_constants(props: &EngineProperties) -> SpecializationConstants {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let (lights, cascades) = (MAX_LIGHTS as i32, SHADOW_MAP_CASCADE_COUNT as i32);
    SpecializationConstants::default()
        .int(lights)
        .int(cascades)
        .flag(props.shadow_pcf)
        .float(props.shadow_bias)
        .flag(props.shadow_debug)
}

/// Full-screen shading into the swapchain
pub struct LightingPass {
    extent: vk::Extent2D,
    render_pass: RenderPassHandle,
    framebuffers: Vec<FramebufferHandle>,
    sampler: SamplerHandle,
    attachment_layout: DescriptorSetLayout,
    uniform_layout: DescriptorSetLayout,
    attachment_pool: DescriptorPoolHandle,
    attachment_set: DescriptorSetHandle,
    pipeline: PipelineHandle,
    lights: UniformSets,
    inverse_matrices: UniformSets,
    cascades: UniformSets,
}

impl LightingPass {
    /// Create the pass for the device's current swapchain, sampling `gbuffer`
    /// and the layered `shadow_map`
    pub fn new(
        device: &mut dyn GpuDevice,
        props: &EngineProperties,
        gbuffer: &GBuffer,
        shadow_map: ImageHandle,
    ) -> RenderResult<Self> {
        let swapchain = device.swapchain_info();
        let render_pass = device.create_render_pass(&lighting_render_pass(swapchain.format))?;
        let framebuffers = create_framebuffers(device, render_pass)?;
        let sampler = device.create_sampler(&SamplerDesc::attachment())?;

        let attachment_layout = (0..ATTACHMENT_BINDINGS)
            .fold(DescriptorSetLayoutBuilder::new(), |builder, binding| {
                builder.add_combined_image_sampler(binding, vk::ShaderStageFlags::FRAGMENT)
            })
            .build(device)?;
        let uniform_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::FRAGMENT)
            .build(device)?;

        let attachment_pool = DescriptorPoolBuilder::new().reserve(&attachment_layout, 1).build(device)?;
        let attachment_set = attachment_writes(gbuffer, shadow_map, sampler).allocate(
            device,
            attachment_pool,
            &attachment_layout,
        )?;

        let pipeline = device.create_pipeline(&PipelineDesc {
            label: LIGHTING_PASS,
            render_pass,
            stages: vec![
                ShaderStageDesc {
                    stage: vk::ShaderStageFlags::VERTEX,
                    path: shader_path(&props.shader_dir, "lighting.vert.spv"),
                    specialization: None,
                },
                ShaderStageDesc {
                    stage: vk::ShaderStageFlags::FRAGMENT,
                    path: shader_path(&props.shader_dir, "lighting.frag.spv"),
                    specialization: Some(lighting_constants(props)),
                },
            ],
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            color_attachment_count: 1,
            depth_test: false,
            depth_clamp: false,
            cull_mode: vk::CullModeFlags::NONE,
            set_layouts: vec![
                attachment_layout.handle(),
                uniform_layout.handle(),
                uniform_layout.handle(),
                uniform_layout.handle(),
            ],
            push_constants: None,
        })?;

        let count = swapchain.image_count;
        let lights = UniformSets::new(device, "lights", &uniform_layout, LIGHTS_SIZE, count)?;
        let inverse_matrices = UniformSets::new(device, "inverse matrices", &uniform_layout, INVERSE_SIZE, count)?;
        let cascades = UniformSets::new(device, "lighting cascades", &uniform_layout, CASCADES_SIZE, count)?;

        log::debug!("Lighting pass ready for {} swapchain images", framebuffers.len());
        Ok(Self {
            extent: swapchain.extent(),
            render_pass,
            framebuffers,
            sampler,
            attachment_layout,
            uniform_layout,
            attachment_pool,
            attachment_set,
            pipeline,
            lights,
            inverse_matrices,
            cascades,
        })
    }

    /// Write lights, inverse matrices and `cascades` for `image_index`
    ///
    /// Light positions and directions are transformed into view space with
    /// the current camera.
    pub fn update(
        &self,
        device: &mut dyn GpuDevice,
        scene: &Scene,
        cascades: &CascadesUniform,
        image_index: u32,
    ) -> RenderResult<()> {
        let view = scene.camera().view_matrix();
        let lights = LightsUniform::new(scene.ambient_light().into(), scene.lights(), view);
        let inverse = InverseMatricesUniform::new(scene.projection().matrix(), view);
        self.lights.write(device, image_index, bytemuck::bytes_of(&lights))?;
        self.inverse_matrices.write(device, image_index, bytemuck::bytes_of(&inverse))?;
        self.cascades.write(device, image_index, bytemuck::bytes_of(cascades))
    }

    /// Record the full-screen pass into swapchain image `image_index`
    pub fn record(
        &self,
        device: &mut dyn GpuDevice,
        command_buffer: CommandBufferHandle,
        image_index: u32,
    ) -> RenderResult<()> {
        let framebuffer = self
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| RenderError::ResourceNotFound(format!("lighting framebuffer {}", image_index)))?;
        let sets = [
            self.attachment_set,
            self.lights.set(image_index)?,
            self.inverse_matrices.set(image_index)?,
            self.cascades.set(image_index)?,
        ];

        let mut recorder = CommandRecorder::begin(device, command_buffer)?;
        recorder
            .begin_render_pass(self.render_pass, framebuffer, self.extent, &[ClearValue::Color([0.0, 0.0, 0.0, 1.0])])?
            .set_viewport(viewport(self.extent), self.extent)?
            .bind_pipeline(self.pipeline)?
            .bind_descriptor_sets(self.pipeline, &sets, &[])?
            .draw(3)?
            .end_render_pass()?;
        recorder.finish()
    }

    /// Follow a rebuilt swapchain and G-buffer: new framebuffers for the
    /// current swapchain images and a rewritten attachment set
    ///
    /// The device must be idle.
    pub fn resize(&mut self, device: &mut dyn GpuDevice, gbuffer: &GBuffer, shadow_map: ImageHandle) -> RenderResult<()> {
        self.recreate_framebuffers(device)?;
        attachment_writes(gbuffer, shadow_map, self.sampler).update(device, self.attachment_set)
    }

    /// Replace the framebuffers with ones for the current swapchain images
    pub fn recreate_framebuffers(&mut self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        self.framebuffers = create_framebuffers(device, self.render_pass)?;
        self.extent = device.swapchain_info().extent();
        Ok(())
    }

    /// Rebuild per-image uniforms for a new swapchain image count
    pub fn recreate_uniforms(&mut self, device: &mut dyn GpuDevice, image_count: u32) -> RenderResult<()> {
        for (uniforms, label, size) in [
            (&mut self.lights, "lights", LIGHTS_SIZE),
            (&mut self.inverse_matrices, "inverse matrices", INVERSE_SIZE),
            (&mut self.cascades, "lighting cascades", CASCADES_SIZE),
        ] {
            uniforms.destroy(device);
            *uniforms = UniformSets::new(device, label, &self.uniform_layout, size, image_count)?;
        }
        Ok(())
    }

    /// Release every object, reverse creation order
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        self.cascades.destroy(device);
        self.inverse_matrices.destroy(device);
        self.lights.destroy(device);
        device.destroy_pipeline(self.pipeline);
        device.destroy_descriptor_pool(self.attachment_pool);
        self.uniform_layout.destroy(device);
        self.attachment_layout.destroy(device);
        device.destroy_sampler(self.sampler);
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        device.destroy_render_pass(self.render_pass);
    }
}

fn attachment_writes(gbuffer: &GBuffer, shadow_map: ImageHandle, sampler: SamplerHandle) -> DescriptorWriter {
    let [albedo, normal, pbr] = gbuffer.color_attachments();
    DescriptorWriter::new()
        .image(0, albedo, sampler, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .image(1, normal, sampler, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .image(2, pbr, sampler, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .image(3, gbuffer.depth_attachment(), sampler, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
        .image(4, shadow_map, sampler, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
}

fn create_framebuffers(
    device: &mut dyn GpuDevice,
    render_pass: RenderPassHandle,
) -> RenderResult<Vec<FramebufferHandle>> {
    let extent = device.swapchain_info().extent();
    let mut framebuffers = Vec::new();
    for image in device.swapchain_images() {
        let created = device.create_framebuffer(&FramebufferDesc {
            render_pass,
            attachments: vec![image],
            width: extent.width,
            height: extent.height,
            layers: 1,
        });
        match created {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(err) => {
                for framebuffer in framebuffers {
                    device.destroy_framebuffer(framebuffer);
                }
                return Err(err);
            }
        }
    }
    Ok(framebuffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Vec3, Vec4};
    use crate::render::device::headless::HeadlessDevice;
    use crate::render::device::{Command, ImageDesc, Submission};
    use crate::scene::Light;
    use approx::assert_relative_eq;
    use bytemuck::Zeroable;

    struct Fixture {
        device: HeadlessDevice,
        gbuffer: GBuffer,
        shadow_map: ImageHandle,
        pass: LightingPass,
    }

    fn shadow_map(device: &mut HeadlessDevice) -> ImageHandle {
        device
            .create_image(&ImageDesc {
                label: "shadow map",
                width: 128,
                height: 128,
                format: vk::Format::D32_SFLOAT,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                mip_levels: 1,
                array_layers: 3,
            })
            .unwrap()
    }

    fn fixture() -> Fixture {
        let mut device = HeadlessDevice::new(80, 60, 3);
        let gbuffer = GBuffer::new(&mut device, vk::Extent2D { width: 80, height: 60 }).unwrap();
        let shadow_map = shadow_map(&mut device);
        let pass = LightingPass::new(&mut device, &EngineProperties::default(), &gbuffer, shadow_map).unwrap();
        Fixture { device, gbuffer, shadow_map, pass }
    }

    #[test]
    fn one_fullscreen_triangle_per_frame() {
        let mut f = fixture();
        let command_buffer = f.device.allocate_command_buffer().unwrap();
        f.pass.record(&mut f.device, command_buffer, 2).unwrap();
        f.device.submit(&Submission { command_buffer, waits: &[], signals: &[], fence: None }).unwrap();

        let commands = f.device.commands_in_pass(LIGHTING_PASS);
        assert!(commands.iter().any(|c| matches!(c, Command::Draw { vertex_count: 3, instance_count: 1 })));
        assert!(commands.iter().any(|c| matches!(c, Command::SetViewport(v) if v.height == 60.0)));
        assert_eq!(f.pass.framebuffers.len(), 3);
        assert!(f.device.validation_errors().is_empty(), "{:?}", f.device.validation_errors());
    }

    #[test]
    fn lights_are_written_in_view_space() {
        let mut f = fixture();
        let props = EngineProperties::default();
        let mut scene = Scene::new(&props, 80, 60);
        scene.camera_mut().set_position(0.0, 0.0, 5.0);
        scene.set_ambient_light(Vec4::new(0.2, 0.2, 0.2, 1.0));
        scene
            .set_lights(vec![Light::point(Vec3::new(0.0, 0.0, 1.0), Vec3::repeat(1.0), 2.0)])
            .unwrap();

        f.pass.update(&mut f.device, &scene, &CascadesUniform::zeroed(), 1).unwrap();

        let data = f.device.buffer_data(f.pass.lights.buffer(1).unwrap()).unwrap();
        let lights: &LightsUniform = bytemuck::from_bytes(data);
        assert_eq!(lights.count, 1);
        assert_relative_eq!(lights.ambient[0], 0.2);
        // camera at z = 5 looking down -z sees the light 4 units ahead
        assert_relative_eq!(lights.lights[0].position[2], -4.0, epsilon = 1e-5);
        assert_relative_eq!(lights.lights[0].position[3], 1.0);
        assert!(f.device.buffer_data(f.pass.lights.buffer(0).unwrap()).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn inverse_view_recovers_world_positions() {
        let mut f = fixture();
        let mut scene = Scene::new(&EngineProperties::default(), 80, 60);
        scene.camera_mut().set_position(3.0, 1.0, -2.0);

        f.pass.update(&mut f.device, &scene, &CascadesUniform::zeroed(), 0).unwrap();

        let data = f.device.buffer_data(f.pass.inverse_matrices.buffer(0).unwrap()).unwrap();
        let inverse: &InverseMatricesUniform = bytemuck::from_bytes(data);
        // translation column of the inverse view is the camera position
        assert_relative_eq!(inverse.inverse_view[3][0], 3.0, epsilon = 1e-5);
        assert_relative_eq!(inverse.inverse_view[3][1], 1.0, epsilon = 1e-5);
        assert_relative_eq!(inverse.inverse_view[3][2], -2.0, epsilon = 1e-5);
    }

    #[test]
    fn resize_follows_the_new_swapchain() {
        let mut f = fixture();
        let before = f.device.resource_counts();

        f.device.recreate_swapchain(40, 30).unwrap();
        let gbuffer = GBuffer::new(&mut f.device, vk::Extent2D { width: 40, height: 30 }).unwrap();
        std::mem::replace(&mut f.gbuffer, gbuffer).destroy(&mut f.device);
        f.pass.resize(&mut f.device, &f.gbuffer, f.shadow_map).unwrap();

        assert_eq!(f.device.resource_counts(), before);
        assert_eq!(f.pass.extent, vk::Extent2D { width: 40, height: 30 });

        let command_buffer = f.device.allocate_command_buffer().unwrap();
        f.pass.record(&mut f.device, command_buffer, 0).unwrap();
        f.device.submit(&Submission { command_buffer, waits: &[], signals: &[], fence: None }).unwrap();
        assert!(f.device.validation_errors().is_empty(), "{:?}", f.device.validation_errors());
    }

    #[test]
    fn fragment_constants_follow_shadow_settings() {
        let props = EngineProperties::default().with_shadows(1024, 0.001, true);
        let constants = lighting_constants(&props);

        assert_eq!(constants.entries.len(), 5);
        assert_eq!(&constants.data[0..4], &10i32.to_ne_bytes());
        assert_eq!(&constants.data[4..8], &3i32.to_ne_bytes());
        assert_eq!(&constants.data[8..12], &1i32.to_ne_bytes());
        assert_eq!(&constants.data[12..16], &0.001f32.to_ne_bytes());
    }

    #[test]
    fn destroy_releases_everything() {
        let mut f = fixture();
        f.pass.destroy(&mut f.device);
        f.gbuffer.destroy(&mut f.device);
        f.device.destroy_image(f.shadow_map);

        let counts = f.device.resource_counts();
        assert_eq!(counts, Default::default());
        assert!(f.device.validation_errors().is_empty());
    }
}
