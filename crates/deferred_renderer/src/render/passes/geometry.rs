//! Geometry pass
//!
//! Draws every entity into the G-buffer. Set layout, in set-index order:
//!
//! | set | contents                           | lifetime              |
//! |-----|------------------------------------|-----------------------|
//! | 0   | projection matrix                  | rewritten on resize   |
//! | 1   | view matrix                        | one per image         |
//! | 2-4 | albedo, normal, metal/rough maps   | one per texture       |
//! | 5   | material record, dynamic offset    | one for all materials |
//!
//! Material records live in one buffer at `ordinal * material_size`, where
//! the ordinal counts materials across all loaded models in draw order. The
//! ordinal advances for models and materials that draw nothing this frame,
//! so offsets always match what [`GeometryPass::register_models`] wrote.

use ash::vk;

use super::gbuffer::{GBuffer, COLOR_FORMATS, DEPTH_FORMAT};
use super::{shader_path, UniformSets};
use crate::core::config::EngineProperties;
use crate::foundation::math::{to_cols_array, Mat4};
use crate::render::commands::{flipped_viewport, CommandRecorder};
use crate::render::device::{
    AttachmentDesc, BufferDesc, BufferHandle, ClearValue, CommandBufferHandle, DescriptorPoolHandle,
    DescriptorSetHandle, FramebufferDesc, FramebufferHandle, GpuDevice, MemoryLocation, PipelineDesc,
    PipelineHandle, PushConstantRange, RenderPassDesc, RenderPassHandle, ShaderStageDesc,
};
use crate::render::resources::descriptor::{
    DescriptorPoolBuilder, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter, TextureDescriptorCache,
};
use crate::render::resources::model::GpuModel;
use crate::render::resources::texture::{TextureCache, TextureId};
use crate::render::resources::uniform::{
    aligned_size, material_offset, MaterialUniform, MatrixUniform, ModelPushConstant,
};
use crate::render::resources::vertex::Vertex;
use crate::render::{RenderError, RenderResult};
use crate::scene::Scene;

/// Label of the geometry render pass
pub const GEOMETRY_PASS: &str = "geometry";

const MATERIAL_RECORD_SIZE: u64 = std::mem::size_of::<MaterialUniform>() as u64;
const MATRIX_SIZE: u64 = std::mem::size_of::<MatrixUniform>() as u64;

fn geometry_render_pass() -> RenderPassDesc {
    let color_access = vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    RenderPassDesc {
        label: GEOMETRY_PASS,
        color_attachments: COLOR_FORMATS
            .iter()
            .map(|&format| AttachmentDesc::cleared(format, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
            .collect(),
        depth_attachment: Some(AttachmentDesc::cleared(DEPTH_FORMAT, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)),
        dependencies: vec![
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                src_access_mask: vk::AccessFlags::MEMORY_READ,
                dst_access_mask: color_access | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: color_access | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::SHADER_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
        ],
    }
}

/// G-buffer, pipeline, matrices and the pooled material bindings
pub struct GeometryPass {
    render_pass: RenderPassHandle,
    gbuffer: GBuffer,
    framebuffer: FramebufferHandle,
    matrix_layout: DescriptorSetLayout,
    texture_layout: DescriptorSetLayout,
    material_layout: DescriptorSetLayout,
    pipeline: PipelineHandle,
    projection: UniformSets,
    views: UniformSets,
    material_pool: DescriptorPoolHandle,
    material_buffer: BufferHandle,
    material_set: DescriptorSetHandle,
    material_size: u64,
    max_materials: usize,
    texture_sets: TextureDescriptorCache,
}

impl GeometryPass {
    /// Create the pass for a swapchain of `extent` with `image_count` images;
    /// `projection` is written once here and again on every resize
    pub fn new(
        device: &mut dyn GpuDevice,
        props: &EngineProperties,
        extent: vk::Extent2D,
        image_count: u32,
        projection: &Mat4,
    ) -> RenderResult<Self> {
        let max_materials = props.max_materials;
        let material_size = aligned_size(MATERIAL_RECORD_SIZE, device.limits().min_uniform_buffer_offset_alignment);
        // The last record must still be reachable through a 32-bit dynamic offset
        material_offset((max_materials as usize).saturating_sub(1), material_size)?;

        let render_pass = device.create_render_pass(&geometry_render_pass())?;
        let gbuffer = GBuffer::new(device, extent)?;
        let framebuffer = create_framebuffer(device, render_pass, &gbuffer)?;

        let matrix_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(device)?;
        let texture_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .build(device)?;
        let material_layout = DescriptorSetLayoutBuilder::new()
            .add_dynamic_uniform_buffer(0, vk::ShaderStageFlags::FRAGMENT)
            .build(device)?;

        let pipeline = device.create_pipeline(&PipelineDesc {
            label: GEOMETRY_PASS,
            render_pass,
            stages: vec![
                ShaderStageDesc {
                    stage: vk::ShaderStageFlags::VERTEX,
                    path: shader_path(&props.shader_dir, "geometry.vert.spv"),
                    specialization: None,
                },
                ShaderStageDesc {
                    stage: vk::ShaderStageFlags::FRAGMENT,
                    path: shader_path(&props.shader_dir, "geometry.frag.spv"),
                    specialization: None,
                },
            ],
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions(),
            color_attachment_count: COLOR_FORMATS.len() as u32,
            depth_test: true,
            depth_clamp: false,
            cull_mode: vk::CullModeFlags::NONE,
            set_layouts: vec![
                matrix_layout.handle(),
                matrix_layout.handle(),
                texture_layout.handle(),
                texture_layout.handle(),
                texture_layout.handle(),
                material_layout.handle(),
            ],
            push_constants: Some(PushConstantRange {
                stages: vk::ShaderStageFlags::VERTEX,
                size: std::mem::size_of::<ModelPushConstant>() as u32,
            }),
        })?;

        let projection_sets = UniformSets::new(device, "projection", &matrix_layout, MATRIX_SIZE, 1)?;
        projection_sets.write(device, 0, bytemuck::bytes_of(&MatrixUniform::new(projection)))?;
        let views = UniformSets::new(device, "view", &matrix_layout, MATRIX_SIZE, image_count)?;

        let material_pool = DescriptorPoolBuilder::new()
            .reserve(&texture_layout, max_materials * 3 + 1)
            .reserve(&material_layout, 1)
            .build(device)?;
        let material_buffer = device.create_buffer(&BufferDesc {
            label: "materials",
            size: material_size * u64::from(max_materials),
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            location: MemoryLocation::HostVisible,
        })?;
        let material_set = DescriptorWriter::new()
            .dynamic_uniform_buffer(0, material_buffer, MATERIAL_RECORD_SIZE)
            .allocate(device, material_pool, &material_layout)?;

        log::debug!("Geometry pass ready: {} materials of {} bytes", max_materials, material_size);
        Ok(Self {
            render_pass,
            gbuffer,
            framebuffer,
            matrix_layout,
            texture_layout,
            material_layout,
            pipeline,
            projection: projection_sets,
            views,
            material_pool,
            material_buffer,
            material_set,
            material_size,
            max_materials: max_materials as usize,
            texture_sets: TextureDescriptorCache::new(),
        })
    }

    /// Attachments the lighting pass samples
    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    /// Stride between material records
    pub fn material_size(&self) -> u64 {
        self.material_size
    }

    /// Material records the buffer holds
    pub fn max_materials(&self) -> usize {
        self.max_materials
    }

    /// Buffer holding every material record
    pub fn material_buffer(&self) -> BufferHandle {
        self.material_buffer
    }

    /// Write material records and create texture sets for `models`, in the
    /// order they will be drawn
    ///
    /// Waits for the device to go idle first, since records of in-flight
    /// frames are overwritten.
    pub fn register_models(
        &mut self,
        device: &mut dyn GpuDevice,
        models: &[GpuModel],
        textures: &TextureCache,
    ) -> RenderResult<()> {
        let requested: usize = models.iter().map(|model| model.materials.len()).sum();
        if requested > self.max_materials {
            log::error!("{} materials requested, the material buffer holds {}", requested, self.max_materials);
            return Err(RenderError::MaterialLimitExceeded { requested, max: self.max_materials });
        }
        device.wait_idle()?;

        let materials = models.iter().flat_map(|model| &model.materials);
        for (ordinal, material) in materials.enumerate() {
            let offset = u64::from(material_offset(ordinal, self.material_size)?);
            device.write_buffer(self.material_buffer, offset, bytemuck::bytes_of(&material.uniform))?;
            for texture in [material.albedo, material.normal_map, material.metal_rough_map] {
                self.texture_set(device, textures, texture)?;
            }
        }
        log::debug!("Registered {} materials, {} texture sets", requested, self.texture_sets.len());
        Ok(())
    }

    fn texture_set(
        &mut self,
        device: &mut dyn GpuDevice,
        textures: &TextureCache,
        texture: TextureId,
    ) -> RenderResult<DescriptorSetHandle> {
        let image = textures
            .get(texture)
            .map(|texture| texture.image)
            .ok_or_else(|| RenderError::ResourceNotFound("texture".into()))?;
        self.texture_sets.get_or_create(
            device,
            self.material_pool,
            &self.texture_layout,
            texture,
            image,
            textures.sampler(),
        )
    }

    fn registered_set(&self, texture: TextureId) -> RenderResult<DescriptorSetHandle> {
        self.texture_sets
            .get(texture)
            .ok_or_else(|| RenderError::invalid("texture drawn before its model was registered"))
    }

    /// Write the camera view matrix for `image_index`
    pub fn update(&self, device: &mut dyn GpuDevice, scene: &Scene, image_index: u32) -> RenderResult<()> {
        let view = MatrixUniform::new(scene.camera().view_matrix());
        self.views.write(device, image_index, bytemuck::bytes_of(&view))
    }

    /// Record the G-buffer pass for `image_index`
    pub fn record(
        &self,
        device: &mut dyn GpuDevice,
        command_buffer: CommandBufferHandle,
        image_index: u32,
        models: &[GpuModel],
        scene: &Scene,
    ) -> RenderResult<()> {
        let extent = self.gbuffer.extent();
        let projection_set = self.projection.set(0)?;
        let view_set = self.views.set(image_index)?;
        let clear_values = [
            ClearValue::Color([0.0; 4]),
            ClearValue::Color([0.0; 4]),
            ClearValue::Color([0.0; 4]),
            ClearValue::Depth(1.0),
        ];

        let mut recorder = CommandRecorder::begin(device, command_buffer)?;
        recorder
            .begin_render_pass(self.render_pass, self.framebuffer, extent, &clear_values)?
            .set_viewport(flipped_viewport(extent), extent)?
            .bind_pipeline(self.pipeline)?;

        let mut ordinal = 0;
        for model in models {
            let entities = scene.entities_by_model_id(&model.model_id);
            if entities.is_empty() {
                ordinal += model.materials.len();
                continue;
            }
            for material in &model.materials {
                if material.meshes.is_empty() {
                    ordinal += 1;
                    continue;
                }
                let sets = [
                    projection_set,
                    view_set,
                    self.registered_set(material.albedo)?,
                    self.registered_set(material.normal_map)?,
                    self.registered_set(material.metal_rough_map)?,
                    self.material_set,
                ];
                let offset = material_offset(ordinal, self.material_size)?;
                recorder.bind_descriptor_sets(self.pipeline, &sets, &[offset])?;

                for mesh in &material.meshes {
                    recorder.bind_vertex_buffer(mesh.vertex_buffer)?.bind_index_buffer(mesh.index_buffer)?;
                    for entity in entities {
                        let push = ModelPushConstant { model: to_cols_array(entity.model_matrix()) };
                        recorder
                            .push_constants(self.pipeline, vk::ShaderStageFlags::VERTEX, bytemuck::bytes_of(&push))?
                            .draw_indexed(mesh.index_count)?;
                    }
                }
                ordinal += 1;
            }
        }

        recorder.end_render_pass()?;
        recorder.finish()
    }

    /// Rebuild the G-buffer and framebuffer at `extent` and rewrite the
    /// projection matrix
    pub fn resize(&mut self, device: &mut dyn GpuDevice, extent: vk::Extent2D, projection: &Mat4) -> RenderResult<()> {
        let gbuffer = GBuffer::new(device, extent)?;
        let framebuffer = match create_framebuffer(device, self.render_pass, &gbuffer) {
            Ok(framebuffer) => framebuffer,
            Err(err) => {
                gbuffer.destroy(device);
                return Err(err);
            }
        };
        device.destroy_framebuffer(std::mem::replace(&mut self.framebuffer, framebuffer));
        std::mem::replace(&mut self.gbuffer, gbuffer).destroy(device);
        self.projection.write(device, 0, bytemuck::bytes_of(&MatrixUniform::new(projection)))
    }

    /// Rebuild per-image view uniforms for a new swapchain image count
    pub fn recreate_view_uniforms(&mut self, device: &mut dyn GpuDevice, image_count: u32) -> RenderResult<()> {
        self.views.destroy(device);
        self.views = UniformSets::new(device, "view", &self.matrix_layout, MATRIX_SIZE, image_count)?;
        Ok(())
    }

    /// Release every object, reverse creation order
    pub fn destroy(&mut self, device: &mut dyn GpuDevice) {
        self.texture_sets.clear();
        device.destroy_buffer(self.material_buffer);
        device.destroy_descriptor_pool(self.material_pool);
        self.views.destroy(device);
        self.projection.destroy(device);
        device.destroy_pipeline(self.pipeline);
        self.material_layout.destroy(device);
        self.texture_layout.destroy(device);
        self.matrix_layout.destroy(device);
        device.destroy_framebuffer(self.framebuffer);
        self.gbuffer.destroy(device);
        device.destroy_render_pass(self.render_pass);
    }
}

fn create_framebuffer(
    device: &mut dyn GpuDevice,
    render_pass: RenderPassHandle,
    gbuffer: &GBuffer,
) -> RenderResult<FramebufferHandle> {
    let extent = gbuffer.extent();
    device.create_framebuffer(&FramebufferDesc {
        render_pass,
        attachments: gbuffer.attachments(),
        width: extent.width,
        height: extent.height,
        layers: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{ImageData, MaterialData, MemoryImageSource, MeshData, ModelData};
    use crate::foundation::math::Vec3;
    use crate::render::device::headless::HeadlessDevice;
    use crate::render::device::{Command, Submission};
    use crate::render::resources::model::{sort_models, upload_models};
    use crate::scene::Entity;

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 64, height: 48 };

    struct Fixture {
        device: HeadlessDevice,
        textures: TextureCache,
        pass: GeometryPass,
        scene: Scene,
    }

    fn fixture(max_materials: u32) -> Fixture {
        let props = EngineProperties::default().with_max_materials(max_materials);
        let mut device = HeadlessDevice::new(EXTENT.width, EXTENT.height, 2);
        let source = MemoryImageSource::new()
            .with_image("default.png", ImageData::solid_color(1, 1, [255; 4]))
            .with_image("wood.png", ImageData::solid_color(2, 2, [120, 80, 40, 255]));
        let textures = TextureCache::new(&mut device, Box::new(source), "default.png").unwrap();
        let scene = Scene::new(&props, EXTENT.width, EXTENT.height);
        let pass = GeometryPass::new(&mut device, &props, EXTENT, 2, scene.projection().matrix()).unwrap();
        Fixture { device, textures, pass, scene }
    }

    fn model(id: &str, materials: usize) -> ModelData {
        let triangle = |material_idx| MeshData {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            indices: vec![0, 1, 2],
            material_idx,
            ..MeshData::default()
        };
        ModelData {
            model_id: id.to_string(),
            meshes: (0..materials as i32).map(triangle).collect(),
            materials: (0..materials)
                .map(|i| MaterialData {
                    texture_path: Some("wood.png".into()),
                    roughness_factor: i as f32 / 10.0,
                    ..MaterialData::default()
                })
                .collect(),
        }
    }

    fn record(f: &mut Fixture, models: &[GpuModel]) {
        let command_buffer = f.device.allocate_command_buffer().unwrap();
        f.pass.update(&mut f.device, &f.scene, 1).unwrap();
        f.pass.record(&mut f.device, command_buffer, 1, models, &f.scene).unwrap();
        f.device.submit(&Submission { command_buffer, waits: &[], signals: &[], fence: None }).unwrap();
    }

    fn dynamic_offsets(device: &HeadlessDevice) -> Vec<u32> {
        device
            .commands_in_pass(GEOMETRY_PASS)
            .into_iter()
            .filter_map(|command| match command {
                Command::BindDescriptorSets { dynamic_offsets, .. } => Some(dynamic_offsets[0]),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn skipped_models_still_advance_material_offsets() {
        let mut f = fixture(16);
        let mut models =
            upload_models(&mut f.device, &mut f.textures, &[model("hidden", 2), model("shown", 2)]).unwrap();
        sort_models(&mut models);
        f.pass.register_models(&mut f.device, &models, &f.textures).unwrap();
        f.scene.add_entity(Entity::new("e1", "shown", Vec3::zeros()));

        record(&mut f, &models);

        let size = f.pass.material_size() as u32;
        assert_eq!(size, 256);
        assert_eq!(dynamic_offsets(&f.device), vec![2 * size, 3 * size]);
        assert_eq!(f.device.draw_count(GEOMETRY_PASS), 2);
        assert!(f.device.validation_errors().is_empty(), "{:?}", f.device.validation_errors());
    }

    #[test]
    fn unused_material_inside_a_drawn_model_advances_offsets() {
        let mut f = fixture(16);
        let mut data = model("crate", 3);
        data.meshes.retain(|mesh| mesh.material_idx != 1);
        let models = upload_models(&mut f.device, &mut f.textures, &[data]).unwrap();
        assert!(models[0].materials[1].meshes.is_empty());
        f.pass.register_models(&mut f.device, &models, &f.textures).unwrap();
        f.scene.add_entity(Entity::new("e1", "crate", Vec3::zeros()));

        record(&mut f, &models);

        let size = f.pass.material_size() as u32;
        assert_eq!(dynamic_offsets(&f.device), vec![0, 2 * size]);
        assert_eq!(f.device.draw_count(GEOMETRY_PASS), 2);
        assert!(f.device.validation_errors().is_empty(), "{:?}", f.device.validation_errors());
    }

    #[test]
    fn material_records_are_written_at_ordinal_offsets() {
        let mut f = fixture(16);
        let models = upload_models(&mut f.device, &mut f.textures, &[model("a", 1), model("b", 2)]).unwrap();
        f.pass.register_models(&mut f.device, &models, &f.textures).unwrap();

        let data = f.device.buffer_data(f.pass.material_buffer()).unwrap();
        let size = f.pass.material_size() as usize;
        let third: &MaterialUniform = bytemuck::from_bytes(&data[2 * size..2 * size + 48]);
        assert_eq!(third, &models[1].materials[1].uniform);
        assert!((third.roughness - 0.1).abs() < 1e-6);
    }

    #[test]
    fn texture_sets_are_shared_between_materials() {
        let mut f = fixture(16);
        let models = upload_models(&mut f.device, &mut f.textures, &[model("a", 3)]).unwrap();
        f.pass.register_models(&mut f.device, &models, &f.textures).unwrap();

        // wood.png for albedo plus the default for the two absent maps
        assert_eq!(f.pass.texture_sets.len(), 2);
    }

    #[test]
    fn capacity_past_32_bit_offsets_is_rejected_before_allocating() {
        let props = EngineProperties::default().with_max_materials(u32::MAX);
        let mut device = HeadlessDevice::new(EXTENT.width, EXTENT.height, 2);
        let scene = Scene::new(&props, EXTENT.width, EXTENT.height);
        let before = device.resource_counts();

        let result = GeometryPass::new(&mut device, &props, EXTENT, 2, scene.projection().matrix());

        assert!(matches!(result, Err(RenderError::InvalidOperation { .. })));
        assert_eq!(device.resource_counts(), before);
    }

    #[test]
    fn too_many_materials_is_rejected() {
        let mut f = fixture(2);
        let models = upload_models(&mut f.device, &mut f.textures, &[model("a", 3)]).unwrap();
        let result = f.pass.register_models(&mut f.device, &models, &f.textures);
        assert!(matches!(result, Err(RenderError::MaterialLimitExceeded { requested: 3, max: 2 })));
    }

    #[test]
    fn resize_replaces_attachments_without_leaking() {
        let mut f = fixture(4);
        let before = f.device.resource_counts();
        let old = f.pass.gbuffer().attachments();

        let projection = *f.scene.projection().matrix();
        f.pass.resize(&mut f.device, vk::Extent2D { width: 32, height: 32 }, &projection).unwrap();

        assert_eq!(f.device.resource_counts(), before);
        assert_ne!(f.pass.gbuffer().attachments(), old);
        assert_eq!(f.pass.gbuffer().extent().width, 32);
        f.pass.destroy(&mut f.device);
        f.textures.cleanup(&mut f.device);
        assert_eq!(f.device.resource_counts().images, 0);
        assert!(f.device.validation_errors().is_empty());
    }
}
