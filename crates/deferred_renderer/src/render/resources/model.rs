//! GPU-resident models
//!
//! [`upload_models`] turns importer output into vertex/index buffers grouped
//! under their material. Meshes that reference no material (index -1 or out
//! of range) share one default material per model, created the first time a
//! model needs it.

use ash::vk;

use super::texture::{TextureCache, TextureId, ALBEDO_FORMAT, LINEAR_FORMAT};
use super::uniform::MaterialUniform;
use super::vertex::Vertex;
use crate::assets::{MaterialData, MeshData, ModelData};
use crate::render::device::{BufferDesc, BufferHandle, GpuDevice, MemoryLocation};
use crate::render::RenderResult;

/// Vertex and index buffers for one mesh
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    /// Interleaved [`Vertex`] data
    pub vertex_buffer: BufferHandle,
    /// `u32` triangle list
    pub index_buffer: BufferHandle,
    /// Indices to draw
    pub index_count: u32,
}

impl GpuMesh {
    fn upload(device: &mut dyn GpuDevice, mesh: &MeshData) -> RenderResult<Self> {
        let vertices = Vertex::interleave(mesh);
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

        let vertex_buffer = device_local(device, "vertices", vk::BufferUsageFlags::VERTEX_BUFFER, vertex_bytes)?;
        let index_buffer = match device_local(device, "indices", vk::BufferUsageFlags::INDEX_BUFFER, index_bytes) {
            Ok(buffer) => buffer,
            Err(err) => {
                device.destroy_buffer(vertex_buffer);
                return Err(err);
            }
        };

        #[allow(clippy::cast_possible_truncation)]
        let index_count = mesh.indices.len() as u32;
        Ok(Self { vertex_buffer, index_buffer, index_count })
    }

    fn destroy(self, device: &mut dyn GpuDevice) {
        device.destroy_buffer(self.index_buffer);
        device.destroy_buffer(self.vertex_buffer);
    }
}

fn device_local(
    device: &mut dyn GpuDevice,
    label: &'static str,
    usage: vk::BufferUsageFlags,
    data: &[u8],
) -> RenderResult<BufferHandle> {
    let buffer = device.create_buffer(&BufferDesc {
        label,
        size: data.len() as u64,
        usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
        location: MemoryLocation::DeviceLocal,
    })?;
    if let Err(err) = device.upload_buffer(buffer, data) {
        device.destroy_buffer(buffer);
        return Err(err);
    }
    Ok(buffer)
}

/// A material with the meshes drawn using it
#[derive(Debug, Clone)]
pub struct GpuMaterial {
    /// Record written to the dynamic material buffer
    pub uniform: MaterialUniform,
    /// Albedo texture, the default texture when absent
    pub albedo: TextureId,
    /// Normal map, the default texture when absent
    pub normal_map: TextureId,
    /// Metal/roughness map, the default texture when absent
    pub metal_rough_map: TextureId,
    /// Albedo texture has translucent pixels
    pub transparent: bool,
    /// Meshes using this material
    pub meshes: Vec<GpuMesh>,
}

fn given(path: Option<&String>) -> Option<&str> {
    path.map(|p| p.trim()).filter(|p| !p.is_empty())
}

impl GpuMaterial {
    fn new(device: &mut dyn GpuDevice, textures: &mut TextureCache, material: &MaterialData) -> RenderResult<Self> {
        let texture_path = given(material.texture_path.as_ref());
        let normal_path = given(material.normal_map_path.as_ref());
        let metal_rough_path = given(material.metal_rough_map_path.as_ref());

        let albedo = textures.get_or_create(device, texture_path, ALBEDO_FORMAT)?;
        let normal_map = textures.get_or_create(device, normal_path, LINEAR_FORMAT)?;
        let metal_rough_map = textures.get_or_create(device, metal_rough_path, LINEAR_FORMAT)?;
        let transparent = textures.get(albedo).is_some_and(|texture| texture.has_transparency);

        Ok(Self {
            uniform: MaterialUniform::new(
                material.diffuse_color.into(),
                texture_path.is_some(),
                normal_path.is_some(),
                metal_rough_path.is_some(),
                material.roughness_factor,
                material.metallic_factor,
            ),
            albedo,
            normal_map,
            metal_rough_map,
            transparent,
            meshes: Vec::new(),
        })
    }
}

/// A model ready to draw
#[derive(Debug, Clone)]
pub struct GpuModel {
    /// Id entities reference
    pub model_id: String,
    /// Materials, opaque first once sorted
    pub materials: Vec<GpuMaterial>,
}

impl GpuModel {
    /// True if any material is transparent
    pub fn has_transparency(&self) -> bool {
        self.materials.iter().any(|material| material.transparent)
    }

    fn fill(&mut self, device: &mut dyn GpuDevice, textures: &mut TextureCache, data: &ModelData) -> RenderResult<()> {
        for material in &data.materials {
            self.materials.push(GpuMaterial::new(device, textures, material)?);
        }

        let mut default_material = None;
        for mesh in &data.meshes {
            if mesh.indices.is_empty() || mesh.vertex_count() == 0 {
                log::warn!("Model '{}' has an empty mesh; skipped", self.model_id);
                continue;
            }
            let referenced = usize::try_from(mesh.material_idx).ok().filter(|&idx| idx < data.materials.len());
            let index = match (referenced, default_material) {
                (Some(idx), _) => idx,
                (None, Some(idx)) => idx,
                (None, None) => {
                    self.materials.push(GpuMaterial::new(device, textures, &MaterialData::default())?);
                    let idx = self.materials.len() - 1;
                    default_material = Some(idx);
                    idx
                }
            };
            let gpu_mesh = GpuMesh::upload(device, mesh)?;
            self.materials[index].meshes.push(gpu_mesh);
        }
        Ok(())
    }

    /// Release every mesh buffer; textures belong to the texture cache
    pub fn destroy(self, device: &mut dyn GpuDevice) {
        for material in self.materials {
            for mesh in material.meshes {
                mesh.destroy(device);
            }
        }
    }
}

/// Upload `models`, loading their textures through `textures`
///
/// On failure everything created by this call is released again; textures
/// already cached stay cached.
pub fn upload_models(
    device: &mut dyn GpuDevice,
    textures: &mut TextureCache,
    models: &[ModelData],
) -> RenderResult<Vec<GpuModel>> {
    let mut uploaded: Vec<GpuModel> = Vec::with_capacity(models.len());
    for data in models {
        let mut model = GpuModel { model_id: data.model_id.clone(), materials: Vec::new() };
        if let Err(err) = model.fill(device, textures, data) {
            log::error!("Failed to upload model '{}': {}", data.model_id, err);
            model.destroy(device);
            for model in uploaded {
                model.destroy(device);
            }
            return Err(err);
        }
        log::debug!(
            "Model '{}' uploaded: {} materials, {} meshes",
            model.model_id,
            model.materials.len(),
            model.materials.iter().map(|m| m.meshes.len()).sum::<usize>()
        );
        uploaded.push(model);
    }
    Ok(uploaded)
}

/// Order opaque materials before transparent ones within each model, then
/// opaque-only models before models with any transparency
///
/// Both sorts are stable, so load order breaks ties.
pub fn sort_models(models: &mut [GpuModel]) {
    for model in models.iter_mut() {
        model.materials.sort_by_key(|material| material.transparent);
    }
    models.sort_by_key(GpuModel::has_transparency);
}
