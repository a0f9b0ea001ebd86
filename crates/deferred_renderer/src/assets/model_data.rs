//! CPU-side model description produced by an external importer

use crate::foundation::math::Vec4;

/// A model: meshes plus the materials they reference
#[derive(Debug, Clone, Default)]
pub struct ModelData {
    /// Identifier entities use to reference this model
    pub model_id: String,
    /// Geometry
    pub meshes: Vec<MeshData>,
    /// Materials indexed by [`MeshData::material_idx`]
    pub materials: Vec<MaterialData>,
}

/// Flat vertex attribute arrays for one mesh
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    /// xyz triples
    pub positions: Vec<f32>,
    /// xyz triples; may be empty
    pub normals: Vec<f32>,
    /// xyz triples; may be empty
    pub tangents: Vec<f32>,
    /// xyz triples; may be empty
    pub bitangents: Vec<f32>,
    /// uv pairs; may be empty
    pub tex_coords: Vec<f32>,
    /// Triangle list indices
    pub indices: Vec<u32>,
    /// Index into [`ModelData::materials`], -1 for the default material
    pub material_idx: i32,
}

/// Surface description
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    /// Base color, used in place of an albedo texture when none is set
    pub diffuse_color: Vec4,
    /// Albedo texture path
    pub texture_path: Option<String>,
    /// Tangent-space normal map path
    pub normal_map_path: Option<String>,
    /// Metallic (b) / roughness (g) texture path
    pub metal_rough_map_path: Option<String>,
    /// Roughness factor
    pub roughness_factor: f32,
    /// Metallic factor
    pub metallic_factor: f32,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            diffuse_color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            texture_path: None,
            normal_map_path: None,
            metal_rough_map_path: None,
            roughness_factor: 0.0,
            metallic_factor: 0.0,
        }
    }
}

impl MeshData {
    /// Number of vertices described by `positions`
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }
}
