//! Uniform buffer records
//!
//! Every struct mirrors a std140 block in the shaders byte for byte.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{to_cols_array, Mat4};
use crate::render::{RenderError, RenderResult};
use crate::scene::{Light, MAX_LIGHTS};

/// Shadow cascades rendered per frame
pub const SHADOW_MAP_CASCADE_COUNT: usize = 3;

/// Single matrix block (projection, view)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MatrixUniform {
    /// Column-major matrix
    pub matrix: [[f32; 4]; 4],
}

impl MatrixUniform {
    /// Wrap `matrix`
    pub fn new(matrix: &Mat4) -> Self {
        Self { matrix: to_cols_array(matrix) }
    }
}

/// Per-draw model matrix pushed as a constant
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ModelPushConstant {
    /// Column-major model matrix
    pub model: [[f32; 4]; 4],
}

/// Per-material record inside the dynamic material buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    /// Base color when no albedo texture is bound
    pub diffuse: [f32; 4],
    /// Albedo texture bound (1) or default (0)
    pub has_texture: i32,
    /// Normal map bound
    pub has_normal_map: i32,
    /// Metal/roughness map bound
    pub has_metal_rough_map: i32,
    /// Roughness factor
    pub roughness: f32,
    /// Metallic factor
    pub metallic: f32,
    _padding: [f32; 3],
}

impl MaterialUniform {
    /// Material record from its factors and texture flags
    pub fn new(
        diffuse: [f32; 4],
        has_texture: bool,
        has_normal_map: bool,
        has_metal_rough_map: bool,
        roughness: f32,
        metallic: f32,
    ) -> Self {
        Self {
            diffuse,
            has_texture: i32::from(has_texture),
            has_normal_map: i32::from(has_normal_map),
            has_metal_rough_map: i32::from(has_metal_rough_map),
            roughness,
            metallic,
            _padding: [0.0; 3],
        }
    }
}

/// One light as the lighting shader reads it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    /// View-space position (w = 1) or direction (w = 0)
    pub position: [f32; 4],
    /// Color, intensity in w
    pub color: [f32; 4],
}

/// Ambient color plus the scene's lights
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightsUniform {
    /// Ambient color
    pub ambient: [f32; 4],
    /// Lights in use
    pub count: i32,
    _padding: [i32; 3],
    /// Light slots; entries past `count` are zero
    pub lights: [LightUniform; MAX_LIGHTS],
}

impl LightsUniform {
    /// Pack `lights`, transforming positions and directions into view space
    ///
    /// Lights beyond [`MAX_LIGHTS`] are ignored; the scene never holds more.
    pub fn new(ambient: [f32; 4], lights: &[Light], view: &Mat4) -> Self {
        let mut uniform = Self::zeroed();
        uniform.ambient = ambient;
        for (slot, light) in uniform.lights.iter_mut().zip(lights) {
            let position = view * light.position;
            slot.position = position.into();
            slot.color = light.color.into();
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let count = lights.len().min(MAX_LIGHTS) as i32;
        uniform.count = count;
        uniform
    }
}

/// Matrices the lighting pass uses to rebuild world positions from depth
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct InverseMatricesUniform {
    /// Inverse projection
    pub inverse_projection: [[f32; 4]; 4],
    /// Inverse view
    pub inverse_view: [[f32; 4]; 4],
}

impl InverseMatricesUniform {
    /// Invert `projection` and `view`; singular matrices fall back to identity
    pub fn new(projection: &Mat4, view: &Mat4) -> Self {
        let inverse = |m: &Mat4| m.try_inverse().unwrap_or_else(Mat4::identity);
        Self {
            inverse_projection: to_cols_array(&inverse(projection)),
            inverse_view: to_cols_array(&inverse(view)),
        }
    }
}

/// One cascade as the lighting pass reads it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CascadeUniform {
    /// Light projection x light view
    pub projection_view: [[f32; 4]; 4],
    /// Split distance in x
    pub split_distance: [f32; 4],
}

/// All cascades for the lighting pass
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CascadesUniform {
    /// Cascades, nearest first
    pub cascades: [CascadeUniform; SHADOW_MAP_CASCADE_COUNT],
}

/// Cascade matrices for the shadow geometry shader
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowUniform {
    /// Light projection x light view per cascade
    pub projection_views: [[[f32; 4]; 4]; SHADOW_MAP_CASCADE_COUNT],
}

/// `raw_size` rounded up to a multiple of `alignment`
pub fn aligned_size(raw_size: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return raw_size;
    }
    raw_size.div_ceil(alignment) * alignment
}

/// Dynamic offset of the material with `ordinal`
///
/// Dynamic offsets are 32-bit; an offset past `u32::MAX` is an error.
pub fn material_offset(ordinal: usize, material_size: u64) -> RenderResult<u32> {
    (ordinal as u64)
        .checked_mul(material_size)
        .and_then(|offset| u32::try_from(offset).ok())
        .ok_or_else(|| {
            log::error!("Material {} at stride {} has no 32-bit dynamic offset", ordinal, material_size);
            RenderError::invalid(format!("material offset {ordinal} x {material_size} exceeds u32"))
        })
}
