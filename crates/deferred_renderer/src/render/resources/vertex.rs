//! Interleaved vertex format

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::assets::MeshData;

/// One vertex as stored in the vertex buffers
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Tangent
    pub tangent: [f32; 3],
    /// Bitangent
    pub bitangent: [f32; 3],
    /// Texture coordinates
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Interleave the flat arrays of `mesh`; missing attributes are zero
    pub fn interleave(mesh: &MeshData) -> Vec<Self> {
        let vec3 = |data: &[f32], i: usize| data.get(i * 3..i * 3 + 3).map_or([0.0; 3], |v| [v[0], v[1], v[2]]);
        let vec2 = |data: &[f32], i: usize| data.get(i * 2..i * 2 + 2).map_or([0.0; 2], |v| [v[0], v[1]]);
        (0..mesh.vertex_count())
            .map(|i| Self {
                position: vec3(&mesh.positions, i),
                normal: vec3(&mesh.normals, i),
                tangent: vec3(&mesh.tangents, i),
                bitangent: vec3(&mesh.bitangents, i),
                tex_coord: vec2(&mesh.tex_coords, i),
            })
            .collect()
    }

    /// Binding 0, advancing per vertex
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        #[allow(clippy::cast_possible_truncation)]
        let stride = std::mem::size_of::<Self>() as u32;
        vk::VertexInputBindingDescription { binding: 0, stride, input_rate: vk::VertexInputRate::VERTEX }
    }

    /// All five attributes, locations 0..=4
    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let vec3 = vk::Format::R32G32B32_SFLOAT;
        [(vec3, 0), (vec3, 12), (vec3, 24), (vec3, 36), (vk::Format::R32G32_SFLOAT, 48)]
            .into_iter()
            .zip(0..)
            .map(|((format, offset), location)| vk::VertexInputAttributeDescription {
                location,
                binding: 0,
                format,
                offset,
            })
            .collect()
    }

    /// Position only, for depth-only pipelines reading the same buffers
    pub fn position_attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        Self::attribute_descriptions().into_iter().take(1).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_56_bytes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 56);
        assert_eq!(Vertex::binding_description().stride, 56);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes.len(), 5);
        assert_eq!(attributes[4].offset, 48);
        assert_eq!(attributes[4].location, 4);
        assert_eq!(Vertex::position_attribute_descriptions().len(), 1);
    }

    #[test]
    fn interleave_fills_missing_attributes_with_zero() {
        let mesh = MeshData {
            positions: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            tex_coords: vec![0.5, 0.25],
            ..MeshData::default()
        };
        let vertices = Vertex::interleave(&mesh);

        assert_eq!(vertices.len(), 2);
        assert_eq!(vertices[1].position, [3.0, 4.0, 5.0]);
        assert_eq!(vertices[0].tex_coord, [0.5, 0.25]);
        assert_eq!(vertices[1].tex_coord, [0.0, 0.0]);
        assert_eq!(vertices[1].tangent, [0.0; 3]);
    }
}
