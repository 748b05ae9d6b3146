// Vertex formats and the geometry drawn by the renderer

use super::error::{RenderError, RenderResult};
use crate::assets::ModelAsset;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

/// Interleaved vertex: position, color, texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

/// Floats per vertex in archived mesh data
pub const FLOATS_PER_VERTEX: usize = size_of::<Vertex>() / size_of::<f32>();

impl Vertex {
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Locations 0..2: position, color, texture coordinate
    pub fn attributes() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tex_coord) as u32,
            },
        ]
    }
}

/// CPU-side mesh ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

impl MeshData {
    /// Two textured quads, one behind the other
    pub fn quads() -> Self {
        let v = |pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]| Vertex {
            pos,
            color,
            tex_coord,
        };

        let vertices = vec![
            v([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0]),
            v([0.5, -0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
            v([0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
            v([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0]),
            v([-0.5, -0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
            v([0.5, -0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
            v([0.5, 0.5, -0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
            v([-0.5, 0.5, -0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
        ];

        Self {
            vertices,
            indices: vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4],
        }
    }

    /// First mesh of an archived model
    pub fn from_model(model: &ModelAsset) -> RenderResult<Self> {
        let invalid = |reason: String| RenderError::InvalidMesh {
            name: model.name.clone(),
            reason,
        };

        let mesh = model
            .meshes
            .first()
            .ok_or_else(|| invalid("model has no meshes".into()))?;

        if mesh.vertices.is_empty() || mesh.vertices.len() % FLOATS_PER_VERTEX != 0 {
            return Err(invalid(format!(
                "{} floats is not a whole number of {}-float vertices",
                mesh.vertices.len(),
                FLOATS_PER_VERTEX
            )));
        }

        let vertices: Vec<Vertex> = mesh
            .vertices
            .chunks_exact(FLOATS_PER_VERTEX)
            .map(|c| Vertex {
                pos: [c[0], c[1], c[2]],
                color: [c[3], c[4], c[5]],
                tex_coord: [c[6], c[7]],
            })
            .collect();

        if mesh.indices.is_empty() {
            return Err(invalid("mesh has no indices".into()));
        }
        if let Some(&bad) = mesh
            .indices
            .iter()
            .find(|&&i| i as usize >= vertices.len())
        {
            return Err(invalid(format!(
                "index {} out of range for {} vertices",
                bad,
                vertices.len()
            )));
        }

        Ok(Self {
            vertices,
            indices: mesh.indices.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MeshAsset;

    fn model(vertices: Vec<f32>, indices: Vec<u16>) -> ModelAsset {
        ModelAsset {
            name: "tri".into(),
            is_static: true,
            meshes: vec![MeshAsset {
                name: "tri_0".into(),
                vertices,
                indices,
            }],
        }
    }

    #[test]
    fn vertex_is_eight_tightly_packed_floats() {
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(FLOATS_PER_VERTEX, 8);
    }

    #[test]
    fn layout_matches_vertex_fields() {
        assert_eq!(Vertex::binding().stride, 32);

        let attributes = Vertex::attributes();
        let offsets: Vec<_> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        let locations: Vec<_> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);
        assert_eq!(attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn quads_indices_stay_in_range() {
        let mesh = MeshData::quads();
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.indices.len(), 12);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn model_mesh_is_deinterleaved() {
        let floats = vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0,
        ];
        let mesh = MeshData::from_model(&model(floats, vec![0, 1, 2])).unwrap();

        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.vertices[1].pos, [1.0, 0.0, 0.0]);
        assert_eq!(mesh.vertices[2].color, [0.0, 0.0, 1.0]);
        assert_eq!(mesh.vertices[2].tex_coord, [0.0, 1.0]);
    }

    #[test]
    fn model_with_ragged_vertex_data_is_rejected() {
        let err = MeshData::from_model(&model(vec![0.0; 9], vec![0])).unwrap_err();
        assert!(matches!(err, RenderError::InvalidMesh { .. }));
    }

    #[test]
    fn model_with_out_of_range_index_is_rejected() {
        let err = MeshData::from_model(&model(vec![0.0; 8], vec![0, 1])).unwrap_err();
        assert!(matches!(err, RenderError::InvalidMesh { .. }));
    }
}
