//! Mesh data at the renderer boundary
//!
//! Meshes arrive as named per-attribute float streams plus an index list.
//! Nothing here assumes a vertex layout; the streams are interleaved
//! against the reflected vertex format of whichever pipeline draws the
//! mesh, at upload time.

use std::collections::HashMap;

use thiserror::Error;

use crate::render::vulkan::interface::VertexFormat;

/// Mesh validation and interleave errors
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Mesh has no attribute '{0}' required by the shader")]
    MissingAttribute(String),

    #[error("Attribute '{name}' has {actual} floats, expected {expected}")]
    AttributeLengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Mesh has no attributes")]
    Empty,
}

/// Attribute-keyed mesh data
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    attributes: HashMap<String, Vec<f32>>,
    indices: Vec<u32>,
}

impl MeshData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named attribute stream
    pub fn with_attribute(mut self, name: &str, data: Vec<f32>) -> Self {
        self.attributes.insert(name.to_string(), data);
        self
    }

    /// Set the index list
    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = indices;
        self
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Interleave the streams into the order and packing a vertex format
    /// expects
    ///
    /// The vertex count comes from the first attribute the format names;
    /// every other stream must agree with it.
    pub fn interleave(&self, format: &VertexFormat) -> Result<InterleavedMesh, MeshError> {
        let first = format.attributes.first().ok_or(MeshError::Empty)?;
        let first_stream = self
            .attributes
            .get(&first.name)
            .ok_or_else(|| MeshError::MissingAttribute(first.name.clone()))?;
        let first_components = first.ty.component_count() as usize;
        if first_components == 0 || first_stream.len() % first_components != 0 {
            return Err(MeshError::AttributeLengthMismatch {
                name: first.name.clone(),
                expected: first_stream.len() / first_components * first_components,
                actual: first_stream.len(),
            });
        }
        let vertex_count = first_stream.len() / first_components;

        let mut streams = Vec::with_capacity(format.attributes.len());
        for attr in &format.attributes {
            let stream = self
                .attributes
                .get(&attr.name)
                .ok_or_else(|| MeshError::MissingAttribute(attr.name.clone()))?;
            let components = attr.ty.component_count() as usize;
            let expected = vertex_count * components;
            if stream.len() != expected {
                return Err(MeshError::AttributeLengthMismatch {
                    name: attr.name.clone(),
                    expected,
                    actual: stream.len(),
                });
            }
            streams.push((stream, components));
        }

        let floats_per_vertex = (format.stride / 4) as usize;
        let mut interleaved = Vec::with_capacity(vertex_count * floats_per_vertex);
        for vertex in 0..vertex_count {
            for (stream, components) in &streams {
                let start = vertex * components;
                interleaved.extend_from_slice(&stream[start..start + components]);
            }
        }

        Ok(InterleavedMesh {
            bytes: bytemuck::cast_slice(&interleaved).to_vec(),
            vertex_count: vertex_count as u32,
        })
    }
}

/// The interleaved bytes of a mesh, ready for a vertex buffer
#[derive(Debug, Clone)]
pub struct InterleavedMesh {
    pub bytes: Vec<u8>,
    pub vertex_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::interface::VertexAttribute;
    use crate::render::vulkan::reflection::AttributeType;

    fn position_uv_format() -> VertexFormat {
        VertexFormat {
            attributes: vec![
                VertexAttribute {
                    name: "position".to_string(),
                    location: 0,
                    ty: AttributeType::Vec3,
                    offset: 0,
                },
                VertexAttribute {
                    name: "uv".to_string(),
                    location: 1,
                    ty: AttributeType::Vec2,
                    offset: 12,
                },
            ],
            stride: 20,
        }
    }

    #[test]
    fn interleaves_streams_in_format_order() {
        let mesh = MeshData::new()
            .with_attribute("uv", vec![0.0, 0.0, 1.0, 0.0])
            .with_attribute("position", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .with_indices(vec![0, 1]);

        let interleaved = mesh.interleave(&position_uv_format()).unwrap();
        assert_eq!(interleaved.vertex_count, 2);

        let floats: &[f32] = bytemuck::cast_slice(&interleaved.bytes);
        assert_eq!(
            floats,
            &[1.0, 2.0, 3.0, 0.0, 0.0, 4.0, 5.0, 6.0, 1.0, 0.0]
        );
    }

    #[test]
    fn missing_attribute_is_reported_by_name() {
        let mesh = MeshData::new().with_attribute("position", vec![0.0; 6]);
        let err = mesh.interleave(&position_uv_format()).unwrap_err();
        assert!(matches!(err, MeshError::MissingAttribute(name) if name == "uv"));
    }

    #[test]
    fn stream_length_must_match_vertex_count() {
        let mesh = MeshData::new()
            .with_attribute("position", vec![0.0; 6])
            .with_attribute("uv", vec![0.0; 3]);
        let err = mesh.interleave(&position_uv_format()).unwrap_err();
        assert!(matches!(
            err,
            MeshError::AttributeLengthMismatch {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }
}
