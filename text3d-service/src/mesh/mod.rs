//! Mesh types and the latent-to-file post-processing steps.
//!
//! A decoder produces a [`DecodedMesh`] with raw per-vertex channels; the
//! post-processor turns it into a [`ColoredMesh`] with quantized RGB colors
//! that can be encoded as GLB and exported.

pub mod colors;
pub mod export;
pub mod glb;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use colors::normalize_vertex_colors;
pub use export::{output_file_name, ExportedModel, MeshExporter};

/// Channel names emitted by the decoder for vertex color intensities.
pub const RED_CHANNEL: &str = "R";
pub const GREEN_CHANNEL: &str = "G";
pub const BLUE_CHANNEL: &str = "B";

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Missing vertex channel '{0}'")]
    MissingChannel(String),

    #[error("Vertex channel '{name}' has {actual} values, expected {expected}")]
    ChannelLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Face {face} references vertex {index} but mesh has {vertex_count} vertices")]
    FaceIndexOutOfRange {
        face: usize,
        index: u32,
        vertex_count: usize,
    },

    #[error("Color count {colors} does not match vertex count {vertices}")]
    ColorCount { colors: usize, vertices: usize },

    #[error("Mesh has no vertices")]
    Empty,

    #[error("Vertex {0} has a non-finite coordinate")]
    NonFinitePosition(usize),

    #[error("Mesh too large for GLB: {0}")]
    TooLarge(String),

    #[error("Invalid GLB: {0}")]
    InvalidGlb(String),
}

/// Triangle mesh as returned by the decoder model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodedMesh {
    pub verts: Vec<[f32; 3]>,
    pub faces: Vec<[u32; 3]>,
    #[serde(default)]
    pub vertex_channels: HashMap<String, Vec<f32>>,
}

impl DecodedMesh {
    pub fn vertex_count(&self) -> usize {
        self.verts.len()
    }

    /// Borrow one named channel, checking it covers every vertex.
    pub fn channel(&self, name: &str) -> Result<&[f32], MeshError> {
        let values = self
            .vertex_channels
            .get(name)
            .ok_or_else(|| MeshError::MissingChannel(name.to_string()))?;

        if values.len() != self.verts.len() {
            return Err(MeshError::ChannelLength {
                name: name.to_string(),
                expected: self.verts.len(),
                actual: values.len(),
            });
        }

        Ok(values)
    }

    /// Normalize the R/G/B channels into 8-bit vertex colors.
    pub fn into_colored(self) -> Result<ColoredMesh, MeshError> {
        let colors = normalize_vertex_colors(
            self.channel(RED_CHANNEL)?,
            self.channel(GREEN_CHANNEL)?,
            self.channel(BLUE_CHANNEL)?,
        );

        ColoredMesh::new(self.verts, self.faces, colors)
    }
}

/// Mesh ready for export: positions, triangles and one RGB byte triple per
/// vertex. Construction guarantees consistent lengths and in-range indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ColoredMesh {
    positions: Vec<[f32; 3]>,
    faces: Vec<[u32; 3]>,
    colors: Vec<[u8; 3]>,
}

impl ColoredMesh {
    pub fn new(
        positions: Vec<[f32; 3]>,
        faces: Vec<[u32; 3]>,
        colors: Vec<[u8; 3]>,
    ) -> Result<Self, MeshError> {
        if positions.is_empty() {
            return Err(MeshError::Empty);
        }
        if let Some(vertex) = positions
            .iter()
            .position(|p| p.iter().any(|c| !c.is_finite()))
        {
            return Err(MeshError::NonFinitePosition(vertex));
        }
        if colors.len() != positions.len() {
            return Err(MeshError::ColorCount {
                colors: colors.len(),
                vertices: positions.len(),
            });
        }
        for (face, indices) in faces.iter().enumerate() {
            if let Some(&index) = indices.iter().find(|&&i| i as usize >= positions.len()) {
                return Err(MeshError::FaceIndexOutOfRange {
                    face,
                    index,
                    vertex_count: positions.len(),
                });
            }
        }

        Ok(Self {
            positions,
            faces,
            colors,
        })
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Axis-aligned bounds as (min, max).
    pub fn bounds(&self) -> ([f32; 3], [f32; 3]) {
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for position in &self.positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(position[axis]);
                max[axis] = max[axis].max(position[axis]);
            }
        }
        (min, max)
    }
}
