//! Binary glTF 2.0 (GLB) encoding for vertex-colored triangle meshes.
//!
//! Layout: 12-byte header, a JSON chunk padded with spaces and a BIN chunk
//! padded with zeros, both aligned to four bytes. The BIN chunk holds
//! positions (`VEC3` float), colors (`VEC4` normalized `u8`, opaque alpha)
//! and triangle indices (`u32`), in that order. GLB is little-endian; on
//! little-endian targets the position and index buffers are written by
//! reinterpreting the mesh slices directly.

use super::{ColoredMesh, MeshError};
use serde_json::{json, Value};
use std::borrow::Cow;

pub const GLB_MAGIC: u32 = 0x4654_6C67;
pub const GLB_VERSION: u32 = 2;
pub const HEADER_LEN: usize = 12;
pub const MIME_TYPE: &str = "model/gltf-binary";

const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const COMPONENT_UNSIGNED_BYTE: u32 = 5121;
const COMPONENT_UNSIGNED_INT: u32 = 5125;
const COMPONENT_FLOAT: u32 = 5126;

const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;

const MODE_POINTS: u32 = 0;
const MODE_TRIANGLES: u32 = 4;

/// Fixed-size GLB file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlbHeader {
    pub version: u32,
    pub length: u32,
}

impl GlbHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, MeshError> {
        if bytes.len() < HEADER_LEN {
            return Err(MeshError::InvalidGlb(format!(
                "header needs {} bytes, got {}",
                HEADER_LEN,
                bytes.len()
            )));
        }
        if read_u32(bytes, 0) != GLB_MAGIC {
            return Err(MeshError::InvalidGlb("bad magic".to_string()));
        }
        let version = read_u32(bytes, 4);
        if version != GLB_VERSION {
            return Err(MeshError::InvalidGlb(format!(
                "unsupported version {}",
                version
            )));
        }

        Ok(Self {
            version,
            length: read_u32(bytes, 8),
        })
    }
}

/// Little-endian bytes of a slice of 32-bit scalars or arrays of them.
#[cfg(target_endian = "little")]
fn le_bytes<T: bytemuck::Pod>(values: &[T]) -> Cow<'_, [u8]> {
    Cow::Borrowed(bytemuck::cast_slice(values))
}

#[cfg(target_endian = "big")]
fn le_bytes<T: bytemuck::Pod>(values: &[T]) -> Cow<'_, [u8]> {
    Cow::Owned(
        bytemuck::cast_slice::<T, [u8; 4]>(values)
            .iter()
            .flat_map(|&[a, b, c, d]| [d, c, b, a])
            .collect(),
    )
}

/// Encode a mesh as a self-contained GLB file.
pub fn encode(mesh: &ColoredMesh) -> Result<Vec<u8>, MeshError> {
    let vertex_count = mesh.vertex_count();
    let index_count = mesh.faces().len() * 3;

    let positions = le_bytes(mesh.positions());
    let colors: Vec<u8> = mesh
        .colors()
        .iter()
        .flat_map(|&[r, g, b]| [r, g, b, u8::MAX])
        .collect();
    let indices = le_bytes(mesh.faces());

    let colors_offset = positions.len();
    let indices_offset = colors_offset + colors.len();
    let bin_len = indices_offset + indices.len();

    let (min, max) = mesh.bounds();

    let mut buffer_views = vec![
        json!({
            "buffer": 0,
            "byteOffset": 0,
            "byteLength": positions.len(),
            "target": TARGET_ARRAY_BUFFER,
        }),
        json!({
            "buffer": 0,
            "byteOffset": colors_offset,
            "byteLength": colors.len(),
            "target": TARGET_ARRAY_BUFFER,
        }),
    ];
    let mut accessors = vec![
        json!({
            "bufferView": 0,
            "componentType": COMPONENT_FLOAT,
            "count": vertex_count,
            "type": "VEC3",
            "min": min,
            "max": max,
        }),
        json!({
            "bufferView": 1,
            "componentType": COMPONENT_UNSIGNED_BYTE,
            "normalized": true,
            "count": vertex_count,
            "type": "VEC4",
        }),
    ];

    let mut primitive = json!({
        "attributes": { "POSITION": 0, "COLOR_0": 1 },
        "mode": MODE_POINTS,
    });
    if index_count > 0 {
        buffer_views.push(json!({
            "buffer": 0,
            "byteOffset": indices_offset,
            "byteLength": indices.len(),
            "target": TARGET_ELEMENT_ARRAY_BUFFER,
        }));
        accessors.push(json!({
            "bufferView": 2,
            "componentType": COMPONENT_UNSIGNED_INT,
            "count": index_count,
            "type": "SCALAR",
        }));
        primitive["indices"] = json!(2);
        primitive["mode"] = json!(MODE_TRIANGLES);
    }

    let document = json!({
        "asset": { "version": "2.0", "generator": concat!("text3d-service ", env!("CARGO_PKG_VERSION")) },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{ "primitives": [primitive] }],
        "buffers": [{ "byteLength": bin_len }],
        "bufferViews": buffer_views,
        "accessors": accessors,
    });

    let mut json_chunk = serde_json::to_vec(&document)
        .map_err(|e| MeshError::InvalidGlb(format!("failed to serialize glTF JSON: {}", e)))?;
    pad_to_four(&mut json_chunk, b' ');

    let mut bin_chunk = Vec::with_capacity(bin_len + 3);
    bin_chunk.extend_from_slice(&positions);
    bin_chunk.extend_from_slice(&colors);
    bin_chunk.extend_from_slice(&indices);
    pad_to_four(&mut bin_chunk, 0);

    let total = HEADER_LEN + 8 + json_chunk.len() + 8 + bin_chunk.len();
    let total_u32 = u32::try_from(total)
        .map_err(|_| MeshError::TooLarge(format!("{} bytes exceeds the GLB limit", total)))?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&total_u32.to_le_bytes());
    write_chunk(&mut out, CHUNK_JSON, &json_chunk);
    write_chunk(&mut out, CHUNK_BIN, &bin_chunk);

    Ok(out)
}

/// Counts and colors read back from an encoded GLB.
#[derive(Debug, Clone, PartialEq)]
pub struct GlbSummary {
    pub length: u32,
    pub vertex_count: usize,
    pub color_count: usize,
    pub index_count: usize,
    pub colors: Vec<[u8; 3]>,
}

impl GlbSummary {
    /// Parse a file produced by [`encode`].
    pub fn parse(bytes: &[u8]) -> Result<Self, MeshError> {
        let header = GlbHeader::parse(bytes)?;
        if header.length as usize != bytes.len() {
            return Err(MeshError::InvalidGlb(format!(
                "declared length {} but file has {} bytes",
                header.length,
                bytes.len()
            )));
        }

        let (json_type, json_bytes, rest) = read_chunk(&bytes[HEADER_LEN..])?;
        if json_type != CHUNK_JSON {
            return Err(MeshError::InvalidGlb("first chunk is not JSON".to_string()));
        }
        let (bin_type, bin, _) = read_chunk(rest)?;
        if bin_type != CHUNK_BIN {
            return Err(MeshError::InvalidGlb("second chunk is not BIN".to_string()));
        }

        let document: Value = serde_json::from_slice(json_bytes)
            .map_err(|e| MeshError::InvalidGlb(format!("bad JSON chunk: {}", e)))?;
        let primitive = &document["meshes"][0]["primitives"][0];
        let attributes = &primitive["attributes"];
        let count = |index: &Value| -> usize {
            accessor(&document, index)
                .and_then(|a| a["count"].as_u64())
                .unwrap_or(0) as usize
        };

        let vertex_count = count(&attributes["POSITION"]);
        let color_count = count(&attributes["COLOR_0"]);
        let index_count = count(&primitive["indices"]);

        let colors = accessor(&document, &attributes["COLOR_0"])
            .and_then(|a| a["bufferView"].as_u64())
            .and_then(|view| document["bufferViews"].get(view as usize))
            .and_then(|view| {
                let offset = view["byteOffset"].as_u64().unwrap_or(0) as usize;
                let len = view["byteLength"].as_u64()? as usize;
                bin.get(offset..offset + len)
            })
            .ok_or_else(|| MeshError::InvalidGlb("missing COLOR_0 data".to_string()))?
            .chunks_exact(4)
            .map(|rgba| [rgba[0], rgba[1], rgba[2]])
            .collect();

        Ok(Self {
            length: header.length,
            vertex_count,
            color_count,
            index_count,
            colors,
        })
    }
}

fn accessor<'a>(document: &'a Value, index: &Value) -> Option<&'a Value> {
    index
        .as_u64()
        .and_then(|i| document["accessors"].get(i as usize))
}

fn write_chunk(out: &mut Vec<u8>, chunk_type: u32, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&chunk_type.to_le_bytes());
    out.extend_from_slice(data);
}

fn read_chunk(bytes: &[u8]) -> Result<(u32, &[u8], &[u8]), MeshError> {
    if bytes.len() < 8 {
        return Err(MeshError::InvalidGlb("truncated chunk header".to_string()));
    }
    let len = read_u32(bytes, 0) as usize;
    let chunk_type = read_u32(bytes, 4);
    let data = bytes
        .get(8..8 + len)
        .ok_or_else(|| MeshError::InvalidGlb("truncated chunk data".to_string()))?;
    Ok((chunk_type, data, &bytes[8 + len..]))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn pad_to_four(buf: &mut Vec<u8>, fill: u8) {
    while buf.len() % 4 != 0 {
        buf.push(fill);
    }
}
