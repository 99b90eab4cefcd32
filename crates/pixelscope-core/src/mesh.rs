//! Vertex stream normalization for mesh picking.
//!
//! Draws arrive with 8/16/32-bit indices (or none), arbitrary vertex strides
//! and formats, and a signed base vertex. The pick kernel only understands a
//! flat `u32` index list and a dense array of four-component float positions,
//! so everything is converted on the host first.

use glam::Vec4;
use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};
use crate::resource::ResourceId;

/// Primitive topology of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    LineLoop,
    TriangleList,
    TriangleStrip,
    TriangleFan,
    LineListAdj,
    LineStripAdj,
    TriangleListAdj,
    TriangleStripAdj,
    /// Tessellation patches with the given control point count.
    PatchList(u32),
}

/// How the pick kernel walks the index stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MeshMode {
    TriangleList = 0,
    TriangleStrip = 1,
    TriangleFan = 2,
    TriangleListAdj = 3,
    TriangleStripAdj = 4,
    /// Points, lines and patches are picked per vertex.
    Other = 5,
}

impl MeshMode {
    pub fn is_triangles(self) -> bool {
        self != MeshMode::Other
    }
}

impl Topology {
    pub fn mesh_mode(self) -> MeshMode {
        match self {
            Topology::TriangleList => MeshMode::TriangleList,
            Topology::TriangleStrip => MeshMode::TriangleStrip,
            Topology::TriangleFan => MeshMode::TriangleFan,
            Topology::TriangleListAdj => MeshMode::TriangleListAdj,
            Topology::TriangleStripAdj => MeshMode::TriangleStripAdj,
            _ => MeshMode::Other,
        }
    }
}

/// Index element width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexWidth {
    U8,
    U16,
    U32,
}

impl IndexWidth {
    pub fn byte_size(self) -> usize {
        match self {
            IndexWidth::U8 => 1,
            IndexWidth::U16 => 2,
            IndexWidth::U32 => 4,
        }
    }
}

/// Component encoding of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexComponent {
    Float32,
    Float16,
    Unorm8,
    Snorm8,
    Unorm16,
    Snorm16,
    Uint8,
    Sint8,
    Uint16,
    Sint16,
    Uint32,
    Sint32,
}

impl VertexComponent {
    pub fn byte_size(self) -> usize {
        match self {
            VertexComponent::Unorm8
            | VertexComponent::Snorm8
            | VertexComponent::Uint8
            | VertexComponent::Sint8 => 1,
            VertexComponent::Float16
            | VertexComponent::Unorm16
            | VertexComponent::Snorm16
            | VertexComponent::Uint16
            | VertexComponent::Sint16 => 2,
            VertexComponent::Float32 | VertexComponent::Uint32 | VertexComponent::Sint32 => 4,
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    fn decode(self, b: &[u8]) -> f32 {
        match self {
            VertexComponent::Float32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            VertexComponent::Float16 => f16::from_le_bytes([b[0], b[1]]).to_f32(),
            VertexComponent::Unorm8 => f32::from(b[0]) / 255.0,
            VertexComponent::Snorm8 => (f32::from(b[0] as i8) / 127.0).max(-1.0),
            VertexComponent::Unorm16 => f32::from(u16::from_le_bytes([b[0], b[1]])) / 65535.0,
            VertexComponent::Snorm16 => {
                (f32::from(i16::from_le_bytes([b[0], b[1]])) / 32767.0).max(-1.0)
            }
            VertexComponent::Uint8 => f32::from(b[0]),
            VertexComponent::Sint8 => f32::from(b[0] as i8),
            VertexComponent::Uint16 => f32::from(u16::from_le_bytes([b[0], b[1]])),
            VertexComponent::Sint16 => f32::from(i16::from_le_bytes([b[0], b[1]])),
            VertexComponent::Uint32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
            VertexComponent::Sint32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
        }
    }
}

/// Vertex attribute format: 1 to 4 components of one encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexFormat {
    pub component: VertexComponent,
    pub count: u8,
}

impl VertexFormat {
    pub const FLOAT3: VertexFormat = VertexFormat {
        component: VertexComponent::Float32,
        count: 3,
    };

    pub const FLOAT4: VertexFormat = VertexFormat {
        component: VertexComponent::Float32,
        count: 4,
    };

    pub fn new(component: VertexComponent, count: u8) -> Self {
        Self {
            component,
            count: count.clamp(1, 4),
        }
    }

    pub fn byte_size(&self) -> usize {
        self.component.byte_size() * usize::from(self.count.clamp(1, 4))
    }

    /// Decodes one element. Missing components default to `(0, 0, 0, 1)`.
    pub fn decode(&self, bytes: &[u8]) -> Vec4 {
        let mut out = [0.0, 0.0, 0.0, 1.0];
        let size = self.component.byte_size();
        for (i, chunk) in bytes
            .chunks_exact(size)
            .take(usize::from(self.count.clamp(1, 4)))
            .enumerate()
        {
            out[i] = self.component.decode(chunk);
        }
        Vec4::from_array(out)
    }
}

/// Index buffer binding of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBinding {
    pub buffer: ResourceId,
    pub byte_offset: u64,
    pub width: IndexWidth,
}

/// Position stream binding of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexBinding {
    pub buffer: ResourceId,
    pub byte_offset: u64,
    pub byte_stride: u32,
    pub format: VertexFormat,
}

/// A draw to pick against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshDraw {
    pub topology: Topology,
    pub num_indices: u32,
    pub base_vertex: i32,
    pub index: Option<IndexBinding>,
    pub position: VertexBinding,
    /// Positions are post-projection and must be unprojected with a guessed
    /// source projection.
    pub unproject: bool,
}

/// Host-assembled geometry in the form the pick kernel consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMesh {
    /// Decoded, base-vertex adjusted and clamped indices. Empty for
    /// non-indexed draws.
    pub indices: Vec<u32>,
    /// Positions `0..=max_index`; entries below `min_index` are zero.
    pub vertices: Vec<Vec4>,
    pub min_index: u32,
    pub max_index: u32,
    /// Invocations to dispatch.
    pub num_indices: u32,
}

impl NormalizedMesh {
    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }
}

/// Applies a signed base vertex. Negative offsets clamp at zero.
pub fn apply_base_vertex(index: u32, base_vertex: i32) -> u32 {
    if base_vertex < 0 {
        index.saturating_sub(base_vertex.unsigned_abs())
    } else {
        index.saturating_add(base_vertex.unsigned_abs())
    }
}

/// Decodes `count` little-endian indices. Bytes missing from a short buffer
/// read as zero.
pub fn decode_indices(bytes: &[u8], width: IndexWidth, count: u32, base_vertex: i32) -> Vec<u32> {
    let size = width.byte_size();
    (0..count as usize)
        .map(|i| {
            let mut raw = [0u8; 4];
            let start = i * size;
            if let Some(src) = bytes.get(start..) {
                let n = src.len().min(size);
                raw[..n].copy_from_slice(&src[..n]);
            }
            apply_base_vertex(u32::from_le_bytes(raw), base_vertex)
        })
        .collect()
}

/// Byte distance between elements. A zero stride means tightly packed.
pub fn effective_stride(stride: u32, format: VertexFormat) -> usize {
    if stride == 0 {
        format.byte_size()
    } else {
        stride as usize
    }
}

/// Number of complete elements a vertex stream holds.
pub fn vertex_element_count(len: usize, stride: u32, format: VertexFormat) -> u32 {
    let size = format.byte_size();
    if len < size {
        return 0;
    }
    let stride = effective_stride(stride, format);
    u32::try_from((len - size) / stride + 1).unwrap_or(u32::MAX)
}

/// Converts a draw's index and vertex data into a [`NormalizedMesh`].
///
/// `vertex_bytes` starts at the position stream's byte offset.
pub fn normalize_mesh(
    index: Option<(&[u8], IndexWidth)>,
    num_indices: u32,
    vertex_bytes: &[u8],
    stride: u32,
    format: VertexFormat,
    base_vertex: i32,
) -> Result<NormalizedMesh> {
    if num_indices == 0 {
        return Err(StatsError::EmptyDraw("draw has no indices".into()));
    }
    let available = vertex_element_count(vertex_bytes.len(), stride, format);
    if available == 0 {
        return Err(StatsError::EmptyDraw(
            "vertex buffer holds no complete element".into(),
        ));
    }
    let last_available = available - 1;

    let (mut indices, min_index, max_index, dispatch) = match index {
        Some((bytes, width)) => {
            let indices = decode_indices(bytes, width, num_indices, base_vertex);
            let min = indices.iter().copied().min().unwrap_or(0);
            let max = indices.iter().copied().max().unwrap_or(0);
            (indices, min, max, num_indices)
        }
        None => {
            let count = num_indices.min(available);
            (Vec::new(), 0, count - 1, count)
        }
    };

    if max_index > last_available {
        log::debug!(
            "draw references vertex {max_index} but the buffer holds {available}; clamping"
        );
    }
    let max_index = max_index.min(last_available);
    let min_index = min_index.min(max_index);
    for i in &mut indices {
        *i = (*i).min(max_index);
    }

    let size = format.byte_size();
    let stride = effective_stride(stride, format);
    let mut vertices = vec![Vec4::ZERO; max_index as usize + 1];
    for idx in min_index..=max_index {
        let start = idx as usize * stride;
        if let Some(element) = vertex_bytes.get(start..start + size) {
            vertices[idx as usize] = format.decode(element);
        }
    }

    Ok(NormalizedMesh {
        indices,
        vertices,
        min_index,
        max_index,
        num_indices: dispatch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn float3_bytes(points: &[[f32; 3]]) -> Vec<u8> {
        points
            .iter()
            .flat_map(|p| p.iter().flat_map(|c| c.to_le_bytes()))
            .collect()
    }

    #[test]
    fn test_negative_base_vertex_clamps_to_zero() {
        assert_eq!(apply_base_vertex(3, -5), 0);
        assert_eq!(apply_base_vertex(7, -5), 2);
        assert_eq!(apply_base_vertex(7, 5), 12);
        assert_eq!(apply_base_vertex(u32::MAX, 1), u32::MAX);
    }

    #[test]
    fn test_decode_widths() {
        let bytes = [1u8, 0, 2, 0, 3, 0];
        assert_eq!(decode_indices(&bytes, IndexWidth::U16, 3, 0), vec![1, 2, 3]);
        assert_eq!(decode_indices(&bytes, IndexWidth::U8, 3, 0), vec![1, 0, 2]);
        let bytes = 0x0102_0304u32.to_le_bytes();
        assert_eq!(
            decode_indices(&bytes, IndexWidth::U32, 1, 0),
            vec![0x0102_0304]
        );
    }

    #[test]
    fn test_short_index_buffer_reads_zero() {
        let bytes = [5u8, 0, 9];
        assert_eq!(decode_indices(&bytes, IndexWidth::U16, 3, 0), vec![5, 9, 0]);
    }

    #[test]
    fn test_normalize_dense_range() {
        let verts = float3_bytes(&[[0.0; 3], [1.0; 3], [2.0; 3], [3.0; 3], [4.0; 3]]);
        let idx: Vec<u8> = [2u16, 4, 3].iter().flat_map(|i| i.to_le_bytes()).collect();
        let mesh = normalize_mesh(
            Some((&idx, IndexWidth::U16)),
            3,
            &verts,
            12,
            VertexFormat::FLOAT3,
            0,
        )
        .unwrap();
        assert_eq!(mesh.indices, vec![2, 4, 3]);
        assert_eq!(mesh.min_index, 2);
        assert_eq!(mesh.max_index, 4);
        assert_eq!(mesh.vertices.len(), 5);
        assert_eq!(mesh.vertices[0], Vec4::ZERO);
        assert_eq!(mesh.vertices[3], Vec4::new(3.0, 3.0, 3.0, 1.0));
    }

    #[test]
    fn test_indices_past_buffer_are_clamped() {
        let verts = float3_bytes(&[[0.0; 3], [1.0; 3]]);
        let idx: Vec<u8> = [0u32, 1, 40].iter().flat_map(|i| i.to_le_bytes()).collect();
        let mesh = normalize_mesh(
            Some((&idx, IndexWidth::U32)),
            3,
            &verts,
            12,
            VertexFormat::FLOAT3,
            0,
        )
        .unwrap();
        assert_eq!(mesh.max_index, 1);
        assert_eq!(mesh.indices, vec![0, 1, 1]);
        assert_eq!(mesh.vertices.len(), 2);
    }

    #[test]
    fn test_non_indexed_range() {
        let verts = float3_bytes(&[[0.0; 3], [1.0; 3], [2.0; 3]]);
        let mesh = normalize_mesh(None, 8, &verts, 12, VertexFormat::FLOAT3, 0).unwrap();
        assert!(!mesh.is_indexed());
        assert_eq!(mesh.num_indices, 3);
        assert_eq!(mesh.max_index, 2);
    }

    #[test]
    fn test_empty_draws_rejected() {
        let verts = float3_bytes(&[[0.0; 3]]);
        assert!(matches!(
            normalize_mesh(None, 0, &verts, 12, VertexFormat::FLOAT3, 0),
            Err(StatsError::EmptyDraw(_))
        ));
        assert!(matches!(
            normalize_mesh(None, 3, &verts[..8], 12, VertexFormat::FLOAT3, 0),
            Err(StatsError::EmptyDraw(_))
        ));
    }

    #[test]
    fn test_vertex_formats() {
        let half = VertexFormat::new(VertexComponent::Float16, 2);
        let bytes: Vec<u8> = [f16::from_f32(0.5), f16::from_f32(-2.0)]
            .iter()
            .flat_map(|h| h.to_le_bytes())
            .collect();
        assert_eq!(half.decode(&bytes), Vec4::new(0.5, -2.0, 0.0, 1.0));

        let snorm = VertexFormat::new(VertexComponent::Snorm8, 3);
        assert_eq!(
            snorm.decode(&[127, 0x80, 0]),
            Vec4::new(1.0, -1.0, 0.0, 1.0)
        );

        let unorm = VertexFormat::new(VertexComponent::Unorm16, 1);
        assert_eq!(unorm.decode(&[0xff, 0xff]), Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_element_count_respects_partial_tail() {
        // Two full 12-byte elements with a 16-byte stride and a short tail.
        assert_eq!(vertex_element_count(28, 16, VertexFormat::FLOAT3), 2);
        assert_eq!(vertex_element_count(27, 16, VertexFormat::FLOAT3), 1);
        assert_eq!(vertex_element_count(12, 0, VertexFormat::FLOAT3), 1);
    }

    #[test]
    fn test_zero_stride_is_tightly_packed() {
        assert_eq!(vertex_element_count(36, 0, VertexFormat::FLOAT3), 3);
        assert_eq!(vertex_element_count(35, 0, VertexFormat::FLOAT3), 2);

        let verts = float3_bytes(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        let mesh = normalize_mesh(None, 3, &verts, 0, VertexFormat::FLOAT3, 0).unwrap();
        assert_eq!(mesh.num_indices, 3);
        assert_eq!(mesh.max_index, 2);
        assert_eq!(mesh.vertices[1], Vec4::new(4.0, 5.0, 6.0, 1.0));
        assert_eq!(mesh.vertices[2], Vec4::new(7.0, 8.0, 9.0, 1.0));
    }

    proptest! {
        #[test]
        fn prop_normalized_indices_stay_in_range(
            raw in proptest::collection::vec(0u32..64, 1..64),
            base in -16i32..16,
            vertex_count in 1usize..48,
        ) {
            let verts = float3_bytes(&vec![[1.0; 3]; vertex_count]);
            let idx: Vec<u8> = raw.iter().flat_map(|i| i.to_le_bytes()).collect();
            let mesh = normalize_mesh(
                Some((&idx, IndexWidth::U32)),
                u32::try_from(raw.len()).unwrap(),
                &verts,
                12,
                VertexFormat::FLOAT3,
                base,
            ).unwrap();
            prop_assert_eq!(mesh.vertices.len(), mesh.max_index as usize + 1);
            prop_assert!(mesh.min_index <= mesh.max_index);
            for i in &mesh.indices {
                prop_assert!((*i as usize) < mesh.vertices.len());
            }
        }
    }
}
