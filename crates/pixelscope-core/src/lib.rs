//! Core types for pixelscope-rs.
//!
//! This crate holds everything that does not touch a device:
//! - the resource model shared with the capture engine ([`ReplayResources`])
//! - the capability table and engine configuration
//! - histogram bucketing, texel conversion and min/max identities
//! - the vertex stream normalizer used by mesh picking
//! - pick ray construction and the host-side tie-break

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Plain accessors and builders don't need must_use
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Types like ResourceCatalog repeat the module name
#![allow(clippy::module_name_repetitions)]

pub mod caps;
pub mod config;
pub mod error;
pub mod histogram;
pub mod mesh;
pub mod pick;
pub mod resource;
pub mod texel;

pub use caps::{Capabilities, Capability};
pub use config::{EngineConfig, TileGrid, TilingConfig};
pub use error::{Result, StatsError};
pub use histogram::{bucket_index, compress_lanes, ChannelMask, HistogramRange};
pub use mesh::{
    apply_base_vertex, normalize_mesh, IndexBinding, IndexWidth, MeshDraw, MeshMode,
    NormalizedMesh, Topology, VertexBinding, VertexComponent, VertexFormat,
};
pub use pick::{
    build_pick_setup, resolve_point_hits, resolve_triangle_hits, CameraParams, PickRay,
    PickSetup, PointHit, TriangleHit, Viewport,
};
pub use resource::{
    CompKind, ImageDescriptor, PixelRequest, ReductionRequest, ReplayResources, ResourceCatalog,
    ResourceId, SampleSelector, StencilLayout, TextureDimension,
};
pub use texel::{MinMax, PixelValue, TexelBits};

// Re-export glam types for convenience
pub use glam::{Mat4, Vec2, Vec3, Vec4};
