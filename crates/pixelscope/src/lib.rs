//! pixelscope-rs: GPU image statistics and selection queries for
//! frame-debugger replay.
//!
//! A [`StatsEngine`] answers interactive queries over captured GPU
//! resources: per-channel value ranges, histograms, the mesh element under
//! the cursor, and the exact value of a single texel.
//!
//! # Quick Start
//!
//! ```no_run
//! use pixelscope_rs::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!
//!     let desc = ImageDescriptor::new_2d(ResourceId(1), 4, 4, CompKind::Float);
//!     let mut device = SoftwareDevice::new();
//!     device.add_image(desc);
//!     let mut catalog = ResourceCatalog::new();
//!     catalog.add_image(desc);
//!
//!     let mut engine = StatsEngine::new(device, EngineConfig::default())?;
//!     let range = engine.get_min_max(&catalog, ReductionRequest::new(desc.id))?;
//!     let counts = engine.get_histogram(
//!         &catalog,
//!         ReductionRequest::new(desc.id),
//!         range.min[0],
//!         range.max[0] + 1.0,
//!         ChannelMask::R,
//!     )?;
//!     assert_eq!(counts.iter().sum::<u32>(), 16);
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`WgpuDevice`] runs the WGSL kernels on a GPU adapter; see
//!   [`create_headless_engine`].
//! - [`SoftwareDevice`] executes the same kernels on the host and checks
//!   context and barrier usage strictly.

mod headless;

pub use headless::{create_headless_engine, create_software_engine};

// Re-export core types
pub use pixelscope_core::{
    CameraParams, Capabilities, Capability, ChannelMask, CompKind, EngineConfig, ImageDescriptor,
    IndexBinding, IndexWidth, MeshDraw, MinMax, PixelRequest, PixelValue, ReductionRequest,
    ReplayResources, ResourceCatalog, ResourceId, Result, SampleSelector, StatsError,
    StencilLayout, TextureDimension, TilingConfig, Topology, VertexBinding, VertexComponent,
    VertexFormat, Viewport,
};
pub use pixelscope_core::{Mat4, Vec2, Vec3, Vec4};

// Re-export device and engine types
pub use pixelscope_render::{
    BarrierKind, BufferHandle, BufferUsage, ComputeDevice, ContextKind, DeviceCommand,
    ImageAspect, ImageBinding, Kernel, KernelSpec, RenderError, ScratchPool, ScratchSlot,
    ShaderShape, SoftwareDevice, StatsEngine, WgpuDevice,
};

/// Installs `env_logger` as the `log` backend. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
