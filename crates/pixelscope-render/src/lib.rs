//! Compute backend for pixelscope-rs.
//!
//! This crate runs the statistics and selection queries on a device:
//! - the [`ComputeDevice`] abstraction with wgpu and host-executed backends
//! - debug/replay context selection and the grow-only scratch pool
//! - WGSL kernel assembly and parameter blocks
//! - the [`StatsEngine`] exposing min/max, histogram, mesh and pixel picking

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Plain accessors don't need must_use
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Types like RenderError/RenderResult repeat the module name
#![allow(clippy::module_name_repetitions)]
// Buffer sizes are u64 on the device and usize on the host
#![allow(clippy::cast_possible_truncation)]

pub mod context;
pub mod device;
pub mod engine;
pub mod error;
pub mod kernels;
pub mod scratch;
pub mod shader;

pub use context::{ContextKind, ContextManager};
pub use device::{
    BarrierKind, BufferHandle, BufferUsage, ComputeDevice, DeviceCommand, ImageAspect,
    ImageBinding, ProgramHandle, SoftwareDevice, WgpuDevice,
};
pub use engine::StatsEngine;
pub use error::{RenderError, RenderResult};
pub use kernels::{Kernel, KernelSpec, ShaderShape};
pub use scratch::{ScratchPool, ScratchSlot};
pub use shader::KernelSourceBuilder;
