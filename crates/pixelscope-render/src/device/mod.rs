//! Compute device abstraction.
//!
//! Engines talk to the GPU only through [`ComputeDevice`]: program and buffer
//! lifetime, slot bindings, dispatches, barriers and synchronous readback.
//! [`WgpuDevice`] drives real hardware; [`SoftwareDevice`] executes the same
//! kernels on the host.

pub mod software;
pub mod wgpu_device;

use std::ops::Range;

use pixelscope_core::{Capabilities, ImageDescriptor, ResourceId};

use crate::context::ContextKind;
use crate::error::RenderResult;
use crate::kernels::{KernelSpec, ShaderShape};

pub use software::{DeviceCommand, SoftwareDevice};
pub use wgpu_device::WgpuDevice;

/// Device buffer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// Compiled compute program handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u32);

/// How a buffer is bound to kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Small per-call parameter block.
    Uniform,
    /// Read-write storage.
    Storage,
}

/// Memory barrier between dependent device commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// Storage buffer writes become visible.
    Storage,
    /// Storage buffer and atomic counter writes become visible.
    StorageAndAtomics,
}

/// Which aspect of an image a kernel samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageAspect {
    #[default]
    Color,
    Depth,
    Stencil,
}

/// Image bound for sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageBinding {
    pub resource: ResourceId,
    pub shape: ShaderShape,
    pub aspect: ImageAspect,
    /// Sample the resolved copy of a renderbuffer.
    pub resolved: bool,
}

/// Backend interface used by the statistics and picking engines.
pub trait ComputeDevice {
    /// Feature table of this device.
    fn capabilities(&self) -> Capabilities;

    /// Brings up a context. Called once per context at engine creation.
    fn init_context(&mut self, kind: ContextKind) -> RenderResult<()>;

    /// Makes a context current.
    fn make_current(&mut self, kind: ContextKind) -> RenderResult<()>;

    /// Compiles a kernel.
    fn create_program(&mut self, spec: &KernelSpec) -> RenderResult<ProgramHandle>;

    fn destroy_program(&mut self, program: ProgramHandle);

    /// Allocates a zero-initialized buffer of exactly `size` bytes.
    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        label: &str,
    ) -> RenderResult<BufferHandle>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Uploads host data. Earlier contents of the range are discarded.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()>;

    /// Zero-fills a buffer.
    fn clear_buffer(&mut self, buffer: BufferHandle) -> RenderResult<()>;

    /// Binds a buffer (or a byte range of it) to a kernel slot.
    fn bind_buffer(&mut self, slot: u32, buffer: BufferHandle, range: Option<Range<u64>>);

    /// Binds an image to a kernel slot.
    fn bind_image(&mut self, slot: u32, image: ImageBinding);

    /// Runs a program over `groups` work-groups with the current bindings.
    fn dispatch(&mut self, program: ProgramHandle, groups: [u32; 3]) -> RenderResult<()>;

    /// Orders earlier dispatch writes before later reads.
    fn barrier(&mut self, kind: BarrierKind);

    /// Blocks until the range is readable and copies it to the host.
    fn read_back(&mut self, buffer: BufferHandle, offset: u64, size: u64)
        -> RenderResult<Vec<u8>>;

    /// Copies a renderbuffer into a sampleable texture. Requires the replay
    /// context.
    fn resolve_renderbuffer(&mut self, image: &ImageDescriptor) -> RenderResult<()>;

    /// Highest mip level the image currently exposes to sampling.
    fn max_mip_level(&self, resource: ResourceId) -> RenderResult<u32>;

    fn set_max_mip_level(&mut self, resource: ResourceId, level: u32) -> RenderResult<()>;
}
