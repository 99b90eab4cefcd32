//! Device error types.

use pixelscope_core::StatsError;
use thiserror::Error;

use crate::context::ContextKind;
use crate::device::{BufferHandle, ProgramHandle};

/// Errors raised by compute devices.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Failed to create wgpu adapter.
    #[error("failed to create graphics adapter")]
    AdapterCreationFailed,

    /// Failed to create wgpu device.
    #[error("failed to create graphics device: {0}")]
    DeviceCreationFailed(#[from] wgpu::RequestDeviceError),

    /// A context could not be brought up.
    #[error("failed to initialize {0} context: {1}")]
    ContextInitFailed(ContextKind, String),

    /// An operation ran in the wrong context.
    #[error("{operation} requires the {required} context, {current} is current")]
    WrongContext {
        operation: &'static str,
        required: ContextKind,
        current: String,
    },

    /// Shader compilation failed.
    #[error("shader compilation failed: {0}")]
    ShaderCompilationFailed(String),

    /// Pipeline creation failed.
    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(String),

    /// Buffer creation failed.
    #[error("buffer creation failed: {0}")]
    BufferCreationFailed(String),

    /// A handle that was never created or already destroyed.
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferHandle),

    /// A program that was never created or already destroyed.
    #[error("unknown program {0:?}")]
    UnknownProgram(ProgramHandle),

    /// An image the device does not hold.
    #[error("unknown image {0}")]
    UnknownImage(pixelscope_core::ResourceId),

    /// A binding slot the kernel expects was left empty.
    #[error("slot {slot} is unbound for {kernel}")]
    UnboundSlot { slot: u32, kernel: String },

    /// A renderbuffer was bound for sampling without resolving it first.
    #[error("image {0} is not sampleable")]
    NotSampleable(pixelscope_core::ResourceId),

    /// Access outside a buffer.
    #[error("range {offset}+{size} exceeds buffer of {capacity} bytes")]
    OutOfRange { offset: u64, size: u64, capacity: u64 },

    /// A dispatch or readback consumed a buffer written by a dispatch
    /// without an intervening barrier.
    #[error("missing barrier before reading {0:?}")]
    MissingBarrier(BufferHandle),

    /// Buffer mapping for readback failed.
    #[error("buffer mapping failed: {0}")]
    MapFailed(String),

    /// The kernel or resource shape is not supported by this device.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Out of memory.
    #[error("out of memory")]
    OutOfMemory,

    /// Timeout waiting for GPU.
    #[error("timeout waiting for GPU")]
    Timeout,
}

/// A specialized Result type for device operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

impl From<wgpu::PollError> for RenderError {
    fn from(err: wgpu::PollError) -> Self {
        match err {
            wgpu::PollError::Timeout => RenderError::Timeout,
            other => RenderError::MapFailed(other.to_string()),
        }
    }
}

impl From<RenderError> for StatsError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::UnknownImage(id) => StatsError::UnknownResource(id),
            RenderError::Unsupported(what) => StatsError::Unsupported(what),
            other => StatsError::Device(other.to_string()),
        }
    }
}
