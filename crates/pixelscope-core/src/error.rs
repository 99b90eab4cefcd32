//! Error types for pixelscope-rs.

use thiserror::Error;

use crate::caps::Capability;
use crate::resource::ResourceId;

/// The main error type for pixelscope-rs queries.
#[derive(Error, Debug)]
pub enum StatsError {
    /// The device lacks a feature the query depends on.
    #[error("device does not support {0}")]
    CapabilityMissing(Capability),

    /// The capture does not know the requested resource.
    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    /// Histogram range with `min >= max` or a non-finite bound.
    #[error("invalid histogram range [{min}, {max}]")]
    EmptyRange { min: f32, max: f32 },

    /// A draw with no indices or no complete vertex.
    #[error("zero-sized draw: {0}")]
    EmptyDraw(String),

    /// A request that is well-formed but names something out of range.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The resource shape cannot be processed by this engine.
    #[error("unsupported resource: {0}")]
    Unsupported(String),

    /// Engine configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Device-side failure.
    #[error("device error: {0}")]
    Device(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A specialized Result type for pixelscope-rs operations.
pub type Result<T> = std::result::Result<T, StatsError>;
