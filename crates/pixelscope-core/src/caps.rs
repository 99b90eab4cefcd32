//! Device capability table.
//!
//! Capabilities are queried by the device backend and consumed read-only here.
//! A missing capability degrades the engine: the affected queries fail fast
//! with [`StatsError::CapabilityMissing`](crate::StatsError::CapabilityMissing).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single device feature the engines may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Compute dispatch.
    ComputeShaders,
    /// Read-write storage buffers in compute kernels.
    StorageBuffers,
    /// Integer texels can be aliased bit-exactly through the fetch target.
    PreciseIntegerSampling,
    /// The stencil aspect of a depth/stencil image can be sampled.
    StencilTexturing,
}

impl Capability {
    /// All capabilities, in reporting order.
    pub const ALL: [Capability; 4] = [
        Capability::ComputeShaders,
        Capability::StorageBuffers,
        Capability::PreciseIntegerSampling,
        Capability::StencilTexturing,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::ComputeShaders => "compute shaders",
            Capability::StorageBuffers => "storage buffers",
            Capability::PreciseIntegerSampling => "precise integer sampling",
            Capability::StencilTexturing => "stencil texturing",
        };
        f.write_str(name)
    }
}

/// Feature table reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub compute_shaders: bool,
    pub storage_buffers: bool,
    pub precise_integer_sampling: bool,
    pub stencil_texturing: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::full()
    }
}

impl Capabilities {
    /// A device supporting everything.
    pub fn full() -> Self {
        Self {
            compute_shaders: true,
            storage_buffers: true,
            precise_integer_sampling: true,
            stencil_texturing: true,
        }
    }

    /// Returns whether the given capability is present.
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::ComputeShaders => self.compute_shaders,
            Capability::StorageBuffers => self.storage_buffers,
            Capability::PreciseIntegerSampling => self.precise_integer_sampling,
            Capability::StencilTexturing => self.stencil_texturing,
        }
    }

    /// Capabilities that are absent, in reporting order.
    pub fn missing(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| !self.has(*c))
            .collect()
    }

    /// Fails with the first absent capability out of `required`.
    pub fn require(&self, required: &[Capability]) -> crate::Result<()> {
        match required.iter().find(|c| !self.has(**c)) {
            Some(c) => Err(crate::StatsError::CapabilityMissing(*c)),
            None => Ok(()),
        }
    }
}
