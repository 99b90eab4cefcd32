//! Execution context selection.
//!
//! The engine runs in two contexts: a debug context holding everything that
//! can be shared across queries, and the replay context, which owns objects
//! that cannot be shared (the framebuffers used to resolve renderbuffers).

use std::fmt;

use crate::device::ComputeDevice;
use crate::error::RenderResult;

/// One of the two execution contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Shared context for scratch buffers, programs and dispatches.
    Debug,
    /// Exclusive context for unshareable replay objects.
    Replay,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKind::Debug => f.write_str("debug"),
            ContextKind::Replay => f.write_str("replay"),
        }
    }
}

/// Tracks the current context and skips redundant switches.
///
/// Nothing switches implicitly: each engine binds the context it needs
/// before touching state that lives there.
#[derive(Debug, Default)]
pub struct ContextManager {
    current: Option<ContextKind>,
}

impl ContextManager {
    /// Brings up both contexts. A failure here is fatal to engine creation.
    pub fn initialize<D: ComputeDevice + ?Sized>(device: &mut D) -> RenderResult<Self> {
        device.init_context(ContextKind::Replay)?;
        device.init_context(ContextKind::Debug)?;
        Ok(Self { current: None })
    }

    /// The context made current by the last [`bind`](Self::bind), if any.
    pub fn current(&self) -> Option<ContextKind> {
        self.current
    }

    /// Makes `kind` current.
    pub fn bind<D: ComputeDevice + ?Sized>(
        &mut self,
        device: &mut D,
        kind: ContextKind,
    ) -> RenderResult<()> {
        if self.current == Some(kind) {
            return Ok(());
        }
        log::trace!("switching to {kind} context");
        device.make_current(kind)?;
        self.current = Some(kind);
        Ok(())
    }
}
