//! Grow-only scratch buffers shared by all queries.

use std::collections::HashMap;

use crate::device::{BufferHandle, BufferUsage, ComputeDevice};
use crate::error::RenderResult;

/// Named scratch buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScratchSlot {
    ReductionParams,
    MinMaxTiles,
    MinMaxResult,
    Histogram,
    PickParams,
    PickIndices,
    PickVertices,
    PickResults,
    PixelParams,
    PixelResult,
}

impl ScratchSlot {
    pub fn usage(self) -> BufferUsage {
        match self {
            ScratchSlot::ReductionParams | ScratchSlot::PickParams | ScratchSlot::PixelParams => {
                BufferUsage::Uniform
            }
            _ => BufferUsage::Storage,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScratchSlot::ReductionParams => "reduction params",
            ScratchSlot::MinMaxTiles => "minmax tiles",
            ScratchSlot::MinMaxResult => "minmax result",
            ScratchSlot::Histogram => "histogram",
            ScratchSlot::PickParams => "pick params",
            ScratchSlot::PickIndices => "pick indices",
            ScratchSlot::PickVertices => "pick vertices",
            ScratchSlot::PickResults => "pick results",
            ScratchSlot::PixelParams => "pixel params",
            ScratchSlot::PixelResult => "pixel result",
        }
    }
}

/// A scratch buffer and the size it was allocated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchBuffer {
    pub handle: BufferHandle,
    pub capacity: u64,
}

/// Lazily sized device buffers, reused across queries.
///
/// A buffer is reallocated only when a request exceeds its capacity, and the
/// replacement is sized exactly to the request. Buffers never shrink.
#[derive(Debug, Default)]
pub struct ScratchPool {
    buffers: HashMap<ScratchSlot, ScratchBuffer>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a buffer of at least `size` bytes for `slot`.
    pub fn acquire<D: ComputeDevice + ?Sized>(
        &mut self,
        device: &mut D,
        slot: ScratchSlot,
        size: u64,
    ) -> RenderResult<BufferHandle> {
        if let Some(existing) = self.buffers.get(&slot) {
            if existing.capacity >= size {
                return Ok(existing.handle);
            }
        }

        if let Some(old) = self.buffers.remove(&slot) {
            log::debug!(
                "growing {} scratch buffer from {} to {size} bytes",
                slot.label(),
                old.capacity
            );
            device.destroy_buffer(old.handle);
        }
        let handle = device.create_buffer(size, slot.usage(), slot.label())?;
        self.buffers.insert(
            slot,
            ScratchBuffer {
                handle,
                capacity: size,
            },
        );
        Ok(handle)
    }

    pub fn get(&self, slot: ScratchSlot) -> Option<ScratchBuffer> {
        self.buffers.get(&slot).copied()
    }

    pub fn capacity(&self, slot: ScratchSlot) -> Option<u64> {
        self.buffers.get(&slot).map(|b| b.capacity)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Destroys every buffer.
    pub fn release_all<D: ComputeDevice + ?Sized>(&mut self, device: &mut D) {
        for (_, buffer) in self.buffers.drain() {
            device.destroy_buffer(buffer.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;
    use proptest::prelude::*;

    #[test]
    fn test_reuse_and_growth() {
        let mut device = SoftwareDevice::new();
        let mut pool = ScratchPool::new();

        let first = pool
            .acquire(&mut device, ScratchSlot::MinMaxTiles, 256)
            .unwrap();
        let again = pool
            .acquire(&mut device, ScratchSlot::MinMaxTiles, 128)
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(pool.capacity(ScratchSlot::MinMaxTiles), Some(256));

        let grown = pool
            .acquire(&mut device, ScratchSlot::MinMaxTiles, 1024)
            .unwrap();
        assert_ne!(first, grown);
        assert_eq!(pool.capacity(ScratchSlot::MinMaxTiles), Some(1024));
        assert!(!device.has_buffer(first));
        assert_eq!(device.buffer_size(grown), Some(1024));
    }

    #[test]
    fn test_slots_are_independent() {
        let mut device = SoftwareDevice::new();
        let mut pool = ScratchPool::new();
        let a = pool.acquire(&mut device, ScratchSlot::Histogram, 64).unwrap();
        let b = pool
            .acquire(&mut device, ScratchSlot::PickResults, 64)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_release_all_destroys_buffers() {
        let mut device = SoftwareDevice::new();
        let mut pool = ScratchPool::new();
        let a = pool.acquire(&mut device, ScratchSlot::Histogram, 64).unwrap();
        pool.release_all(&mut device);
        assert!(pool.is_empty());
        assert!(!device.has_buffer(a));
    }

    proptest! {
        #[test]
        fn prop_capacity_never_shrinks(sizes in proptest::collection::vec(1u64..4096, 1..32)) {
            let mut device = SoftwareDevice::new();
            let mut pool = ScratchPool::new();
            let mut high = 0;
            for size in sizes {
                pool.acquire(&mut device, ScratchSlot::PickVertices, size).unwrap();
                high = high.max(size);
                prop_assert_eq!(pool.capacity(ScratchSlot::PickVertices), Some(high));
            }
            prop_assert_eq!(device.live_buffer_count(), 1);
        }
    }
}
