//! Resource model shared with the capture engine.
//!
//! Images and buffers are owned by the capture/replay engine. The statistics
//! engines only see descriptors and byte ranges through [`ReplayResources`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};

/// Identifier of a captured resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// The null resource.
    pub const NULL: ResourceId = ResourceId(0);
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Dimensionality of an image resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TextureDimension {
    D1,
    D1Array,
    #[default]
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
    /// Multisampled 2D image.
    MultiSample,
    /// Texel buffer.
    Buffer,
    /// Render target storage that cannot be sampled directly.
    Renderbuffer,
}

/// Component interpretation of texel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CompKind {
    #[default]
    Float,
    UInt,
    SInt,
}

/// Whether an image carries a stencil aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StencilLayout {
    #[default]
    None,
    /// Combined depth and stencil (depth in channel 0, stencil in channel 1).
    DepthStencil,
    /// Stencil only.
    StencilOnly,
}

/// Read-only description of a captured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub id: ResourceId,
    pub dimension: TextureDimension,
    pub comp_kind: CompKind,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Array layers; for cube arrays, the number of cubes.
    pub array_size: u32,
    pub mips: u32,
    pub samples: u32,
    pub stencil: StencilLayout,
}

impl ImageDescriptor {
    /// A single-mip, single-sample 2D image.
    pub fn new_2d(id: ResourceId, width: u32, height: u32, comp_kind: CompKind) -> Self {
        Self {
            id,
            dimension: TextureDimension::D2,
            comp_kind,
            width,
            height,
            depth: 1,
            array_size: 1,
            mips: 1,
            samples: 1,
            stencil: StencilLayout::None,
        }
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: TextureDimension) -> Self {
        self.dimension = dimension;
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth.max(1);
        self
    }

    #[must_use]
    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size.max(1);
        self
    }

    #[must_use]
    pub fn with_mips(mut self, mips: u32) -> Self {
        self.mips = mips.max(1);
        self
    }

    #[must_use]
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    #[must_use]
    pub fn with_stencil(mut self, stencil: StencilLayout) -> Self {
        self.stencil = stencil;
        self
    }

    /// Extent of a mip level, never below one texel on any axis.
    pub fn mip_extent(&self, mip: u32) -> [u32; 3] {
        let shrink = |dim: u32| dim.checked_shr(mip).unwrap_or(0).max(1);
        let depth = if self.dimension == TextureDimension::D3 {
            shrink(self.depth)
        } else {
            1
        };
        [shrink(self.width), shrink(self.height), depth]
    }

    /// Number of addressable layers. Cubes expose six faces per cube.
    pub fn layer_count(&self) -> u32 {
        match self.dimension {
            TextureDimension::D1Array | TextureDimension::D2Array => self.array_size,
            TextureDimension::Cube => 6,
            TextureDimension::CubeArray => 6 * self.array_size,
            _ => 1,
        }
    }

    pub fn is_multisampled(&self) -> bool {
        self.samples > 1
    }

    /// Slice coordinate passed to kernels: the layer for arrays and cubes,
    /// the depth slice of the mip for 3D images.
    pub fn kernel_slice(&self, slice_face: u32, mip: u32) -> u32 {
        if self.dimension == TextureDimension::D3 {
            slice_face.checked_shr(mip).unwrap_or(0)
        } else {
            slice_face
        }
    }

    /// Rejects mips and slices the image does not have.
    pub fn check_subresource(&self, slice_face: u32, mip: u32) -> Result<()> {
        if mip >= self.mips {
            return Err(StatsError::InvalidRequest(format!(
                "mip {mip} out of range for {} with {} mips",
                self.id, self.mips
            )));
        }
        let slices = match self.dimension {
            TextureDimension::D3 => self.mip_extent(mip)[2],
            _ => self.layer_count(),
        };
        let slice = self.kernel_slice(slice_face, mip);
        if slice >= slices {
            return Err(StatsError::InvalidRequest(format!(
                "slice {slice_face} out of range for {} at mip {mip}",
                self.id
            )));
        }
        Ok(())
    }
}

/// Which samples of a multisampled image a query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleSelector {
    Index(u32),
    AllSamples,
}

impl Default for SampleSelector {
    fn default() -> Self {
        SampleSelector::Index(0)
    }
}

impl SampleSelector {
    /// Kernel encoding: a sample index clamped to the image, or the negated
    /// sample count when every sample is covered.
    #[allow(clippy::cast_possible_wrap)]
    pub fn encode(self, samples: u32) -> i32 {
        let samples = samples.clamp(1, i32::MAX as u32);
        match self {
            SampleSelector::Index(i) => i.min(samples - 1) as i32,
            SampleSelector::AllSamples => -(samples as i32),
        }
    }
}

/// Subresource selection for min/max and histogram queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionRequest {
    pub resource: ResourceId,
    /// Array layer, cube face (`face + 6 * cube`), or 3D depth slice.
    pub slice_face: u32,
    pub mip: u32,
    pub sample: SampleSelector,
}

impl ReductionRequest {
    pub fn new(resource: ResourceId) -> Self {
        Self {
            resource,
            slice_face: 0,
            mip: 0,
            sample: SampleSelector::default(),
        }
    }

    #[must_use]
    pub fn with_slice(mut self, slice_face: u32) -> Self {
        self.slice_face = slice_face;
        self
    }

    #[must_use]
    pub fn with_mip(mut self, mip: u32) -> Self {
        self.mip = mip;
        self
    }

    #[must_use]
    pub fn with_sample(mut self, sample: SampleSelector) -> Self {
        self.sample = sample;
        self
    }
}

/// Single texel selection for pixel picking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRequest {
    pub resource: ResourceId,
    pub x: u32,
    pub y: u32,
    pub slice_face: u32,
    pub mip: u32,
    pub sample: u32,
}

impl PixelRequest {
    pub fn new(resource: ResourceId, x: u32, y: u32) -> Self {
        Self {
            resource,
            x,
            y,
            slice_face: 0,
            mip: 0,
            sample: 0,
        }
    }

    #[must_use]
    pub fn with_subresource(mut self, slice_face: u32, mip: u32, sample: u32) -> Self {
        self.slice_face = slice_face;
        self.mip = mip;
        self.sample = sample;
        self
    }
}

/// Read access to the capture engine's resources.
pub trait ReplayResources {
    /// Looks up an image descriptor.
    fn image(&self, id: ResourceId) -> Option<ImageDescriptor>;

    /// Reads bytes from a buffer. Reads past the end are truncated, so the
    /// result may be shorter than `length`. `None` reads to the end.
    fn buffer_bytes(&self, id: ResourceId, offset: u64, length: Option<u64>) -> Option<Vec<u8>>;
}

/// In-memory [`ReplayResources`] implementation.
#[derive(Debug, Default, Clone)]
pub struct ResourceCatalog {
    images: HashMap<ResourceId, ImageDescriptor>,
    buffers: HashMap<ResourceId, Vec<u8>>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an image under its descriptor's id.
    pub fn add_image(&mut self, desc: ImageDescriptor) {
        self.images.insert(desc.id, desc);
    }

    /// Registers buffer contents.
    pub fn add_buffer(&mut self, id: ResourceId, bytes: Vec<u8>) {
        self.buffers.insert(id, bytes);
    }

    pub fn remove(&mut self, id: ResourceId) {
        self.images.remove(&id);
        self.buffers.remove(&id);
    }
}

impl ReplayResources for ResourceCatalog {
    fn image(&self, id: ResourceId) -> Option<ImageDescriptor> {
        self.images.get(&id).copied()
    }

    fn buffer_bytes(&self, id: ResourceId, offset: u64, length: Option<u64>) -> Option<Vec<u8>> {
        let data = self.buffers.get(&id)?;
        let len = data.len() as u64;
        let start = offset.min(len);
        let end = length.map_or(len, |l| start.saturating_add(l).min(len));
        #[allow(clippy::cast_possible_truncation)]
        Some(data[start as usize..end as usize].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let desc = ImageDescriptor::new_2d(ResourceId(1), 16, 4, CompKind::Float).with_mips(5);
        assert_eq!(desc.mip_extent(0), [16, 4, 1]);
        assert_eq!(desc.mip_extent(2), [4, 1, 1]);
        assert_eq!(desc.mip_extent(4), [1, 1, 1]);
        assert_eq!(desc.mip_extent(40), [1, 1, 1]);
    }

    #[test]
    fn test_kernel_slice_for_volumes() {
        let volume = ImageDescriptor::new_2d(ResourceId(1), 8, 8, CompKind::Float)
            .with_dimension(TextureDimension::D3)
            .with_depth(8)
            .with_mips(4);
        assert_eq!(volume.kernel_slice(6, 1), 3);
        assert_eq!(volume.mip_extent(1)[2], 4);
        volume.check_subresource(6, 1).unwrap();
        assert!(volume.check_subresource(8, 1).is_err());

        let array = ImageDescriptor::new_2d(ResourceId(2), 8, 8, CompKind::Float)
            .with_dimension(TextureDimension::D2Array)
            .with_array_size(3);
        assert_eq!(array.kernel_slice(2, 0), 2);
        assert!(array.check_subresource(3, 0).is_err());
        assert!(array.check_subresource(0, 1).is_err());
    }

    #[test]
    fn test_cube_array_layers() {
        let cubes = ImageDescriptor::new_2d(ResourceId(3), 4, 4, CompKind::Float)
            .with_dimension(TextureDimension::CubeArray)
            .with_array_size(2);
        assert_eq!(cubes.layer_count(), 12);
        cubes.check_subresource(11, 0).unwrap();
    }

    #[test]
    fn test_sample_encoding() {
        assert_eq!(SampleSelector::Index(2).encode(4), 2);
        assert_eq!(SampleSelector::Index(9).encode(4), 3);
        assert_eq!(SampleSelector::AllSamples.encode(4), -4);
        assert_eq!(SampleSelector::AllSamples.encode(1), -1);
        assert_eq!(SampleSelector::Index(3).encode(0), 0);
    }

    #[test]
    fn test_catalog_buffer_reads_truncate() {
        let mut catalog = ResourceCatalog::new();
        catalog.add_buffer(ResourceId(7), vec![1, 2, 3, 4, 5]);
        assert_eq!(
            catalog.buffer_bytes(ResourceId(7), 1, Some(2)),
            Some(vec![2, 3])
        );
        assert_eq!(
            catalog.buffer_bytes(ResourceId(7), 3, Some(10)),
            Some(vec![4, 5])
        );
        assert_eq!(catalog.buffer_bytes(ResourceId(7), 9, None), Some(vec![]));
        assert_eq!(catalog.buffer_bytes(ResourceId(8), 0, None), None);
    }
}
