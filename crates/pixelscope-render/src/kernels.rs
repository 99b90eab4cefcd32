//! Kernel descriptors, binding layouts and parameter blocks.
//!
//! Every kernel uses one bind group. Slot numbers are shared across kernels:
//! parameters at 0, the sampled image at 1, the written buffer at 2 and
//! read-only inputs from 3.

use bytemuck::{Pod, Zeroable};
use pixelscope_core::{
    CompKind, ImageDescriptor, StatsError, TextureDimension, TilingConfig,
};

/// Uniform parameter block.
pub const SLOT_PARAMS: u32 = 0;
/// Sampled image.
pub const SLOT_IMAGE: u32 = 1;
/// Read-write output buffer.
pub const SLOT_OUTPUT: u32 = 2;
/// Read-only input buffer.
pub const SLOT_INPUT: u32 = 3;
/// Read-only index buffer of the mesh pick kernel.
pub const SLOT_INDICES: u32 = 4;

/// Texture type a kernel variant is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderShape {
    D1,
    D2,
    /// 2D arrays, cubes and cube arrays (faces addressed as layers).
    D2Array,
    D3,
    MultiSample,
    /// Texel buffers, addressed linearly by element.
    Buffer,
}

impl ShaderShape {
    /// Kernel shape for sampling an image. Renderbuffers map to the shape of
    /// their resolved copy.
    pub fn for_image(desc: &ImageDescriptor) -> pixelscope_core::Result<Self> {
        let shape = match desc.dimension {
            TextureDimension::D1 => ShaderShape::D1,
            // One-dimensional arrays are stored as height-1 2D arrays.
            TextureDimension::D1Array
            | TextureDimension::D2Array
            | TextureDimension::Cube
            | TextureDimension::CubeArray => ShaderShape::D2Array,
            TextureDimension::D3 => ShaderShape::D3,
            TextureDimension::D2 | TextureDimension::Renderbuffer => {
                if desc.is_multisampled() {
                    ShaderShape::MultiSample
                } else {
                    ShaderShape::D2
                }
            }
            TextureDimension::MultiSample => {
                if desc.array_size > 1 {
                    return Err(StatsError::Unsupported(format!(
                        "multisampled array {}",
                        desc.id
                    )));
                }
                ShaderShape::MultiSample
            }
            TextureDimension::Buffer => ShaderShape::Buffer,
        };
        Ok(shape)
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderShape::D1 => "1d",
            ShaderShape::D2 => "2d",
            ShaderShape::D2Array => "2d_array",
            ShaderShape::D3 => "3d",
            ShaderShape::MultiSample => "ms",
            ShaderShape::Buffer => "buffer",
        }
    }
}

/// A compute kernel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Per-tile min/max over an image.
    MinMaxTile { shape: ShaderShape, kind: CompKind },
    /// Fold of all tile results into one min/max pair.
    MinMaxResult { kind: CompKind },
    /// Bucketed counts over an image.
    Histogram { shape: ShaderShape, kind: CompKind },
    /// Ray/triangle or screen-distance picking over a normalized mesh.
    MeshPick,
    /// Single texel copy, bit-exact when `raw_bits` is set.
    TexelFetch {
        shape: ShaderShape,
        kind: CompKind,
        raw_bits: bool,
    },
}

/// What a binding slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Uniform,
    Image,
    StorageReadWrite,
    StorageRead,
}

/// A slot in a kernel's bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub slot: u32,
    pub kind: BindingKind,
}

const fn binding(slot: u32, kind: BindingKind) -> Binding {
    Binding { slot, kind }
}

const IMAGE_REDUCTION_BINDINGS: [Binding; 3] = [
    binding(SLOT_PARAMS, BindingKind::Uniform),
    binding(SLOT_IMAGE, BindingKind::Image),
    binding(SLOT_OUTPUT, BindingKind::StorageReadWrite),
];

const RESULT_BINDINGS: [Binding; 3] = [
    binding(SLOT_PARAMS, BindingKind::Uniform),
    binding(SLOT_OUTPUT, BindingKind::StorageReadWrite),
    binding(SLOT_INPUT, BindingKind::StorageRead),
];

const PICK_BINDINGS: [Binding; 4] = [
    binding(SLOT_PARAMS, BindingKind::Uniform),
    binding(SLOT_OUTPUT, BindingKind::StorageReadWrite),
    binding(SLOT_INPUT, BindingKind::StorageRead),
    binding(SLOT_INDICES, BindingKind::StorageRead),
];

impl Kernel {
    /// Slots the kernel reads or writes.
    pub fn bindings(&self) -> &'static [Binding] {
        match self {
            Kernel::MinMaxTile { .. } | Kernel::Histogram { .. } | Kernel::TexelFetch { .. } => {
                &IMAGE_REDUCTION_BINDINGS
            }
            Kernel::MinMaxResult { .. } => &RESULT_BINDINGS,
            Kernel::MeshPick => &PICK_BINDINGS,
        }
    }

    /// Shape and sample type of the image slot, if the kernel samples one.
    pub fn image(&self) -> Option<(ShaderShape, CompKind)> {
        match *self {
            Kernel::MinMaxTile { shape, kind }
            | Kernel::Histogram { shape, kind }
            | Kernel::TexelFetch { shape, kind, .. } => Some((shape, kind)),
            Kernel::MinMaxResult { .. } | Kernel::MeshPick => None,
        }
    }

    /// Human-readable name used for labels and logs.
    pub fn label(&self) -> String {
        let kind = |k: CompKind| match k {
            CompKind::Float => "float",
            CompKind::UInt => "uint",
            CompKind::SInt => "sint",
        };
        match *self {
            Kernel::MinMaxTile { shape, kind: k } => {
                format!("minmax tile ({} {})", shape.name(), kind(k))
            }
            Kernel::MinMaxResult { kind: k } => format!("minmax result ({})", kind(k)),
            Kernel::Histogram { shape, kind: k } => {
                format!("histogram ({} {})", shape.name(), kind(k))
            }
            Kernel::MeshPick => "mesh pick".to_string(),
            Kernel::TexelFetch {
                shape,
                kind: k,
                raw_bits,
            } => format!(
                "texel fetch ({} {}{})",
                shape.name(),
                kind(k),
                if raw_bits { " raw" } else { "" }
            ),
        }
    }
}

/// A kernel together with the compile-time constants it is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelSpec {
    pub kernel: Kernel,
    pub tiling: TilingConfig,
    pub buckets: u32,
    pub pick_group_size: u32,
}

/// Parameters of the min/max and histogram kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
pub struct ReductionParams {
    /// Mip extent in x, y, z; w unused.
    pub resolution: [u32; 4],
    pub slice: u32,
    pub mip: u32,
    /// Sample index, or the negated sample count to cover every sample.
    pub sample_index: i32,
    pub num_samples: u32,
    pub range_min: f32,
    pub range_max: f32,
    pub channels: u32,
    pub num_tiles: u32,
    /// Blocks in x and y; z, w unused.
    pub blocks: [u32; 4],
}

/// Parameters of the mesh pick kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
pub struct PickParams {
    pub ray_pos: [f32; 3],
    pub use_indices: u32,
    pub ray_dir: [f32; 3],
    pub num_indices: u32,
    pub mvp: [[f32; 4]; 4],
    pub coords: [f32; 2],
    pub viewport: [f32; 2],
    pub mesh_mode: u32,
    pub unproject: u32,
    pub pick_radius: f32,
    pub max_results: u32,
}

/// Parameters of the texel fetch kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
pub struct TexelParams {
    pub x: u32,
    pub y: u32,
    pub slice: u32,
    pub mip: u32,
    pub sample_index: u32,
    /// Bit per channel; masked channels read zero.
    pub write_mask: u32,
    pub _padding: [u32; 2],
}

/// Bytes of one texel in tile and result buffers.
pub const TEXEL_BYTES: u64 = 16;
/// Bytes of the pick results header (count plus padding).
pub const PICK_HEADER_BYTES: u64 = 16;
/// Bytes of one pick record.
pub const PICK_RECORD_BYTES: u64 = 16;
