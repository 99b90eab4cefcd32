//! WGSL kernel assembly.
//!
//! Kernel bodies live in `shaders/*.wgsl` and are specialized by prepending
//! a generated header: compile-time constants, the `Texel` alias for the
//! component kind, and the sampled image binding with its `load_texel`
//! accessor.

use std::fmt::Write;

use pixelscope_core::CompKind;

use crate::error::{RenderError, RenderResult};
use crate::kernels::{Kernel, KernelSpec, ShaderShape, SLOT_IMAGE};

const REDUCTION_PARAMS: &str = include_str!("shaders/reduction_params.wgsl");
const MINMAX_TILE: &str = include_str!("shaders/minmax_tile.wgsl");
const MINMAX_RESULT: &str = include_str!("shaders/minmax_result.wgsl");
const HISTOGRAM: &str = include_str!("shaders/histogram.wgsl");
const MESH_PICK: &str = include_str!("shaders/mesh_pick.wgsl");
const TEXEL_FETCH: &str = include_str!("shaders/texel_fetch.wgsl");

/// Entry point shared by all kernels.
pub const ENTRY_POINT: &str = "main";

/// Builder for specialized kernel sources.
pub struct KernelSourceBuilder {
    constants: Vec<String>,
    texel: Option<CompKind>,
    image: Option<(ShaderShape, CompKind)>,
    chunks: Vec<&'static str>,
    label: Option<String>,
}

impl KernelSourceBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            constants: Vec::new(),
            texel: None,
            image: None,
            chunks: Vec::new(),
            label: None,
        }
    }

    /// Declares a `u32` constant.
    pub fn with_u32(mut self, name: &str, value: u32) -> Self {
        self.constants.push(format!("const {name}: u32 = {value}u;"));
        self
    }

    /// Declares a `bool` constant.
    pub fn with_bool(mut self, name: &str, value: bool) -> Self {
        self.constants.push(format!("const {name}: bool = {value};"));
        self
    }

    /// Declares the `Texel` alias and the min/max identities for `kind`.
    pub fn with_texel(mut self, kind: CompKind) -> Self {
        self.texel = Some(kind);
        self
    }

    /// Declares the sampled image and `load_texel`.
    pub fn with_image(mut self, shape: ShaderShape, kind: CompKind) -> Self {
        self.image = Some((shape, kind));
        self
    }

    /// Appends a source chunk.
    pub fn with_chunk(mut self, source: &'static str) -> Self {
        self.chunks.push(source);
        self
    }

    /// Sets the label for debugging.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns the assembled WGSL.
    pub fn build_source(&self) -> RenderResult<String> {
        if self.chunks.is_empty() {
            return Err(RenderError::ShaderCompilationFailed(format!(
                "no kernel body for {}",
                self.label.as_deref().unwrap_or("kernel")
            )));
        }

        let mut out = String::new();
        for constant in &self.constants {
            out.push_str(constant);
            out.push('\n');
        }
        if let Some(kind) = self.texel {
            out.push_str(&texel_header(kind));
        }
        if let Some((shape, kind)) = self.image {
            out.push_str(&image_header(shape, kind));
        }
        for chunk in &self.chunks {
            out.push('\n');
            out.push_str(chunk);
        }
        Ok(out)
    }

    /// Builds the shader module.
    pub fn build_module(&self, device: &wgpu::Device) -> RenderResult<wgpu::ShaderModule> {
        let source = self.build_source()?;
        Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: self.label.as_deref(),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        }))
    }
}

impl Default for KernelSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar(kind: CompKind) -> &'static str {
    match kind {
        CompKind::Float => "f32",
        CompKind::UInt => "u32",
        CompKind::SInt => "i32",
    }
}

fn texel_header(kind: CompKind) -> String {
    let (highest, lowest) = match kind {
        CompKind::Float => ("3.4028234e38", "-3.4028234e38"),
        CompKind::UInt => ("4294967295u", "0u"),
        CompKind::SInt => ("2147483647", "-2147483647 - 1"),
    };
    let s = scalar(kind);
    format!(
        "alias Texel = vec4<{s}>;\n\
         const TEXEL_HIGHEST: Texel = vec4<{s}>({highest});\n\
         const TEXEL_LOWEST: Texel = vec4<{s}>({lowest});\n"
    )
}

fn image_header(shape: ShaderShape, kind: CompKind) -> String {
    let s = scalar(kind);
    let (ty, load) = match shape {
        ShaderShape::D1 => (
            format!("texture_1d<{s}>"),
            "textureLoad(source_image, i32(coord.x), i32(mip))",
        ),
        ShaderShape::D2 => (
            format!("texture_2d<{s}>"),
            "textureLoad(source_image, vec2<i32>(coord), i32(mip))",
        ),
        ShaderShape::D2Array => (
            format!("texture_2d_array<{s}>"),
            "textureLoad(source_image, vec2<i32>(coord), i32(slice), i32(mip))",
        ),
        ShaderShape::D3 => (
            format!("texture_3d<{s}>"),
            "textureLoad(source_image, vec3<i32>(vec2<i32>(coord), i32(slice)), i32(mip))",
        ),
        ShaderShape::MultiSample => (
            format!("texture_multisampled_2d<{s}>"),
            "textureLoad(source_image, vec2<i32>(coord), i32(sample_index))",
        ),
        // wgpu has no texel buffer binding; buffers arrive as 1D textures.
        ShaderShape::Buffer => (
            format!("texture_1d<{s}>"),
            "textureLoad(source_image, i32(coord.x), 0)",
        ),
    };
    let mut out = String::new();
    let _ = writeln!(
        out,
        "@group(0) @binding({SLOT_IMAGE}) var source_image: {ty};"
    );
    let _ = writeln!(
        out,
        "fn load_texel(coord: vec2<u32>, slice: u32, mip: u32, sample_index: u32) -> vec4<{s}> {{\n    return {load};\n}}"
    );
    out
}

/// Assembles the source for a kernel variant.
pub fn kernel_builder(spec: &KernelSpec) -> KernelSourceBuilder {
    let tiling = |b: KernelSourceBuilder| {
        b.with_u32("PIXELS_PER_TILE", spec.tiling.pixels_per_tile)
            .with_u32("TILES_PER_BLOCK", spec.tiling.tiles_per_block)
    };
    let builder = KernelSourceBuilder::new().with_label(spec.kernel.label());
    match spec.kernel {
        Kernel::MinMaxTile { shape, kind } => tiling(builder)
            .with_texel(kind)
            .with_image(shape, kind)
            .with_chunk(REDUCTION_PARAMS)
            .with_chunk(MINMAX_TILE),
        Kernel::MinMaxResult { kind } => tiling(builder)
            .with_texel(kind)
            .with_chunk(REDUCTION_PARAMS)
            .with_chunk(MINMAX_RESULT),
        Kernel::Histogram { shape, kind } => tiling(builder)
            .with_u32("NUM_BUCKETS", spec.buckets)
            .with_texel(kind)
            .with_image(shape, kind)
            .with_chunk(REDUCTION_PARAMS)
            .with_chunk(HISTOGRAM),
        Kernel::MeshPick => builder
            .with_u32("PICK_GROUP_SIZE", spec.pick_group_size)
            .with_chunk(MESH_PICK),
        Kernel::TexelFetch {
            shape,
            kind,
            raw_bits,
        } => builder
            .with_bool("RAW_BITS", raw_bits)
            .with_texel(kind)
            .with_image(shape, kind)
            .with_chunk(TEXEL_FETCH),
    }
}
