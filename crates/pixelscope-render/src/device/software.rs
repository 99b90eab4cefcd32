//! Host-executed compute device.
//!
//! Runs the same kernels as the WGSL sources against images and buffers held
//! in host memory. It enforces the device contract strictly: dispatches need
//! the debug context, renderbuffer resolution needs the replay context,
//! renderbuffers cannot be sampled unresolved, mips above the image's max
//! level read zero, and reading a dispatch's output without a barrier is an
//! error. Every device command is recorded for inspection.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use bytemuck::Pod;
use glam::{Vec2, Vec3, Vec4};
use pixelscope_core::histogram::bucket_index;
use pixelscope_core::pick::{project_to_screen, ray_triangle_intersect};
use pixelscope_core::texel::{max_identity, min_identity, texel_max, texel_min, texel_to_f32};
use pixelscope_core::{
    Capabilities, ChannelMask, ImageDescriptor, MeshMode, PickRay, PointHit,
    ResourceId, StencilLayout, TexelBits, TextureDimension, TriangleHit,
};

use super::{
    BarrierKind, BufferHandle, BufferUsage, ComputeDevice, ImageAspect, ImageBinding,
    ProgramHandle,
};
use crate::context::ContextKind;
use crate::error::{RenderError, RenderResult};
use crate::kernels::{
    BindingKind, Kernel, KernelSpec, PickParams, ReductionParams, ShaderShape, TexelParams,
    PICK_HEADER_BYTES, PICK_RECORD_BYTES, SLOT_IMAGE, SLOT_INDICES, SLOT_INPUT, SLOT_OUTPUT,
    SLOT_PARAMS, TEXEL_BYTES,
};

/// A command issued to the device, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    InitContext(ContextKind),
    MakeCurrent(ContextKind),
    CreateProgram(Kernel),
    DestroyProgram(ProgramHandle),
    CreateBuffer { handle: BufferHandle, size: u64 },
    DestroyBuffer(BufferHandle),
    WriteBuffer { handle: BufferHandle, offset: u64, len: u64 },
    ClearBuffer(BufferHandle),
    Dispatch { kernel: Kernel, groups: [u32; 3] },
    Barrier(BarrierKind),
    ReadBack { handle: BufferHandle, offset: u64, size: u64 },
    ResolveRenderbuffer(ResourceId),
    SetMaxMipLevel { resource: ResourceId, level: u32 },
}

struct SoftBuffer {
    data: Vec<u8>,
    usage: BufferUsage,
    /// Written by a dispatch since the last barrier.
    pending: bool,
}

#[derive(Clone)]
struct SoftImage {
    desc: ImageDescriptor,
    levels: Vec<Vec<TexelBits>>,
    max_level: u32,
}

impl SoftImage {
    fn new(desc: ImageDescriptor) -> Self {
        let levels = (0..desc.mips)
            .map(|mip| vec![[0; 4]; texel_count(&desc, mip)])
            .collect();
        Self {
            desc,
            levels,
            max_level: desc.mips.saturating_sub(1),
        }
    }

    fn fetch(&self, mip: u32, x: u32, y: u32, slice: u32, sample: u32) -> TexelBits {
        if mip > self.max_level {
            return [0; 4];
        }
        let Some(level) = self.levels.get(mip as usize) else {
            return [0; 4];
        };
        let [w, h, _] = self.desc.mip_extent(mip);
        let slices = slice_count(&self.desc, mip);
        let samples = self.desc.samples.max(1);
        if x >= w || y >= h || slice >= slices || sample >= samples {
            return [0; 4];
        }
        let index = ((u64::from(slice) * u64::from(h) + u64::from(y)) * u64::from(w)
            + u64::from(x))
            * u64::from(samples)
            + u64::from(sample);
        usize::try_from(index)
            .ok()
            .and_then(|i| level.get(i))
            .copied()
            .unwrap_or([0; 4])
    }

    fn fetch_aspect(&self, aspect: ImageAspect, coord: TexelCoord) -> TexelBits {
        let texel = self.fetch(coord.mip, coord.x, coord.y, coord.slice, coord.sample);
        let one = 1.0f32.to_bits();
        match (aspect, self.desc.stencil) {
            (ImageAspect::Color, _) | (_, StencilLayout::None) => texel,
            (ImageAspect::Depth, _) => [texel[0], 0, 0, one],
            (ImageAspect::Stencil, StencilLayout::DepthStencil) => [texel[1], 0, 0, 1],
            (ImageAspect::Stencil, StencilLayout::StencilOnly) => [texel[0], 0, 0, 1],
        }
    }
}

#[derive(Clone, Copy)]
struct TexelCoord {
    x: u32,
    y: u32,
    slice: u32,
    mip: u32,
    sample: u32,
}

impl TexelCoord {
    /// Drops the coordinates the kernel shape cannot address.
    fn for_shape(shape: ShaderShape, x: u32, y: u32, slice: u32, mip: u32, sample: u32) -> Self {
        match shape {
            ShaderShape::D1 => Self {
                x,
                y: 0,
                slice: 0,
                mip,
                sample: 0,
            },
            ShaderShape::D2 => Self {
                x,
                y,
                slice: 0,
                mip,
                sample: 0,
            },
            ShaderShape::D2Array | ShaderShape::D3 => Self {
                x,
                y,
                slice,
                mip,
                sample: 0,
            },
            ShaderShape::MultiSample => Self {
                x,
                y,
                slice: 0,
                mip: 0,
                sample,
            },
            ShaderShape::Buffer => Self {
                x,
                y: 0,
                slice: 0,
                mip: 0,
                sample: 0,
            },
        }
    }
}

fn slice_count(desc: &ImageDescriptor, mip: u32) -> u32 {
    if desc.dimension == TextureDimension::D3 {
        desc.mip_extent(mip)[2]
    } else {
        desc.layer_count()
    }
}

/// Texels stored for one mip: `slices * height * width * samples`, with the
/// sample index varying fastest.
pub fn texel_count(desc: &ImageDescriptor, mip: u32) -> usize {
    let [w, h, _] = desc.mip_extent(mip);
    let count = u64::from(w)
        * u64::from(h)
        * u64::from(slice_count(desc, mip))
        * u64::from(desc.samples.max(1));
    usize::try_from(count).unwrap_or(usize::MAX)
}

fn write_texel(data: &mut [u8], index: u64, texel: TexelBits) -> RenderResult<()> {
    write_words(data, index * TEXEL_BYTES, &texel)
}

fn write_words(data: &mut [u8], offset: u64, words: &[u32]) -> RenderResult<()> {
    let bytes: &[u8] = bytemuck::cast_slice(words);
    let range = checked_range(data.len(), offset, bytes.len() as u64)?;
    data[range].copy_from_slice(bytes);
    Ok(())
}

fn read_texel(data: &[u8], index: u64) -> RenderResult<TexelBits> {
    let range = checked_range(data.len(), index * TEXEL_BYTES, TEXEL_BYTES)?;
    Ok(bytemuck::pod_read_unaligned(&data[range]))
}

fn checked_range(len: usize, offset: u64, size: u64) -> RenderResult<Range<usize>> {
    let out_of_range = || RenderError::OutOfRange {
        offset,
        size,
        capacity: len as u64,
    };
    let end = offset
        .checked_add(size)
        .filter(|end| *end <= len as u64)
        .ok_or_else(out_of_range)?;
    let start = usize::try_from(offset).map_err(|_| out_of_range())?;
    let end = usize::try_from(end).map_err(|_| out_of_range())?;
    Ok(start..end)
}

fn sample_range(encoded: i32) -> Range<u32> {
    if encoded < 0 {
        0..encoded.unsigned_abs()
    } else {
        encoded.unsigned_abs()..encoded.unsigned_abs() + 1
    }
}

/// Compute device executing kernels on the host.
pub struct SoftwareDevice {
    caps: Capabilities,
    initialized: HashSet<ContextKind>,
    failing_context: Option<ContextKind>,
    current: Option<ContextKind>,
    images: HashMap<ResourceId, SoftImage>,
    resolved: HashMap<ResourceId, SoftImage>,
    buffers: HashMap<BufferHandle, SoftBuffer>,
    programs: HashMap<ProgramHandle, KernelSpec>,
    buffer_bindings: HashMap<u32, (BufferHandle, Option<Range<u64>>)>,
    image_bindings: HashMap<u32, ImageBinding>,
    next_id: u32,
    commands: Vec<DeviceCommand>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// A device with every capability.
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::full())
    }

    pub fn with_capabilities(caps: Capabilities) -> Self {
        Self {
            caps,
            initialized: HashSet::new(),
            failing_context: None,
            current: None,
            images: HashMap::new(),
            resolved: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            buffer_bindings: HashMap::new(),
            image_bindings: HashMap::new(),
            next_id: 1,
            commands: Vec::new(),
        }
    }

    /// Makes initialization of `kind` fail.
    #[must_use]
    pub fn failing_context(mut self, kind: ContextKind) -> Self {
        self.failing_context = Some(kind);
        self
    }

    /// Adds a zero-filled image with all mips exposed.
    pub fn add_image(&mut self, desc: ImageDescriptor) {
        self.images.insert(desc.id, SoftImage::new(desc));
    }

    /// Replaces the texels of one mip. See [`texel_count`] for the layout.
    pub fn write_texels(
        &mut self,
        id: ResourceId,
        mip: u32,
        texels: &[TexelBits],
    ) -> RenderResult<()> {
        let image = self
            .images
            .get_mut(&id)
            .ok_or(RenderError::UnknownImage(id))?;
        let level = image
            .levels
            .get_mut(mip as usize)
            .ok_or_else(|| RenderError::Unsupported(format!("mip {mip} of {id}")))?;
        if texels.len() != level.len() {
            return Err(RenderError::OutOfRange {
                offset: 0,
                size: texels.len() as u64,
                capacity: level.len() as u64,
            });
        }
        level.copy_from_slice(texels);
        Ok(())
    }

    pub fn write_texels_f32(
        &mut self,
        id: ResourceId,
        mip: u32,
        texels: &[[f32; 4]],
    ) -> RenderResult<()> {
        let bits: Vec<TexelBits> = texels.iter().map(|t| t.map(f32::to_bits)).collect();
        self.write_texels(id, mip, &bits)
    }

    #[allow(clippy::cast_sign_loss)]
    pub fn write_texels_i32(
        &mut self,
        id: ResourceId,
        mip: u32,
        texels: &[[i32; 4]],
    ) -> RenderResult<()> {
        let bits: Vec<TexelBits> = texels.iter().map(|t| t.map(|c| c as u32)).collect();
        self.write_texels(id, mip, &bits)
    }

    /// Commands issued so far.
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn current_context(&self) -> Option<ContextKind> {
        self.current
    }

    pub fn has_buffer(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(&handle)
    }

    pub fn buffer_size(&self, handle: BufferHandle) -> Option<u64> {
        self.buffers.get(&handle).map(|b| b.data.len() as u64)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_program_count(&self) -> usize {
        self.programs.len()
    }

    fn next_handle(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bound_buffer(&self, slot: u32, kernel: &Kernel) -> RenderResult<(BufferHandle, Range<usize>)> {
        let (handle, range) = self
            .buffer_bindings
            .get(&slot)
            .cloned()
            .ok_or_else(|| RenderError::UnboundSlot {
                slot,
                kernel: kernel.label(),
            })?;
        let buffer = self
            .buffers
            .get(&handle)
            .ok_or(RenderError::UnknownBuffer(handle))?;
        let range = match range {
            Some(r) => checked_range(buffer.data.len(), r.start, r.end.saturating_sub(r.start))?,
            None => 0..buffer.data.len(),
        };
        Ok((handle, range))
    }

    fn bound_bytes(&self, slot: u32, kernel: &Kernel) -> RenderResult<&[u8]> {
        let (handle, range) = self.bound_buffer(slot, kernel)?;
        let buffer = self
            .buffers
            .get(&handle)
            .ok_or(RenderError::UnknownBuffer(handle))?;
        Ok(&buffer.data[range])
    }

    fn read_params<T: Pod>(&self, kernel: &Kernel) -> RenderResult<T> {
        let bytes = self.bound_bytes(SLOT_PARAMS, kernel)?;
        let size = std::mem::size_of::<T>();
        let range = checked_range(bytes.len(), 0, size as u64)?;
        Ok(bytemuck::pod_read_unaligned(&bytes[range]))
    }

    fn bound_image(&self, kernel: &Kernel) -> RenderResult<(&SoftImage, ImageBinding)> {
        let binding = *self
            .image_bindings
            .get(&SLOT_IMAGE)
            .ok_or_else(|| RenderError::UnboundSlot {
                slot: SLOT_IMAGE,
                kernel: kernel.label(),
            })?;
        let image = if binding.resolved {
            self.resolved.get(&binding.resource)
        } else {
            self.images.get(&binding.resource)
        };
        let image = image.ok_or(RenderError::NotSampleable(binding.resource))?;
        if image.desc.dimension == TextureDimension::Renderbuffer && !binding.resolved {
            return Err(RenderError::NotSampleable(binding.resource));
        }
        Ok((image, binding))
    }

    /// Rejects dispatches reading buffers a previous dispatch wrote without
    /// a barrier in between.
    fn check_hazards(&self, kernel: &Kernel) -> RenderResult<()> {
        for binding in kernel.bindings() {
            if !matches!(binding.kind, BindingKind::StorageRead | BindingKind::Uniform) {
                continue;
            }
            let (handle, _) = self.bound_buffer(binding.slot, kernel)?;
            if self.buffers.get(&handle).is_some_and(|b| b.pending) {
                return Err(RenderError::MissingBarrier(handle));
            }
        }
        Ok(())
    }

    /// Runs `body` over the output buffer and marks it pending.
    fn with_output(
        &mut self,
        kernel: &Kernel,
        body: impl FnOnce(&Self, &mut [u8]) -> RenderResult<()>,
    ) -> RenderResult<()> {
        let (handle, range) = self.bound_buffer(SLOT_OUTPUT, kernel)?;
        let mut data = match self.buffers.get_mut(&handle) {
            Some(buffer) => std::mem::take(&mut buffer.data),
            None => return Err(RenderError::UnknownBuffer(handle)),
        };
        let result = body(self, &mut data[range]);
        if let Some(buffer) = self.buffers.get_mut(&handle) {
            buffer.data = data;
            buffer.pending = true;
        }
        result
    }

    fn run_minmax_tile(&mut self, spec: &KernelSpec, groups: [u32; 3]) -> RenderResult<()> {
        let Kernel::MinMaxTile { shape, kind } = spec.kernel else {
            return Ok(());
        };
        let params: ReductionParams = self.read_params(&spec.kernel)?;
        let tpb = spec.tiling.tiles_per_block;
        let ppt = spec.tiling.pixels_per_tile;
        self.with_output(&spec.kernel, |dev, out| {
            let (image, binding) = dev.bound_image(&spec.kernel)?;
            for gy in 0..groups[1] {
                for gx in 0..groups[0] {
                    for ty in 0..tpb {
                        for tx in 0..tpb {
                            let x0 = (gx * tpb + tx) * ppt;
                            let y0 = (gy * tpb + ty) * ppt;
                            let x1 = params.resolution[0].min(x0 + ppt);
                            let y1 = params.resolution[1].min(y0 + ppt);
                            let mut lo = min_identity(kind);
                            let mut hi = max_identity(kind);
                            for y in y0..y1 {
                                for x in x0..x1 {
                                    for s in sample_range(params.sample_index) {
                                        let coord = TexelCoord::for_shape(
                                            shape,
                                            x,
                                            y,
                                            params.slice,
                                            params.mip,
                                            s,
                                        );
                                        let v = image.fetch_aspect(binding.aspect, coord);
                                        lo = texel_min(kind, lo, v);
                                        hi = texel_max(kind, hi, v);
                                    }
                                }
                            }
                            let out_idx = u64::from(ty * tpb + tx)
                                + u64::from(gy * params.blocks[0] + gx) * u64::from(tpb * tpb);
                            write_texel(out, out_idx * 2, lo)?;
                            write_texel(out, out_idx * 2 + 1, hi)?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn run_minmax_result(&mut self, spec: &KernelSpec) -> RenderResult<()> {
        let Kernel::MinMaxResult { kind } = spec.kernel else {
            return Ok(());
        };
        let params: ReductionParams = self.read_params(&spec.kernel)?;
        self.with_output(&spec.kernel, |dev, out| {
            let tiles = dev.bound_bytes(SLOT_INPUT, &spec.kernel)?;
            let mut lo = min_identity(kind);
            let mut hi = max_identity(kind);
            for i in 0..u64::from(params.num_tiles) {
                lo = texel_min(kind, lo, read_texel(tiles, i * 2)?);
                hi = texel_max(kind, hi, read_texel(tiles, i * 2 + 1)?);
            }
            write_texel(out, 0, lo)?;
            write_texel(out, 1, hi)
        })
    }

    fn run_histogram(&mut self, spec: &KernelSpec, groups: [u32; 3]) -> RenderResult<()> {
        let Kernel::Histogram { shape, kind } = spec.kernel else {
            return Ok(());
        };
        let params: ReductionParams = self.read_params(&spec.kernel)?;
        let tpb = spec.tiling.tiles_per_block;
        let ppt = spec.tiling.pixels_per_tile;
        let mask = ChannelMask::from_bits_truncate(params.channels);
        self.with_output(&spec.kernel, |dev, out| {
            let (image, binding) = dev.bound_image(&spec.kernel)?;
            for gy in 0..groups[1] {
                for gx in 0..groups[0] {
                    for ty in 0..tpb {
                        for tx in 0..tpb {
                            let x0 = (gx * tpb + tx) * ppt;
                            let y0 = (gy * tpb + ty) * ppt;
                            let x1 = params.resolution[0].min(x0 + ppt);
                            let y1 = params.resolution[1].min(y0 + ppt);
                            for y in y0..y1 {
                                for x in x0..x1 {
                                    for s in sample_range(params.sample_index) {
                                        let coord = TexelCoord::for_shape(
                                            shape,
                                            x,
                                            y,
                                            params.slice,
                                            params.mip,
                                            s,
                                        );
                                        let bits = image.fetch_aspect(binding.aspect, coord);
                                        let Some(value) = mask.mean(texel_to_f32(kind, bits))
                                        else {
                                            continue;
                                        };
                                        let bucket = bucket_index(
                                            value,
                                            params.range_min,
                                            params.range_max,
                                            spec.buckets,
                                        );
                                        let offset = u64::from(bucket) * TEXEL_BYTES;
                                        let range = checked_range(out.len(), offset, 4)?;
                                        let count: u32 =
                                            bytemuck::pod_read_unaligned(&out[range.clone()]);
                                        out[range]
                                            .copy_from_slice(&count.wrapping_add(1).to_le_bytes());
                                    }
                                }
                            }
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn run_mesh_pick(&mut self, spec: &KernelSpec, groups: [u32; 3]) -> RenderResult<()> {
        let params: PickParams = self.read_params(&spec.kernel)?;
        self.with_output(&spec.kernel, |dev, out| {
            let vertices: Vec<Vec4> = dev
                .bound_bytes(SLOT_INPUT, &spec.kernel)?
                .chunks_exact(16)
                .map(|c| Vec4::from_array(bytemuck::pod_read_unaligned(c)))
                .collect();
            let indices: Vec<u32> = dev
                .bound_bytes(SLOT_INDICES, &spec.kernel)?
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned)
                .collect();
            if vertices.is_empty() {
                return Ok(());
            }
            let last = u32::try_from(vertices.len() - 1).unwrap_or(u32::MAX);
            let vertex_index = |i: u32| -> u32 {
                let idx = if params.use_indices != 0 {
                    indices.get(i as usize).copied().unwrap_or(0)
                } else {
                    i
                };
                idx.min(last)
            };
            let triangle_vertex = |i: u32| -> Vec3 {
                let mut p = vertices[vertex_index(i) as usize];
                if params.unproject != 0 && p.w != 0.0 {
                    p /= p.w;
                }
                p.truncate()
            };
            let ray = PickRay {
                origin: Vec3::from_array(params.ray_pos),
                direction: Vec3::from_array(params.ray_dir),
            };
            let mvp = glam::Mat4::from_cols_array_2d(&params.mvp);
            let append = |out: &mut [u8], record: [u32; 4]| -> RenderResult<()> {
                let range = checked_range(out.len(), 0, 4)?;
                let slot: u32 = bytemuck::pod_read_unaligned(&out[range.clone()]);
                out[range].copy_from_slice(&slot.wrapping_add(1).to_le_bytes());
                if slot < params.max_results {
                    write_words(
                        out,
                        PICK_HEADER_BYTES + u64::from(slot) * PICK_RECORD_BYTES,
                        &record,
                    )?;
                }
                Ok(())
            };
            let triangle = |out: &mut [u8], vertid: u32, i: [u32; 3]| -> RenderResult<()> {
                let hit = ray_triangle_intersect(
                    &ray,
                    triangle_vertex(i[0]),
                    triangle_vertex(i[1]),
                    triangle_vertex(i[2]),
                );
                match hit {
                    Some(intersection) => append(
                        out,
                        TriangleHit {
                            element_id: vertid,
                            intersection,
                        }
                        .to_record(),
                    ),
                    None => Ok(()),
                }
            };

            let n = params.num_indices;
            let invocations = groups[0].saturating_mul(spec.pick_group_size);
            for vertid in 0..invocations.min(n) {
                match params.mesh_mode {
                    m if m == MeshMode::TriangleList as u32 => {
                        if vertid % 3 == 0 && vertid + 2 < n {
                            triangle(out, vertid, [vertid, vertid + 1, vertid + 2])?;
                        }
                    }
                    m if m == MeshMode::TriangleStrip as u32 => {
                        if vertid >= 2 {
                            triangle(out, vertid, [vertid - 2, vertid - 1, vertid])?;
                        }
                    }
                    m if m == MeshMode::TriangleFan as u32 => {
                        if vertid >= 2 {
                            triangle(out, vertid, [0, vertid - 1, vertid])?;
                        }
                    }
                    m if m == MeshMode::TriangleListAdj as u32 => {
                        if vertid % 6 == 0 && vertid + 5 < n {
                            triangle(out, vertid, [vertid, vertid + 2, vertid + 4])?;
                        }
                    }
                    m if m == MeshMode::TriangleStripAdj as u32 => {
                        if vertid % 2 == 0 && vertid >= 4 {
                            triangle(out, vertid, [vertid - 4, vertid - 2, vertid])?;
                        }
                    }
                    _ => {
                        let idx = vertex_index(vertid);
                        let viewport = Vec2::from_array(params.viewport);
                        let Some((screen, depth)) =
                            project_to_screen(mvp, vertices[idx as usize], viewport)
                        else {
                            continue;
                        };
                        let len = screen.distance(Vec2::from_array(params.coords));
                        if len < params.pick_radius {
                            let hit = PointHit {
                                element_id: vertid,
                                aux_index: idx,
                                ray_distance: len,
                                depth,
                            };
                            append(out, hit.to_record())?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn run_texel_fetch(&mut self, spec: &KernelSpec) -> RenderResult<()> {
        let Kernel::TexelFetch {
            shape,
            kind,
            raw_bits,
        } = spec.kernel
        else {
            return Ok(());
        };
        let params: TexelParams = self.read_params(&spec.kernel)?;
        self.with_output(&spec.kernel, |dev, out| {
            let (image, binding) = dev.bound_image(&spec.kernel)?;
            let coord = TexelCoord::for_shape(
                shape,
                params.x,
                params.y,
                params.slice,
                params.mip,
                params.sample_index,
            );
            let texel = image.fetch_aspect(binding.aspect, coord);
            let mut bits = if raw_bits {
                texel
            } else {
                texel_to_f32(kind, texel).map(f32::to_bits)
            };
            for (c, value) in bits.iter_mut().enumerate() {
                if params.write_mask & (1 << c) == 0 {
                    *value = 0;
                }
            }
            write_texel(out, 0, bits)
        })
    }
}

impl ComputeDevice for SoftwareDevice {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn init_context(&mut self, kind: ContextKind) -> RenderResult<()> {
        self.commands.push(DeviceCommand::InitContext(kind));
        if self.failing_context == Some(kind) {
            return Err(RenderError::ContextInitFailed(
                kind,
                "context creation refused".into(),
            ));
        }
        self.initialized.insert(kind);
        Ok(())
    }

    fn make_current(&mut self, kind: ContextKind) -> RenderResult<()> {
        self.commands.push(DeviceCommand::MakeCurrent(kind));
        if !self.initialized.contains(&kind) {
            return Err(RenderError::ContextInitFailed(
                kind,
                "context was never initialized".into(),
            ));
        }
        self.current = Some(kind);
        Ok(())
    }

    fn create_program(&mut self, spec: &KernelSpec) -> RenderResult<ProgramHandle> {
        self.commands.push(DeviceCommand::CreateProgram(spec.kernel));
        let handle = ProgramHandle(self.next_handle());
        self.programs.insert(handle, *spec);
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.commands.push(DeviceCommand::DestroyProgram(program));
        self.programs.remove(&program);
    }

    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        _label: &str,
    ) -> RenderResult<BufferHandle> {
        let len = usize::try_from(size)
            .map_err(|_| RenderError::BufferCreationFailed(format!("{size} bytes")))?;
        let handle = BufferHandle(self.next_handle());
        self.commands
            .push(DeviceCommand::CreateBuffer { handle, size });
        self.buffers.insert(
            handle,
            SoftBuffer {
                data: vec![0; len],
                usage,
                pending: false,
            },
        );
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.commands.push(DeviceCommand::DestroyBuffer(buffer));
        self.buffers.remove(&buffer);
        self.buffer_bindings.retain(|_, (h, _)| *h != buffer);
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        self.commands.push(DeviceCommand::WriteBuffer {
            handle: buffer,
            offset,
            len: data.len() as u64,
        });
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or(RenderError::UnknownBuffer(buffer))?;
        let range = checked_range(target.data.len(), offset, data.len() as u64)?;
        target.data[range].copy_from_slice(data);
        Ok(())
    }

    fn clear_buffer(&mut self, buffer: BufferHandle) -> RenderResult<()> {
        self.commands.push(DeviceCommand::ClearBuffer(buffer));
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or(RenderError::UnknownBuffer(buffer))?;
        target.data.fill(0);
        Ok(())
    }

    fn bind_buffer(&mut self, slot: u32, buffer: BufferHandle, range: Option<Range<u64>>) {
        self.buffer_bindings.insert(slot, (buffer, range));
    }

    fn bind_image(&mut self, slot: u32, image: ImageBinding) {
        self.image_bindings.insert(slot, image);
    }

    fn dispatch(&mut self, program: ProgramHandle, groups: [u32; 3]) -> RenderResult<()> {
        let spec = *self
            .programs
            .get(&program)
            .ok_or(RenderError::UnknownProgram(program))?;
        self.commands.push(DeviceCommand::Dispatch {
            kernel: spec.kernel,
            groups,
        });
        if self.current != Some(ContextKind::Debug) {
            return Err(RenderError::WrongContext {
                operation: "dispatch",
                required: ContextKind::Debug,
                current: format!("{:?}", self.current),
            });
        }
        for binding in spec.kernel.bindings() {
            if binding.kind == BindingKind::Uniform {
                let (handle, _) = self.bound_buffer(binding.slot, &spec.kernel)?;
                if self.buffers.get(&handle).map(|b| b.usage) != Some(BufferUsage::Uniform) {
                    return Err(RenderError::Unsupported(format!(
                        "{handle:?} bound as uniform for {}",
                        spec.kernel.label()
                    )));
                }
            }
        }
        self.check_hazards(&spec.kernel)?;
        match spec.kernel {
            Kernel::MinMaxTile { .. } => self.run_minmax_tile(&spec, groups),
            Kernel::MinMaxResult { .. } => self.run_minmax_result(&spec),
            Kernel::Histogram { .. } => self.run_histogram(&spec, groups),
            Kernel::MeshPick => self.run_mesh_pick(&spec, groups),
            Kernel::TexelFetch { .. } => self.run_texel_fetch(&spec),
        }
    }

    fn barrier(&mut self, kind: BarrierKind) {
        self.commands.push(DeviceCommand::Barrier(kind));
        for buffer in self.buffers.values_mut() {
            buffer.pending = false;
        }
    }

    fn read_back(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> RenderResult<Vec<u8>> {
        self.commands.push(DeviceCommand::ReadBack {
            handle: buffer,
            offset,
            size,
        });
        let source = self
            .buffers
            .get(&buffer)
            .ok_or(RenderError::UnknownBuffer(buffer))?;
        if source.pending {
            return Err(RenderError::MissingBarrier(buffer));
        }
        let range = checked_range(source.data.len(), offset, size)?;
        Ok(source.data[range].to_vec())
    }

    fn resolve_renderbuffer(&mut self, image: &ImageDescriptor) -> RenderResult<()> {
        self.commands
            .push(DeviceCommand::ResolveRenderbuffer(image.id));
        if self.current != Some(ContextKind::Replay) {
            return Err(RenderError::WrongContext {
                operation: "renderbuffer resolve",
                required: ContextKind::Replay,
                current: format!("{:?}", self.current),
            });
        }
        let source = self
            .images
            .get(&image.id)
            .ok_or(RenderError::UnknownImage(image.id))?;
        let mut copy = source.clone();
        copy.desc.dimension = TextureDimension::D2;
        self.resolved.insert(image.id, copy);
        Ok(())
    }

    fn max_mip_level(&self, resource: ResourceId) -> RenderResult<u32> {
        self.images
            .get(&resource)
            .map(|i| i.max_level)
            .ok_or(RenderError::UnknownImage(resource))
    }

    fn set_max_mip_level(&mut self, resource: ResourceId, level: u32) -> RenderResult<()> {
        self.commands.push(DeviceCommand::SetMaxMipLevel { resource, level });
        let image = self
            .images
            .get_mut(&resource)
            .ok_or(RenderError::UnknownImage(resource))?;
        image.max_level = level;
        // The resolved copy is what kernels sample.
        if let Some(resolved) = self.resolved.get_mut(&resource) {
            resolved.max_level = level;
        }
        Ok(())
    }
}
