//! Two-stage tiled min/max reduction.

use pixelscope_core::{
    Capability, MinMax, ReductionRequest, ReplayResources, Result, StatsError, TexelBits,
};

use super::{ImageTarget, StatsEngine};
use crate::device::{BarrierKind, ComputeDevice};
use crate::kernels::{
    Kernel, ReductionParams, SLOT_IMAGE, SLOT_INPUT, SLOT_OUTPUT, SLOT_PARAMS, TEXEL_BYTES,
};
use crate::scratch::ScratchSlot;

impl<D: ComputeDevice> StatsEngine<D> {
    /// Per-channel minimum and maximum of one subresource.
    pub fn get_min_max(
        &mut self,
        resources: &dyn ReplayResources,
        request: ReductionRequest,
    ) -> Result<MinMax> {
        self.require(&[Capability::ComputeShaders, Capability::StorageBuffers])?;
        let target =
            Self::image_target(resources, request.resource, request.slice_face, request.mip)?;

        self.bind_debug()?;
        self.resolve_if_renderbuffer(&target.desc)?;
        self.with_max_mip(target.desc.id, request.mip, |engine| {
            engine.reduce_min_max(&target, &request)
        })
    }

    /// Fills the reduction parameter block shared with the histogram.
    pub(super) fn reduction_params(
        &self,
        target: &ImageTarget,
        request: &ReductionRequest,
    ) -> ReductionParams {
        let [width, height, depth] = target.desc.mip_extent(request.mip);
        let grid = self.config.tiling.grid(width, height);
        ReductionParams {
            resolution: [width, height, depth, 0],
            slice: target.desc.kernel_slice(request.slice_face, request.mip),
            mip: request.mip,
            sample_index: request.sample.encode(target.desc.samples),
            num_samples: target.desc.samples.max(1),
            num_tiles: grid.tile_count(),
            blocks: [grid.blocks_x, grid.blocks_y, 0, 0],
            ..ReductionParams::default()
        }
    }

    fn reduce_min_max(
        &mut self,
        target: &ImageTarget,
        request: &ReductionRequest,
    ) -> Result<MinMax> {
        let params = self.reduction_params(target, request);
        let tile_bytes = u64::from(params.num_tiles) * 2 * TEXEL_BYTES;
        log::debug!(
            "min/max of {} mip {}: {}x{} blocks, {} tiles",
            target.desc.id,
            request.mip,
            params.blocks[0],
            params.blocks[1],
            params.num_tiles
        );

        let params_buffer = self.pool.acquire(
            &mut self.device,
            ScratchSlot::ReductionParams,
            std::mem::size_of::<ReductionParams>() as u64,
        )?;
        let tiles = self
            .pool
            .acquire(&mut self.device, ScratchSlot::MinMaxTiles, tile_bytes)?;
        let result = self
            .pool
            .acquire(&mut self.device, ScratchSlot::MinMaxResult, 2 * TEXEL_BYTES)?;
        let tile_program = self.program(Kernel::MinMaxTile {
            shape: target.shape,
            kind: target.kind,
        })?;
        let result_program = self.program(Kernel::MinMaxResult { kind: target.kind })?;

        self.device
            .write_buffer(params_buffer, 0, bytemuck::bytes_of(&params))?;
        self.device.bind_buffer(SLOT_PARAMS, params_buffer, None);
        self.device
            .bind_image(SLOT_IMAGE, target.binding(target.aspect));
        self.device
            .bind_buffer(SLOT_OUTPUT, tiles, Some(0..tile_bytes));
        self.device
            .dispatch(tile_program, [params.blocks[0], params.blocks[1], 1])?;
        self.device.barrier(BarrierKind::Storage);

        self.device.bind_buffer(SLOT_OUTPUT, result, None);
        self.device
            .bind_buffer(SLOT_INPUT, tiles, Some(0..tile_bytes));
        self.device.dispatch(result_program, [1, 1, 1])?;
        self.device.barrier(BarrierKind::Storage);

        let bytes = self.device.read_back(result, 0, 2 * TEXEL_BYTES)?;
        let (min, max) = decode_pair(&bytes)?;
        Ok(MinMax::from_bits(target.kind, min, max))
    }
}

fn decode_pair(bytes: &[u8]) -> Result<(TexelBits, TexelBits)> {
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned)
        .collect();
    match words.as_slice() {
        [a0, a1, a2, a3, b0, b1, b2, b3] => Ok(([*a0, *a1, *a2, *a3], [*b0, *b1, *b2, *b3])),
        _ => Err(StatsError::Device(format!(
            "min/max result has {} bytes",
            bytes.len()
        ))),
    }
}
