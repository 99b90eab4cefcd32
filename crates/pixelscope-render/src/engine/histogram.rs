//! Bucketed value counts over one subresource.

use pixelscope_core::histogram::LANES_PER_BUCKET;
use pixelscope_core::{
    compress_lanes, Capability, ChannelMask, HistogramRange, ReductionRequest, ReplayResources,
    Result,
};

use super::{ImageTarget, StatsEngine};
use crate::device::{BarrierKind, ComputeDevice};
use crate::kernels::{Kernel, ReductionParams, SLOT_IMAGE, SLOT_OUTPUT, SLOT_PARAMS};
use crate::scratch::ScratchSlot;

impl<D: ComputeDevice> StatsEngine<D> {
    /// Counts texels per bucket over `[min, max]`, averaging the channels
    /// selected by `channels`. Values outside the range clamp into the first
    /// or last bucket.
    pub fn get_histogram(
        &mut self,
        resources: &dyn ReplayResources,
        request: ReductionRequest,
        min: f32,
        max: f32,
        channels: ChannelMask,
    ) -> Result<Vec<u32>> {
        self.require(&[Capability::ComputeShaders, Capability::StorageBuffers])?;
        let range = HistogramRange::new(min, max)?;
        let target =
            Self::image_target(resources, request.resource, request.slice_face, request.mip)?;

        self.bind_debug()?;
        self.resolve_if_renderbuffer(&target.desc)?;
        self.with_max_mip(target.desc.id, request.mip, |engine| {
            engine.count_buckets(&target, &request, range, channels)
        })
    }

    fn count_buckets(
        &mut self,
        target: &ImageTarget,
        request: &ReductionRequest,
        range: HistogramRange,
        channels: ChannelMask,
    ) -> Result<Vec<u32>> {
        let params = ReductionParams {
            range_min: range.min(),
            range_max: range.kernel_max(),
            channels: channels.bits(),
            ..self.reduction_params(target, request)
        };
        let buckets = self.config.histogram_buckets;
        let histogram_bytes = u64::from(buckets) * (LANES_PER_BUCKET as u64) * 4;
        log::debug!(
            "histogram of {} over [{}, {}] ({channels:?}): {}x{} blocks",
            target.desc.id,
            range.min(),
            range.max(),
            params.blocks[0],
            params.blocks[1]
        );

        let params_buffer = self.pool.acquire(
            &mut self.device,
            ScratchSlot::ReductionParams,
            std::mem::size_of::<ReductionParams>() as u64,
        )?;
        let histogram =
            self.pool
                .acquire(&mut self.device, ScratchSlot::Histogram, histogram_bytes)?;
        let program = self.program(Kernel::Histogram {
            shape: target.shape,
            kind: target.kind,
        })?;

        self.device
            .write_buffer(params_buffer, 0, bytemuck::bytes_of(&params))?;
        self.device.clear_buffer(histogram)?;
        self.device.bind_buffer(SLOT_PARAMS, params_buffer, None);
        self.device
            .bind_image(SLOT_IMAGE, target.binding(target.aspect));
        self.device
            .bind_buffer(SLOT_OUTPUT, histogram, Some(0..histogram_bytes));
        self.device
            .dispatch(program, [params.blocks[0], params.blocks[1], 1])?;
        self.device.barrier(BarrierKind::StorageAndAtomics);

        let bytes = self.device.read_back(histogram, 0, histogram_bytes)?;
        let lanes: Vec<u32> = bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        Ok(compress_lanes(&lanes))
    }
}
