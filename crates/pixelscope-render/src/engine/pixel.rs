//! Single texel pick.

use pixelscope_core::{
    Capability, CompKind, PixelRequest, PixelValue, ReplayResources, Result, StatsError,
    StencilLayout, TexelBits,
};

use super::{ImageTarget, StatsEngine};
use crate::device::{BarrierKind, ComputeDevice, ImageAspect};
use crate::kernels::{Kernel, TexelParams, SLOT_IMAGE, SLOT_OUTPUT, SLOT_PARAMS, TEXEL_BYTES};
use crate::scratch::ScratchSlot;

const ALL_CHANNELS: u32 = 0b1111;
/// Channels a stencil sample can land in across backends.
const STENCIL_CHANNELS: u32 = 0b0011;

impl<D: ComputeDevice> StatsEngine<D> {
    /// Value of one texel.
    ///
    /// Depth/stencil images return depth in channel 0 and `stencil / 255` in
    /// channel 1. Coordinates outside the mip read zero.
    pub fn pick_pixel(
        &mut self,
        resources: &dyn ReplayResources,
        request: PixelRequest,
    ) -> Result<PixelValue> {
        self.require(&[Capability::ComputeShaders])?;
        let target =
            Self::image_target(resources, request.resource, request.slice_face, request.mip)?;
        let stencil = target.desc.stencil;
        if stencil == StencilLayout::StencilOnly && !self.caps.stencil_texturing {
            return Err(StatsError::CapabilityMissing(Capability::StencilTexturing));
        }

        let [width, height, _] = target.desc.mip_extent(request.mip);
        if request.x >= width || request.y >= height {
            return Ok(zero_value(&target));
        }

        self.bind_debug()?;
        self.resolve_if_renderbuffer(&target.desc)?;

        if stencil == StencilLayout::None {
            let raw = self.raw_bits(target.kind);
            let bits = self.fetch_texel(
                &target,
                &request,
                target.kind,
                target.aspect,
                raw,
                ALL_CHANNELS,
            )?;
            return Ok(PixelValue::from_fetch(target.kind, bits, raw));
        }

        let mut value = [0.0; 4];
        if stencil == StencilLayout::DepthStencil {
            let bits = self.fetch_texel(
                &target,
                &request,
                CompKind::Float,
                ImageAspect::Depth,
                false,
                ALL_CHANNELS,
            )?;
            value = PixelValue::from_fetch(CompKind::Float, bits, false).to_f32();
        }

        if self.caps.stencil_texturing {
            let raw = self.raw_bits(CompKind::UInt);
            let bits = self.fetch_texel(
                &target,
                &request,
                CompKind::UInt,
                ImageAspect::Stencil,
                raw,
                STENCIL_CHANNELS,
            )?;
            let channels = PixelValue::from_fetch(CompKind::UInt, bits, raw).to_f32();
            value[1] = channels[0].max(channels[1]) / 255.0;
        } else {
            log::debug!("stencil of {} unavailable without stencil texturing", target.desc.id);
        }
        if stencil == StencilLayout::StencilOnly {
            value[0] = 0.0;
        }
        Ok(PixelValue::Float(value))
    }

    fn raw_bits(&self, kind: CompKind) -> bool {
        kind != CompKind::Float && self.caps.precise_integer_sampling
    }

    #[allow(clippy::too_many_arguments)]
    fn fetch_texel(
        &mut self,
        target: &ImageTarget,
        request: &PixelRequest,
        kind: CompKind,
        aspect: ImageAspect,
        raw_bits: bool,
        write_mask: u32,
    ) -> Result<TexelBits> {
        let params = TexelParams {
            x: request.x,
            y: request.y,
            slice: target.desc.kernel_slice(request.slice_face, request.mip),
            mip: request.mip,
            sample_index: request.sample.min(target.desc.samples.max(1) - 1),
            write_mask,
            _padding: [0; 2],
        };
        let params_buffer = self.pool.acquire(
            &mut self.device,
            ScratchSlot::PixelParams,
            std::mem::size_of::<TexelParams>() as u64,
        )?;
        let result = self
            .pool
            .acquire(&mut self.device, ScratchSlot::PixelResult, TEXEL_BYTES)?;
        let program = self.program(Kernel::TexelFetch {
            shape: target.shape,
            kind,
            raw_bits,
        })?;

        self.device
            .write_buffer(params_buffer, 0, bytemuck::bytes_of(&params))?;
        self.device.bind_buffer(SLOT_PARAMS, params_buffer, None);
        self.device.bind_image(SLOT_IMAGE, target.binding(aspect));
        self.device.bind_buffer(SLOT_OUTPUT, result, None);
        self.device.dispatch(program, [1, 1, 1])?;
        self.device.barrier(BarrierKind::Storage);

        let bytes = self.device.read_back(result, 0, TEXEL_BYTES)?;
        bytes
            .get(..16)
            .map(bytemuck::pod_read_unaligned)
            .ok_or_else(|| StatsError::Device(format!("texel result has {} bytes", bytes.len())))
    }
}

fn zero_value(target: &ImageTarget) -> PixelValue {
    if target.desc.stencil != StencilLayout::None {
        return PixelValue::Float([0.0; 4]);
    }
    match target.kind {
        CompKind::Float => PixelValue::Float([0.0; 4]),
        CompKind::UInt => PixelValue::UInt([0; 4]),
        CompKind::SInt => PixelValue::SInt([0; 4]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;
    use pixelscope_core::{
        Capabilities, EngineConfig, ImageDescriptor, ResourceCatalog, ResourceId,
        TextureDimension,
    };

    fn setup(
        desc: ImageDescriptor,
        texels: &[TexelBits],
        caps: Capabilities,
    ) -> (StatsEngine<SoftwareDevice>, ResourceCatalog) {
        let mut device = SoftwareDevice::with_capabilities(caps);
        device.add_image(desc);
        device.write_texels(desc.id, 0, texels).unwrap();
        let mut catalog = ResourceCatalog::new();
        catalog.add_image(desc);
        (
            StatsEngine::new(device, EngineConfig::default()).unwrap(),
            catalog,
        )
    }

    #[test]
    fn test_unsigned_texel_is_bit_exact() {
        let desc = ImageDescriptor::new_2d(ResourceId(1), 2, 1, CompKind::UInt);
        let (mut engine, catalog) = setup(
            desc,
            &[[0; 4], [u32::MAX, 16_777_217, 3, 4]],
            Capabilities::full(),
        );
        let value = engine
            .pick_pixel(&catalog, PixelRequest::new(desc.id, 1, 0))
            .unwrap();
        assert_eq!(value, PixelValue::UInt([u32::MAX, 16_777_217, 3, 4]));
    }

    #[test]
    fn test_signed_texel_without_precise_sampling() {
        let caps = Capabilities {
            precise_integer_sampling: false,
            ..Capabilities::full()
        };
        let desc = ImageDescriptor::new_2d(ResourceId(1), 1, 1, CompKind::SInt);
        #[allow(clippy::cast_sign_loss)]
        let texel = [(-12i32) as u32, 7, 0, 1];
        let (mut engine, catalog) = setup(desc, &[texel], caps);
        let value = engine
            .pick_pixel(&catalog, PixelRequest::new(desc.id, 0, 0))
            .unwrap();
        assert_eq!(value, PixelValue::SInt([-12, 7, 0, 1]));
    }

    #[test]
    fn test_depth_stencil_pick() {
        let desc = ImageDescriptor::new_2d(ResourceId(1), 1, 1, CompKind::Float)
            .with_stencil(StencilLayout::DepthStencil);
        let (mut engine, catalog) =
            setup(desc, &[[0.25f32.to_bits(), 51, 0, 0]], Capabilities::full());
        let value = engine
            .pick_pixel(&catalog, PixelRequest::new(desc.id, 0, 0))
            .unwrap();
        assert_eq!(value, PixelValue::Float([0.25, 0.2, 0.0, 1.0]));
    }

    #[test]
    fn test_stencil_only_zeroes_depth_channel() {
        let desc = ImageDescriptor::new_2d(ResourceId(1), 1, 1, CompKind::UInt)
            .with_stencil(StencilLayout::StencilOnly);
        let (mut engine, catalog) = setup(desc, &[[255, 0, 0, 0]], Capabilities::full());
        let value = engine
            .pick_pixel(&catalog, PixelRequest::new(desc.id, 0, 0))
            .unwrap();
        assert_eq!(value, PixelValue::Float([0.0, 1.0, 0.0, 0.0]));
    }

    #[test]
    fn test_outside_extent_reads_zero_without_dispatch() {
        let desc = ImageDescriptor::new_2d(ResourceId(1), 4, 4, CompKind::Float)
            .with_dimension(TextureDimension::D2)
            .with_mips(2);
        let texels = vec![[1.0f32.to_bits(); 4]; 16];
        let (mut engine, catalog) = setup(desc, &texels, Capabilities::full());
        engine.device_mut().clear_commands();
        let value = engine
            .pick_pixel(&catalog, PixelRequest::new(desc.id, 3, 0).with_subresource(0, 1, 0))
            .unwrap();
        assert_eq!(value, PixelValue::Float([0.0; 4]));
        assert!(engine.device().commands().is_empty());
    }
}
