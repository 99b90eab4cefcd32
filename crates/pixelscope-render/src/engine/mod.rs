//! Statistics and selection engine.
//!
//! [`StatsEngine`] owns a [`ComputeDevice`], the context manager, the scratch
//! pool and the compiled kernels. Each query validates its request before
//! touching the device, binds the debug context, and leaves it current when
//! it returns.

mod histogram;
mod minmax;
mod pick;
mod pixel;

use std::collections::HashMap;

use pixelscope_core::{
    Capabilities, Capability, CompKind, EngineConfig, ImageDescriptor, ReplayResources,
    ResourceId, Result, StatsError, StencilLayout, TextureDimension,
};

use crate::context::{ContextKind, ContextManager};
use crate::device::{ComputeDevice, ImageAspect, ImageBinding, ProgramHandle};
use crate::kernels::{Kernel, KernelSpec, ShaderShape};
use crate::scratch::ScratchPool;

/// GPU statistics and picking engine.
pub struct StatsEngine<D: ComputeDevice> {
    device: D,
    contexts: ContextManager,
    pool: ScratchPool,
    programs: HashMap<Kernel, ProgramHandle>,
    config: EngineConfig,
    caps: Capabilities,
}

/// An image resolved to the kernel variant and aspect that samples it.
#[derive(Debug, Clone, Copy)]
struct ImageTarget {
    desc: ImageDescriptor,
    shape: ShaderShape,
    kind: CompKind,
    aspect: ImageAspect,
}

impl ImageTarget {
    fn new(desc: ImageDescriptor) -> Result<Self> {
        let shape = ShaderShape::for_image(&desc)?;
        let (kind, aspect) = match desc.stencil {
            StencilLayout::None => (desc.comp_kind, ImageAspect::Color),
            StencilLayout::DepthStencil => (CompKind::Float, ImageAspect::Depth),
            StencilLayout::StencilOnly => (CompKind::UInt, ImageAspect::Stencil),
        };
        Ok(Self {
            desc,
            shape,
            kind,
            aspect,
        })
    }

    fn binding(&self, aspect: ImageAspect) -> ImageBinding {
        ImageBinding {
            resource: self.desc.id,
            shape: self.shape,
            aspect,
            resolved: self.desc.dimension == TextureDimension::Renderbuffer,
        }
    }
}

impl<D: ComputeDevice> StatsEngine<D> {
    /// Creates an engine on `device`, bringing up both contexts.
    ///
    /// Missing capabilities do not fail creation; they are logged once here
    /// and the affected queries fail with [`StatsError::CapabilityMissing`].
    pub fn new(mut device: D, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let caps = device.capabilities();
        let contexts = ContextManager::initialize(&mut device)?;

        for missing in caps.missing() {
            log::warn!("device lacks {missing}; dependent queries are disabled");
        }
        log::info!(
            "stats engine ready: {} buckets, {}px tiles, {}x{} tiles per block",
            config.histogram_buckets,
            config.tiling.pixels_per_tile,
            config.tiling.tiles_per_block,
            config.tiling.tiles_per_block
        );

        Ok(Self {
            device,
            contexts,
            pool: ScratchPool::new(),
            programs: HashMap::new(),
            config,
            caps,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Whether any capability is missing.
    pub fn is_degraded(&self) -> bool {
        !self.caps.missing().is_empty()
    }

    pub fn scratch(&self) -> &ScratchPool {
        &self.pool
    }

    /// The context currently bound by the engine.
    pub fn current_context(&self) -> Option<ContextKind> {
        self.contexts.current()
    }

    fn require(&self, required: &[Capability]) -> Result<()> {
        self.caps.require(required)
    }

    fn kernel_spec(&self, kernel: Kernel) -> KernelSpec {
        KernelSpec {
            kernel,
            tiling: self.config.tiling,
            buckets: self.config.histogram_buckets,
            pick_group_size: self.config.pick_group_size,
        }
    }

    /// Compiled program for `kernel`, built on first use.
    fn program(&mut self, kernel: Kernel) -> Result<ProgramHandle> {
        if let Some(&program) = self.programs.get(&kernel) {
            return Ok(program);
        }
        log::debug!("compiling {}", kernel.label());
        let spec = self.kernel_spec(kernel);
        let program = self.device.create_program(&spec)?;
        self.programs.insert(kernel, program);
        Ok(program)
    }

    fn image_target(
        resources: &dyn ReplayResources,
        id: ResourceId,
        slice_face: u32,
        mip: u32,
    ) -> Result<ImageTarget> {
        let desc = resources
            .image(id)
            .ok_or(StatsError::UnknownResource(id))?;
        let target = ImageTarget::new(desc)?;
        desc.check_subresource(slice_face, mip)?;
        Ok(target)
    }

    fn bind_debug(&mut self) -> Result<()> {
        self.contexts.bind(&mut self.device, ContextKind::Debug)?;
        Ok(())
    }

    /// Copies a renderbuffer into its sampleable texture in the replay
    /// context, then returns to the debug context.
    fn resolve_if_renderbuffer(&mut self, desc: &ImageDescriptor) -> Result<()> {
        if desc.dimension != TextureDimension::Renderbuffer {
            return Ok(());
        }
        log::debug!("resolving renderbuffer {}", desc.id);
        self.contexts.bind(&mut self.device, ContextKind::Replay)?;
        let resolved = self.device.resolve_renderbuffer(desc);
        self.contexts.bind(&mut self.device, ContextKind::Debug)?;
        resolved?;
        Ok(())
    }

    /// Runs `query` with the image's max mip level clamped to `mip`, then
    /// restores the previous level whether or not the query succeeded.
    fn with_max_mip<T>(
        &mut self,
        resource: ResourceId,
        mip: u32,
        query: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let previous = self.device.max_mip_level(resource)?;
        if previous == mip {
            return query(self);
        }
        self.device.set_max_mip_level(resource, mip)?;
        let result = query(self);
        let restored = self.device.set_max_mip_level(resource, previous);
        let value = result?;
        restored?;
        Ok(value)
    }
}

impl<D: ComputeDevice> Drop for StatsEngine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.contexts.bind(&mut self.device, ContextKind::Debug) {
            log::warn!("releasing engine resources without the debug context: {e}");
        }
        self.pool.release_all(&mut self.device);
        for (_, program) in self.programs.drain() {
            self.device.destroy_program(program);
        }
    }
}
