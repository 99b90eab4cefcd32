//! wgpu-backed compute device.
//!
//! Both contexts share one `wgpu::Device`; the context switch only gates which
//! operations are legal. Every dispatch, clear and copy is submitted on its
//! own encoder, so queue order already orders dependent commands and
//! [`ComputeDevice::barrier`] has nothing left to do.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use std::ops::Range;

use pixelscope_core::{Capabilities, CompKind, ImageDescriptor, ResourceId, TextureDimension};
use pollster::FutureExt;

use super::{
    BarrierKind, BufferHandle, BufferUsage, ComputeDevice, ImageAspect, ImageBinding,
    ProgramHandle,
};
use crate::context::ContextKind;
use crate::error::{RenderError, RenderResult};
use crate::kernels::{BindingKind, KernelSpec, ShaderShape};
use crate::shader::{kernel_builder, ENTRY_POINT};

struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

struct GpuProgram {
    spec: KernelSpec,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

struct GpuTexture {
    texture: wgpu::Texture,
    desc: ImageDescriptor,
    max_level: u32,
}

/// Compute device driving a wgpu adapter.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: Capabilities,
    initialized: HashSet<ContextKind>,
    current: Option<ContextKind>,
    buffers: HashMap<BufferHandle, GpuBuffer>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    textures: HashMap<ResourceId, GpuTexture>,
    resolved: HashMap<ResourceId, wgpu::Texture>,
    buffer_bindings: HashMap<u32, (BufferHandle, Option<Range<u64>>)>,
    image_bindings: HashMap<u32, ImageBinding>,
    next_id: u32,
}

impl WgpuDevice {
    /// Wraps an existing device, e.g. the one owned by the replay driver.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, caps: Capabilities) -> Self {
        Self {
            device,
            queue,
            caps,
            initialized: HashSet::new(),
            current: None,
            buffers: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            resolved: HashMap::new(),
            buffer_bindings: HashMap::new(),
            image_bindings: HashMap::new(),
            next_id: 1,
        }
    }

    /// Creates a device on the first available adapter, without a surface.
    pub async fn new_headless() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| RenderError::AdapterCreationFailed)?;

        let caps = adapter_capabilities(&adapter);
        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("pixelscope device (headless)"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        Ok(Self::new(device, queue, caps))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Makes a capture texture available to kernels under `desc.id`.
    ///
    /// Renderbuffers must carry `COPY_SRC`; every other texture must carry
    /// `TEXTURE_BINDING`. Texel buffers are registered as 1D textures one
    /// texel per element.
    pub fn register_texture(&mut self, desc: ImageDescriptor, texture: wgpu::Texture) {
        self.resolved.remove(&desc.id);
        self.textures.insert(
            desc.id,
            GpuTexture {
                texture,
                desc,
                max_level: desc.mips.saturating_sub(1),
            },
        );
    }

    pub fn unregister_texture(&mut self, id: ResourceId) {
        self.textures.remove(&id);
        self.resolved.remove(&id);
    }

    fn next_handle(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, handle: BufferHandle) -> RenderResult<&GpuBuffer> {
        self.buffers
            .get(&handle)
            .ok_or(RenderError::UnknownBuffer(handle))
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Runs `body` inside a validation error scope.
    fn scoped<T>(&self, body: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = body(&self.device);
        let error = self.device.pop_error_scope().block_on();
        (value, error)
    }

    fn image_view(&self, binding: &ImageBinding) -> RenderResult<wgpu::TextureView> {
        let source = self
            .textures
            .get(&binding.resource)
            .ok_or(RenderError::UnknownImage(binding.resource))?;
        let texture = if binding.resolved {
            self.resolved
                .get(&binding.resource)
                .ok_or(RenderError::NotSampleable(binding.resource))?
        } else if source.desc.dimension == TextureDimension::Renderbuffer {
            return Err(RenderError::NotSampleable(binding.resource));
        } else {
            &source.texture
        };
        let mip_level_count = match binding.shape {
            ShaderShape::MultiSample | ShaderShape::Buffer => 1,
            _ => source.max_level + 1,
        };
        Ok(texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("pixelscope source view"),
            dimension: Some(view_dimension(binding.shape)),
            aspect: texture_aspect(binding.aspect),
            base_mip_level: 0,
            mip_level_count: Some(mip_level_count),
            ..Default::default()
        }))
    }

    fn bind_group(&self, program: &GpuProgram) -> RenderResult<wgpu::BindGroup> {
        let kernel = &program.spec.kernel;
        let mut views = Vec::new();
        for binding in kernel.bindings() {
            if binding.kind == BindingKind::Image {
                let image = self.image_bindings.get(&binding.slot).ok_or_else(|| {
                    RenderError::UnboundSlot {
                        slot: binding.slot,
                        kernel: kernel.label(),
                    }
                })?;
                views.push((binding.slot, self.image_view(image)?));
            }
        }

        let mut entries = Vec::new();
        for binding in kernel.bindings() {
            let resource = if binding.kind == BindingKind::Image {
                let view = views
                    .iter()
                    .find(|(slot, _)| *slot == binding.slot)
                    .map(|(_, view)| view)
                    .ok_or_else(|| RenderError::UnboundSlot {
                        slot: binding.slot,
                        kernel: kernel.label(),
                    })?;
                wgpu::BindingResource::TextureView(view)
            } else {
                let (handle, range) = self.buffer_bindings.get(&binding.slot).ok_or_else(|| {
                    RenderError::UnboundSlot {
                        slot: binding.slot,
                        kernel: kernel.label(),
                    }
                })?;
                let gpu = self.buffer(*handle)?;
                let (offset, size) = match range {
                    Some(r) if r.end <= gpu.size => (r.start, NonZeroU64::new(r.end - r.start)),
                    Some(r) => {
                        return Err(RenderError::OutOfRange {
                            offset: r.start,
                            size: r.end.saturating_sub(r.start),
                            capacity: gpu.size,
                        })
                    }
                    None => (0, None),
                };
                wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &gpu.buffer,
                    offset,
                    size,
                })
            };
            entries.push(wgpu::BindGroupEntry {
                binding: binding.slot,
                resource,
            });
        }

        let (group, error) = self.scoped(|device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("pixelscope kernel bind group"),
                layout: &program.layout,
                entries: &entries,
            })
        });
        match error {
            Some(error) => Err(RenderError::Unsupported(error.to_string())),
            None => Ok(group),
        }
    }
}

fn adapter_capabilities(adapter: &wgpu::Adapter) -> Capabilities {
    let downlevel = adapter.get_downlevel_capabilities();
    let limits = adapter.limits();
    Capabilities {
        compute_shaders: downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
        storage_buffers: limits.max_storage_buffers_per_shader_stage >= 3,
        precise_integer_sampling: true,
        stencil_texturing: true,
    }
}

fn view_dimension(shape: ShaderShape) -> wgpu::TextureViewDimension {
    match shape {
        ShaderShape::D1 | ShaderShape::Buffer => wgpu::TextureViewDimension::D1,
        ShaderShape::D2 | ShaderShape::MultiSample => wgpu::TextureViewDimension::D2,
        ShaderShape::D2Array => wgpu::TextureViewDimension::D2Array,
        ShaderShape::D3 => wgpu::TextureViewDimension::D3,
    }
}

fn texture_aspect(aspect: ImageAspect) -> wgpu::TextureAspect {
    match aspect {
        ImageAspect::Color => wgpu::TextureAspect::All,
        ImageAspect::Depth => wgpu::TextureAspect::DepthOnly,
        ImageAspect::Stencil => wgpu::TextureAspect::StencilOnly,
    }
}

fn sample_type(kind: CompKind) -> wgpu::TextureSampleType {
    match kind {
        CompKind::Float => wgpu::TextureSampleType::Float { filterable: false },
        CompKind::UInt => wgpu::TextureSampleType::Uint,
        CompKind::SInt => wgpu::TextureSampleType::Sint,
    }
}

fn layout_entries(spec: &KernelSpec) -> Vec<wgpu::BindGroupLayoutEntry> {
    let buffer = |ty| wgpu::BindingType::Buffer {
        ty,
        has_dynamic_offset: false,
        min_binding_size: None,
    };
    spec.kernel
        .bindings()
        .iter()
        .map(|binding| {
            let ty = match binding.kind {
                BindingKind::Uniform => buffer(wgpu::BufferBindingType::Uniform),
                BindingKind::StorageReadWrite => {
                    buffer(wgpu::BufferBindingType::Storage { read_only: false })
                }
                BindingKind::StorageRead => {
                    buffer(wgpu::BufferBindingType::Storage { read_only: true })
                }
                BindingKind::Image => {
                    let (shape, kind) =
                        spec.kernel.image().unwrap_or((ShaderShape::D2, CompKind::Float));
                    wgpu::BindingType::Texture {
                        sample_type: sample_type(kind),
                        view_dimension: view_dimension(shape),
                        multisampled: shape == ShaderShape::MultiSample,
                    }
                }
            };
            wgpu::BindGroupLayoutEntry {
                binding: binding.slot,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty,
                count: None,
            }
        })
        .collect()
}

fn align4(size: u64) -> u64 {
    size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

impl ComputeDevice for WgpuDevice {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn init_context(&mut self, kind: ContextKind) -> RenderResult<()> {
        log::debug!("initializing {kind} context");
        self.initialized.insert(kind);
        Ok(())
    }

    fn make_current(&mut self, kind: ContextKind) -> RenderResult<()> {
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
        let source = kernel_builder(spec).build_source()?;
        let label = spec.kernel.label();
        let entries = layout_entries(spec);

        let ((pipeline, layout), error) = self.scoped(|device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&label),
                entries: &entries,
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(ENTRY_POINT),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            (pipeline, layout)
        });
        if let Some(error) = error {
            return Err(match error {
                wgpu::Error::OutOfMemory { .. } => RenderError::OutOfMemory,
                other => RenderError::PipelineCreationFailed(format!("{label}: {other}")),
            });
        }

        let handle = ProgramHandle(self.next_handle());
        self.programs.insert(
            handle,
            GpuProgram {
                spec: *spec,
                pipeline,
                layout,
            },
        );
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        label: &str,
    ) -> RenderResult<BufferHandle> {
        let usage = match usage {
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Storage => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
        };
        let (buffer, error) = self.scoped(|device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: align4(size.max(4)),
                usage,
                mapped_at_creation: false,
            })
        });
        if let Some(error) = error {
            return Err(RenderError::BufferCreationFailed(format!("{label}: {error}")));
        }
        let handle = BufferHandle(self.next_handle());
        self.buffers.insert(handle, GpuBuffer { buffer, size });
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(gpu) = self.buffers.remove(&buffer) {
            gpu.buffer.destroy();
        }
        self.buffer_bindings.retain(|_, (h, _)| *h != buffer);
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let gpu = self.buffer(buffer)?;
        let len = data.len() as u64;
        if offset + len > gpu.size {
            return Err(RenderError::OutOfRange {
                offset,
                size: len,
                capacity: gpu.size,
            });
        }
        if len % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(&gpu.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            #[allow(clippy::cast_possible_truncation)]
            padded.resize(align4(len) as usize, 0);
            self.queue.write_buffer(&gpu.buffer, offset, &padded);
        }
        Ok(())
    }

    fn clear_buffer(&mut self, buffer: BufferHandle) -> RenderResult<()> {
        let gpu = self.buffer(buffer)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pixelscope clear"),
            });
        encoder.clear_buffer(&gpu.buffer, 0, None);
        self.submit(encoder);
        Ok(())
    }

    fn bind_buffer(&mut self, slot: u32, buffer: BufferHandle, range: Option<Range<u64>>) {
        self.buffer_bindings.insert(slot, (buffer, range));
    }

    fn bind_image(&mut self, slot: u32, image: ImageBinding) {
        self.image_bindings.insert(slot, image);
    }

    fn dispatch(&mut self, program: ProgramHandle, groups: [u32; 3]) -> RenderResult<()> {
        if self.current != Some(ContextKind::Debug) {
            return Err(RenderError::WrongContext {
                operation: "dispatch",
                required: ContextKind::Debug,
                current: format!("{:?}", self.current),
            });
        }
        let gpu = self
            .programs
            .get(&program)
            .ok_or(RenderError::UnknownProgram(program))?;
        let bind_group = self.bind_group(gpu)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pixelscope dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("pixelscope compute pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&gpu.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }
        self.submit(encoder);
        Ok(())
    }

    fn barrier(&mut self, kind: BarrierKind) {
        log::trace!("{kind:?} barrier");
    }

    fn read_back(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> RenderResult<Vec<u8>> {
        let gpu = self.buffer(buffer)?;
        if offset + size > gpu.size {
            return Err(RenderError::OutOfRange {
                offset,
                size,
                capacity: gpu.size,
            });
        }
        let copy_size = align4(size.max(4));

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pixelscope readback staging"),
            size: copy_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pixelscope readback"),
            });
        encoder.copy_buffer_to_buffer(&gpu.buffer, offset, &staging, 0, copy_size);
        self.submit(encoder);

        let buffer_slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::PollType::wait_indefinitely())?;
        rx.recv()
            .map_err(|e| RenderError::MapFailed(e.to_string()))?
            .map_err(|e| RenderError::MapFailed(e.to_string()))?;

        let data = buffer_slice.get_mapped_range();
        #[allow(clippy::cast_possible_truncation)]
        let result = data[..size as usize].to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }

    fn resolve_renderbuffer(&mut self, image: &ImageDescriptor) -> RenderResult<()> {
        if self.current != Some(ContextKind::Replay) {
            return Err(RenderError::WrongContext {
                operation: "renderbuffer resolve",
                required: ContextKind::Replay,
                current: format!("{:?}", self.current),
            });
        }
        let source = self
            .textures
            .get(&image.id)
            .ok_or(RenderError::UnknownImage(image.id))?;
        let size = source.texture.size();
        let format = source.texture.format();
        let mip_level_count = source.texture.mip_level_count();
        let sample_count = source.texture.sample_count();

        let reuse = self.resolved.get(&image.id).is_some_and(|t| {
            t.size() == size && t.format() == format && t.sample_count() == sample_count
        });

        let (copy, error) = self.scoped(|device| {
            (!reuse).then(|| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("pixelscope resolved renderbuffer"),
                    size,
                    mip_level_count,
                    sample_count,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            })
        });
        if let Some(error) = error {
            return Err(RenderError::Unsupported(format!(
                "resolving {}: {error}",
                image.id
            )));
        }
        if let Some(copy) = copy {
            self.resolved.insert(image.id, copy);
        }

        let Some(target) = self.resolved.get(&image.id) else {
            return Err(RenderError::NotSampleable(image.id));
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pixelscope renderbuffer resolve"),
            });
        for mip in 0..mip_level_count {
            encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &source.texture,
                    mip_level: mip,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyTextureInfo {
                    texture: target,
                    mip_level: mip,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                size.mip_level_size(mip, wgpu::TextureDimension::D2),
            );
        }
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.submit(encoder);
        if let Some(error) = self.device.pop_error_scope().block_on() {
            return Err(RenderError::Unsupported(format!(
                "resolving {}: {error}",
                image.id
            )));
        }
        Ok(())
    }

    fn max_mip_level(&self, resource: ResourceId) -> RenderResult<u32> {
        self.textures
            .get(&resource)
            .map(|t| t.max_level)
            .ok_or(RenderError::UnknownImage(resource))
    }

    fn set_max_mip_level(&mut self, resource: ResourceId, level: u32) -> RenderResult<()> {
        let texture = self
            .textures
            .get_mut(&resource)
            .ok_or(RenderError::UnknownImage(resource))?;
        texture.max_level = level.min(texture.desc.mips.saturating_sub(1));
        Ok(())
    }
}
