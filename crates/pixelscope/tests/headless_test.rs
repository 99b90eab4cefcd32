//! Headless GPU smoke tests.
//!
//! These need a GPU adapter and are skipped when none is available.

use pixelscope_rs::*;

#[test]
fn test_headless_min_max_and_histogram() {
    init_logging();
    let mut engine = match create_headless_engine(EngineConfig::default()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Skipping headless tests: no GPU adapter available ({e})");
            return;
        }
    };
    if engine.is_degraded() {
        let missing = engine.capabilities().missing();
        eprintln!("Skipping headless tests: adapter lacks {missing:?}");
        return;
    }

    let (width, height) = (8u32, 4u32);
    let desc = ImageDescriptor::new_2d(ResourceId(1), width, height, CompKind::Float);
    let texels: Vec<[f32; 4]> = (0..width * height)
        .map(|i| [i as f32 / 31.0, 1.0 - i as f32 / 31.0, 0.5, 1.0])
        .collect();
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = engine.device().device().create_texture(&wgpu::TextureDescriptor {
        label: Some("capture texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    engine.device().queue().write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(&texels),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 16),
            rows_per_image: Some(height),
        },
        size,
    );
    engine.device_mut().register_texture(desc, texture);
    let mut catalog = ResourceCatalog::new();
    catalog.add_image(desc);

    let mm = engine
        .get_min_max(&catalog, ReductionRequest::new(desc.id))
        .unwrap();
    assert_eq!(mm.min, [0.0, 0.0, 0.5, 1.0]);
    assert_eq!(mm.max, [1.0, 1.0, 0.5, 1.0]);

    let counts = engine
        .get_histogram(&catalog, ReductionRequest::new(desc.id), 0.0, 1.0, ChannelMask::B)
        .unwrap();
    assert_eq!(counts.iter().sum::<u32>(), width * height);

    let value = engine
        .pick_pixel(&catalog, PixelRequest::new(desc.id, 0, 0))
        .unwrap();
    assert_eq!(value, PixelValue::Float([0.0, 1.0, 0.5, 1.0]));
}
