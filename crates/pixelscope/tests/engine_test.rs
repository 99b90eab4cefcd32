//! Engine lifecycle, capabilities and scratch reuse.

use pixelscope_rs::*;

#[test]
fn test_engine_creation_fails_when_a_context_fails() {
    for kind in [ContextKind::Replay, ContextKind::Debug] {
        let device = SoftwareDevice::new().failing_context(kind);
        let result = StatsEngine::new(device, EngineConfig::default());
        assert!(matches!(result, Err(StatsError::Device(_))));
    }
}

#[test]
fn test_invalid_config_is_rejected_before_device_use() {
    let config = EngineConfig {
        histogram_buckets: 0,
        ..EngineConfig::default()
    };
    let result = StatsEngine::new(SoftwareDevice::new(), config);
    assert!(matches!(result, Err(StatsError::InvalidConfig(_))));
}

#[test]
fn test_degraded_engine_rejects_dependent_queries() {
    let caps = Capabilities {
        storage_buffers: false,
        ..Capabilities::full()
    };
    let desc = ImageDescriptor::new_2d(ResourceId(1), 2, 2, CompKind::Float);
    let mut device = SoftwareDevice::with_capabilities(caps);
    device.add_image(desc);
    device.write_texels_f32(desc.id, 0, &[[0.75; 4]; 4]).unwrap();
    let mut catalog = ResourceCatalog::new();
    catalog.add_image(desc);
    let mut engine = StatsEngine::new(device, EngineConfig::default()).unwrap();
    assert!(engine.is_degraded());
    engine.device_mut().clear_commands();

    let err = engine
        .get_min_max(&catalog, ReductionRequest::new(desc.id))
        .unwrap_err();
    assert!(matches!(
        err,
        StatsError::CapabilityMissing(Capability::StorageBuffers)
    ));
    let err = engine
        .get_histogram(&catalog, ReductionRequest::new(desc.id), 0.0, 1.0, ChannelMask::R)
        .unwrap_err();
    assert!(matches!(
        err,
        StatsError::CapabilityMissing(Capability::StorageBuffers)
    ));
    assert!(engine.device().commands().is_empty());

    // Pixel picking only needs compute.
    let value = engine
        .pick_pixel(&catalog, PixelRequest::new(desc.id, 1, 1))
        .unwrap();
    assert_eq!(value, PixelValue::Float([0.75; 4]));
}

#[test]
fn test_no_compute_disables_every_query() {
    let caps = Capabilities {
        compute_shaders: false,
        ..Capabilities::full()
    };
    let desc = ImageDescriptor::new_2d(ResourceId(1), 1, 1, CompKind::Float);
    let mut catalog = ResourceCatalog::new();
    catalog.add_image(desc);
    let mut device = SoftwareDevice::with_capabilities(caps);
    device.add_image(desc);
    let mut engine = StatsEngine::new(device, EngineConfig::default()).unwrap();

    let err = engine
        .pick_pixel(&catalog, PixelRequest::new(desc.id, 0, 0))
        .unwrap_err();
    assert!(matches!(
        err,
        StatsError::CapabilityMissing(Capability::ComputeShaders)
    ));
}

#[test]
fn test_scratch_buffers_grow_and_are_reused() {
    let mut catalog = ResourceCatalog::new();
    let draw = |count: u32| MeshDraw {
        topology: Topology::PointList,
        num_indices: count,
        base_vertex: 0,
        index: None,
        position: VertexBinding {
            buffer: ResourceId(count.into()),
            byte_offset: 0,
            byte_stride: 12,
            format: VertexFormat::FLOAT3,
        },
        unproject: false,
    };
    let points = |count: usize| -> Vec<u8> {
        bytemuck::cast_slice(&vec![[0.0f32, 0.0, -1.0]; count]).to_vec()
    };
    catalog.add_buffer(ResourceId(3), points(3));
    catalog.add_buffer(ResourceId(6), points(6));
    let mut engine = create_software_engine(EngineConfig::default()).unwrap();
    let viewport = Viewport::new(32, 32);
    let camera = CameraParams::default();

    engine
        .pick_vertex(&catalog, viewport, &camera, &draw(3), 16, 16)
        .unwrap();
    let small = engine.scratch().capacity(ScratchSlot::PickVertices).unwrap();
    assert_eq!(small, 3 * 16);

    engine
        .pick_vertex(&catalog, viewport, &camera, &draw(6), 16, 16)
        .unwrap();
    let grown = engine.scratch().capacity(ScratchSlot::PickVertices).unwrap();
    assert_eq!(grown, 6 * 16);

    engine.device_mut().clear_commands();
    let picked = engine
        .pick_vertex(&catalog, viewport, &camera, &draw(3), 16, 16)
        .unwrap();
    assert_eq!(picked, Some(0));
    assert_eq!(
        engine.scratch().capacity(ScratchSlot::PickVertices),
        Some(grown)
    );
    let allocations = engine
        .device()
        .commands()
        .iter()
        .filter(|c| {
            matches!(
                c,
                DeviceCommand::CreateBuffer { .. } | DeviceCommand::CreateProgram(_)
            )
        })
        .count();
    assert_eq!(allocations, 0);
}

#[test]
fn test_queries_leave_debug_context_current() {
    let desc = ImageDescriptor::new_2d(ResourceId(1), 1, 1, CompKind::Float);
    let mut catalog = ResourceCatalog::new();
    catalog.add_image(desc);
    let mut device = SoftwareDevice::new();
    device.add_image(desc);
    let mut engine = StatsEngine::new(device, EngineConfig::default()).unwrap();

    engine
        .get_min_max(&catalog, ReductionRequest::new(desc.id))
        .unwrap();
    assert_eq!(engine.current_context(), Some(ContextKind::Debug));
    assert_eq!(engine.device().current_context(), Some(ContextKind::Debug));
}
