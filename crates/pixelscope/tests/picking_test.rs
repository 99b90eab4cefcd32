//! Mesh and pixel picking through the public API.

use pixelscope_rs::*;

const POSITIONS: ResourceId = ResourceId(20);

fn float3_bytes(points: &[[f32; 3]]) -> Vec<u8> {
    bytemuck::cast_slice(points).to_vec()
}

fn draw(topology: Topology, num_indices: u32) -> MeshDraw {
    MeshDraw {
        topology,
        num_indices,
        base_vertex: 0,
        index: None,
        position: VertexBinding {
            buffer: POSITIONS,
            byte_offset: 0,
            byte_stride: 12,
            format: VertexFormat::FLOAT3,
        },
        unproject: false,
    }
}

fn pick(
    engine: &mut StatsEngine<SoftwareDevice>,
    catalog: &ResourceCatalog,
    draw: &MeshDraw,
    x: u32,
    y: u32,
) -> Option<u32> {
    engine
        .pick_vertex(
            catalog,
            Viewport::new(100, 100),
            &CameraParams::default(),
            draw,
            x,
            y,
        )
        .unwrap()
}

#[test]
fn test_triangle_hit_and_miss() {
    let mut catalog = ResourceCatalog::new();
    catalog.add_buffer(
        POSITIONS,
        float3_bytes(&[[0.0, 0.0, -2.0], [1.0, 0.0, -2.0], [0.0, 1.0, -2.0]]),
    );
    let draw = draw(Topology::TriangleList, 3);
    let mut engine = create_software_engine(EngineConfig::default()).unwrap();

    assert_eq!(pick(&mut engine, &catalog, &draw, 58, 42), Some(0));
    assert_eq!(pick(&mut engine, &catalog, &draw, 10, 10), None);
}

#[test]
fn test_nearest_triangle_wins() {
    let mut catalog = ResourceCatalog::new();
    // Far triangle first, near triangle second; both cover the center.
    catalog.add_buffer(
        POSITIONS,
        float3_bytes(&[
            [-4.0, -4.0, -8.0],
            [4.0, -4.0, -8.0],
            [0.0, 4.0, -8.0],
            [-1.0, -1.0, -2.0],
            [1.0, -1.0, -2.0],
            [0.0, 1.0, -2.0],
        ]),
    );
    let draw = draw(Topology::TriangleList, 6);
    let mut engine = create_software_engine(EngineConfig::default()).unwrap();

    assert_eq!(pick(&mut engine, &catalog, &draw, 50, 50), Some(3));
}

#[test]
fn test_coincident_points_pick_lowest_index() {
    let mut catalog = ResourceCatalog::new();
    let mut points = [[0.9, 0.9, -1.0]; 8];
    points[3] = [0.0, 0.0, -1.0];
    points[7] = [0.0, 0.0, -1.0];
    catalog.add_buffer(POSITIONS, float3_bytes(&points));
    let draw = draw(Topology::PointList, 8);
    let mut engine = create_software_engine(EngineConfig::default()).unwrap();

    assert_eq!(pick(&mut engine, &catalog, &draw, 50, 50), Some(3));
}

#[test]
fn test_point_outside_radius_is_missed() {
    let mut catalog = ResourceCatalog::new();
    catalog.add_buffer(POSITIONS, float3_bytes(&[[0.0, 0.0, -1.0]]));
    let draw = draw(Topology::PointList, 1);
    let config = EngineConfig {
        point_pick_radius: 5.0,
        ..EngineConfig::default()
    };
    let mut engine = create_software_engine(config).unwrap();

    assert_eq!(pick(&mut engine, &catalog, &draw, 52, 52), Some(0));
    assert_eq!(pick(&mut engine, &catalog, &draw, 60, 50), None);
}

#[test]
fn test_empty_draw_is_rejected_before_dispatch() {
    let mut catalog = ResourceCatalog::new();
    catalog.add_buffer(POSITIONS, float3_bytes(&[[0.0, 0.0, -1.0]]));
    let draw = draw(Topology::TriangleList, 0);
    let mut engine = create_software_engine(EngineConfig::default()).unwrap();
    engine.device_mut().clear_commands();

    let err = engine
        .pick_vertex(
            &catalog,
            Viewport::new(100, 100),
            &CameraParams::default(),
            &draw,
            50,
            50,
        )
        .unwrap_err();
    assert!(matches!(err, StatsError::EmptyDraw(_)));
    assert!(engine.device().commands().is_empty());
}

#[test]
fn test_depth_stencil_pick_without_stencil_texturing() {
    let caps = Capabilities {
        stencil_texturing: false,
        ..Capabilities::full()
    };
    let depth = ImageDescriptor::new_2d(ResourceId(1), 1, 1, CompKind::Float)
        .with_stencil(StencilLayout::DepthStencil);
    let stencil = ImageDescriptor::new_2d(ResourceId(2), 1, 1, CompKind::UInt)
        .with_stencil(StencilLayout::StencilOnly);
    let mut device = SoftwareDevice::with_capabilities(caps);
    device.add_image(depth);
    device.add_image(stencil);
    device
        .write_texels(depth.id, 0, &[[0.5f32.to_bits(), 128, 0, 0]])
        .unwrap();
    let mut catalog = ResourceCatalog::new();
    catalog.add_image(depth);
    catalog.add_image(stencil);
    let mut engine = StatsEngine::new(device, EngineConfig::default()).unwrap();

    let value = engine
        .pick_pixel(&catalog, PixelRequest::new(depth.id, 0, 0))
        .unwrap();
    assert_eq!(value, PixelValue::Float([0.5, 0.0, 0.0, 1.0]));

    let err = engine
        .pick_pixel(&catalog, PixelRequest::new(stencil.id, 0, 0))
        .unwrap_err();
    assert!(matches!(
        err,
        StatsError::CapabilityMissing(Capability::StencilTexturing)
    ));
}

#[test]
fn test_pick_pixel_reads_requested_layer_and_mip() {
    let desc = ImageDescriptor::new_2d(ResourceId(3), 4, 4, CompKind::Float)
        .with_dimension(TextureDimension::D2Array)
        .with_array_size(2)
        .with_mips(2);
    let mut device = SoftwareDevice::new();
    device.add_image(desc);
    let mut texels = vec![[0.0f32; 4]; 8];
    texels[4 + 3] = [0.125, 0.25, 0.5, 1.0];
    device.write_texels_f32(desc.id, 1, &texels).unwrap();
    let mut catalog = ResourceCatalog::new();
    catalog.add_image(desc);
    let mut engine = StatsEngine::new(device, EngineConfig::default()).unwrap();

    let value = engine
        .pick_pixel(
            &catalog,
            PixelRequest::new(desc.id, 1, 1).with_subresource(1, 1, 0),
        )
        .unwrap();
    assert_eq!(value, PixelValue::Float([0.125, 0.25, 0.5, 1.0]));
}
