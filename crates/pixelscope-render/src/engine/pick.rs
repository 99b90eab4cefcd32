//! Mesh vertex picking.

use pixelscope_core::{
    build_pick_setup, normalize_mesh, resolve_point_hits, resolve_triangle_hits, CameraParams,
    Capability, MeshDraw, NormalizedMesh, PickSetup, PointHit, ReplayResources, Result,
    StatsError, TriangleHit, Viewport,
};

use super::StatsEngine;
use crate::device::{BarrierKind, ComputeDevice};
use crate::kernels::{
    Kernel, PickParams, PICK_HEADER_BYTES, PICK_RECORD_BYTES, SLOT_INDICES, SLOT_INPUT,
    SLOT_OUTPUT, SLOT_PARAMS,
};
use crate::scratch::ScratchSlot;

impl<D: ComputeDevice> StatsEngine<D> {
    /// Element of `draw` under pixel `(x, y)` of the mesh preview.
    ///
    /// Triangle topologies return the first index of the closest triangle hit
    /// by the pick ray; other topologies return the index position of the
    /// vertex nearest the cursor in screen space. `Ok(None)` when nothing is
    /// under the cursor.
    #[allow(clippy::too_many_arguments)]
    pub fn pick_vertex(
        &mut self,
        resources: &dyn ReplayResources,
        viewport: Viewport,
        camera: &CameraParams,
        draw: &MeshDraw,
        x: u32,
        y: u32,
    ) -> Result<Option<u32>> {
        self.require(&[Capability::ComputeShaders])?;
        let setup = build_pick_setup(viewport, camera, draw.unproject, x, y)?;
        let mesh = Self::normalize_draw(resources, draw)?;

        self.bind_debug()?;
        let records = self.run_pick(viewport, draw, &setup, &mesh, x, y)?;
        let picked = if draw.topology.mesh_mode().is_triangles() {
            let hits: Vec<TriangleHit> = records.into_iter().map(TriangleHit::from_record).collect();
            resolve_triangle_hits(&hits, setup.ray.origin)
        } else {
            let hits: Vec<PointHit> = records.into_iter().map(PointHit::from_record).collect();
            resolve_point_hits(&hits)
        };
        Ok(picked)
    }

    fn normalize_draw(resources: &dyn ReplayResources, draw: &MeshDraw) -> Result<NormalizedMesh> {
        let position = &draw.position;
        let vertex_bytes = resources
            .buffer_bytes(position.buffer, position.byte_offset, None)
            .ok_or(StatsError::UnknownResource(position.buffer))?;
        let index_bytes = match &draw.index {
            Some(index) => {
                let length = u64::from(draw.num_indices) * index.width.byte_size() as u64;
                let bytes = resources
                    .buffer_bytes(index.buffer, index.byte_offset, Some(length))
                    .ok_or(StatsError::UnknownResource(index.buffer))?;
                Some((bytes, index.width))
            }
            None => None,
        };
        normalize_mesh(
            index_bytes
                .as_ref()
                .map(|(bytes, width)| (bytes.as_slice(), *width)),
            draw.num_indices,
            &vertex_bytes,
            position.byte_stride,
            position.format,
            draw.base_vertex,
        )
    }

    #[allow(clippy::cast_precision_loss, clippy::too_many_arguments)]
    fn run_pick(
        &mut self,
        viewport: Viewport,
        draw: &MeshDraw,
        setup: &PickSetup,
        mesh: &NormalizedMesh,
        x: u32,
        y: u32,
    ) -> Result<Vec<[u32; 4]>> {
        let max_results = self.config.max_mesh_picks;
        let group_size = self.config.pick_group_size;
        let params = PickParams {
            ray_pos: setup.ray.origin.to_array(),
            use_indices: u32::from(mesh.is_indexed()),
            ray_dir: setup.ray.direction.to_array(),
            num_indices: mesh.num_indices,
            mvp: setup.mvp.to_cols_array_2d(),
            coords: [x as f32, y as f32],
            viewport: viewport.size().to_array(),
            mesh_mode: draw.topology.mesh_mode() as u32,
            unproject: u32::from(draw.unproject),
            pick_radius: self.config.point_pick_radius,
            max_results,
        };
        // The index slot must hold a buffer even for non-indexed draws.
        let indices: &[u32] = if mesh.is_indexed() {
            &mesh.indices
        } else {
            &[0]
        };
        let vertices: Vec<[f32; 4]> = mesh.vertices.iter().map(|v| v.to_array()).collect();
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let results_bytes = PICK_HEADER_BYTES + u64::from(max_results) * PICK_RECORD_BYTES;
        let groups = mesh.num_indices / group_size + 1;
        log::debug!(
            "picking {} indices ({:?}) at ({x}, {y}) in {groups} groups",
            mesh.num_indices,
            draw.topology
        );

        let params_buffer = self.pool.acquire(
            &mut self.device,
            ScratchSlot::PickParams,
            std::mem::size_of::<PickParams>() as u64,
        )?;
        let index_buffer = self.pool.acquire(
            &mut self.device,
            ScratchSlot::PickIndices,
            index_bytes.len() as u64,
        )?;
        let vertex_buffer = self.pool.acquire(
            &mut self.device,
            ScratchSlot::PickVertices,
            vertex_bytes.len() as u64,
        )?;
        let results =
            self.pool
                .acquire(&mut self.device, ScratchSlot::PickResults, results_bytes)?;
        let program = self.program(Kernel::MeshPick)?;

        self.device
            .write_buffer(params_buffer, 0, bytemuck::bytes_of(&params))?;
        self.device.write_buffer(index_buffer, 0, index_bytes)?;
        self.device.write_buffer(vertex_buffer, 0, vertex_bytes)?;
        self.device.clear_buffer(results)?;
        self.device.bind_buffer(SLOT_PARAMS, params_buffer, None);
        self.device
            .bind_buffer(SLOT_OUTPUT, results, Some(0..results_bytes));
        self.device.bind_buffer(
            SLOT_INPUT,
            vertex_buffer,
            Some(0..vertex_bytes.len() as u64),
        );
        self.device.bind_buffer(
            SLOT_INDICES,
            index_buffer,
            Some(0..index_bytes.len() as u64),
        );
        self.device.dispatch(program, [groups, 1, 1])?;
        self.device.barrier(BarrierKind::StorageAndAtomics);

        let header = self.device.read_back(results, 0, PICK_HEADER_BYTES)?;
        let count: u32 = header
            .get(..4)
            .map(bytemuck::pod_read_unaligned)
            .unwrap_or(0);
        let stored = count.min(max_results);
        log::debug!("mesh pick produced {count} candidates");
        if stored == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.device.read_back(
            results,
            PICK_HEADER_BYTES,
            u64::from(stored) * PICK_RECORD_BYTES,
        )?;
        Ok(bytes
            .chunks_exact(PICK_RECORD_BYTES as usize)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;
    use pixelscope_core::{
        EngineConfig, IndexBinding, IndexWidth, ResourceCatalog, ResourceId, Topology,
        VertexBinding, VertexFormat,
    };

    fn float3_bytes(points: &[[f32; 3]]) -> Vec<u8> {
        bytemuck::cast_slice(points).to_vec()
    }

    fn draw(topology: Topology, num_indices: u32, index: Option<IndexBinding>) -> MeshDraw {
        MeshDraw {
            topology,
            num_indices,
            base_vertex: 0,
            index,
            position: VertexBinding {
                buffer: ResourceId(10),
                byte_offset: 0,
                byte_stride: 12,
                format: VertexFormat::FLOAT3,
            },
            unproject: false,
        }
    }

    #[test]
    fn test_indexed_strip_returns_hit_element() {
        let mut catalog = ResourceCatalog::new();
        // Two triangles of a strip; only the second covers the view center.
        catalog.add_buffer(
            ResourceId(10),
            float3_bytes(&[
                [5.0, 5.0, -2.0],
                [6.0, 5.0, -2.0],
                [-1.0, -1.0, -2.0],
                [1.0, -1.0, -2.0],
                [0.0, 1.0, -2.0],
            ]),
        );
        let indices: [u16; 4] = [0, 1, 2, 3];
        catalog.add_buffer(ResourceId(11), bytemuck::cast_slice(&indices).to_vec());
        let draw = draw(
            Topology::TriangleStrip,
            4,
            Some(IndexBinding {
                buffer: ResourceId(11),
                byte_offset: 0,
                width: IndexWidth::U16,
            }),
        );
        let mut engine = StatsEngine::new(SoftwareDevice::new(), EngineConfig::default()).unwrap();
        let picked = engine
            .pick_vertex(
                &catalog,
                Viewport::new(64, 64),
                &CameraParams::default(),
                &draw,
                32,
                40,
            )
            .unwrap();
        assert_eq!(picked, Some(3));
    }

    #[test]
    fn test_point_list_picks_nearest_on_screen() {
        let mut catalog = ResourceCatalog::new();
        catalog.add_buffer(
            ResourceId(10),
            float3_bytes(&[[0.5, 0.0, -1.0], [0.02, 0.0, -1.0], [0.0, 0.5, -1.0]]),
        );
        let draw = draw(Topology::PointList, 3, None);
        let mut engine = StatsEngine::new(SoftwareDevice::new(), EngineConfig::default()).unwrap();
        let picked = engine
            .pick_vertex(
                &catalog,
                Viewport::new(100, 100),
                &CameraParams::default(),
                &draw,
                50,
                50,
            )
            .unwrap();
        assert_eq!(picked, Some(1));
    }

    #[test]
    fn test_missing_vertex_buffer_is_unknown_resource() {
        let catalog = ResourceCatalog::new();
        let draw = draw(Topology::TriangleList, 3, None);
        let mut engine = StatsEngine::new(SoftwareDevice::new(), EngineConfig::default()).unwrap();
        let err = engine
            .pick_vertex(
                &catalog,
                Viewport::new(10, 10),
                &CameraParams::default(),
                &draw,
                5,
                5,
            )
            .unwrap_err();
        assert!(matches!(err, StatsError::UnknownResource(ResourceId(10))));
    }
}
