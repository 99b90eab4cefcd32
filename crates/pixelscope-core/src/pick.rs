//! Picking math: screen rays, candidate hits and the host-side tie-break.

use std::cmp::Ordering;

use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};

/// Vertical field of view of the display projection, in degrees.
pub const DISPLAY_FOV_DEGREES: f32 = 90.0;
/// Near plane of the display projection.
pub const DISPLAY_NEAR: f32 = 0.1;
/// Far plane of the display projection.
pub const DISPLAY_FAR: f32 = 100_000.0;

/// Output viewport of the mesh preview, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }

    /// Maps a pixel to normalized device coordinates, top of the viewport at +1.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_ndc(&self, x: u32, y: u32) -> Vec2 {
        let fx = x as f32 / self.width.max(1) as f32;
        let fy = y as f32 / self.height.max(1) as f32;
        Vec2::new(-1.0 + 2.0 * fx, 1.0 - 2.0 * fy)
    }
}

/// Viewing parameters of the mesh preview and, for unprojected data, the
/// best guess at the projection the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    /// World-to-view matrix of the preview camera.
    pub camera: Mat4,
    /// Source projection vertical field of view, in degrees.
    pub fov_degrees: f32,
    /// Source projection aspect ratio.
    pub aspect: f32,
    /// Source projection near plane.
    pub near: f32,
    /// Source projection far plane; `None` when unknown or infinite.
    pub far: Option<f32>,
    /// The source projection is orthographic.
    pub ortho: bool,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            camera: Mat4::IDENTITY,
            fov_degrees: DISPLAY_FOV_DEGREES,
            aspect: 1.0,
            near: DISPLAY_NEAR,
            far: None,
            ortho: false,
        }
    }
}

impl CameraParams {
    /// Preview camera looking through `camera`, no source projection info.
    pub fn with_camera(camera: Mat4) -> Self {
        Self {
            camera,
            ..Self::default()
        }
    }

    fn validate_guess(&self) -> Result<()> {
        let ok = self.near.is_finite()
            && self.near > 0.0
            && self.aspect.is_finite()
            && self.aspect > 0.0
            && self.fov_degrees > 0.0
            && self.fov_degrees < 180.0
            && self.far.is_none_or(|far| far.is_finite() && far > self.near);
        if ok {
            Ok(())
        } else {
            Err(StatsError::InvalidRequest(format!(
                "cannot guess a projection from {self:?}"
            )))
        }
    }
}

/// The projection used to display the mesh preview.
pub fn display_projection(viewport: Viewport) -> Mat4 {
    Mat4::perspective_rh_gl(
        DISPLAY_FOV_DEGREES.to_radians(),
        viewport.aspect(),
        DISPLAY_NEAR,
        DISPLAY_FAR,
    )
}

/// Best guess at the projection that produced post-projection positions.
pub fn guessed_projection(params: &CameraParams) -> Mat4 {
    if params.ortho {
        return Mat4::orthographic_rh_gl(
            -1.0,
            1.0,
            -1.0,
            1.0,
            params.near,
            params.far.unwrap_or(DISPLAY_FAR),
        );
    }
    let fov = params.fov_degrees.to_radians();
    match params.far {
        Some(far) => Mat4::perspective_rh_gl(fov, params.aspect, params.near, far),
        None => Mat4::perspective_infinite_reverse_rh(fov, params.aspect, params.near),
    }
}

/// A ray in the space the pick kernel tests against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickRay {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl PickRay {
    /// Unprojects an NDC position at the near and far clip planes.
    pub fn unproject(inverse_mvp: Mat4, ndc: Vec2) -> Option<Self> {
        let near = inverse_mvp.project_point3(ndc.extend(-1.0));
        let far = inverse_mvp.project_point3(ndc.extend(1.0));
        let direction = (far - near).try_normalize()?;
        near.is_finite().then_some(Self {
            origin: near,
            direction,
        })
    }
}

/// Everything the pick kernel needs from the camera setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickSetup {
    pub ray: PickRay,
    /// Matrix projecting positions to the display clip space.
    pub mvp: Mat4,
}

/// Builds the pick ray for a pixel of the preview viewport.
///
/// With `unproject`, positions are post-projection and the ray is built in
/// that space through a guessed source projection. The guessed ray is flipped
/// to agree with the forward sign of the nominal ray.
pub fn build_pick_setup(
    viewport: Viewport,
    params: &CameraParams,
    unproject: bool,
    x: u32,
    y: u32,
) -> Result<PickSetup> {
    if viewport.width == 0 || viewport.height == 0 {
        return Err(StatsError::InvalidRequest(format!(
            "empty viewport {}x{}",
            viewport.width, viewport.height
        )));
    }
    let ndc = viewport.to_ndc(x, y);
    let pick_mvp = display_projection(viewport) * params.camera;
    let nominal = PickRay::unproject(pick_mvp.inverse(), ndc)
        .ok_or_else(|| StatsError::InvalidRequest("camera matrix is not invertible".into()))?;

    if !unproject {
        return Ok(PickSetup {
            ray: nominal,
            mvp: pick_mvp,
        });
    }

    params.validate_guess()?;
    let mvp = pick_mvp * guessed_projection(params).inverse();
    let mut ray = PickRay::unproject(mvp.inverse(), ndc).ok_or_else(|| {
        StatsError::InvalidRequest("guessed projection is not invertible".into())
    })?;
    if nominal.direction.z < 0.0 {
        ray.direction = -ray.direction;
    }
    Ok(PickSetup { ray, mvp })
}

/// Möller-Trumbore intersection. Returns the hit point for hits at or in
/// front of the ray origin.
pub fn ray_triangle_intersect(ray: &PickRay, a: Vec3, b: Vec3, c: Vec3) -> Option<Vec3> {
    const EPSILON: f32 = 1e-7;
    let edge1 = b - a;
    let edge2 = c - a;
    let h = ray.direction.cross(edge2);
    let det = edge1.dot(h);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - a;
    let u = inv_det * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = inv_det * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = inv_det * edge2.dot(q);
    (t >= 0.0).then(|| ray.origin + ray.direction * t)
}

/// Projects a position through `mvp` to viewport pixels (top-left origin)
/// and NDC depth. Positions behind the camera yield `None`.
pub fn project_to_screen(mvp: Mat4, position: Vec4, viewport: Vec2) -> Option<(Vec2, f32)> {
    let clip = mvp * position;
    if clip.w <= 0.0 {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    let screen = Vec2::new(ndc.x + 1.0, 1.0 - ndc.y) * 0.5 * viewport;
    Some((screen, ndc.z))
}

/// Triangle candidate written by the pick kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub element_id: u32,
    pub intersection: Vec3,
}

/// Point, line or patch candidate written by the pick kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointHit {
    pub element_id: u32,
    /// The vertex index the element referenced.
    pub aux_index: u32,
    /// Screen-space distance to the cursor in pixels.
    pub ray_distance: f32,
    pub depth: f32,
}

impl TriangleHit {
    /// Decodes a kernel record `(id, x, y, z)`.
    pub fn from_record(record: [u32; 4]) -> Self {
        Self {
            element_id: record[0],
            intersection: Vec3::new(
                f32::from_bits(record[1]),
                f32::from_bits(record[2]),
                f32::from_bits(record[3]),
            ),
        }
    }

    pub fn to_record(&self) -> [u32; 4] {
        [
            self.element_id,
            self.intersection.x.to_bits(),
            self.intersection.y.to_bits(),
            self.intersection.z.to_bits(),
        ]
    }
}

impl PointHit {
    /// Decodes a kernel record `(id, index, distance, depth)`.
    pub fn from_record(record: [u32; 4]) -> Self {
        Self {
            element_id: record[0],
            aux_index: record[1],
            ray_distance: f32::from_bits(record[2]),
            depth: f32::from_bits(record[3]),
        }
    }

    pub fn to_record(&self) -> [u32; 4] {
        [
            self.element_id,
            self.aux_index,
            self.ray_distance.to_bits(),
            self.depth.to_bits(),
        ]
    }
}

/// Closest triangle hit to the ray origin. Equal distances keep the earlier
/// candidate.
pub fn resolve_triangle_hits(hits: &[TriangleHit], origin: Vec3) -> Option<u32> {
    let mut best: Option<(f32, u32)> = None;
    for hit in hits {
        let distance = hit.intersection.distance(origin);
        if best.is_none_or(|(closest, _)| distance < closest) {
            best = Some((distance, hit.element_id));
        }
    }
    best.map(|(_, id)| id)
}

/// Equal values (including `-0.0 == 0.0`) tie; NaN sorts last.
fn compare_f32(a: f32, b: f32) -> Ordering {
    if a == b {
        Ordering::Equal
    } else {
        a.partial_cmp(&b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
    }
}

/// Point hit with the smallest `(ray_distance, depth, element_id)`, so the
/// result does not depend on the order the device appended candidates.
pub fn resolve_point_hits(hits: &[PointHit]) -> Option<u32> {
    hits.iter()
        .min_by(|a, b| {
            compare_f32(a.ray_distance, b.ray_distance)
                .then(compare_f32(a.depth, b.depth))
                .then(a.element_id.cmp(&b.element_id))
        })
        .map(|hit| hit.element_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    #[test]
    fn test_ndc_flips_y() {
        let viewport = Viewport::new(100, 50);
        assert_eq!(viewport.to_ndc(0, 0), Vec2::new(-1.0, 1.0));
        assert_eq!(viewport.to_ndc(50, 25), Vec2::new(0.0, 0.0));
        assert_eq!(viewport.to_ndc(100, 50), Vec2::new(1.0, -1.0));
    }

    #[test]
    fn test_center_ray_looks_down_negative_z() {
        let setup =
            build_pick_setup(Viewport::new(64, 64), &CameraParams::default(), false, 32, 32)
                .unwrap();
        assert!((setup.ray.direction - Vec3::NEG_Z).length() < EPS);
        assert!((setup.ray.origin.z + DISPLAY_NEAR).abs() < EPS);
    }

    #[test]
    fn test_empty_viewport_rejected() {
        let result = build_pick_setup(Viewport::new(0, 10), &CameraParams::default(), false, 0, 0);
        assert!(matches!(result, Err(StatsError::InvalidRequest(_))));
    }

    #[test]
    fn test_guessed_ray_faces_forward() {
        let params = CameraParams {
            far: Some(50.0),
            ..CameraParams::default()
        };
        let viewport = Viewport::new(64, 64);
        let setup = build_pick_setup(viewport, &params, true, 32, 32).unwrap();
        let nominal = build_pick_setup(viewport, &params, false, 32, 32).unwrap();
        assert!(setup.ray.direction.is_normalized());
        if nominal.ray.direction.z < 0.0 {
            // The flip is applied against the unflipped guess.
            let raw = PickRay::unproject(setup.mvp.inverse(), viewport.to_ndc(32, 32)).unwrap();
            assert!((setup.ray.direction + raw.direction).length() < EPS);
        }
    }

    #[test]
    fn test_infinite_and_ortho_guesses_invert() {
        let viewport = Viewport::new(32, 16);
        for params in [
            CameraParams::default(),
            CameraParams {
                ortho: true,
                far: Some(10.0),
                ..CameraParams::default()
            },
        ] {
            build_pick_setup(viewport, &params, true, 3, 7).unwrap();
        }
        let bad = CameraParams {
            near: 0.0,
            ..CameraParams::default()
        };
        assert!(build_pick_setup(viewport, &bad, true, 3, 7).is_err());
    }

    #[test]
    fn test_ray_triangle() {
        let ray = PickRay {
            origin: Vec3::new(0.25, 0.25, 1.0),
            direction: Vec3::NEG_Z,
        };
        let hit = ray_triangle_intersect(&ray, Vec3::ZERO, Vec3::X, Vec3::Y).unwrap();
        assert!((hit - Vec3::new(0.25, 0.25, 0.0)).length() < EPS);

        let miss = PickRay {
            origin: Vec3::new(2.0, 2.0, 1.0),
            direction: Vec3::NEG_Z,
        };
        assert!(ray_triangle_intersect(&miss, Vec3::ZERO, Vec3::X, Vec3::Y).is_none());

        let behind = PickRay {
            origin: Vec3::new(0.25, 0.25, 1.0),
            direction: Vec3::Z,
        };
        assert!(ray_triangle_intersect(&behind, Vec3::ZERO, Vec3::X, Vec3::Y).is_none());
    }

    #[test]
    fn test_point_tie_break_prefers_lower_id() {
        let hits = [
            PointHit {
                element_id: 7,
                aux_index: 7,
                ray_distance: 2.0,
                depth: 0.5,
            },
            PointHit {
                element_id: 3,
                aux_index: 3,
                ray_distance: 2.0,
                depth: 0.5,
            },
        ];
        assert_eq!(resolve_point_hits(&hits), Some(3));
        assert_eq!(resolve_point_hits(&[hits[1], hits[0]]), Some(3));
    }

    #[test]
    fn test_signed_zero_distances_tie() {
        let hits = [
            PointHit {
                element_id: 7,
                aux_index: 7,
                ray_distance: -0.0,
                depth: -0.0,
            },
            PointHit {
                element_id: 3,
                aux_index: 3,
                ray_distance: 0.0,
                depth: 0.0,
            },
        ];
        assert_eq!(resolve_point_hits(&hits), Some(3));
        assert_eq!(resolve_point_hits(&[hits[1], hits[0]]), Some(3));
    }

    #[test]
    fn test_nan_distance_sorts_last() {
        let valid = PointHit {
            element_id: 5,
            aux_index: 5,
            ray_distance: 30.0,
            depth: 0.5,
        };
        let nan = PointHit {
            element_id: 1,
            ray_distance: f32::NAN,
            ..valid
        };
        assert_eq!(resolve_point_hits(&[nan, valid]), Some(5));
        assert_eq!(resolve_point_hits(&[valid, nan]), Some(5));
    }

    #[test]
    fn test_point_tie_break_order() {
        let base = PointHit {
            element_id: 0,
            aux_index: 0,
            ray_distance: 1.0,
            depth: 0.5,
        };
        let closer = PointHit {
            element_id: 9,
            ray_distance: 0.5,
            ..base
        };
        let shallower = PointHit {
            element_id: 8,
            depth: 0.1,
            ..base
        };
        assert_eq!(resolve_point_hits(&[base, closer, shallower]), Some(9));
        assert_eq!(resolve_point_hits(&[base, shallower]), Some(8));
        assert_eq!(resolve_point_hits(&[]), None);
    }

    #[test]
    fn test_triangle_closest_wins() {
        let origin = Vec3::ZERO;
        let hits = [
            TriangleHit {
                element_id: 6,
                intersection: Vec3::new(0.0, 0.0, -5.0),
            },
            TriangleHit {
                element_id: 3,
                intersection: Vec3::new(0.0, 0.0, -2.0),
            },
            TriangleHit {
                element_id: 0,
                intersection: Vec3::new(0.0, 0.0, -4.0),
            },
        ];
        assert_eq!(resolve_triangle_hits(&hits, origin), Some(3));
        assert_eq!(resolve_triangle_hits(&[], origin), None);
    }

    #[test]
    fn test_records_round_trip() {
        let hit = PointHit {
            element_id: 4,
            aux_index: 11,
            ray_distance: 1.5,
            depth: -0.25,
        };
        assert_eq!(PointHit::from_record(hit.to_record()), hit);
    }

    #[test]
    fn test_project_to_screen() {
        let viewport = Viewport::new(100, 100);
        let mvp = display_projection(viewport);
        let (screen, depth) =
            project_to_screen(mvp, Vec4::new(0.0, 0.0, -1.0, 1.0), viewport.size()).unwrap();
        assert!((screen - Vec2::new(50.0, 50.0)).length() < EPS);
        assert!(depth > -1.0 && depth < 1.0);
        assert!(project_to_screen(mvp, Vec4::new(0.0, 0.0, 1.0, 1.0), viewport.size()).is_none());
    }
}
