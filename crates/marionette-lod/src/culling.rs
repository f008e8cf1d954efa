//! View frustum and bounding boxes for visibility tests

use glam::{Mat4, Vec3, Vec4};
use marionette_skeleton::PoseBounds;

const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// Axis-aligned bounding box, world space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Aabb {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Aabb::new(center - extents.abs(), center + extents.abs())
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Distance from `point` to the nearest point of the box; 0 inside
    pub fn distance_to(&self, point: Vec3) -> f32 {
        (point.clamp(self.min, self.max) - point).length()
    }
}

impl From<PoseBounds> for Aabb {
    fn from(bounds: PoseBounds) -> Self {
        Aabb::new(bounds.min, bounds.max)
    }
}

/// Six inward-facing planes extracted from a view-projection matrix
///
/// Expects a 0..1 clip depth range (`Mat4::perspective_rh` and friends).
#[derive(Clone, Debug)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut planes = [Vec4::ZERO; 6];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        planes[NEAR] = rows[2];
        planes[FAR] = rows[3] - rows[2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }

        Frustum { planes }
    }

    /// Is the box at least partly inside? Conservative near corners.
    pub fn intersects(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            let p = Vec3::select(normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            normal.dot(p) + plane.w >= 0.0
        })
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }
}

/// Viewer position plus view volume for one frame
#[derive(Clone, Debug)]
pub struct CameraView {
    pub position: Vec3,
    pub frustum: Frustum,
}

impl CameraView {
    pub fn new(position: Vec3, view_projection: &Mat4) -> Self {
        CameraView {
            position,
            frustum: Frustum::from_view_projection(view_projection),
        }
    }

    /// Perspective camera at `eye` looking at `target`
    pub fn look_at(eye: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let proj = Mat4::perspective_rh(fov_y, aspect, near, far);
        CameraView::new(eye, &(proj * view))
    }

    pub fn is_visible(&self, aabb: &Aabb) -> bool {
        self.frustum.intersects(aabb)
    }

    pub fn distance_to(&self, aabb: &Aabb) -> f32 {
        aabb.distance_to(self.position)
    }
}
