//! View frustum planes and box tests.

use glam::{Mat4, Vec3, Vec4};

use crate::types::Aabb;

/// Six inward-facing planes `(normal, d)`, normalized, in the order
/// left, right, bottom, top, near, far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract planes from a combined view-projection matrix with a 0..1
    /// clip depth range, as produced by `Mat4::perspective_rh` and
    /// `Mat4::orthographic_rh`.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let r0 = vp.row(0);
        let r1 = vp.row(1);
        let r2 = vp.row(2);
        let r3 = vp.row(3);
        let mut planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2];
        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }
        Self { planes }
    }

    /// False only when the box lies entirely behind one plane. Boxes near
    /// frustum corners may report true while outside.
    pub fn intersects_aabb(&self, bounds: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            let furthest = Vec3::select(normal.cmpge(Vec3::ZERO), bounds.max, bounds.min);
            normal.dot(furthest) + plane.w >= 0.0
        })
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }
}
