//! Screen coverage heuristic and coverage tiers.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::frustum::Frustum;
use crate::types::Aabb;

/// Coverage above this value puts a mesh in the high coverage tier.
///
/// This is on the import-time scale of [`screen_coverage`]; it is not
/// comparable with the runtime visibility coverage thresholds.
pub const HIGH_COVERAGE_CUTOFF: f32 = 1.0;

/// What the engine needs to know about a camera on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    /// World-space eye position.
    pub position: Vec3,
    /// Orbit radius, or distance to target for non-orbiting cameras.
    pub radius: f32,
    /// Projection times view. Without it nothing is frustum culled.
    #[serde(default)]
    pub view_projection: Option<Mat4>,
}

impl CameraState {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            view_projection: None,
        }
    }

    pub fn with_view_projection(mut self, view_projection: Mat4) -> Self {
        self.view_projection = Some(view_projection);
        self
    }

    pub fn frustum(&self) -> Option<Frustum> {
        self.view_projection.as_ref().map(Frustum::from_view_projection)
    }
}

/// Render target dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Render width in pixels.
    pub width: f32,
}

impl Viewport {
    pub fn new(width: f32) -> Self {
        Self { width }
    }
}

/// Unitless estimate of how much of the screen a box subtends.
///
/// Averages the two smaller world extents, divides by the camera radius and
/// scales by the render width. Degenerate boxes and non-positive radii give 0.
pub fn screen_coverage(bounds: &Aabb, camera: &CameraState, viewport: &Viewport) -> f32 {
    if !bounds.is_valid() || camera.radius <= 0.0 || !camera.radius.is_finite() {
        return 0.0;
    }
    let size = bounds.size();
    if size.x <= 0.0 || size.y <= 0.0 || size.z <= 0.0 {
        return 0.0;
    }
    let mut dims = size.to_array();
    dims.sort_by(f32::total_cmp);
    let average_of_smaller = (dims[0] + dims[1]) * 0.5;
    average_of_smaller / camera.radius * viewport.width
}

/// Culling class of a mesh inside a merged node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoverageTier {
    /// Kept visible further away.
    High,
    /// Aggressively culled with distance.
    Low,
}

impl CoverageTier {
    pub const ALL: [CoverageTier; 2] = [CoverageTier::High, CoverageTier::Low];

    /// Strictly above `cutoff` is high; the cutoff itself and NaN are low.
    pub fn classify(coverage: f32, cutoff: f32) -> Self {
        if coverage > cutoff {
            Self::High
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }

    /// Cache key of this tier's merged record for a node: `merged_<tier>_<node>`.
    pub fn merged_key(&self, node_number: u32) -> String {
        format!("merged_{}_{node_number}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(radius: f32) -> CameraState {
        CameraState::new(Vec3::ZERO, radius)
    }

    #[test]
    fn coverage_uses_two_smallest_extents() {
        let b = Aabb::new(Vec3::ZERO, Vec3::new(10.0, 2.0, 4.0));
        let c = screen_coverage(&b, &camera(100.0), &Viewport::new(1000.0));
        // (2 + 4) / 2 / 100 * 1000
        assert!((c - 30.0).abs() < 1e-4);
    }

    #[test]
    fn degenerate_box_has_zero_coverage() {
        let flat = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(screen_coverage(&flat, &camera(10.0), &Viewport::new(800.0)), 0.0);
        assert_eq!(
            screen_coverage(&Aabb::empty(), &camera(10.0), &Viewport::new(800.0)),
            0.0
        );
    }

    #[test]
    fn zero_radius_has_zero_coverage() {
        let b = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(screen_coverage(&b, &camera(0.0), &Viewport::new(800.0)), 0.0);
    }

    #[test]
    fn closer_camera_means_more_coverage() {
        let b = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let vp = Viewport::new(800.0);
        assert!(screen_coverage(&b, &camera(5.0), &vp) > screen_coverage(&b, &camera(50.0), &vp));
    }

    #[test]
    fn tier_cutoff_is_exclusive() {
        assert_eq!(CoverageTier::classify(0.05, HIGH_COVERAGE_CUTOFF), CoverageTier::Low);
        assert_eq!(CoverageTier::classify(2.5, HIGH_COVERAGE_CUTOFF), CoverageTier::High);
        assert_eq!(CoverageTier::classify(1.0, HIGH_COVERAGE_CUTOFF), CoverageTier::Low);
        assert_eq!(CoverageTier::classify(f32::NAN, HIGH_COVERAGE_CUTOFF), CoverageTier::Low);
    }

    #[test]
    fn merged_keys_follow_pattern() {
        assert_eq!(CoverageTier::High.merged_key(12), "merged_high_12");
        assert_eq!(CoverageTier::Low.merged_key(4681), "merged_low_4681");
    }

    #[test]
    fn frustum_comes_from_view_projection() {
        assert!(camera(10.0).frustum().is_none());
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::X, Vec3::Y);
        let proj = Mat4::perspective_rh(1.0, 1.5, 0.1, 50.0);
        let cam = camera(10.0).with_view_projection(proj * view);
        let frustum = cam.frustum().unwrap();
        assert!(frustum.contains_point(Vec3::new(5.0, 0.0, 0.0)));
        assert!(!frustum.contains_point(Vec3::new(-5.0, 0.0, 0.0)));
    }
}
