use meshstream_common::Aabb;
use serde::{Deserialize, Serialize};

/// Streaming thresholds and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Nodes beyond this distance are disposed. `None` derives it from the
    /// octree bounds with [`fit_distance`].
    pub distance_threshold: Option<f32>,
    /// Loads start at `distance_threshold * load_band`.
    pub load_band: f32,
    /// Low-coverage sources stay visible within `distance_threshold * visibility_band`.
    pub visibility_band: f32,
    /// Sources at or below this stored coverage are always visible.
    pub always_visible_coverage: f32,
    /// Camera displacement needed before a tick re-evaluates nodes.
    pub movement_threshold: f32,
    pub max_concurrent_loads: usize,
    pub loader_threads: usize,
    /// Vertical field of view used by [`fit_distance`].
    pub fov_degrees: f32,
    /// Ticks kept by the frame timer.
    pub frame_history: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            distance_threshold: None,
            load_band: 0.8,
            visibility_band: 0.9,
            always_visible_coverage: 0.5,
            movement_threshold: 1.0,
            max_concurrent_loads: 5,
            loader_threads: 2,
            fov_degrees: 45.0,
            frame_history: 120,
        }
    }
}

impl StreamingConfig {
    /// Effective eviction distance for an octree with `root_bounds`.
    pub fn resolve_threshold(&self, root_bounds: &Aabb) -> f32 {
        self.distance_threshold
            .unwrap_or_else(|| fit_distance(root_bounds, self.fov_degrees))
    }
}

/// Camera distance at which the bounding sphere of `bounds` fills a
/// `fov_degrees` field of view.
pub fn fit_distance(bounds: &Aabb, fov_degrees: f32) -> f32 {
    if !bounds.is_valid() {
        return 0.0;
    }
    let radius = bounds.size().length() * 0.5;
    let half_fov = (fov_degrees.clamp(1.0, 179.0) * 0.5).to_radians();
    radius / half_fov.sin()
}
