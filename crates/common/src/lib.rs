//! Shared types for the mesh streaming engine.
//!
//! # Invariants
//! - Index values are always below the vertex count of their buffers.
//! - A record's bounding box is derived from its post-transform positions.

pub mod coverage;
pub mod frustum;
pub mod ids;
pub mod types;

pub use coverage::{
    CameraState, CoverageTier, HIGH_COVERAGE_CUTOFF, Viewport, screen_coverage,
};
pub use frustum::Frustum;
pub use ids::{FileId, MeshId, MeshIdAllocator};
pub use types::{Aabb, BufferError, GeometryRecord, MeshBuffers, MeshInfo, MeshMetadata, MeshTransform};

pub fn crate_info() -> &'static str {
    "meshstream-common v0.1.0"
}
