//! Node merger: consolidates the simplified meshes of one octree node into a
//! draw-ready buffer per coverage tier.
//!
//! # Invariants
//! - Positions are transformed before concatenation; merged buffers use an identity transform.
//! - Index values are re-based and always below the merged vertex count.
//! - `original_mesh_keys` preserves merge order and covers every merged vertex exactly once.
//! - Error-tagged simplification records are never merged.

mod merger;
mod picking;

pub use merger::{
    MergeSettings, MergedNode, MergedNodeMesh, OriginalMeshKey, VERTEX_BATCH_SIZE, merge_node,
};
pub use picking::{VertexRange, node_color};

pub fn crate_info() -> &'static str {
    "meshstream-merge v0.1.0"
}
