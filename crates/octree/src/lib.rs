//! Spatial index: an octree over mesh bounding volumes.
//!
//! # Invariants
//! - Every node gets its number from one counter per build; numbers are never reused.
//! - Each record appears in exactly one node per depth along its containment path.
//! - Nodes at `max_depth` hold the partition used for merging.
//! - The tree is read-only once built.

mod builder;

pub use builder::{
    MAX_DEPTH, NodeIndex, NodeNumberCounter, Octree, OctreeConfig, OctreeError, OctreeNode,
};

pub fn crate_info() -> &'static str {
    "meshstream-octree v0.1.0"
}
