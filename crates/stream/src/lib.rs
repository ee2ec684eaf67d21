//! Streaming: per-node load/evict of merged geometry as the camera moves.
//!
//! # Invariants
//! - At most one in-flight load per node; a resident node is never reloaded.
//! - Within a tick, evictions are decided before new loads are issued.
//! - A disposed node releases its geometry before it may load again.
//! - A failed load leaves the node unloaded; it is retried on a later tick.

mod config;
mod manager;
mod render;
mod timer;

pub use config::{StreamingConfig, fit_distance};
pub use manager::{NodeState, StreamError, StreamingManager};
pub use render::{MeshRole, RenderSink, RenderableMesh};
pub use timer::{FrameTimer, StreamStats};

pub fn crate_info() -> &'static str {
    "meshstream-stream v0.1.0"
}
