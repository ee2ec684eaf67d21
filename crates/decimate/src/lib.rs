//! Build-time decimation: per-mesh simplification on a fixed worker pool.
//!
//! # Invariants
//! - Each submitted task receives exactly one completion, success or error.
//! - A failing or panicking task never affects its siblings.
//! - Workers share no mutable geometry; every task owns its buffers.

mod latch;
mod pool;
mod simplify;
mod tasks;

pub use latch::CompletionLatch;
pub use pool::{Completion, PoolError, Rejected, TaskId, WorkerPanic, WorkerPool, default_worker_count};
pub use simplify::{
    DEFAULT_ANGLE_THRESHOLD_DEGREES, DecimationError, MIN_FACES_FOR_DECIMATION, SimplifiedMesh,
    SimplifyOutcome, SimplifyStats, simplify, simplify_buffers,
};
pub use tasks::{DecimationPool, SimplifyTask, WorkerMessage};

pub fn crate_info() -> &'static str {
    "meshstream-decimate v0.1.0"
}
