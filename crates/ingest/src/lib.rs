//! Build pipeline: import mesh batches, index them, decimate, merge per node.
//!
//! # Invariants
//! - Mesh ids come from one allocator owned by the session.
//! - One bad mesh or file never aborts the batch; it is counted in the summary.
//! - The octree is built over the union of all imported bounds.

mod config;
mod import;
mod session;

pub use config::{
    ConfigError, CoverageSettings, DecimationSettings, ImportSettings, LodConfig, MergeBatching,
};
pub use import::{ImportError, ImportedFile, import_file, parse_mesh_batch};
pub use session::{BuildError, BuildSession, BuildSummary};

pub fn crate_info() -> &'static str {
    "meshstream-ingest v0.1.0"
}
