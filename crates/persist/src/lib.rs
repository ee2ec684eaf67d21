//! Persistent cache: named collections of keyed records.
//!
//! # Invariants
//! - Records are CBOR encoded and zstd compressed before they reach a store.
//! - Stores tolerate concurrent readers; a write replaces a record as a whole.
//! - The file store fails closed: a hash mismatch or foreign schema version is an error.

mod cache;
mod codec;
mod file;
mod store;

pub use cache::{Cache, OCTREE_KEY, OctreeRecord};
pub use codec::{decode, encode};
pub use file::{CACHE_SCHEMA_VERSION, CacheMeta, FileStore};
pub use store::{CacheError, CacheStore, Collection, MemoryStore};

pub fn crate_info() -> &'static str {
    "meshstream-persist v0.1.0"
}
