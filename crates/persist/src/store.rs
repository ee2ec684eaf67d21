use std::collections::BTreeMap;
use std::sync::RwLock;

use meshstream_common::CoverageTier;

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed for {collection}/{key}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        collection: &'static str,
        key: String,
        expected: String,
        actual: String,
    },
    #[error("schema version mismatch: cache has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("invalid record key {0:?}")]
    InvalidKey(String),
    #[error("invalid record in {collection}/{key}: {reason}")]
    InvalidRecord {
        collection: &'static str,
        key: String,
        reason: String,
    },
    #[error("cache lock poisoned")]
    LockPoisoned,
}

/// Named record groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Octree,
    OriginalMeshes,
    SimplifiedMeshes,
    MergedHigh,
    MergedLow,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Octree,
        Collection::OriginalMeshes,
        Collection::SimplifiedMeshes,
        Collection::MergedHigh,
        Collection::MergedLow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Octree => "octree",
            Self::OriginalMeshes => "original_meshes",
            Self::SimplifiedMeshes => "simplified_meshes",
            Self::MergedHigh => "merged_high",
            Self::MergedLow => "merged_low",
        }
    }

    pub fn merged(tier: CoverageTier) -> Self {
        match tier {
            CoverageTier::High => Self::MergedHigh,
            CoverageTier::Low => Self::MergedLow,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw key/value backend. Values are opaque encoded records.
///
/// Implementations must allow concurrent `get` calls from several threads.
pub trait CacheStore: Send + Sync {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    fn put(&self, collection: Collection, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    /// Every record in the collection, ordered by key.
    fn get_all(&self, collection: Collection) -> Result<Vec<(String, Vec<u8>)>, CacheError>;

    /// Keys in the collection, ordered.
    fn keys(&self, collection: Collection) -> Result<Vec<String>, CacheError>;
}

/// Keys become file names, so only a conservative character set is accepted.
pub(crate) fn check_key(key: &str) -> Result<(), CacheError> {
    let ok = !key.is_empty()
        && key.len() <= 200
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}

/// In-process store, used for tests and single-session builds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<Collection, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .map(|c| c.get(&collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let guard = self.collections.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(guard.get(&collection).and_then(|c| c.get(key)).cloned())
    }

    fn put(&self, collection: Collection, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        check_key(key)?;
        let mut guard = self.collections.write().map_err(|_| CacheError::LockPoisoned)?;
        guard
            .entry(collection)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<(String, Vec<u8>)>, CacheError> {
        let guard = self.collections.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(guard
            .get(&collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn keys(&self, collection: Collection) -> Result<Vec<String>, CacheError> {
        let guard = self.collections.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(guard
            .get(&collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collections_are_independent() {
        let store = MemoryStore::new();
        store.put(Collection::MergedHigh, "merged_high_1", vec![1]).unwrap();
        store.put(Collection::MergedLow, "merged_low_1", vec![2]).unwrap();

        assert_eq!(store.get(Collection::MergedHigh, "merged_high_1").unwrap(), Some(vec![1]));
        assert_eq!(store.get(Collection::MergedHigh, "merged_low_1").unwrap(), None);
        assert_eq!(store.len(Collection::MergedLow), 1);
        assert_eq!(store.len(Collection::Octree), 0);
    }

    #[test]
    fn put_replaces_and_get_all_is_ordered() {
        let store = MemoryStore::new();
        store.put(Collection::OriginalMeshes, "ori0000002", vec![2]).unwrap();
        store.put(Collection::OriginalMeshes, "ori0000001", vec![1]).unwrap();
        store.put(Collection::OriginalMeshes, "ori0000001", vec![9]).unwrap();

        let all = store.get_all(Collection::OriginalMeshes).unwrap();
        assert_eq!(
            all,
            vec![("ori0000001".to_string(), vec![9]), ("ori0000002".to_string(), vec![2])]
        );
        assert_eq!(
            store.keys(Collection::OriginalMeshes).unwrap(),
            vec!["ori0000001", "ori0000002"]
        );
    }

    #[test]
    fn unsafe_keys_are_rejected() {
        let store = MemoryStore::new();
        for key in ["", "../etc", "a/b", ".hidden", "sp ace"] {
            assert!(matches!(
                store.put(Collection::Octree, key, vec![]),
                Err(CacheError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn collection_names_are_distinct() {
        let mut names: Vec<_> = Collection::ALL.iter().map(|c| c.name()).collect();
        names.dedup();
        assert_eq!(names.len(), 5);
        assert_eq!(Collection::merged(CoverageTier::Low), Collection::MergedLow);
    }
}
