//! File-backed cache store.
//!
//! Layout inside the cache directory:
//! ```text
//! cache.meta.json                 - schema version
//! <collection>/<key>.cbor.zst     - one record per file
//! integrity/<collection>.jsonl    - append-only sha256 manifest, last entry per key wins
//! ```

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::codec::sha256_hex;
use crate::store::{CacheError, CacheStore, Collection, check_key};

pub const CACHE_SCHEMA_VERSION: u32 = 1;

const RECORD_EXT: &str = "cbor.zst";

/// Contents of `cache.meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub cache_schema_version: u32,
    pub codec: String,
}

impl Default for CacheMeta {
    fn default() -> Self {
        Self {
            cache_schema_version: CACHE_SCHEMA_VERSION,
            codec: "cbor+zstd".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    key: String,
    sha256: String,
}

type Manifest = BTreeMap<String, String>;

/// Directory-backed store with per-record integrity hashes.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    meta: CacheMeta,
    /// One lock per collection, indexed by `Collection as usize`.
    manifests: [RwLock<Manifest>; Collection::ALL.len()],
}

impl FileStore {
    /// Open or create a cache at `path`. A foreign schema version is rejected.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("integrity"))?;
        for c in Collection::ALL {
            std::fs::create_dir_all(root.join(c.name()))?;
        }

        let meta_path = root.join("cache.meta.json");
        let meta = if meta_path.exists() {
            let meta: CacheMeta = serde_json::from_reader(File::open(&meta_path)?)?;
            if meta.cache_schema_version != CACHE_SCHEMA_VERSION {
                return Err(CacheError::SchemaMismatch {
                    file_version: meta.cache_schema_version,
                    expected_version: CACHE_SCHEMA_VERSION,
                });
            }
            meta
        } else {
            let meta = CacheMeta::default();
            serde_json::to_writer_pretty(File::create(&meta_path)?, &meta)?;
            meta
        };

        let mut manifests: [RwLock<Manifest>; Collection::ALL.len()] = Default::default();
        for c in Collection::ALL {
            manifests[c as usize] = RwLock::new(load_manifest(&root.join("integrity").join(manifest_name(c)))?);
        }

        tracing::debug!(root = %root.display(), "opened file cache");
        Ok(Self {
            root,
            meta,
            manifests,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &CacheMeta {
        &self.meta
    }

    fn manifest(&self, collection: Collection) -> &RwLock<Manifest> {
        &self.manifests[collection as usize]
    }

    fn record_path(&self, collection: Collection, key: &str) -> PathBuf {
        self.root
            .join(collection.name())
            .join(format!("{key}.{RECORD_EXT}"))
    }

    /// Re-hash every record against its manifest entry.
    ///
    /// Fails on the first missing file, hash mismatch, or record file with no
    /// manifest entry. Returns the number of records checked.
    pub fn verify_integrity(&self) -> Result<usize, CacheError> {
        let mut checked = 0;
        for collection in Collection::ALL {
            let manifest = self
                .manifest(collection)
                .read()
                .map_err(|_| CacheError::LockPoisoned)?;
            for (key, expected) in manifest.iter() {
                let data = std::fs::read(self.record_path(collection, key))?;
                let actual = sha256_hex(&data);
                if &actual != expected {
                    return Err(CacheError::IntegrityMismatch {
                        collection: collection.name(),
                        key: key.clone(),
                        expected: expected.clone(),
                        actual,
                    });
                }
                checked += 1;
            }

            for entry in std::fs::read_dir(self.root.join(collection.name()))? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                let Some(key) = name.strip_suffix(&format!(".{RECORD_EXT}")) else {
                    continue;
                };
                if !manifest.contains_key(key) {
                    return Err(CacheError::IntegrityMismatch {
                        collection: collection.name(),
                        key: key.to_string(),
                        expected: "manifest entry".into(),
                        actual: "none".into(),
                    });
                }
            }
        }
        tracing::info!(records = checked, "cache integrity verified");
        Ok(checked)
    }
}

impl CacheStore for FileStore {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        check_key(key)?;
        // Read under the lock so a concurrent put cannot swap the file between
        // the hash lookup and the read.
        let manifest = self
            .manifest(collection)
            .read()
            .map_err(|_| CacheError::LockPoisoned)?;
        let data = match std::fs::read(self.record_path(collection, key)) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let expected = manifest.get(key);
        let actual = sha256_hex(&data);
        match expected {
            Some(expected) if *expected == actual => Ok(Some(data)),
            Some(expected) => Err(CacheError::IntegrityMismatch {
                collection: collection.name(),
                key: key.to_string(),
                expected: expected.clone(),
                actual,
            }),
            None => Err(CacheError::IntegrityMismatch {
                collection: collection.name(),
                key: key.to_string(),
                expected: "manifest entry".into(),
                actual,
            }),
        }
    }

    fn put(&self, collection: Collection, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        check_key(key)?;
        let mut manifest = self
            .manifest(collection)
            .write()
            .map_err(|_| CacheError::LockPoisoned)?;

        let path = self.record_path(collection, key);
        let tmp = path.with_extension("zst.tmp");
        std::fs::write(&tmp, &value)?;
        std::fs::rename(&tmp, &path)?;

        let entry = ManifestEntry {
            key: key.to_string(),
            sha256: sha256_hex(&value),
        };
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("integrity").join(manifest_name(collection)))?;
        serde_json::to_writer(&mut log, &entry)?;
        log.write_all(b"\n")?;

        manifest.insert(entry.key, entry.sha256);
        tracing::trace!(%collection, key, bytes = value.len(), "record written");
        Ok(())
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<(String, Vec<u8>)>, CacheError> {
        let keys = self.keys(collection)?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(collection, &key)? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    fn keys(&self, collection: Collection) -> Result<Vec<String>, CacheError> {
        let manifest = self
            .manifest(collection)
            .read()
            .map_err(|_| CacheError::LockPoisoned)?;
        Ok(manifest.keys().cloned().collect())
    }
}

fn manifest_name(collection: Collection) -> String {
    format!("{}.jsonl", collection.name())
}

fn load_manifest(path: &Path) -> Result<Manifest, CacheError> {
    let mut manifest = Manifest::new();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(manifest),
        Err(e) => return Err(e.into()),
    };
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: ManifestEntry = serde_json::from_str(&line)?;
        manifest.insert(entry.key, entry.sha256);
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn open_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path().join("cache")).unwrap();
        assert_eq!(store.meta().cache_schema_version, CACHE_SCHEMA_VERSION);
        assert!(store.root().join("cache.meta.json").is_file());
        assert!(store.root().join("integrity").is_dir());
        for c in Collection::ALL {
            assert!(store.root().join(c.name()).is_dir());
        }
    }

    #[test]
    fn records_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache");
        {
            let store = FileStore::open(&path).unwrap();
            store.put(Collection::MergedLow, "merged_low_7", vec![1, 2, 3]).unwrap();
            store.put(Collection::MergedLow, "merged_low_7", vec![4, 5]).unwrap();
            store.put(Collection::Octree, "main_octree", vec![9]).unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(Collection::MergedLow, "merged_low_7").unwrap(), Some(vec![4, 5]));
        assert_eq!(store.get(Collection::MergedLow, "merged_low_8").unwrap(), None);
        assert_eq!(store.keys(Collection::Octree).unwrap(), vec!["main_octree"]);
        assert_eq!(store.verify_integrity().unwrap(), 2);
    }

    #[test]
    fn corruption_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache");
        let store = FileStore::open(&path).unwrap();
        store.put(Collection::OriginalMeshes, "ori0000001", vec![7; 64]).unwrap();

        let record = path.join("original_meshes").join("ori0000001.cbor.zst");
        let mut data = std::fs::read(&record).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&record, &data).unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(matches!(
            store.get(Collection::OriginalMeshes, "ori0000001"),
            Err(CacheError::IntegrityMismatch { .. })
        ));
        assert!(store.verify_integrity().is_err());
    }

    #[test]
    fn unlisted_record_fails_verification() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache");
        let store = FileStore::open(&path).unwrap();
        std::fs::write(path.join("merged_high").join("merged_high_1.cbor.zst"), b"x").unwrap();
        assert!(store.verify_integrity().is_err());
        assert!(store.get(Collection::MergedHigh, "merged_high_1").is_err());
    }

    #[test]
    fn schema_mismatch_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache");
        let _store = FileStore::open(&path).unwrap();

        let meta_path = path.join("cache.meta.json");
        let mut meta: CacheMeta = serde_json::from_reader(File::open(&meta_path).unwrap()).unwrap();
        meta.cache_schema_version = 999;
        serde_json::to_writer_pretty(File::create(&meta_path).unwrap(), &meta).unwrap();

        match FileStore::open(&path) {
            Err(CacheError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, CACHE_SCHEMA_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn concurrent_readers_see_whole_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(tmp.path().join("cache")).unwrap());
        for i in 0..8 {
            store
                .put(Collection::MergedLow, &format!("merged_low_{i}"), vec![i as u8; 256])
                .unwrap();
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..8 {
                        let v = s.get(Collection::MergedLow, &format!("merged_low_{i}")).unwrap();
                        assert_eq!(v, Some(vec![i as u8; 256]));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn writer_on_one_collection_does_not_block_another() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(tmp.path().join("cache")).unwrap());
        store.put(Collection::MergedLow, "merged_low_1", vec![1; 16]).unwrap();

        let held = store.manifest(Collection::OriginalMeshes).write().unwrap();
        let (tx, rx) = mpsc::channel();
        let s = Arc::clone(&store);
        let worker = std::thread::spawn(move || {
            let read = s.get(Collection::MergedLow, "merged_low_1").unwrap();
            s.put(Collection::SimplifiedMeshes, "lpolyori0000001", vec![2; 16]).unwrap();
            tx.send(read).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(vec![1; 16]));
        drop(held);
        worker.join().unwrap();
        assert_eq!(store.keys(Collection::SimplifiedMeshes).unwrap(), vec!["lpolyori0000001"]);
    }
}
