use std::sync::Arc;

use meshstream_common::{Aabb, CoverageTier, GeometryRecord, MeshId};
use meshstream_decimate::SimplifiedMesh;
use meshstream_merge::MergedNodeMesh;
use meshstream_octree::Octree;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{decode, encode};
use crate::store::{CacheError, CacheStore, Collection, MemoryStore};

/// Key of the octree metadata record.
pub const OCTREE_KEY: &str = "main_octree";

/// Serialized octree plus summary fields readable without walking the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OctreeRecord {
    pub root_bounds: Aabb,
    pub max_depth: u8,
    pub node_count: usize,
    pub octree: Octree,
}

impl OctreeRecord {
    pub fn new(octree: Octree) -> Self {
        Self {
            root_bounds: octree.root_bounds(),
            max_depth: octree.config().max_depth,
            node_count: octree.node_count(),
            octree,
        }
    }
}

/// Typed access to a [`CacheStore`]. Cheap to clone.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Cache over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn put<T: Serialize + ?Sized>(
        &self,
        collection: Collection,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        self.store.put(collection, key, encode(value)?)
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        self.store
            .get(collection, key)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn get_all<T: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> Result<Vec<(String, T)>, CacheError> {
        self.store
            .get_all(collection)?
            .into_iter()
            .map(|(key, bytes)| Ok((key, decode(&bytes)?)))
            .collect()
    }

    pub fn keys(&self, collection: Collection) -> Result<Vec<String>, CacheError> {
        self.store.keys(collection)
    }

    pub fn put_octree(&self, octree: &Octree) -> Result<(), CacheError> {
        self.put(Collection::Octree, OCTREE_KEY, &OctreeRecord::new(octree.clone()))
    }

    pub fn get_octree(&self) -> Result<Option<OctreeRecord>, CacheError> {
        let Some(record) = self.get::<OctreeRecord>(Collection::Octree, OCTREE_KEY)? else {
            return Ok(None);
        };
        if record.octree.nodes().is_empty() || record.node_count != record.octree.node_count() {
            return Err(CacheError::InvalidRecord {
                collection: Collection::Octree.name(),
                key: OCTREE_KEY.to_string(),
                reason: format!(
                    "header says {} nodes, arena has {}",
                    record.node_count,
                    record.octree.node_count()
                ),
            });
        }
        Ok(Some(record))
    }

    pub fn put_original(&self, record: &GeometryRecord) -> Result<(), CacheError> {
        self.put(Collection::OriginalMeshes, record.id.as_str(), record)
    }

    pub fn get_original(&self, id: &MeshId) -> Result<Option<GeometryRecord>, CacheError> {
        self.get(Collection::OriginalMeshes, id.as_str())
    }

    pub fn put_simplified(&self, mesh: &SimplifiedMesh) -> Result<(), CacheError> {
        self.put(Collection::SimplifiedMeshes, &mesh.mesh_id, mesh)
    }

    /// Simplified record of an original mesh.
    pub fn get_simplified(&self, original: &MeshId) -> Result<Option<SimplifiedMesh>, CacheError> {
        self.get(Collection::SimplifiedMeshes, &original.simplified_key())
    }

    /// Stored under `merged_<tier>_<node>` in the tier's collection.
    pub fn put_merged(&self, mesh: &MergedNodeMesh) -> Result<(), CacheError> {
        self.put(Collection::merged(mesh.tier), &mesh.name, mesh)
    }

    pub fn get_merged(
        &self,
        tier: CoverageTier,
        node_number: u32,
    ) -> Result<Option<MergedNodeMesh>, CacheError> {
        self.get(Collection::merged(tier), &tier.merged_key(node_number))
    }

    /// Node numbers with a stored record in `tier`, ascending.
    pub fn merged_node_numbers(&self, tier: CoverageTier) -> Result<Vec<u32>, CacheError> {
        let prefix = format!("merged_{}_", tier.as_str());
        let mut numbers: Vec<u32> = self
            .keys(Collection::merged(tier))?
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix)?.parse().ok())
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileStore;
    use glam::Vec3;
    use meshstream_common::{FileId, MeshBuffers, MeshTransform};
    use meshstream_decimate::simplify;
    use meshstream_merge::{MergeSettings, merge_node};
    use meshstream_octree::OctreeConfig;

    fn record(n: u64, offset: f32, coverage: f32) -> GeometryRecord {
        let mut r = GeometryRecord::new(
            MeshId::original(n),
            FileId::from_file_name("plant.json"),
            format!("pipe{n}"),
            MeshBuffers::new(
                vec![offset, 0.0, 0.0, offset + 1.0, 0.0, 0.0, offset, 1.0, 0.3],
                vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
                vec![0, 1, 2],
            ),
            MeshTransform::identity(),
        )
        .unwrap();
        r.metadata.screen_coverage = coverage;
        r
    }

    fn merged() -> MergedNodeMesh {
        let simplified: Vec<_> = (1..=3).map(|n| simplify(&record(n, n as f32, 0.2), 3.0)).collect();
        let refs: Vec<_> = simplified.iter().collect();
        merge_node(
            42,
            Aabb::new(Vec3::ZERO, Vec3::splat(5.0)),
            &refs,
            &MergeSettings::default(),
        )
        .low
        .unwrap()
    }

    #[test]
    fn merged_record_round_trips_through_file_store() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(Arc::new(FileStore::open(tmp.path()).unwrap()));
        let mesh = merged();
        cache.put_merged(&mesh).unwrap();

        let back = cache.get_merged(CoverageTier::Low, 42).unwrap().unwrap();
        assert_eq!(back.buffers.positions, mesh.buffers.positions);
        assert_eq!(back.buffers.normals, mesh.buffers.normals);
        assert_eq!(back.buffers.indices, mesh.buffers.indices);
        assert_eq!(back.original_mesh_keys, mesh.original_mesh_keys);
        assert!(cache.get_merged(CoverageTier::High, 42).unwrap().is_none());
        assert_eq!(cache.merged_node_numbers(CoverageTier::Low).unwrap(), vec![42]);
    }

    #[test]
    fn octree_record_round_trips() {
        let cache = Cache::in_memory();
        let infos: Vec<_> = (1..=4).map(|n| record(n, n as f32, 0.5).info()).collect();
        let octree = Octree::build(
            Aabb::new(Vec3::ZERO, Vec3::splat(8.0)),
            &infos,
            OctreeConfig::default(),
        )
        .unwrap();
        cache.put_octree(&octree).unwrap();

        let back = cache.get_octree().unwrap().unwrap();
        assert_eq!(back.octree, octree);
        assert_eq!(back.node_count, octree.node_count());
        assert_eq!(back.max_depth, 4);
    }

    #[test]
    fn originals_and_simplified_use_their_keys() {
        let cache = Cache::in_memory();
        let r = record(3, 0.0, 0.1);
        cache.put_original(&r).unwrap();
        cache.put_simplified(&simplify(&r, 3.0)).unwrap();

        assert_eq!(cache.keys(Collection::OriginalMeshes).unwrap(), vec!["ori0000003"]);
        assert_eq!(cache.keys(Collection::SimplifiedMeshes).unwrap(), vec!["lpolyori0000003"]);
        assert_eq!(cache.get_original(&r.id).unwrap().unwrap(), r);
        assert!(cache.get_simplified(&r.id).unwrap().unwrap().processed_successfully());
    }

    #[test]
    fn merged_node_numbers_ignore_foreign_keys() {
        let cache = Cache::in_memory();
        for n in [12, 3, 100] {
            cache.put(Collection::MergedHigh, &CoverageTier::High.merged_key(n), &n).unwrap();
        }
        cache.put(Collection::MergedHigh, "notes", &0u32).unwrap();
        assert_eq!(cache.merged_node_numbers(CoverageTier::High).unwrap(), vec![3, 12, 100]);
    }

    #[test]
    fn wrong_shape_is_a_decode_error() {
        let cache = Cache::in_memory();
        cache.put(Collection::MergedLow, "merged_low_1", &"text").unwrap();
        assert!(matches!(
            cache.get_merged(CoverageTier::Low, 1),
            Err(CacheError::CborDecode(_))
        ));
    }
}
