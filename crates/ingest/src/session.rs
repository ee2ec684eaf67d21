//! Build orchestration: import, index, decimate, merge, persist.

use std::path::Path;
use std::time::{Duration, Instant};

use meshstream_common::{
    Aabb, CameraState, CoverageTier, GeometryRecord, MeshIdAllocator, MeshInfo, Viewport,
    screen_coverage,
};
use meshstream_decimate::{DecimationPool, PoolError, SimplifiedMesh};
use meshstream_merge::merge_node;
use meshstream_octree::{Octree, OctreeError};
use meshstream_persist::{Cache, CacheError};
use serde::Serialize;

use crate::config::{ConfigError, LodConfig};
use crate::import::{ImportedFile, import_file, parse_mesh_batch};

/// Errors that abort a build. Per-file, per-mesh and per-node problems are
/// counted in [`BuildSummary`] instead.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("decimation pool: {0}")]
    Pool(#[from] PoolError),
    #[error("octree: {0}")]
    Octree(#[from] OctreeError),
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
}

/// Counters for one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildSummary {
    pub files_imported: usize,
    pub files_failed: usize,
    pub meshes_imported: usize,
    pub mesh_import_failures: usize,
    pub simplified: usize,
    pub simplification_failures: usize,
    pub original_vertices: usize,
    pub simplified_vertices: usize,
    pub original_faces: usize,
    pub simplified_faces: usize,
    pub octree_nodes: usize,
    /// Leaf nodes that received at least one mesh.
    pub target_nodes: usize,
    pub merged_high: usize,
    pub merged_low: usize,
    /// Simplified records left out of a merge or missing from the cache.
    pub merge_skipped: usize,
    pub cache_write_failures: usize,
    pub elapsed: Duration,
}

impl BuildSummary {
    /// Fraction of vertices kept by decimation, 1.0 when nothing was simplified.
    pub fn vertex_ratio(&self) -> f32 {
        if self.original_vertices == 0 {
            1.0
        } else {
            self.simplified_vertices as f32 / self.original_vertices as f32
        }
    }
}

impl std::fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "files: {} imported, {} failed",
            self.files_imported, self.files_failed
        )?;
        writeln!(
            f,
            "meshes: {} imported, {} failed",
            self.meshes_imported, self.mesh_import_failures
        )?;
        writeln!(
            f,
            "decimation: {} simplified, {} failed, vertices {} -> {} ({:.1}%)",
            self.simplified,
            self.simplification_failures,
            self.original_vertices,
            self.simplified_vertices,
            self.vertex_ratio() * 100.0
        )?;
        writeln!(
            f,
            "octree: {} nodes, {} populated leaves",
            self.octree_nodes, self.target_nodes
        )?;
        writeln!(
            f,
            "merged: {} high, {} low, {} skipped",
            self.merged_high, self.merged_low, self.merge_skipped
        )?;
        write!(
            f,
            "cache write failures: {}, elapsed {:.2?}",
            self.cache_write_failures, self.elapsed
        )
    }
}

/// One full import batch.
///
/// Records are stored and submitted for decimation as files arrive; the
/// octree and merged nodes are produced by [`finish`](Self::finish) once the
/// cumulative bounds are known.
pub struct BuildSession {
    cache: Cache,
    config: LodConfig,
    pool: DecimationPool,
    ids: MeshIdAllocator,
    infos: Vec<MeshInfo>,
    bounds: Aabb,
    camera: CameraState,
    viewport: Viewport,
    summary: BuildSummary,
    started: Instant,
}

impl BuildSession {
    pub fn new(cache: Cache, config: LodConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let pool = DecimationPool::new(
            config.decimation.worker_count,
            config.decimation.queue_capacity,
            config.decimation.angle_threshold_degrees,
        )?;
        // Reference camera orbiting the origin at the configured radius.
        let radius = config.coverage.build_camera_radius;
        let camera = CameraState::new(glam::Vec3::new(0.0, 0.0, radius), radius);
        let viewport = Viewport::new(config.coverage.render_width);
        Ok(Self {
            cache,
            config,
            pool,
            ids: MeshIdAllocator::new(),
            infos: Vec::new(),
            bounds: Aabb::empty(),
            camera,
            viewport,
            summary: BuildSummary::default(),
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn summary(&self) -> &BuildSummary {
        &self.summary
    }

    /// Union of every imported record's world bounds.
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Import files in batches, storing finished simplifications between batches.
    pub fn import_paths<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<(), BuildError> {
        let batch_size = self.config.import.file_batch_size.max(1);
        for (batch, chunk) in paths.chunks(batch_size).enumerate() {
            let _span = tracing::info_span!("import_batch", batch, files = chunk.len()).entered();
            for path in chunk {
                let path = path.as_ref();
                match import_file(path, &mut self.ids) {
                    Ok(file) => self.ingest(file)?,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "file import failed");
                        self.summary.files_failed += 1;
                    }
                }
            }
            let done = self.pool.drain();
            self.store_simplified(done);
        }
        Ok(())
    }

    /// Import one in-memory batch document. Returns the number of meshes imported.
    pub fn import_batch_json(&mut self, file_name: &str, json: &str) -> Result<usize, BuildError> {
        match parse_mesh_batch(file_name, json, &mut self.ids) {
            Ok(file) => {
                let n = file.records.len();
                self.ingest(file)?;
                Ok(n)
            }
            Err(e) => {
                tracing::warn!(file = file_name, error = %e, "file import failed");
                self.summary.files_failed += 1;
                Ok(0)
            }
        }
    }

    fn ingest(&mut self, file: ImportedFile) -> Result<(), BuildError> {
        self.summary.files_imported += 1;
        self.summary.mesh_import_failures += file.failures.len();
        tracing::info!(
            file = %file.file_name,
            meshes = file.records.len(),
            vertices = file.vertex_count(),
            "imported file"
        );
        for record in file.records {
            self.submit(record)?;
        }
        Ok(())
    }

    fn submit(&mut self, mut record: GeometryRecord) -> Result<(), BuildError> {
        record.metadata.screen_coverage = screen_coverage(&record.bounds, &self.camera, &self.viewport);
        if let Err(e) = self.cache.put_original(&record) {
            tracing::warn!(mesh = %record.id, error = %e, "storing original failed");
            self.summary.cache_write_failures += 1;
        }
        self.bounds = self.bounds.union(&record.bounds);
        self.infos.push(record.info());
        self.summary.meshes_imported += 1;
        self.pool.submit(record)?;
        Ok(())
    }

    fn store_simplified(&mut self, meshes: Vec<SimplifiedMesh>) {
        for mesh in meshes {
            match mesh.stats() {
                Some(stats) => {
                    self.summary.simplified += 1;
                    self.summary.original_vertices += stats.original_vertices;
                    self.summary.simplified_vertices += stats.vertices;
                    self.summary.original_faces += stats.original_faces;
                    self.summary.simplified_faces += stats.faces;
                }
                None => {
                    tracing::warn!(
                        mesh = %mesh.original_mesh_id,
                        error = mesh.error_message().unwrap_or_default(),
                        "simplification failed"
                    );
                    self.summary.simplification_failures += 1;
                }
            }
            // Error-tagged records are stored too so the merge sees every mesh.
            if let Err(e) = self.cache.put_simplified(&mesh) {
                tracing::warn!(mesh = %mesh.mesh_id, error = %e, "storing simplified mesh failed");
                self.summary.cache_write_failures += 1;
            }
        }
    }

    /// Wait for decimation, build and store the octree, then merge every
    /// populated leaf node.
    pub fn finish(mut self) -> Result<BuildSummary, BuildError> {
        let _span = tracing::info_span!("build_finish", meshes = self.infos.len()).entered();
        let rest = self.pool.run_to_completion();
        self.store_simplified(rest);

        if self.infos.is_empty() {
            tracing::warn!("nothing imported, skipping octree and merge");
            self.summary.elapsed = self.started.elapsed();
            return Ok(self.summary);
        }

        let octree = Octree::build(self.bounds, &self.infos, self.config.octree)?;
        self.cache.put_octree(&octree)?;
        self.summary.octree_nodes = octree.node_count();

        self.merge(&octree);
        self.summary.elapsed = self.started.elapsed();
        tracing::info!(
            meshes = self.summary.meshes_imported,
            merged_high = self.summary.merged_high,
            merged_low = self.summary.merged_low,
            elapsed = ?self.summary.elapsed,
            "build finished"
        );
        Ok(self.summary)
    }

    fn merge(&mut self, octree: &Octree) {
        let settings = self.config.merge_settings();
        let targets: Vec<_> = octree.target_nodes().collect();
        self.summary.target_nodes = targets.len();
        for node in octree.stranded_nodes() {
            tracing::warn!(
                node = node.node_number,
                depth = node.depth,
                meshes = node.mesh_infos.len(),
                "leaf above merge depth, meshes not merged"
            );
            self.summary.merge_skipped += node.mesh_infos.len();
        }

        for (chunk_index, chunk) in targets.chunks(self.config.merge.node_chunk_size).enumerate() {
            let _span = tracing::debug_span!("merge_chunk", chunk = chunk_index, nodes = chunk.len()).entered();
            for node in chunk {
                let mut simplified = Vec::with_capacity(node.mesh_infos.len());
                for info in &node.mesh_infos {
                    match self.cache.get_simplified(&info.id) {
                        Ok(Some(mesh)) => simplified.push(mesh),
                        Ok(None) => {
                            tracing::warn!(node = node.node_number, mesh = %info.id, "simplified mesh missing");
                            self.summary.merge_skipped += 1;
                        }
                        Err(e) => {
                            tracing::warn!(node = node.node_number, mesh = %info.id, error = %e, "reading simplified mesh failed");
                            self.summary.merge_skipped += 1;
                        }
                    }
                }
                let refs: Vec<_> = simplified.iter().collect();
                let merged = merge_node(node.node_number, node.bounds, &refs, &settings);
                self.summary.merge_skipped += merged.skipped.len();
                for mesh in merged.into_meshes() {
                    match mesh.tier {
                        CoverageTier::High => self.summary.merged_high += 1,
                        CoverageTier::Low => self.summary.merged_low += 1,
                    }
                    if let Err(e) = self.cache.put_merged(&mesh) {
                        tracing::warn!(node = mesh.node_number, tier = mesh.tier.as_str(), error = %e, "storing merged node failed");
                        self.summary.cache_write_failures += 1;
                    }
                }
            }
        }
    }

    /// Stop decimation and discard outstanding work.
    pub fn abort(mut self) -> BuildSummary {
        self.pool.terminate();
        self.summary.elapsed = self.started.elapsed();
        self.summary
    }
}
