use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use glam::Vec3;
use meshstream_common::{Aabb, CameraState, CoverageTier, MeshId};
use meshstream_decimate::{Completion, PoolError, TaskId, WorkerPool};
use meshstream_merge::MergedNodeMesh;
use meshstream_persist::{Cache, CacheError};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::StreamingConfig;
use crate::render::{RenderSink, RenderableMesh};
use crate::timer::{FrameTimer, StreamStats};

/// Tier driven by the distance state machine.
const STREAMED_TIER: CoverageTier = CoverageTier::Low;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("cache holds no octree record")]
    MissingOctree,
    #[error("loader pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Lifecycle of one streamed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unloaded,
    Loading,
    Resident,
}

struct LoadOutcome {
    node_number: u32,
    result: Result<Option<MergedNodeMesh>, CacheError>,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    node_number: u32,
    generation: u64,
}

/// Visibility of one source mesh inside a resident node.
#[derive(Debug, Clone)]
struct SourceVisibility {
    mesh_id: MeshId,
    center: Vec3,
    coverage: f32,
    visible: bool,
}

/// Loads and evicts merged low-coverage node geometry as the camera moves.
///
/// All decisions happen on the thread calling [`tick`](Self::tick); only the
/// cache reads run on loader threads. A node is `Loading` while its read is
/// outstanding and `Resident` once the result has been handed to the sink.
pub struct StreamingManager<S: RenderSink> {
    config: StreamingConfig,
    threshold: f32,
    cache: Cache,
    sink: S,
    /// Streamable node number → node bounds.
    nodes: BTreeMap<u32, Aabb>,
    in_flight: FxHashMap<TaskId, InFlight>,
    loading: FxHashSet<u32>,
    resident: FxHashMap<u32, Vec<SourceVisibility>>,
    high_resident: FxHashMap<u32, Aabb>,
    /// Attached nodes currently hidden by the frustum.
    culled: FxHashSet<(u32, CoverageTier)>,
    loader: WorkerPool<u32, LoadOutcome>,
    generation: u64,
    last_evaluated: Option<Vec3>,
    dirty: bool,
    shut_down: bool,
    timer: FrameTimer,
    stats: StreamStats,
}

impl<S: RenderSink> StreamingManager<S> {
    /// Read the octree from `cache` and start the loader threads.
    pub fn new(cache: Cache, sink: S, config: StreamingConfig) -> Result<Self, StreamError> {
        let loader_cache = cache.clone();
        let loader = WorkerPool::new(
            "stream-load",
            config.loader_threads,
            config.max_concurrent_loads.max(1),
            move |node_number: u32| LoadOutcome {
                node_number,
                result: loader_cache.get_merged(STREAMED_TIER, node_number),
            },
        )?;
        let mut manager = Self {
            threshold: 0.0,
            cache,
            sink,
            nodes: BTreeMap::new(),
            in_flight: FxHashMap::default(),
            loading: FxHashSet::default(),
            resident: FxHashMap::default(),
            high_resident: FxHashMap::default(),
            culled: FxHashSet::default(),
            loader,
            generation: 0,
            last_evaluated: None,
            dirty: true,
            shut_down: false,
            timer: FrameTimer::new(config.frame_history),
            stats: StreamStats::default(),
            config,
        };
        manager.reload_octree()?;
        Ok(manager)
    }

    /// Drop all streaming state and rebuild the node table from the cached octree.
    ///
    /// Loads still outstanding from before the reload are discarded when they land.
    pub fn reload_octree(&mut self) -> Result<usize, StreamError> {
        let record = self.cache.get_octree()?.ok_or(StreamError::MissingOctree)?;
        let available: FxHashSet<u32> = self
            .cache
            .merged_node_numbers(STREAMED_TIER)?
            .into_iter()
            .collect();

        self.dispose_all();
        self.generation += 1;
        self.nodes = record
            .octree
            .nodes_at_depth(record.max_depth)
            .filter(|n| available.contains(&n.node_number))
            .map(|n| (n.node_number, n.bounds))
            .collect();
        self.threshold = self.config.resolve_threshold(&record.root_bounds);
        self.last_evaluated = None;
        self.dirty = true;

        tracing::info!(
            nodes = self.nodes.len(),
            distance_threshold = self.threshold,
            "streaming state reset"
        );
        Ok(self.nodes.len())
    }

    /// Load every high-coverage node once. These stay attached for the session.
    pub fn preload_high_coverage(&mut self) -> Result<usize, StreamError> {
        let _span = tracing::info_span!("preload_high_coverage").entered();
        let mut loaded = 0;
        for node_number in self.cache.merged_node_numbers(CoverageTier::High)? {
            if self.high_resident.contains_key(&node_number) {
                continue;
            }
            match self.cache.get_merged(CoverageTier::High, node_number) {
                Ok(Some(mesh)) => {
                    let bounds = mesh.bounds;
                    self.sink.attach(RenderableMesh::from_merged(mesh));
                    self.high_resident.insert(node_number, bounds);
                    loaded += 1;
                }
                Ok(None) => tracing::warn!(node = node_number, "high coverage record vanished"),
                Err(e) => tracing::warn!(node = node_number, error = %e, "high coverage load failed"),
            }
        }
        tracing::info!(loaded, "high coverage nodes attached");
        Ok(loaded)
    }

    /// Run one streaming step for the current camera.
    pub fn tick(&mut self, camera: &CameraState) -> StreamStats {
        let _span = tracing::info_span!("stream_tick").entered();
        let start = Instant::now();
        self.stats = StreamStats::default();
        if self.shut_down {
            return self.stats.clone();
        }

        for completion in self.loader.drain() {
            self.apply_completion(completion);
        }

        let moved = match self.last_evaluated {
            None => true,
            Some(p) => p.distance(camera.position) > self.config.movement_threshold,
        };
        if moved || self.dirty {
            self.evaluate(camera.position);
        }
        self.cull(camera);

        self.stats.resident = self.resident.len();
        self.stats.culled = self.culled.len();
        self.stats.in_flight = self.loading.len();
        self.stats.tick_time = start.elapsed();
        self.timer.record(self.stats.tick_time);

        tracing::trace!(
            evaluated = self.stats.evaluated,
            started = self.stats.loads_started,
            completed = self.stats.loads_completed,
            evicted = self.stats.evicted,
            resident = self.stats.resident,
            in_flight = self.stats.in_flight,
            "stream tick complete"
        );
        self.stats.clone()
    }

    /// Block until every outstanding load has landed or `timeout` elapses.
    /// Returns `true` if nothing is left in flight.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.in_flight.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if let Some(completion) = self.loader.recv_timeout(deadline - now) {
                self.apply_completion(completion);
            }
        }
        true
    }

    fn apply_completion(&mut self, completion: Completion<LoadOutcome>) {
        let Some(flight) = self.in_flight.remove(&completion.task_id) else {
            return;
        };
        let node_number = flight.node_number;
        self.loading.remove(&node_number);
        self.dirty = true;

        if flight.generation != self.generation {
            tracing::debug!(node = node_number, "discarding load from previous octree");
            return;
        }

        let mesh = match completion.result {
            Ok(LoadOutcome {
                result: Ok(Some(mesh)),
                ..
            }) => mesh,
            Ok(LoadOutcome {
                result: Ok(None), ..
            }) => {
                tracing::warn!(node = node_number, "merged record missing from cache");
                self.stats.load_failures += 1;
                return;
            }
            Ok(LoadOutcome { result: Err(e), .. }) => {
                tracing::warn!(node = node_number, error = %e, "node load failed");
                self.stats.load_failures += 1;
                return;
            }
            Err(panic) => {
                tracing::warn!(node = node_number, panic = %panic.0, "node loader panicked");
                self.stats.load_failures += 1;
                return;
            }
        };

        let Some(bounds) = self.nodes.get(&node_number) else {
            return;
        };
        if self.resident.contains_key(&node_number) {
            return;
        }
        if let Some(camera) = self.last_evaluated {
            let distance = bounds.center().distance(camera);
            if distance > self.threshold {
                tracing::debug!(node = node_number, distance, "discarding load beyond threshold");
                self.stats.loads_discarded += 1;
                return;
            }
        }
        let sources = mesh
            .original_mesh_keys
            .iter()
            .map(|k| SourceVisibility {
                mesh_id: k.mesh_id.clone(),
                center: k.bounds.center(),
                coverage: k.screen_coverage,
                visible: true,
            })
            .collect();
        tracing::debug!(node = node_number, vertices = mesh.buffers.vertex_count(), "node resident");
        self.sink.attach(RenderableMesh::from_merged(mesh));
        self.resident.insert(node_number, sources);
        self.stats.loads_completed += 1;
    }

    fn evaluate(&mut self, camera: Vec3) {
        self.dirty = false;
        self.last_evaluated = Some(camera);
        self.stats.evaluated = true;

        let threshold = self.threshold;
        let distances: Vec<(u32, f32)> = self
            .nodes
            .iter()
            .map(|(&n, bounds)| (n, bounds.center().distance(camera)))
            .collect();

        // Evictions are settled before any load is considered.
        for &(node_number, distance) in &distances {
            if distance > threshold && self.resident.remove(&node_number).is_some() {
                self.culled.remove(&(node_number, STREAMED_TIER));
                self.sink.dispose(node_number, STREAMED_TIER);
                self.stats.evicted += 1;
                tracing::debug!(node = node_number, distance, "node evicted");
            }
        }

        let load_distance = threshold * self.config.load_band;
        let mut candidates: Vec<(u32, f32)> = distances
            .iter()
            .copied()
            .filter(|(n, d)| {
                *d <= load_distance && !self.resident.contains_key(n) && !self.loading.contains(n)
            })
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        for (node_number, distance) in candidates {
            if self.loading.len() >= self.config.max_concurrent_loads {
                self.dirty = true;
                break;
            }
            match self.loader.try_submit(node_number) {
                Ok(task_id) => {
                    self.in_flight.insert(
                        task_id,
                        InFlight {
                            node_number,
                            generation: self.generation,
                        },
                    );
                    self.loading.insert(node_number);
                    self.stats.loads_started += 1;
                    tracing::debug!(node = node_number, distance, "node load started");
                }
                Err(rejected) => {
                    tracing::warn!(node = node_number, reason = %rejected.reason, "node load not queued");
                    self.dirty = true;
                    break;
                }
            }
        }

        let visible_distance = threshold * self.config.visibility_band;
        let always_visible = self.config.always_visible_coverage;
        for (&node_number, sources) in self.resident.iter_mut() {
            for source in sources.iter_mut() {
                let visible = source.center.distance(camera) <= visible_distance
                    || source.coverage <= always_visible;
                if visible != source.visible {
                    source.visible = visible;
                    self.sink.set_source_visible(node_number, &source.mesh_id, visible);
                    self.stats.visibility_changes += 1;
                }
            }
        }
    }

    /// Hide attached nodes of both tiers outside the camera frustum and show
    /// them again once they re-enter or the camera has no frustum.
    fn cull(&mut self, camera: &CameraState) {
        let frustum = camera.frustum();
        if frustum.is_none() && self.culled.is_empty() {
            return;
        }
        let low = self
            .resident
            .keys()
            .filter_map(|n| self.nodes.get(n).map(|b| (*n, STREAMED_TIER, *b)));
        let high = self
            .high_resident
            .iter()
            .map(|(n, b)| (*n, CoverageTier::High, *b));
        let attached: Vec<(u32, CoverageTier, Aabb)> = low.chain(high).collect();

        for (node_number, tier, bounds) in attached {
            let inside = frustum.is_none_or(|f| f.intersects_aabb(&bounds));
            let changed = if inside {
                self.culled.remove(&(node_number, tier))
            } else {
                self.culled.insert((node_number, tier))
            };
            if changed {
                self.sink.set_node_visible(node_number, tier, inside);
                self.stats.cull_changes += 1;
                tracing::trace!(node = node_number, tier = tier.as_str(), inside, "frustum visibility");
            }
        }
    }

    fn dispose_all(&mut self) {
        for (node_number, _) in self.resident.drain() {
            self.sink.dispose(node_number, STREAMED_TIER);
        }
        for (node_number, _) in self.high_resident.drain() {
            self.sink.dispose(node_number, CoverageTier::High);
        }
        self.culled.clear();
    }

    /// End the session: stop loaders, discard in-flight loads, dispose everything.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.loader.terminate();
        let discarded = self.in_flight.len();
        self.in_flight.clear();
        self.loading.clear();
        self.dispose_all();
        self.shut_down = true;
        tracing::info!(discarded, "streaming session ended");
    }

    pub fn state(&self, node_number: u32) -> Option<NodeState> {
        if !self.nodes.contains_key(&node_number) {
            return None;
        }
        Some(if self.resident.contains_key(&node_number) {
            NodeState::Resident
        } else if self.loading.contains(&node_number) {
            NodeState::Loading
        } else {
            NodeState::Unloaded
        })
    }

    /// Streamable node numbers, ascending.
    pub fn node_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.nodes.keys().copied()
    }

    pub fn resident_nodes(&self) -> Vec<u32> {
        let mut v: Vec<_> = self.resident.keys().copied().collect();
        v.sort_unstable();
        v
    }

    pub fn loading_nodes(&self) -> Vec<u32> {
        let mut v: Vec<_> = self.loading.iter().copied().collect();
        v.sort_unstable();
        v
    }

    pub fn high_coverage_nodes(&self) -> usize {
        self.high_resident.len()
    }

    pub fn distance_threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_distance_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
        self.dirty = true;
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Stats of the most recent tick, including completions applied by `settle`.
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn frame_timer(&self) -> &FrameTimer {
        &self.timer
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
