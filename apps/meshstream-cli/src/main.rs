use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::{Mat4, Vec3};
use meshstream_common::{CameraState, CoverageTier, MeshId};
use meshstream_ingest::{BuildSession, LodConfig};
use meshstream_persist::{Cache, Collection, FileStore};
use meshstream_stream::{RenderSink, RenderableMesh, StreamingManager};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshstream-cli", about = "Build and inspect level-of-detail mesh caches")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Import mesh batch files and build the octree, simplified and merged records
    Build {
        /// Mesh batch JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Cache directory
        #[arg(short, long, default_value = "meshstream-cache")]
        cache: PathBuf,
        /// YAML or JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the decimation worker count
        #[arg(long)]
        workers: Option<usize>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what a cache holds
    Inspect {
        #[arg(short, long, default_value = "meshstream-cache")]
        cache: PathBuf,
    },
    /// Check every cached record against its integrity manifest
    Verify {
        #[arg(short, long, default_value = "meshstream-cache")]
        cache: PathBuf,
    },
    /// Stream a cache along an orbiting camera path and report residency
    Simulate {
        #[arg(short, long, default_value = "meshstream-cache")]
        cache: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of streaming ticks
        #[arg(short, long, default_value = "200")]
        ticks: usize,
        /// Orbit radius as a multiple of the scene diagonal
        #[arg(long, default_value = "0.6")]
        orbit: f32,
        /// Override the distance threshold
        #[arg(long)]
        threshold: Option<f32>,
        /// Vertical field of view in degrees, for frustum culling
        #[arg(long, default_value = "45")]
        fov: f32,
    },
}

/// Sink that keeps counts in place of a scene graph.
#[derive(Default)]
struct LoggingSink {
    attached: usize,
    disposed: usize,
    hidden: usize,
    culled: usize,
    vertices: usize,
}

impl RenderSink for LoggingSink {
    fn attach(&mut self, mesh: RenderableMesh) {
        tracing::debug!(name = %mesh.name, vertices = mesh.vertex_count(), "attach");
        self.attached += 1;
        self.vertices += mesh.vertex_count();
    }

    fn dispose(&mut self, node_number: u32, tier: CoverageTier) {
        tracing::debug!(node = node_number, tier = tier.as_str(), "dispose");
        self.disposed += 1;
    }

    fn set_source_visible(&mut self, node_number: u32, mesh_id: &MeshId, visible: bool) {
        tracing::trace!(node = node_number, mesh = %mesh_id, visible, "visibility");
        if visible {
            self.hidden = self.hidden.saturating_sub(1);
        } else {
            self.hidden += 1;
        }
    }

    fn set_node_visible(&mut self, node_number: u32, tier: CoverageTier, visible: bool) {
        tracing::trace!(node = node_number, tier = tier.as_str(), visible, "node visibility");
        if visible {
            self.culled = self.culled.saturating_sub(1);
        } else {
            self.culled += 1;
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LodConfig> {
    match path {
        Some(p) => LodConfig::from_path(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(LodConfig::default()),
    }
}

fn open_cache(dir: &Path) -> anyhow::Result<(Arc<FileStore>, Cache)> {
    let store = Arc::new(
        FileStore::open(dir).with_context(|| format!("opening cache {}", dir.display()))?,
    );
    let cache = Cache::new(store.clone());
    Ok((store, cache))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            println!("meshstream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", meshstream_common::crate_info());
            println!("octree: {}", meshstream_octree::crate_info());
            println!("decimate: {}", meshstream_decimate::crate_info());
            println!("merge: {}", meshstream_merge::crate_info());
            println!("persist: {}", meshstream_persist::crate_info());
            println!("stream: {}", meshstream_stream::crate_info());
            println!("ingest: {}", meshstream_ingest::crate_info());
        }
        Commands::Build {
            files,
            cache,
            config,
            workers,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(w) = workers {
                config.decimation.worker_count = w;
            }
            let (_, cache) = open_cache(&cache)?;
            let mut session = BuildSession::new(cache, config)?;
            session.import_paths(files.as_slice())?;
            let summary = session.finish()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{summary}");
            }
        }
        Commands::Inspect { cache } => {
            let (_, cache) = open_cache(&cache)?;
            match cache.get_octree()? {
                Some(record) => {
                    println!(
                        "octree: {} nodes, max depth {}, bounds {:?} .. {:?}",
                        record.node_count,
                        record.max_depth,
                        record.root_bounds.min,
                        record.root_bounds.max
                    );
                    println!(
                        "populated leaves: {}",
                        record.octree.target_nodes().count()
                    );
                }
                None => println!("octree: none"),
            }
            for collection in Collection::ALL {
                println!("{collection}: {} records", cache.keys(collection)?.len());
            }
            for tier in CoverageTier::ALL {
                let nodes = cache.merged_node_numbers(tier)?;
                let mut vertices = 0;
                let mut sources = 0;
                for n in &nodes {
                    if let Some(mesh) = cache.get_merged(tier, *n)? {
                        vertices += mesh.buffers.vertex_count();
                        sources += mesh.original_mesh_count;
                    }
                }
                println!(
                    "merged {}: {} nodes, {vertices} vertices from {sources} meshes",
                    tier.as_str(),
                    nodes.len()
                );
            }
        }
        Commands::Verify { cache } => {
            let (store, _) = open_cache(&cache)?;
            let checked = store.verify_integrity().context("integrity check failed")?;
            println!("verified {checked} records");
        }
        Commands::Simulate {
            cache,
            config,
            ticks,
            orbit,
            threshold,
            fov,
        } => {
            let mut streaming = load_config(config.as_deref())?.streaming;
            if threshold.is_some() {
                streaming.distance_threshold = threshold;
            }
            let (_, cache) = open_cache(&cache)?;
            let bounds = cache
                .get_octree()?
                .context("cache has no octree; run build first")?
                .root_bounds;
            let mut manager = StreamingManager::new(cache, LoggingSink::default(), streaming)?;
            let high = manager.preload_high_coverage()?;

            let center = bounds.center();
            let radius = bounds.size().length() * orbit;
            let projection = Mat4::perspective_rh(fov.to_radians(), 16.0 / 9.0, 0.1, (radius * 4.0).max(1.0));
            let mut peak_resident = 0;
            for i in 0..ticks {
                let a = i as f32 / ticks.max(1) as f32 * std::f32::consts::TAU;
                let eye = center + Vec3::new(a.cos() * radius, 0.0, a.sin() * radius);
                let view = Mat4::look_at_rh(eye, center, Vec3::Y);
                let camera = CameraState::new(eye, radius).with_view_projection(projection * view);
                let stats = manager.tick(&camera);
                peak_resident = peak_resident.max(stats.resident);
            }
            manager.settle(Duration::from_secs(10));
            manager.shutdown();

            let sink = manager.sink();
            println!(
                "distance threshold {:.2}, {} low-coverage nodes, {high} high-coverage nodes preloaded",
                manager.distance_threshold(),
                manager.node_numbers().count()
            );
            println!(
                "{ticks} ticks: attached {}, disposed {}, hidden sources {}, culled nodes {}, peak resident {peak_resident}",
                sink.attached, sink.disposed, sink.hidden, sink.culled
            );
            println!(
                "tick time: avg {:?}, max {:?}, streamed vertices {}",
                manager.frame_timer().average(),
                manager.frame_timer().max(),
                sink.vertices
            );
        }
    }

    Ok(())
}
