use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use meshstream_common::{Aabb, CameraState, CoverageTier, FileId, GeometryRecord, MeshBuffers, MeshId, MeshTransform};
use meshstream_decimate::simplify;
use meshstream_merge::{MergeSettings, merge_node};
use meshstream_octree::{Octree, OctreeConfig};
use meshstream_persist::{Cache, MemoryStore};
use meshstream_stream::{RenderSink, RenderableMesh, StreamingConfig, StreamingManager};

#[derive(Default)]
struct CountingSink {
    attached: usize,
    disposed: usize,
}

impl RenderSink for CountingSink {
    fn attach(&mut self, _mesh: RenderableMesh) {
        self.attached += 1;
    }

    fn dispose(&mut self, _node_number: u32, _tier: CoverageTier) {
        self.disposed += 1;
    }

    fn set_source_visible(&mut self, _node_number: u32, _mesh_id: &MeshId, _visible: bool) {}

    fn set_node_visible(&mut self, _node_number: u32, _tier: CoverageTier, _visible: bool) {}
}

fn make_cache(mesh_count: usize, extent: f32) -> Cache {
    let side = (mesh_count as f32).cbrt().ceil() as usize;
    let step = extent / side as f32;
    let records: Vec<_> = (0..mesh_count)
        .map(|i| {
            let c = Vec3::new(
                (i % side) as f32 * step,
                ((i / side) % side) as f32 * step,
                (i / (side * side)) as f32 * step,
            ) + Vec3::splat(step * 0.5);
            let positions: Vec<f32> = [
                c + Vec3::new(-0.3, -0.3, -0.3),
                c + Vec3::new(0.3, -0.3, 0.3),
                c + Vec3::new(-0.3, 0.3, 0.3),
            ]
            .iter()
            .flat_map(|p| p.to_array())
            .collect();
            let normals = MeshBuffers::compute_normals(&positions, &[0, 1, 2]);
            let mut r = GeometryRecord::new(
                MeshId::original(i as u64 + 1),
                FileId::from_file_name("bench.json"),
                format!("m{i}"),
                MeshBuffers::new(positions, normals, vec![0, 1, 2]),
                MeshTransform::identity(),
            )
            .unwrap();
            r.metadata.screen_coverage = 0.3;
            r
        })
        .collect();

    let cache = Cache::new(Arc::new(MemoryStore::new()));
    let infos: Vec<_> = records.iter().map(GeometryRecord::info).collect();
    let octree = Octree::build(
        Aabb::new(Vec3::ZERO, Vec3::splat(extent)),
        &infos,
        OctreeConfig::default(),
    )
    .unwrap();
    cache.put_octree(&octree).unwrap();
    for node in octree.target_nodes() {
        let simplified: Vec<_> = node
            .mesh_infos
            .iter()
            .filter_map(|info| records.iter().find(|r| r.id == info.id))
            .map(|r| simplify(r, 3.0))
            .collect();
        let refs: Vec<_> = simplified.iter().collect();
        for mesh in merge_node(node.node_number, node.bounds, &refs, &MergeSettings::default())
            .into_meshes()
        {
            cache.put_merged(&mesh).unwrap();
        }
    }
    cache
}

fn bench_orbit(mesh_count: usize, iterations: usize) {
    let extent = 160.0;
    let cache = make_cache(mesh_count, extent);
    let config = StreamingConfig {
        distance_threshold: Some(40.0),
        ..StreamingConfig::default()
    };
    let mut manager = StreamingManager::new(cache, CountingSink::default(), config).unwrap();
    let center = Vec3::splat(extent * 0.5);

    let start = Instant::now();
    for i in 0..iterations {
        // Orbit the camera around the scene center
        let a = i as f32 * 0.05;
        let eye = center + Vec3::new(a.cos() * 60.0, 0.0, a.sin() * 60.0);
        let _ = black_box(manager.tick(black_box(&CameraState::new(eye, 60.0))));
    }
    manager.settle(Duration::from_secs(10));
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  orbit ({mesh_count} meshes, {} nodes, {iterations} ticks): {per_iter:?}/tick, avg tick {:?}, attached {}, disposed {}",
        manager.node_numbers().count(),
        manager.frame_timer().average(),
        manager.sink().attached,
        manager.sink().disposed,
    );
}

fn main() {
    println!("=== meshstream-stream benchmarks ===\n");

    println!("Streaming tick (orbiting camera):");
    bench_orbit(500, 1000);
    bench_orbit(4000, 500);

    println!("\n=== Done ===");
}
