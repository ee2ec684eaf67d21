use std::collections::HashSet;

use meshstream_common::{Aabb, MeshInfo};
use serde::{Deserialize, Serialize};

/// Depth of the level whose nodes are merged and streamed.
pub const MAX_DEPTH: u8 = 4;

/// Errors that abort an octree build.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OctreeError {
    #[error("malformed bounds: min {min:?} exceeds max {max:?}")]
    MalformedBounds { min: [f32; 3], max: [f32; 3] },
    #[error("node number {0} assigned twice")]
    NodeNumberCollision(u32),
    #[error("max depth {0} exceeds {MAX_DEPTH}")]
    DepthOutOfRange(u8),
}

/// Build parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeConfig {
    pub max_depth: u8,
    /// Nodes holding fewer records than this stop subdividing.
    /// Zero always subdivides down to `max_depth`.
    pub min_split_records: usize,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            min_split_records: 0,
        }
    }
}

/// Position of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIndex(pub u32);

/// Monotonic node number source, scoped to one build.
#[derive(Debug, Clone)]
pub struct NodeNumberCounter {
    next: u32,
}

impl Default for NodeNumberCounter {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl NodeNumberCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_number(&mut self) -> u32 {
        let n = self.next;
        self.next += 1;
        n
    }
}

/// One cell of the octree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OctreeNode {
    pub node_number: u32,
    pub depth: u8,
    pub bounds: Aabb,
    /// Every record whose containment path passes through this node.
    pub mesh_infos: Vec<MeshInfo>,
    pub parent: Option<NodeIndex>,
    pub children: Option<[NodeIndex; 8]>,
}

impl OctreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// Flat arena octree. Index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Octree {
    config: OctreeConfig,
    nodes: Vec<OctreeNode>,
}

impl Octree {
    /// Partition `records` under `root_bounds`.
    pub fn build(
        root_bounds: Aabb,
        records: &[MeshInfo],
        config: OctreeConfig,
    ) -> Result<Self, OctreeError> {
        if !root_bounds.is_valid() {
            return Err(OctreeError::MalformedBounds {
                min: root_bounds.min.to_array(),
                max: root_bounds.max.to_array(),
            });
        }
        if config.max_depth > MAX_DEPTH {
            return Err(OctreeError::DepthOutOfRange(config.max_depth));
        }
        let _span = tracing::info_span!("octree_build", records = records.len()).entered();

        let mut builder = Builder {
            config,
            nodes: Vec::new(),
            counter: NodeNumberCounter::new(),
            seen: HashSet::new(),
        };
        builder.build_node(root_bounds, records.to_vec(), 0, None)?;

        tracing::debug!(nodes = builder.nodes.len(), "octree built");
        Ok(Self {
            config,
            nodes: builder.nodes,
        })
    }

    pub fn config(&self) -> &OctreeConfig {
        &self.config
    }

    pub fn root(&self) -> &OctreeNode {
        &self.nodes[0]
    }

    pub fn root_bounds(&self) -> Aabb {
        self.root().bounds
    }

    pub fn node(&self, index: NodeIndex) -> Option<&OctreeNode> {
        self.nodes.get(index.0 as usize)
    }

    pub fn nodes(&self) -> &[OctreeNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_by_number(&self, node_number: u32) -> Option<&OctreeNode> {
        self.nodes.iter().find(|n| n.node_number == node_number)
    }

    pub fn children(&self, node: &OctreeNode) -> impl Iterator<Item = &OctreeNode> {
        node.children
            .iter()
            .flatten()
            .filter_map(move |idx| self.node(*idx))
    }

    /// Nodes at `depth`, in build order.
    pub fn nodes_at_depth(&self, depth: u8) -> impl Iterator<Item = &OctreeNode> {
        self.nodes.iter().filter(move |n| n.depth == depth)
    }

    /// Nodes at the merge depth that hold at least one record.
    pub fn target_nodes(&self) -> impl Iterator<Item = &OctreeNode> {
        self.nodes_at_depth(self.config.max_depth)
            .filter(|n| !n.mesh_infos.is_empty())
    }

    /// Leaves above the merge depth that still hold records. Only built when
    /// `min_split_records` stops subdivision early; their records are never merged.
    pub fn stranded_nodes(&self) -> impl Iterator<Item = &OctreeNode> {
        let depth = self.config.max_depth;
        self.nodes
            .iter()
            .filter(move |n| n.is_leaf() && n.depth < depth && !n.mesh_infos.is_empty())
    }
}

struct Builder {
    config: OctreeConfig,
    nodes: Vec<OctreeNode>,
    counter: NodeNumberCounter,
    seen: HashSet<u32>,
}

impl Builder {
    fn build_node(
        &mut self,
        bounds: Aabb,
        records: Vec<MeshInfo>,
        depth: u8,
        parent: Option<NodeIndex>,
    ) -> Result<NodeIndex, OctreeError> {
        let node_number = self.counter.next_number();
        if !self.seen.insert(node_number) {
            return Err(OctreeError::NodeNumberCollision(node_number));
        }

        let index = NodeIndex(self.nodes.len() as u32);
        let split = depth < self.config.max_depth && records.len() >= self.config.min_split_records;

        let mut buckets: [Vec<MeshInfo>; 8] = Default::default();
        if split {
            for info in &records {
                buckets[choose_octant(&bounds, &info.bounds)].push(info.clone());
            }
        }

        self.nodes.push(OctreeNode {
            node_number,
            depth,
            bounds,
            mesh_infos: records,
            parent,
            children: None,
        });

        if split {
            let mut children = [NodeIndex(0); 8];
            for (octant, bucket) in buckets.into_iter().enumerate() {
                children[octant] =
                    self.build_node(bounds.octant(octant), bucket, depth + 1, Some(index))?;
            }
            self.nodes[index.0 as usize].children = Some(children);
        }

        Ok(index)
    }
}

/// Octant receiving a record: the one whose closed volume holds the box center.
///
/// A center on a shared face is claimed by the candidate overlapping the box
/// most, lowest index on ties. Centers outside the parent fall back to the
/// half-space test against the parent center.
fn choose_octant(parent: &Aabb, record: &Aabb) -> usize {
    let center = record.center();
    let mut best: Option<(usize, f32)> = None;
    for octant in 0..8 {
        let cell = parent.octant(octant);
        if !cell.contains_point(center) {
            continue;
        }
        let overlap = cell.overlap_volume(record);
        match best {
            Some((_, v)) if v >= overlap => {}
            _ => best = Some((octant, overlap)),
        }
    }
    best.map(|(o, _)| o).unwrap_or_else(|| {
        let mid = parent.center();
        (center.x >= mid.x) as usize
            | ((center.y >= mid.y) as usize) << 1
            | ((center.z >= mid.z) as usize) << 2
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use meshstream_common::MeshId;
    use std::collections::BTreeSet;

    fn info(n: u64, min: Vec3, max: Vec3) -> MeshInfo {
        MeshInfo {
            id: MeshId::original(n),
            bounds: Aabb::new(min, max),
            screen_coverage: 0.5,
        }
    }

    fn unit() -> Aabb {
        Aabb::new(Vec3::ZERO, Vec3::ONE)
    }

    fn scattered(count: u64) -> Vec<MeshInfo> {
        (0..count)
            .map(|i| {
                let f = i as f32;
                let p = Vec3::new(
                    (f * 0.37).fract(),
                    (f * 0.61).fract(),
                    (f * 0.13).fract(),
                ) * 0.9;
                info(i + 1, p, p + Vec3::splat(0.05))
            })
            .collect()
    }

    #[test]
    fn complete_tree_has_expected_node_count() {
        let tree = Octree::build(unit(), &[], OctreeConfig::default()).unwrap();
        // 1 + 8 + 64 + 512 + 4096
        assert_eq!(tree.node_count(), 4681);
        assert_eq!(tree.nodes_at_depth(MAX_DEPTH).count(), 4096);
        assert_eq!(tree.target_nodes().count(), 0);
    }

    #[test]
    fn every_depth_partitions_the_input() {
        let records = scattered(200);
        let tree = Octree::build(unit(), &records, OctreeConfig::default()).unwrap();
        let expected: BTreeSet<_> = records.iter().map(|r| r.id.clone()).collect();
        for depth in 0..=MAX_DEPTH {
            let ids: Vec<_> = tree
                .nodes_at_depth(depth)
                .flat_map(|n| n.mesh_infos.iter().map(|i| i.id.clone()))
                .collect();
            let unique: BTreeSet<_> = ids.iter().cloned().collect();
            assert_eq!(ids.len(), unique.len(), "duplicate at depth {depth}");
            assert_eq!(unique, expected, "missing record at depth {depth}");
        }
    }

    #[test]
    fn node_numbers_are_unique_and_deterministic() {
        let records = scattered(50);
        let a = Octree::build(unit(), &records, OctreeConfig::default()).unwrap();
        let b = Octree::build(unit(), &records, OctreeConfig::default()).unwrap();
        let numbers: BTreeSet<u32> = a.nodes().iter().map(|n| n.node_number).collect();
        assert_eq!(numbers.len(), a.node_count());
        assert_eq!(a, b);
        assert_eq!(a.root().node_number, 1);
    }

    #[test]
    fn octant_records_land_in_distinct_children() {
        let records = vec![
            info(1, Vec3::splat(0.1), Vec3::splat(0.2)),
            info(2, Vec3::new(0.7, 0.7, 0.1), Vec3::new(0.8, 0.8, 0.2)),
            info(3, Vec3::splat(0.8), Vec3::splat(0.9)),
        ];
        let tree = Octree::build(unit(), &records, OctreeConfig::default()).unwrap();
        let children: Vec<_> = tree.children(tree.root()).collect();
        assert_eq!(children[0].mesh_infos[0].id, MeshId::original(1));
        assert_eq!(children[3].mesh_infos[0].id, MeshId::original(2));
        assert_eq!(children[7].mesh_infos[0].id, MeshId::original(3));
        assert_eq!(tree.target_nodes().count(), 3);
    }

    #[test]
    fn center_on_shared_face_is_assigned_once() {
        let parent = unit();
        let straddling = Aabb::new(Vec3::new(0.25, 0.1, 0.1), Vec3::new(0.75, 0.2, 0.2));
        assert_eq!(choose_octant(&parent, &straddling), 0);
        let flat = Aabb::new(Vec3::new(0.5, 0.6, 0.1), Vec3::new(0.5, 0.8, 0.2));
        assert_eq!(choose_octant(&parent, &flat), 2);
        let inside_upper = Aabb::new(Vec3::new(0.6, 0.6, 0.6), Vec3::new(0.7, 0.7, 0.7));
        assert_eq!(choose_octant(&parent, &inside_upper), 7);
    }

    #[test]
    fn center_outside_parent_uses_half_spaces() {
        let parent = unit();
        let outside = Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0));
        assert_eq!(choose_octant(&parent, &outside), 7);
    }

    #[test]
    fn min_split_stops_early() {
        let config = OctreeConfig {
            max_depth: MAX_DEPTH,
            min_split_records: 2,
        };
        let tree = Octree::build(unit(), &scattered(1), config).unwrap();
        assert_eq!(tree.node_count(), 1);
        assert!(tree.root().is_leaf());
    }

    #[test]
    fn early_leaves_report_stranded_records() {
        let config = OctreeConfig {
            max_depth: 4,
            min_split_records: 2,
        };
        let tree = Octree::build(unit(), &scattered(1), config).unwrap();
        assert_eq!(tree.target_nodes().count(), 0);
        let stranded: Vec<_> = tree.stranded_nodes().collect();
        assert_eq!(stranded.len(), 1);
        assert_eq!(stranded[0].mesh_infos.len(), 1);

        let full = Octree::build(unit(), &scattered(1), OctreeConfig::default()).unwrap();
        assert_eq!(full.stranded_nodes().count(), 0);
    }

    #[test]
    fn depth_beyond_limit_is_rejected() {
        let config = OctreeConfig {
            max_depth: MAX_DEPTH + 1,
            min_split_records: 0,
        };
        assert_eq!(
            Octree::build(unit(), &scattered(3), config),
            Err(OctreeError::DepthOutOfRange(MAX_DEPTH + 1))
        );
    }

    #[test]
    fn malformed_bounds_are_rejected() {
        let bad = Aabb::new(Vec3::ONE, Vec3::ZERO);
        let err = Octree::build(bad, &[], OctreeConfig::default()).unwrap_err();
        assert!(matches!(err, OctreeError::MalformedBounds { .. }));
    }

    #[test]
    fn parents_link_back() {
        let tree = Octree::build(unit(), &scattered(10), OctreeConfig::default()).unwrap();
        for node in tree.nodes().iter().skip(1) {
            let parent = tree.node(node.parent.unwrap()).unwrap();
            assert_eq!(parent.depth + 1, node.depth);
        }
    }
}
