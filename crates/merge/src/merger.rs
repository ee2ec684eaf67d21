use glam::Vec3;
use meshstream_common::{Aabb, CoverageTier, FileId, HIGH_COVERAGE_CUTOFF, MeshBuffers, MeshId};
use meshstream_decimate::SimplifiedMesh;
use serde::{Deserialize, Serialize};

/// Vertices transformed per batch while building a merged buffer.
pub const VERTEX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    /// Coverage strictly above this goes to the high tier.
    pub high_coverage_cutoff: f32,
    pub vertex_batch_size: usize,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            high_coverage_cutoff: HIGH_COVERAGE_CUTOFF,
            vertex_batch_size: VERTEX_BATCH_SIZE,
        }
    }
}

/// One source mesh inside a merged buffer, in merge order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalMeshKey {
    pub mesh_id: MeshId,
    pub file_name: FileId,
    pub name: String,
    pub screen_coverage: f32,
    /// Vertices this mesh contributes; ranges are consecutive in key order.
    pub vertex_count: usize,
    /// World bounds of the source mesh.
    pub bounds: Aabb,
}

/// Consolidated geometry of one octree node for one coverage tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedNodeMesh {
    /// `merged_<tier>_<node>`, also the cache key.
    pub name: String,
    pub node_number: u32,
    pub tier: CoverageTier,
    /// World-space buffers; rendered with an identity transform.
    pub buffers: MeshBuffers,
    pub original_mesh_count: usize,
    pub original_mesh_keys: Vec<OriginalMeshKey>,
    /// Bounds of the octree node, not of the merged geometry.
    pub bounds: Aabb,
}

/// Both tiers of one node. A tier with no qualifying meshes is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedNode {
    pub node_number: u32,
    pub high: Option<MergedNodeMesh>,
    pub low: Option<MergedNodeMesh>,
    /// Inputs left out: error-tagged or structurally invalid records.
    pub skipped: Vec<MeshId>,
}

impl MergedNode {
    pub fn tier(&self, tier: CoverageTier) -> Option<&MergedNodeMesh> {
        match tier {
            CoverageTier::High => self.high.as_ref(),
            CoverageTier::Low => self.low.as_ref(),
        }
    }

    pub fn into_meshes(self) -> impl Iterator<Item = MergedNodeMesh> {
        self.high.into_iter().chain(self.low)
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_none() && self.low.is_none()
    }
}

/// Merge the simplified meshes assigned to one node, split by coverage tier.
pub fn merge_node(
    node_number: u32,
    node_bounds: Aabb,
    meshes: &[&SimplifiedMesh],
    settings: &MergeSettings,
) -> MergedNode {
    let mut high = Vec::new();
    let mut low = Vec::new();
    let mut skipped = Vec::new();

    for &mesh in meshes {
        let Some(buffers) = mesh.buffers() else {
            tracing::debug!(node = node_number, mesh = %mesh.original_mesh_id, "skipping failed record");
            skipped.push(mesh.original_mesh_id.clone());
            continue;
        };
        if let Err(e) = buffers.validate() {
            tracing::warn!(node = node_number, mesh = %mesh.original_mesh_id, error = %e, "skipping invalid record");
            skipped.push(mesh.original_mesh_id.clone());
            continue;
        }
        match CoverageTier::classify(mesh.screen_coverage, settings.high_coverage_cutoff) {
            CoverageTier::High => high.push((mesh, buffers)),
            CoverageTier::Low => low.push((mesh, buffers)),
        }
    }

    let batch = settings.vertex_batch_size.max(1);
    MergedNode {
        node_number,
        high: concatenate(node_number, node_bounds, CoverageTier::High, &high, batch),
        low: concatenate(node_number, node_bounds, CoverageTier::Low, &low, batch),
        skipped,
    }
}

fn concatenate(
    node_number: u32,
    node_bounds: Aabb,
    tier: CoverageTier,
    inputs: &[(&SimplifiedMesh, &MeshBuffers)],
    batch: usize,
) -> Option<MergedNodeMesh> {
    if inputs.is_empty() {
        return None;
    }

    let total_vertices: usize = inputs.iter().map(|(_, b)| b.vertex_count()).sum();
    let total_indices: usize = inputs.iter().map(|(_, b)| b.indices.len()).sum();
    let Ok(_) = u32::try_from(total_vertices) else {
        tracing::warn!(node = node_number, tier = tier.as_str(), total_vertices, "merged buffer exceeds u32 indexing");
        return None;
    };

    let mut positions = Vec::with_capacity(total_vertices * 3);
    let mut normals = Vec::with_capacity(total_vertices * 3);
    let mut indices = Vec::with_capacity(total_indices);
    let mut keys = Vec::with_capacity(inputs.len());

    for (mesh, buffers) in inputs {
        let offset = (positions.len() / 3) as u32;
        append_transformed(mesh, buffers, batch, &mut positions, &mut normals);
        indices.extend(buffers.indices.iter().map(|&i| i + offset));
        keys.push(OriginalMeshKey {
            mesh_id: mesh.original_mesh_id.clone(),
            file_name: mesh.file_id.clone(),
            name: mesh.name.clone(),
            screen_coverage: mesh.screen_coverage,
            vertex_count: buffers.vertex_count(),
            bounds: mesh.bounds,
        });
    }

    tracing::trace!(
        node = node_number,
        tier = tier.as_str(),
        meshes = keys.len(),
        vertices = total_vertices,
        "merged tier"
    );

    Some(MergedNodeMesh {
        name: tier.merged_key(node_number),
        node_number,
        tier,
        buffers: MeshBuffers::new(positions, normals, indices),
        original_mesh_count: keys.len(),
        original_mesh_keys: keys,
        bounds: node_bounds,
    })
}

fn append_transformed(
    mesh: &SimplifiedMesh,
    buffers: &MeshBuffers,
    batch: usize,
    positions: &mut Vec<f32>,
    normals: &mut Vec<f32>,
) {
    if mesh.transform.is_identity() {
        positions.extend_from_slice(&buffers.positions);
        normals.extend_from_slice(&buffers.normals);
        return;
    }

    let matrix = mesh.transform.matrix();
    let normal_matrix = mesh.transform.normal_matrix();
    let stride = batch * 3;
    for (p_chunk, n_chunk) in buffers
        .positions
        .chunks(stride)
        .zip(buffers.normals.chunks(stride))
    {
        for p in p_chunk.chunks_exact(3) {
            let w = matrix.transform_point3(Vec3::new(p[0], p[1], p[2]));
            positions.extend_from_slice(&w.to_array());
        }
        for n in n_chunk.chunks_exact(3) {
            let w = (normal_matrix * Vec3::new(n[0], n[1], n[2])).normalize_or_zero();
            normals.extend_from_slice(&w.to_array());
        }
    }
}
