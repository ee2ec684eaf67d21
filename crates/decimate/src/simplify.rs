//! Angle-driven vertex merging.
//!
//! Vertices closer than a derived position precision whose normals differ by
//! at most the angle threshold are collapsed into one. Candidate search is
//! limited to a spatial hash bucket so the merge is linear in practice.

use glam::Vec3;
use meshstream_common::{
    Aabb, BufferError, FileId, GeometryRecord, MeshBuffers, MeshId, MeshTransform,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Meshes with this many faces or fewer are passed through untouched.
pub const MIN_FACES_FOR_DECIMATION: usize = 64;

pub const DEFAULT_ANGLE_THRESHOLD_DEGREES: f32 = 3.0;

/// Faces sampled when estimating the mergeable inter-face distance.
const THRESHOLD_SAMPLE_SIZE: usize = 1000;
/// Each sampled face is paired with this many strides of following faces.
const SAMPLE_WINDOW: usize = 10;
const FALLBACK_AVERAGE_DISTANCE: f32 = 0.001;
const MIN_PRECISION: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecimationError {
    #[error("invalid mesh buffers: {0}")]
    InvalidBuffers(#[from] BufferError),
    #[error("angle threshold must be finite and within (0, 90) degrees, got {0}")]
    InvalidAngle(f32),
}

/// Vertex and face counts before and after simplification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifyStats {
    pub original_vertices: usize,
    pub original_faces: usize,
    pub vertices: usize,
    pub faces: usize,
}

/// Result of simplifying one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimplifyOutcome {
    Processed {
        buffers: MeshBuffers,
        stats: SimplifyStats,
    },
    /// Stored in place of geometry; never merged.
    Failed { error_message: String },
}

/// Cached simplified form of one source mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplifiedMesh {
    /// Cache key, `lpoly` + original id.
    pub mesh_id: String,
    pub original_mesh_id: MeshId,
    pub file_id: FileId,
    pub name: String,
    pub transform: MeshTransform,
    pub bounds: Aabb,
    pub screen_coverage: f32,
    pub outcome: SimplifyOutcome,
}

impl SimplifiedMesh {
    pub fn for_record(record: &GeometryRecord, outcome: SimplifyOutcome) -> Self {
        Self {
            mesh_id: record.id.simplified_key(),
            original_mesh_id: record.id.clone(),
            file_id: record.metadata.file_id.clone(),
            name: record.name.clone(),
            transform: record.transform,
            bounds: record.bounds,
            screen_coverage: record.metadata.screen_coverage,
            outcome,
        }
    }

    pub fn processed_successfully(&self) -> bool {
        matches!(self.outcome, SimplifyOutcome::Processed { .. })
    }

    pub fn buffers(&self) -> Option<&MeshBuffers> {
        match &self.outcome {
            SimplifyOutcome::Processed { buffers, .. } => Some(buffers),
            SimplifyOutcome::Failed { .. } => None,
        }
    }

    pub fn stats(&self) -> Option<SimplifyStats> {
        match &self.outcome {
            SimplifyOutcome::Processed { stats, .. } => Some(*stats),
            SimplifyOutcome::Failed { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            SimplifyOutcome::Failed { error_message } => Some(error_message),
            SimplifyOutcome::Processed { .. } => None,
        }
    }
}

/// Simplify one record; failures become an error-tagged record.
pub fn simplify(record: &GeometryRecord, angle_threshold_degrees: f32) -> SimplifiedMesh {
    let outcome = match simplify_buffers(&record.buffers, angle_threshold_degrees) {
        Ok(buffers) => SimplifyOutcome::Processed {
            stats: SimplifyStats {
                original_vertices: record.buffers.vertex_count(),
                original_faces: record.buffers.face_count(),
                vertices: buffers.vertex_count(),
                faces: buffers.face_count(),
            },
            buffers,
        },
        Err(e) => {
            tracing::warn!(mesh = %record.id, error = %e, "simplification failed");
            SimplifyOutcome::Failed {
                error_message: e.to_string(),
            }
        }
    };
    SimplifiedMesh::for_record(record, outcome)
}

/// Merge nearby, similarly oriented vertices and rebuild the index buffer.
pub fn simplify_buffers(
    mesh: &MeshBuffers,
    angle_threshold_degrees: f32,
) -> Result<MeshBuffers, DecimationError> {
    mesh.validate()?;
    if mesh.face_count() <= MIN_FACES_FOR_DECIMATION {
        return Ok(mesh.clone());
    }
    if !angle_threshold_degrees.is_finite()
        || angle_threshold_degrees <= 0.0
        || angle_threshold_degrees >= 90.0
    {
        return Err(DecimationError::InvalidAngle(angle_threshold_degrees));
    }

    let angle = angle_threshold_degrees.to_radians();
    let (face_normals, face_centers) = face_normals_and_centers(mesh);
    let precision = merge_precision(&face_normals, &face_centers, angle);
    let (merged, remap) = merge_vertices(mesh, precision, angle);
    Ok(rebuild(&merged, &remap, &mesh.indices))
}

fn face_normals_and_centers(mesh: &MeshBuffers) -> (Vec<Vec3>, Vec<Vec3>) {
    let mut normals = Vec::with_capacity(mesh.face_count());
    let mut centers = Vec::with_capacity(mesh.face_count());
    for tri in mesh.indices.chunks_exact(3) {
        let a = mesh.position(tri[0] as usize);
        let b = mesh.position(tri[1] as usize);
        let c = mesh.position(tri[2] as usize);
        normals.push((b - a).cross(c - a).normalize_or_zero());
        centers.push((a + b + c) / 3.0);
    }
    (normals, centers)
}

fn angle_between(a: Vec3, b: Vec3) -> f32 {
    a.dot(b).clamp(-1.0, 1.0).acos()
}

/// Position precision = sampled mean distance between co-oriented faces × tan(angle).
fn merge_precision(normals: &[Vec3], centers: &[Vec3], angle: f32) -> f32 {
    let n = normals.len();
    let sample = THRESHOLD_SAMPLE_SIZE.min(n).max(1);
    let step = (n / sample).max(1);

    let mut total = 0.0f64;
    let mut pairs = 0usize;
    for i in (0..n).step_by(step) {
        let end = (i + step * SAMPLE_WINDOW).min(n);
        for j in (i + 1)..end {
            if angle_between(normals[i], normals[j]) <= angle {
                total += centers[i].distance(centers[j]) as f64;
                pairs += 1;
            }
        }
    }

    let average = if pairs > 0 {
        (total / pairs as f64) as f32
    } else {
        FALLBACK_AVERAGE_DISTANCE
    };
    let precision = average * angle.tan();
    if precision.is_finite() && precision > MIN_PRECISION {
        precision
    } else {
        MIN_PRECISION
    }
}

struct MergedVertex {
    position: Vec3,
    normal: Vec3,
}

type BucketKey = (i64, i64, i64);

fn bucket_key(p: Vec3, precision: f32) -> BucketKey {
    let q = (p / precision).floor();
    (q.x as i64, q.y as i64, q.z as i64)
}

/// Returns the merged vertices and the old-index → new-index map.
fn merge_vertices(mesh: &MeshBuffers, precision: f32, angle: f32) -> (Vec<MergedVertex>, Vec<u32>) {
    let mut merged: Vec<MergedVertex> = Vec::new();
    let mut remap = Vec::with_capacity(mesh.vertex_count());
    let mut buckets: FxHashMap<BucketKey, Vec<u32>> = FxHashMap::default();

    for i in 0..mesh.vertex_count() {
        let position = mesh.position(i);
        let normal = mesh.normal(i);
        let key = bucket_key(position, precision);

        let target = buckets.get(&key).and_then(|candidates| {
            candidates.iter().copied().find(|&c| {
                let m = &merged[c as usize];
                m.position.distance(position) <= precision
                    && angle_between(m.normal, normal) <= angle
            })
        });

        match target {
            Some(c) => {
                let m = &mut merged[c as usize];
                m.position = (m.position + position) * 0.5;
                m.normal = (m.normal + normal).normalize_or_zero();
                remap.push(c);
            }
            None => {
                let new_index = merged.len() as u32;
                buckets.entry(key).or_default().push(new_index);
                merged.push(MergedVertex { position, normal });
                remap.push(new_index);
            }
        }
    }
    (merged, remap)
}

/// Drops faces that collapsed to a line or point and faces seen before.
fn rebuild(merged: &[MergedVertex], remap: &[u32], indices: &[u32]) -> MeshBuffers {
    let mut positions = Vec::with_capacity(merged.len() * 3);
    let mut normals = Vec::with_capacity(merged.len() * 3);
    for v in merged {
        positions.extend_from_slice(&v.position.to_array());
        normals.extend_from_slice(&v.normal.to_array());
    }

    let mut out = Vec::with_capacity(indices.len());
    let mut emitted: FxHashSet<[u32; 3]> = FxHashSet::default();
    for tri in indices.chunks_exact(3) {
        let (a, b, c) = (
            remap[tri[0] as usize],
            remap[tri[1] as usize],
            remap[tri[2] as usize],
        );
        if a == b || b == c || a == c {
            continue;
        }
        let mut key = [a, b, c];
        key.sort_unstable();
        if emitted.insert(key) {
            out.extend_from_slice(&[a, b, c]);
        }
    }

    MeshBuffers::new(positions, normals, out)
}
