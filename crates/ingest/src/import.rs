//! JSON mesh-batch import.
//!
//! A batch file looks like:
//!
//! ```json
//! { "meshes": [ { "name": "wall", "positions": [...], "normals": [...],
//!                 "indices": [...], "transform": { "position": [0, 0, 0] } } ] }
//! ```
//!
//! `normals`, `name` and `transform` are optional. A transform is either
//! `{ "matrix": [16 floats, column-major] }` or any subset of
//! `{ "position": [x, y, z], "rotation": [x, y, z, w], "scale": [x, y, z] }`.

use std::path::{Path, PathBuf};

use glam::{Mat4, Quat, Vec3};
use meshstream_common::{BufferError, FileId, GeometryRecord, MeshBuffers, MeshIdAllocator, MeshTransform};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}: malformed mesh batch: {source}")]
    Json {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("mesh {mesh:?} has no position buffer")]
    MissingPositions { mesh: String },
    #[error("mesh {mesh:?} has no index buffer")]
    MissingIndices { mesh: String },
    #[error("mesh {mesh:?}: {source}")]
    InvalidBuffers {
        mesh: String,
        #[source]
        source: BufferError,
    },
    #[error("mesh {mesh:?}: invalid transform: {reason}")]
    InvalidTransform { mesh: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct RawBatch {
    meshes: Vec<RawMesh>,
}

#[derive(Debug, Deserialize)]
struct RawMesh {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    positions: Option<Vec<f32>>,
    #[serde(default)]
    normals: Option<Vec<f32>>,
    #[serde(default)]
    indices: Option<Vec<u32>>,
    #[serde(default)]
    transform: Option<RawTransform>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTransform {
    Matrix {
        matrix: [f32; 16],
    },
    Trs {
        #[serde(default)]
        position: Option<[f32; 3]>,
        #[serde(default)]
        rotation: Option<[f32; 4]>,
        #[serde(default)]
        scale: Option<[f32; 3]>,
    },
}

impl RawTransform {
    fn resolve(self) -> Result<MeshTransform, String> {
        match self {
            Self::Matrix { matrix } => {
                if matrix.iter().any(|v| !v.is_finite()) {
                    return Err("matrix has non-finite entries".into());
                }
                Ok(MeshTransform::Matrix(Mat4::from_cols_array(&matrix)))
            }
            Self::Trs {
                position,
                rotation,
                scale,
            } => {
                let position = position.map_or(Vec3::ZERO, Vec3::from_array);
                let scale = scale.map_or(Vec3::ONE, Vec3::from_array);
                if !position.is_finite() || !scale.is_finite() {
                    return Err("position or scale has non-finite entries".into());
                }
                let rotation = match rotation {
                    None => Quat::IDENTITY,
                    Some(q) => {
                        let q = Quat::from_array(q);
                        if !q.is_finite() || q.length_squared() <= f32::EPSILON {
                            return Err("rotation is not a usable quaternion".into());
                        }
                        q.normalize()
                    }
                };
                Ok(MeshTransform::Trs {
                    position,
                    rotation,
                    scale,
                })
            }
        }
    }
}

/// Result of importing one batch file.
#[derive(Debug)]
pub struct ImportedFile {
    pub file_id: FileId,
    pub file_name: String,
    pub records: Vec<GeometryRecord>,
    /// Meshes that were skipped; the rest of the file still imports.
    pub failures: Vec<ImportError>,
}

impl ImportedFile {
    pub fn vertex_count(&self) -> usize {
        self.records.iter().map(|r| r.buffers.vertex_count()).sum()
    }
}

fn build_record(
    raw: RawMesh,
    index: usize,
    file_id: &FileId,
    ids: &mut MeshIdAllocator,
) -> Result<GeometryRecord, ImportError> {
    let mesh = raw
        .name
        .unwrap_or_else(|| format!("{}_{index}", file_id.as_str()));
    let positions = match raw.positions {
        Some(p) if !p.is_empty() => p,
        _ => return Err(ImportError::MissingPositions { mesh }),
    };
    let indices = match raw.indices {
        Some(i) if !i.is_empty() => i,
        _ => return Err(ImportError::MissingIndices { mesh }),
    };
    let transform = match raw.transform {
        Some(t) => t
            .resolve()
            .map_err(|reason| ImportError::InvalidTransform {
                mesh: mesh.clone(),
                reason,
            })?,
        None => MeshTransform::identity(),
    };

    let mut buffers = MeshBuffers::new(positions, raw.normals.unwrap_or_default(), indices);
    if buffers.normals.is_empty() {
        buffers.normals = MeshBuffers::compute_normals(&buffers.positions, &buffers.indices);
    }

    // Validate before allocating so only imported meshes consume an id.
    buffers
        .validate()
        .map_err(|source| ImportError::InvalidBuffers {
            mesh: mesh.clone(),
            source,
        })?;
    GeometryRecord::new(ids.next_id(), file_id.clone(), mesh.clone(), buffers, transform)
        .map_err(|source| ImportError::InvalidBuffers { mesh, source })
}

/// Parse one mesh batch. A malformed document fails the whole file; a bad
/// mesh inside it is recorded in [`ImportedFile::failures`] and skipped.
pub fn parse_mesh_batch(
    file_name: &str,
    json: &str,
    ids: &mut MeshIdAllocator,
) -> Result<ImportedFile, ImportError> {
    let batch: RawBatch = serde_json::from_str(json).map_err(|source| ImportError::Json {
        file: file_name.to_string(),
        source,
    })?;
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let file_id = FileId::from_file_name(&stem);

    let mut records = Vec::with_capacity(batch.meshes.len());
    let mut failures = Vec::new();
    for (index, raw) in batch.meshes.into_iter().enumerate() {
        match build_record(raw, index, &file_id, ids) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(file = file_name, error = %e, "skipping mesh");
                failures.push(e);
            }
        }
    }
    tracing::debug!(
        file = file_name,
        meshes = records.len(),
        failed = failures.len(),
        "parsed mesh batch"
    );
    Ok(ImportedFile {
        file_id,
        file_name: file_name.to_string(),
        records,
        failures,
    })
}

/// Read and parse a mesh batch from disk.
pub fn import_file(
    path: impl AsRef<Path>,
    ids: &mut MeshIdAllocator,
) -> Result<ImportedFile, ImportError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    parse_mesh_batch(&file_name, &json, ids)
}
