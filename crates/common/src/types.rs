use glam::{Mat3, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::ids::{FileId, MeshId};

/// Axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box that contains nothing; `union` with it is the identity.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    /// Bounds of a flat `xyz` position buffer. Returns `None` for an empty buffer.
    pub fn from_positions(positions: &[f32]) -> Option<Self> {
        let mut bounds = Self::empty();
        for p in positions.chunks_exact(3) {
            bounds.extend(Vec3::new(p[0], p[1], p[2]));
        }
        bounds.is_valid().then_some(bounds)
    }

    /// True when `min <= max` on every axis and all components are finite.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite()
            && self.max.is_finite()
            && self.min.x <= self.max.x
            && self.min.y <= self.max.y
            && self.min.z <= self.max.z
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn volume(&self) -> f32 {
        let s = self.size();
        s.x * s.y * s.z
    }

    /// Closed containment test (points on the faces are inside).
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Volume shared with `other`, zero when disjoint.
    pub fn overlap_volume(&self, other: &Aabb) -> f32 {
        let lo = self.min.max(other.min);
        let hi = self.max.min(other.max);
        let d = (hi - lo).max(Vec3::ZERO);
        d.x * d.y * d.z
    }

    /// One of the eight equal sub-boxes.
    ///
    /// Bit 0 selects the upper half in x, bit 1 in y, bit 2 in z.
    pub fn octant(&self, index: usize) -> Aabb {
        let c = self.center();
        let pick = |bit: usize, lo: f32, mid: f32, hi: f32| {
            if index & bit != 0 { (mid, hi) } else { (lo, mid) }
        };
        let (x0, x1) = pick(1, self.min.x, c.x, self.max.x);
        let (y0, y1) = pick(2, self.min.y, c.y, self.max.y);
        let (z0, z1) = pick(4, self.min.z, c.z, self.max.z);
        Aabb::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
    }

    /// The box that results from transforming all eight corners.
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        let mut out = Aabb::empty();
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 != 0 { self.max.x } else { self.min.x },
                if i & 2 != 0 { self.max.y } else { self.min.y },
                if i & 4 != 0 { self.max.z } else { self.min.z },
            );
            out.extend(matrix.transform_point3(corner));
        }
        out
    }
}

/// Placement of a mesh in the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MeshTransform {
    /// Explicit translation, rotation and scale.
    Trs {
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
    },
    /// A full affine world matrix.
    Matrix(Mat4),
}

impl Default for MeshTransform {
    fn default() -> Self {
        Self::Trs {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl MeshTransform {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn matrix(&self) -> Mat4 {
        match *self {
            Self::Trs {
                position,
                rotation,
                scale,
            } => Mat4::from_scale_rotation_translation(scale, rotation, position),
            Self::Matrix(m) => m,
        }
    }

    /// Matrix for transforming normals (inverse transpose of the linear part).
    pub fn normal_matrix(&self) -> Mat3 {
        let linear = Mat3::from_mat4(self.matrix());
        if linear.determinant().abs() <= f32::EPSILON {
            return linear;
        }
        linear.inverse().transpose()
    }

    pub fn is_identity(&self) -> bool {
        self.matrix() == Mat4::IDENTITY
    }
}

/// Errors from validating raw vertex buffers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BufferError {
    #[error("position buffer is empty")]
    MissingPositions,
    #[error("index buffer is empty")]
    MissingIndices,
    #[error("position buffer length {0} is not a multiple of 3")]
    MisalignedPositions(usize),
    #[error("index buffer length {0} is not a multiple of 3")]
    MisalignedIndices(usize),
    #[error("normal buffer length {normals} does not match position buffer length {positions}")]
    NormalLength { positions: usize, normals: usize },
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },
    #[error("{buffer} buffer has a non-finite value at {offset}")]
    NonFinite { buffer: &'static str, offset: usize },
}

/// Flat vertex buffers: `xyz` positions, `xyz` normals and triangle indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshBuffers {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshBuffers {
    pub fn new(positions: Vec<f32>, normals: Vec<f32>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            normals,
            indices,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn face_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn position(&self, i: usize) -> Vec3 {
        Vec3::new(
            self.positions[i * 3],
            self.positions[i * 3 + 1],
            self.positions[i * 3 + 2],
        )
    }

    pub fn normal(&self, i: usize) -> Vec3 {
        Vec3::new(
            self.normals[i * 3],
            self.normals[i * 3 + 1],
            self.normals[i * 3 + 2],
        )
    }

    /// Check buffer shapes and that every index is in range.
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.positions.is_empty() {
            return Err(BufferError::MissingPositions);
        }
        if self.indices.is_empty() {
            return Err(BufferError::MissingIndices);
        }
        if self.positions.len() % 3 != 0 {
            return Err(BufferError::MisalignedPositions(self.positions.len()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(BufferError::MisalignedIndices(self.indices.len()));
        }
        if self.normals.len() != self.positions.len() {
            return Err(BufferError::NormalLength {
                positions: self.positions.len(),
                normals: self.normals.len(),
            });
        }
        for (buffer, values) in [("position", &self.positions), ("normal", &self.normals)] {
            if let Some(offset) = values.iter().position(|v| !v.is_finite()) {
                return Err(BufferError::NonFinite { buffer, offset });
            }
        }
        let vertex_count = self.vertex_count();
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(BufferError::IndexOutOfRange {
                index,
                vertex_count,
            });
        }
        Ok(())
    }

    /// Area-weighted per-vertex normals for buffers imported without normals.
    pub fn compute_normals(positions: &[f32], indices: &[u32]) -> Vec<f32> {
        let vertex_count = positions.len() / 3;
        let mut acc = vec![Vec3::ZERO; vertex_count];
        let at = |i: u32| {
            let i = i as usize * 3;
            Vec3::new(positions[i], positions[i + 1], positions[i + 2])
        };
        for tri in indices.chunks_exact(3) {
            if tri.iter().any(|&i| i as usize >= vertex_count) {
                continue;
            }
            let (a, b, c) = (at(tri[0]), at(tri[1]), at(tri[2]));
            let n = (b - a).cross(c - a);
            for &i in tri {
                acc[i as usize] += n;
            }
        }
        acc.into_iter()
            .flat_map(|n| n.normalize_or_zero().to_array())
            .collect()
    }
}

/// Provenance and import-time heuristics attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMetadata {
    pub screen_coverage: f32,
    pub original_mesh_id: MeshId,
    pub file_id: FileId,
}

/// One imported mesh: buffers in local space plus its world placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub id: MeshId,
    pub name: String,
    pub buffers: MeshBuffers,
    /// World-space bounds of the transformed positions.
    pub bounds: Aabb,
    pub transform: MeshTransform,
    pub metadata: MeshMetadata,
}

impl GeometryRecord {
    /// Build a record, deriving world bounds from the transformed positions.
    pub fn new(
        id: MeshId,
        file_id: FileId,
        name: impl Into<String>,
        buffers: MeshBuffers,
        transform: MeshTransform,
    ) -> Result<Self, BufferError> {
        buffers.validate()?;
        let matrix = transform.matrix();
        let mut bounds = Aabb::empty();
        for i in 0..buffers.vertex_count() {
            let p = matrix.transform_point3(buffers.position(i));
            if !p.is_finite() {
                return Err(BufferError::NonFinite {
                    buffer: "world position",
                    offset: i * 3,
                });
            }
            bounds.extend(p);
        }
        Ok(Self {
            metadata: MeshMetadata {
                screen_coverage: 0.0,
                original_mesh_id: id.clone(),
                file_id,
            },
            id,
            name: name.into(),
            buffers,
            bounds,
            transform,
        })
    }

    pub fn info(&self) -> MeshInfo {
        MeshInfo {
            id: self.id.clone(),
            bounds: self.bounds,
            screen_coverage: self.metadata.screen_coverage,
        }
    }
}

/// Lightweight reference to a record as held by octree nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshInfo {
    pub id: MeshId,
    pub bounds: Aabb,
    pub screen_coverage: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshBuffers {
        MeshBuffers::new(
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn transform_default_is_identity() {
        let t = MeshTransform::default();
        assert!(t.is_identity());
        assert_eq!(t.matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn record_bounds_are_post_transform() {
        let transform = MeshTransform::Trs {
            position: Vec3::new(10.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(2.0),
        };
        let rec = GeometryRecord::new(
            MeshId::original(1),
            FileId::from_file_name("a"),
            "tri",
            triangle(),
            transform,
        )
        .unwrap();
        assert_eq!(rec.bounds.min, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(rec.bounds.max, Vec3::new(12.0, 2.0, 0.0));
        assert_eq!(rec.metadata.original_mesh_id, rec.id);
    }

    #[test]
    fn validate_rejects_out_of_range_index() {
        let mut b = triangle();
        b.indices = vec![0, 1, 3];
        assert_eq!(
            b.validate(),
            Err(BufferError::IndexOutOfRange {
                index: 3,
                vertex_count: 3
            })
        );
    }

    #[test]
    fn validate_rejects_non_finite_values() {
        let mut b = triangle();
        b.positions[3] = f32::INFINITY;
        assert_eq!(
            b.validate(),
            Err(BufferError::NonFinite {
                buffer: "position",
                offset: 3
            })
        );

        let mut b = triangle();
        b.normals[8] = f32::NAN;
        assert_eq!(
            b.validate(),
            Err(BufferError::NonFinite {
                buffer: "normal",
                offset: 8
            })
        );
    }

    #[test]
    fn record_rejects_transform_that_overflows() {
        let mut b = triangle();
        b.positions[3] = 1e30;
        let transform = MeshTransform::Trs {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(1e30),
        };
        let err = GeometryRecord::new(
            MeshId::original(1),
            FileId::from_file_name("a"),
            "big",
            b,
            transform,
        )
        .unwrap_err();
        assert!(matches!(err, BufferError::NonFinite { buffer: "world position", .. }));
    }

    #[test]
    fn validate_rejects_missing_buffers() {
        let b = MeshBuffers::default();
        assert_eq!(b.validate(), Err(BufferError::MissingPositions));
    }

    #[test]
    fn octants_tile_the_box() {
        let b = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let total: f32 = (0..8).map(|i| b.octant(i).volume()).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert_eq!(b.octant(0).max, Vec3::splat(0.5));
        assert_eq!(b.octant(7).min, Vec3::splat(0.5));
        assert_eq!(b.octant(3).min, Vec3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn computed_normals_face_up_for_xy_triangle() {
        let b = triangle();
        let n = MeshBuffers::compute_normals(&b.positions, &b.indices);
        assert_eq!(n, b.normals);
    }

    #[test]
    fn malformed_bounds_are_invalid() {
        let b = Aabb::new(Vec3::ONE, Vec3::ZERO);
        assert!(!b.is_valid());
        assert!(!Aabb::empty().is_valid());
    }
}
