//! Boundary with the external rendering layer.

use glam::Mat4;
use meshstream_common::{CoverageTier, FileId, MeshId};
use meshstream_decimate::SimplifiedMesh;
use meshstream_merge::{MergedNodeMesh, OriginalMeshKey, node_color};

/// What a renderable stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshRole {
    /// One source mesh, drawn on its own.
    Original { mesh_id: MeshId, file_id: FileId },
    MergedHighCoverage {
        node_number: u32,
        original_mesh_keys: Vec<OriginalMeshKey>,
    },
    MergedLowCoverage {
        node_number: u32,
        original_mesh_keys: Vec<OriginalMeshKey>,
    },
}

/// Geometry handed to the renderer, which owns it until disposal.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderableMesh {
    pub name: String,
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub indices: Vec<u32>,
    pub transform: Mat4,
    pub tint: [f32; 3],
    pub role: MeshRole,
}

impl RenderableMesh {
    /// Merged buffers are already in world space.
    pub fn from_merged(mesh: MergedNodeMesh) -> Self {
        let role = match mesh.tier {
            CoverageTier::High => MeshRole::MergedHighCoverage {
                node_number: mesh.node_number,
                original_mesh_keys: mesh.original_mesh_keys,
            },
            CoverageTier::Low => MeshRole::MergedLowCoverage {
                node_number: mesh.node_number,
                original_mesh_keys: mesh.original_mesh_keys,
            },
        };
        Self {
            name: mesh.name,
            positions: mesh.buffers.positions,
            normals: mesh.buffers.normals,
            indices: mesh.buffers.indices,
            transform: Mat4::IDENTITY,
            tint: node_color(mesh.node_number),
            role,
        }
    }

    /// `None` for error-tagged records.
    pub fn from_simplified(mesh: &SimplifiedMesh) -> Option<Self> {
        let buffers = mesh.buffers()?;
        Some(Self {
            name: mesh.mesh_id.clone(),
            positions: buffers.positions.clone(),
            normals: buffers.normals.clone(),
            indices: buffers.indices.clone(),
            transform: mesh.transform.matrix(),
            tint: [0.8, 0.8, 0.8],
            role: MeshRole::Original {
                mesh_id: mesh.original_mesh_id.clone(),
                file_id: mesh.file_id.clone(),
            },
        })
    }

    pub fn node_number(&self) -> Option<u32> {
        match &self.role {
            MeshRole::Original { .. } => None,
            MeshRole::MergedHighCoverage { node_number, .. }
            | MeshRole::MergedLowCoverage { node_number, .. } => Some(*node_number),
        }
    }

    pub fn tier(&self) -> Option<CoverageTier> {
        match &self.role {
            MeshRole::Original { .. } => None,
            MeshRole::MergedHighCoverage { .. } => Some(CoverageTier::High),
            MeshRole::MergedLowCoverage { .. } => Some(CoverageTier::Low),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }
}

/// Scene graph side of streaming. Called only from the streaming thread.
pub trait RenderSink {
    /// Take ownership of a loaded node's geometry.
    fn attach(&mut self, mesh: RenderableMesh);

    /// Drop a node's geometry and free its buffers.
    fn dispose(&mut self, node_number: u32, tier: CoverageTier);

    /// Show or hide one source mesh inside a resident merged node.
    fn set_source_visible(&mut self, node_number: u32, mesh_id: &MeshId, visible: bool);

    /// Show or hide a whole attached node, for frustum culling.
    fn set_node_visible(&mut self, node_number: u32, tier: CoverageTier, visible: bool);
}
