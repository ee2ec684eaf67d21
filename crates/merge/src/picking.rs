//! Mapping merged geometry back to its source meshes.

use meshstream_common::MeshId;

use crate::merger::{MergedNodeMesh, OriginalMeshKey};

/// Vertices `[start, start + count)` of a merged buffer belong to `mesh_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexRange {
    pub mesh_id: MeshId,
    pub start: usize,
    pub count: usize,
}

impl VertexRange {
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    pub fn contains(&self, vertex: usize) -> bool {
        vertex >= self.start && vertex < self.end()
    }
}

impl MergedNodeMesh {
    /// Per-source vertex ranges, in merge order.
    pub fn vertex_ranges(&self) -> Vec<VertexRange> {
        let mut start = 0;
        self.original_mesh_keys
            .iter()
            .map(|key| {
                let range = VertexRange {
                    mesh_id: key.mesh_id.clone(),
                    start,
                    count: key.vertex_count,
                };
                start += key.vertex_count;
                range
            })
            .collect()
    }

    pub fn source_for_vertex(&self, vertex: usize) -> Option<&OriginalMeshKey> {
        let mut start = 0;
        for key in &self.original_mesh_keys {
            if vertex < start + key.vertex_count {
                return Some(key);
            }
            start += key.vertex_count;
        }
        None
    }

    /// Source mesh of a picked triangle.
    pub fn source_for_face(&self, face: usize) -> Option<&OriginalMeshKey> {
        let first = *self.buffers.indices.get(face * 3)?;
        self.source_for_vertex(first as usize)
    }

    /// Per-vertex RGB colors: `highlight` over the range of `mesh_id`, `base` elsewhere.
    pub fn highlight_colors(&self, mesh_id: &MeshId, base: [f32; 3], highlight: [f32; 3]) -> Vec<f32> {
        let mut colors = Vec::with_capacity(self.buffers.vertex_count() * 3);
        for range in self.vertex_ranges() {
            let c = if &range.mesh_id == mesh_id { highlight } else { base };
            for _ in 0..range.count {
                colors.extend_from_slice(&c);
            }
        }
        colors
    }
}

/// Stable tint for a node: hue from `node_number % 100`, saturation 0.7, lightness 0.6.
pub fn node_color(node_number: u32) -> [f32; 3] {
    let hue = (node_number % 100) as f32 / 100.0;
    hsl_to_rgb(hue, 0.7, 0.6)
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> [f32; 3] {
    if s == 0.0 {
        return [l, l, l];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    [
        hue_channel(p, q, h + 1.0 / 3.0),
        hue_channel(p, q, h),
        hue_channel(p, q, h - 1.0 / 3.0),
    ]
}

fn hue_channel(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::{MergeSettings, merge_node};
    use glam::Vec3;
    use meshstream_common::{Aabb, FileId, GeometryRecord, MeshBuffers, MeshTransform};
    use meshstream_decimate::simplify;

    fn triangle_fan(vertices: usize) -> MeshBuffers {
        let mut positions = vec![0.0, 0.0, 0.0];
        let mut indices = Vec::new();
        for i in 1..vertices {
            let a = i as f32 * 0.3;
            positions.extend_from_slice(&[a.cos(), a.sin(), 0.0]);
            if i >= 2 {
                indices.extend_from_slice(&[0, i as u32 - 1, i as u32]);
            }
        }
        let normals = MeshBuffers::compute_normals(&positions, &indices);
        MeshBuffers::new(positions, normals, indices)
    }

    fn merged() -> MergedNodeMesh {
        let inputs: Vec<_> = [3, 5, 4]
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let r = GeometryRecord::new(
                    MeshId::original(i as u64 + 1),
                    FileId::from_file_name("a.json"),
                    "fan",
                    triangle_fan(v),
                    MeshTransform::identity(),
                )
                .unwrap();
                simplify(&r, 3.0)
            })
            .collect();
        let refs: Vec<_> = inputs.iter().collect();
        merge_node(1, Aabb::new(Vec3::splat(-1.0), Vec3::ONE), &refs, &MergeSettings::default())
            .low
            .unwrap()
    }

    #[test]
    fn ranges_are_contiguous_and_cover_buffer() {
        let m = merged();
        let ranges = m.vertex_ranges();
        assert_eq!(ranges.len(), 3);
        assert_eq!((ranges[0].start, ranges[0].count), (0, 3));
        assert_eq!((ranges[1].start, ranges[1].count), (3, 5));
        assert_eq!((ranges[2].start, ranges[2].count), (8, 4));
        assert_eq!(ranges[2].end(), m.buffers.vertex_count());
    }

    #[test]
    fn faces_map_to_their_source() {
        let m = merged();
        // fan(3) has 1 face, fan(5) has 3, fan(4) has 2
        assert_eq!(m.source_for_face(0).unwrap().mesh_id, MeshId::original(1));
        assert_eq!(m.source_for_face(1).unwrap().mesh_id, MeshId::original(2));
        assert_eq!(m.source_for_face(3).unwrap().mesh_id, MeshId::original(2));
        assert_eq!(m.source_for_face(4).unwrap().mesh_id, MeshId::original(3));
        assert!(m.source_for_face(6).is_none());
        assert!(m.source_for_vertex(12).is_none());
    }

    #[test]
    fn highlight_marks_only_selected_range() {
        let m = merged();
        let colors = m.highlight_colors(&MeshId::original(2), [0.0; 3], [1.0, 0.0, 0.0]);
        assert_eq!(colors.len(), m.buffers.positions.len());
        let red: Vec<_> = colors.chunks_exact(3).map(|c| c[0] == 1.0).collect();
        assert_eq!(red.iter().filter(|&&r| r).count(), 5);
        assert!(red[3..8].iter().all(|&r| r));
    }

    #[test]
    fn node_color_is_stable_and_in_range() {
        assert_eq!(node_color(7), node_color(107));
        assert_ne!(node_color(7), node_color(8));
        for n in 0..200 {
            assert!(node_color(n).iter().all(|c| (0.0..=1.0).contains(c)));
        }
        let red = node_color(0);
        assert!((red[0] - 0.88).abs() < 1e-4);
        assert!((red[1] - 0.32).abs() < 1e-4);
    }
}
