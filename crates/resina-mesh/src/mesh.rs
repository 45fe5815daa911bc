//! Indexed triangle mesh.

use std::collections::HashMap;

use resina_math::{Aabb3, Point3, Transform, Vec3};

use crate::error::{MeshError, Result};

/// An indexed triangle set: shared vertices plus counter-clockwise
/// (outward facing) vertex triples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    /// Vertex positions (mm).
    pub vertices: Vec<Point3>,
    /// Triangles as indices into `vertices`.
    pub indices: Vec<[u32; 3]>,
}

impl TriangleMesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mesh from parts, checking that every index is in range.
    pub fn from_parts(vertices: Vec<Point3>, indices: Vec<[u32; 3]>) -> Result<Self> {
        let count = vertices.len();
        for (triangle, face) in indices.iter().enumerate() {
            if let Some(&index) = face.iter().find(|&&i| i as usize >= count) {
                return Err(MeshError::IndexOutOfRange {
                    triangle,
                    index,
                    count,
                });
            }
        }
        Ok(Self { vertices, indices })
    }

    /// Build a triangle soup where every triangle owns its three vertices.
    pub fn from_triangles(triangles: &[[Point3; 3]]) -> Self {
        let mut mesh = Self::new();
        mesh.vertices.reserve(triangles.len() * 3);
        mesh.indices.reserve(triangles.len());
        for tri in triangles {
            let base = mesh.vertices.len() as u32;
            mesh.vertices.extend_from_slice(tri);
            mesh.indices.push([base, base + 1, base + 2]);
        }
        mesh
    }

    /// Whether the mesh has no triangles.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of triangles.
    pub fn num_triangles(&self) -> usize {
        self.indices.len()
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Remove all geometry.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
    }

    /// Corner positions of triangle `i`.
    pub fn triangle(&self, i: usize) -> [Point3; 3] {
        let [a, b, c] = self.indices[i];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Iterate over triangle corner positions.
    pub fn triangles(&self) -> impl Iterator<Item = [Point3; 3]> + '_ {
        (0..self.indices.len()).map(|i| self.triangle(i))
    }

    /// Unit normal of triangle `i`, zero for degenerate triangles.
    pub fn triangle_normal(&self, i: usize) -> Vec3 {
        let [a, b, c] = self.triangle(i);
        (b - a).cross(&(c - a)).try_normalize(0.0).unwrap_or_else(Vec3::zeros)
    }

    /// Append another mesh. Vertices are not deduplicated.
    pub fn merge(&mut self, other: &TriangleMesh) {
        let offset = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend(
            other
                .indices
                .iter()
                .map(|t| [t[0] + offset, t[1] + offset, t[2] + offset]),
        );
    }

    /// Deduplicate vertices closer than `tol`, then drop triangles that
    /// collapsed and vertices nothing references.
    pub fn merge_vertices(&mut self, tol: f64) {
        let inv = 1.0 / tol.max(f64::MIN_POSITIVE);
        let key = |p: &Point3| {
            (
                (p.x * inv).round() as i64,
                (p.y * inv).round() as i64,
                (p.z * inv).round() as i64,
            )
        };

        let mut lookup: HashMap<(i64, i64, i64), u32> = HashMap::with_capacity(self.vertices.len());
        let mut vertices = Vec::with_capacity(self.vertices.len());
        let remap: Vec<u32> = self
            .vertices
            .iter()
            .map(|p| {
                *lookup.entry(key(p)).or_insert_with(|| {
                    vertices.push(*p);
                    (vertices.len() - 1) as u32
                })
            })
            .collect();

        self.vertices = vertices;
        self.indices = self
            .indices
            .iter()
            .map(|t| [remap[t[0] as usize], remap[t[1] as usize], remap[t[2] as usize]])
            .filter(|t| t[0] != t[1] && t[1] != t[2] && t[0] != t[2])
            .collect();
        self.compact();
    }

    /// Drop vertices that no triangle references.
    pub fn compact(&mut self) {
        let mut remap = vec![u32::MAX; self.vertices.len()];
        let mut vertices = Vec::with_capacity(self.vertices.len());
        for tri in &mut self.indices {
            for idx in tri.iter_mut() {
                let slot = &mut remap[*idx as usize];
                if *slot == u32::MAX {
                    *slot = vertices.len() as u32;
                    vertices.push(self.vertices[*idx as usize]);
                }
                *idx = *slot;
            }
        }
        self.vertices = vertices;
    }

    /// Move every vertex by `v`.
    pub fn translate(&mut self, v: &Vec3) {
        for p in &mut self.vertices {
            *p += v;
        }
    }

    /// Apply an affine transform. Mirroring transforms also flip the
    /// winding so normals keep pointing outward.
    pub fn transform(&mut self, trafo: &Transform) {
        for p in &mut self.vertices {
            *p = trafo.apply_point(p);
        }
        if trafo.linear_determinant() < 0.0 {
            self.flip();
        }
    }

    /// Reverse the winding of every triangle.
    pub fn flip(&mut self) {
        for t in &mut self.indices {
            t.swap(1, 2);
        }
    }

    /// Signed enclosed volume (mm³), positive for outward-facing meshes.
    pub fn volume(&self) -> f64 {
        self.triangles()
            .map(|[a, b, c]| a.coords.dot(&b.coords.cross(&c.coords)))
            .sum::<f64>()
            / 6.0
    }

    /// Bounding box over referenced and unreferenced vertices alike.
    pub fn bounding_box(&self) -> Aabb3 {
        Aabb3::from_points(&self.vertices)
    }

    /// Whether every edge is shared by exactly two triangles with
    /// opposite orientation.
    pub fn is_closed(&self) -> bool {
        let mut edges: HashMap<(u32, u32), i32> = HashMap::new();
        for t in &self.indices {
            for k in 0..3 {
                let (a, b) = (t[k], t[(k + 1) % 3]);
                let (key, dir) = if a < b { ((a, b), 1) } else { ((b, a), -1) };
                *edges.entry(key).or_insert(0) += dir;
            }
        }
        !edges.is_empty() && edges.values().all(|&v| v == 0)
    }

    /// Split into connected components (triangles sharing a vertex index).
    pub fn split(&self) -> Vec<TriangleMesh> {
        let n = self.vertices.len();
        let mut parent: Vec<usize> = (0..n).collect();

        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        for t in &self.indices {
            let r0 = find(&mut parent, t[0] as usize);
            for &v in &t[1..] {
                let r = find(&mut parent, v as usize);
                if r != r0 {
                    parent[r] = r0;
                }
            }
        }

        let mut component_of_root: HashMap<usize, usize> = HashMap::new();
        let mut parts: Vec<TriangleMesh> = Vec::new();
        for t in &self.indices {
            let root = find(&mut parent, t[0] as usize);
            let idx = *component_of_root.entry(root).or_insert_with(|| {
                parts.push(TriangleMesh::new());
                parts.len() - 1
            });
            let part = &mut parts[idx];
            let base = part.vertices.len() as u32;
            part.vertices.extend(t.iter().map(|&v| self.vertices[v as usize]));
            part.indices.push([base, base + 1, base + 2]);
        }

        for part in &mut parts {
            part.merge_vertices(resina_math::MERGE_TOLERANCE);
        }
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::cube;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_parts_rejects_bad_index() {
        let err = TriangleMesh::from_parts(vec![Point3::origin()], vec![[0, 1, 0]]).unwrap_err();
        assert!(matches!(err, MeshError::IndexOutOfRange { index: 1, .. }));
    }

    #[test]
    fn test_cube_volume_and_closed() {
        let mesh = cube(2.0, 3.0, 4.0);
        assert_relative_eq!(mesh.volume(), 24.0, epsilon = 1e-9);
        assert!(mesh.is_closed());

        let mut flipped = mesh.clone();
        flipped.flip();
        assert_relative_eq!(flipped.volume(), -24.0, epsilon = 1e-9);
    }

    #[test]
    fn test_merge_offsets_indices() {
        let mut a = cube(1.0, 1.0, 1.0);
        let mut b = cube(1.0, 1.0, 1.0);
        b.translate(&Vec3::new(5.0, 0.0, 0.0));
        let nv = a.num_vertices() as u32;
        a.merge(&b);
        assert_eq!(a.num_triangles(), 24);
        assert!(a.indices[12..].iter().all(|t| t.iter().all(|&i| i >= nv)));
        assert_relative_eq!(a.volume(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_merge_vertices_dedups_soup() {
        let mesh = cube(1.0, 1.0, 1.0);
        let mut soup = TriangleMesh::from_triangles(&mesh.triangles().collect::<Vec<_>>());
        assert_eq!(soup.num_vertices(), 36);
        assert!(!soup.is_closed());
        soup.merge_vertices(1e-6);
        assert_eq!(soup.num_vertices(), 8);
        assert!(soup.is_closed());
    }

    #[test]
    fn test_split_components() {
        let mut a = cube(1.0, 1.0, 1.0);
        let mut b = cube(1.0, 1.0, 1.0);
        b.translate(&Vec3::new(3.0, 0.0, 0.0));
        a.merge(&b);
        let parts = a.split();
        assert_eq!(parts.len(), 2);
        for p in &parts {
            assert_relative_eq!(p.volume(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_mirror_transform_keeps_positive_volume() {
        let mut mesh = cube(1.0, 2.0, 3.0);
        mesh.transform(&Transform::scale(-1.0, 1.0, 1.0));
        assert_relative_eq!(mesh.volume(), 6.0, epsilon = 1e-9);
        assert_relative_eq!(mesh.bounding_box().min.x, -1.0);
    }
}
