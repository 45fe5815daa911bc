//! Operand validity checks.

use rayon::prelude::*;
use resina_math::{Aabb3, Point3, EPSILON, MERGE_TOLERANCE};
use resina_mesh::index::ray_triangle;
use resina_mesh::{AabbMesh, TriangleMesh};

/// Outcome of [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshValidation {
    /// The mesh has no triangles.
    pub empty: bool,
    /// Every edge is shared by two opposite triangles and the volume is positive.
    pub bounds_volume: bool,
    /// Two non-adjacent triangles cross each other.
    pub self_intersecting: bool,
}

impl MeshValidation {
    /// Usable as a boolean operand.
    pub fn is_valid(&self) -> bool {
        !self.empty && self.bounds_volume && !self.self_intersecting
    }
}

/// Run every check on `mesh`.
pub fn validate(mesh: &TriangleMesh) -> MeshValidation {
    if mesh.is_empty() {
        return MeshValidation {
            empty: true,
            bounds_volume: false,
            self_intersecting: false,
        };
    }
    let mut merged = mesh.clone();
    merged.merge_vertices(MERGE_TOLERANCE);
    MeshValidation {
        empty: false,
        bounds_volume: bounds_volume(&merged),
        self_intersecting: self_intersects(&merged),
    }
}

/// Closed, consistently oriented and enclosing a positive volume.
pub fn does_bound_a_volume(mesh: &TriangleMesh) -> bool {
    let mut merged = mesh.clone();
    merged.merge_vertices(MERGE_TOLERANCE);
    bounds_volume(&merged)
}

/// Whether any two triangles not sharing a vertex cross.
pub fn does_self_intersect(mesh: &TriangleMesh) -> bool {
    let mut merged = mesh.clone();
    merged.merge_vertices(MERGE_TOLERANCE);
    self_intersects(&merged)
}

fn bounds_volume(merged: &TriangleMesh) -> bool {
    merged.is_closed() && merged.volume() > EPSILON
}

fn self_intersects(merged: &TriangleMesh) -> bool {
    let index = AabbMesh::new(merged.clone());
    (0..merged.num_triangles()).into_par_iter().any(|i| {
        let ti = merged.indices[i];
        let a = merged.triangle(i);
        let bb = Aabb3::from_points(&a);
        index.query_box(&bb, 0.0).into_iter().any(|j| {
            if j <= i {
                return false;
            }
            let tj = merged.indices[j];
            if ti.iter().any(|v| tj.contains(v)) {
                return false;
            }
            let b = merged.triangle(j);
            edges_pierce(&a, &b) || edges_pierce(&b, &a)
        })
    })
}

fn edges_pierce(edges_of: &[Point3; 3], tri: &[Point3; 3]) -> bool {
    (0..3).any(|k| {
        let (p, q) = (edges_of[k], edges_of[(k + 1) % 3]);
        let dir = q - p;
        let len = dir.norm();
        if len < 1e-12 {
            return false;
        }
        ray_triangle(&p, &(dir / len), tri).is_some_and(|t| t > 1e-9 && t < len - 1e-9)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use resina_math::Vec3;
    use resina_mesh::primitives::{cube, sphere};

    #[test]
    fn test_valid_primitives() {
        assert!(validate(&cube(1.0, 2.0, 3.0)).is_valid());
        assert!(validate(&sphere(2.0, 24)).is_valid());
    }

    #[test]
    fn test_empty_and_open() {
        assert!(validate(&TriangleMesh::new()).empty);
        let mut open = cube(1.0, 1.0, 1.0);
        open.indices.pop();
        let v = validate(&open);
        assert!(!v.bounds_volume);
        assert!(!v.is_valid());
    }

    #[test]
    fn test_overlapping_shells_self_intersect() {
        let mut m = cube(2.0, 2.0, 2.0);
        let mut other = cube(2.0, 2.0, 2.0);
        other.translate(&Vec3::new(1.0, 1.0, 1.0));
        m.merge(&other);
        assert!(does_self_intersect(&m));
        assert!(!does_self_intersect(&cube(1.0, 1.0, 1.0)));
    }
}
