//! Closed primitive meshes with outward-facing triangles.

use std::f64::consts::PI;

use resina_math::{Point3, MERGE_TOLERANCE};

use crate::mesh::TriangleMesh;

/// Axis-aligned box with its minimum corner at the origin.
pub fn cube(x: f64, y: f64, z: f64) -> TriangleMesh {
    let vertices = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(x, 0.0, 0.0),
        Point3::new(x, y, 0.0),
        Point3::new(0.0, y, 0.0),
        Point3::new(0.0, 0.0, z),
        Point3::new(x, 0.0, z),
        Point3::new(x, y, z),
        Point3::new(0.0, y, z),
    ];
    let indices = vec![
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [2, 3, 7],
        [2, 7, 6],
        [0, 4, 7],
        [0, 7, 3],
        [1, 2, 6],
        [1, 6, 5],
    ];
    TriangleMesh { vertices, indices }
}

/// Truncated cone along +Z with its base centered at the origin.
///
/// A zero `r_top` (or `r_bottom`) collapses that ring into an apex.
pub fn halfcone(height: f64, r_bottom: f64, r_top: f64, steps: usize) -> TriangleMesh {
    let steps = steps.max(3);
    let mut mesh = TriangleMesh::new();

    mesh.vertices.push(Point3::origin());
    mesh.vertices.push(Point3::new(0.0, 0.0, height));
    for i in 0..steps {
        let (s, c) = (2.0 * PI * i as f64 / steps as f64).sin_cos();
        mesh.vertices.push(Point3::new(r_bottom * c, r_bottom * s, 0.0));
        mesh.vertices.push(Point3::new(r_top * c, r_top * s, height));
    }

    let bottom = |i: usize| (2 + 2 * (i % steps)) as u32;
    let top = |i: usize| (3 + 2 * (i % steps)) as u32;
    for i in 0..steps {
        mesh.indices.push([0, bottom(i + 1), bottom(i)]);
        mesh.indices.push([1, top(i), top(i + 1)]);
        mesh.indices.push([bottom(i), bottom(i + 1), top(i + 1)]);
        mesh.indices.push([bottom(i), top(i + 1), top(i)]);
    }

    mesh.merge_vertices(MERGE_TOLERANCE);
    mesh
}

/// Cylinder along +Z with its base centered at the origin.
pub fn cylinder(radius: f64, height: f64, steps: usize) -> TriangleMesh {
    halfcone(height, radius, radius, steps)
}

/// Latitude/longitude sphere centered at the origin.
///
/// `steps` is the number of longitude segments; half as many latitude
/// bands are used.
pub fn sphere(radius: f64, steps: usize) -> TriangleMesh {
    let segments = steps.max(4);
    let rings = (segments / 2).max(2);
    let mut mesh = TriangleMesh::new();

    mesh.vertices.push(Point3::new(0.0, 0.0, radius));
    for j in 1..rings {
        let (sp, cp) = (PI * j as f64 / rings as f64).sin_cos();
        for i in 0..segments {
            let (sa, ca) = (2.0 * PI * i as f64 / segments as f64).sin_cos();
            mesh.vertices
                .push(Point3::new(radius * sp * ca, radius * sp * sa, radius * cp));
        }
    }
    let south = mesh.vertices.len() as u32;
    mesh.vertices.push(Point3::new(0.0, 0.0, -radius));

    let ring = |j: usize, i: usize| (1 + (j - 1) * segments + i % segments) as u32;
    for i in 0..segments {
        mesh.indices.push([0, ring(1, i), ring(1, i + 1)]);
    }
    for j in 1..rings - 1 {
        for i in 0..segments {
            let (a, b) = (ring(j, i), ring(j, i + 1));
            let (c, d) = (ring(j + 1, i + 1), ring(j + 1, i));
            mesh.indices.push([a, d, c]);
            mesh.indices.push([a, c, b]);
        }
    }
    for i in 0..segments {
        mesh.indices
            .push([south, ring(rings - 1, i + 1), ring(rings - 1, i)]);
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cylinder_is_closed_with_expected_volume() {
        let mesh = cylinder(1.0, 2.0, 64);
        assert!(mesh.is_closed());
        let exact = PI * 2.0;
        assert_relative_eq!(mesh.volume(), exact, max_relative = 0.01);
    }

    #[test]
    fn test_cone_apex_collapses() {
        let mesh = halfcone(3.0, 1.0, 0.0, 32);
        assert!(mesh.is_closed());
        let exact = PI * 3.0 / 3.0;
        assert_relative_eq!(mesh.volume(), exact, max_relative = 0.02);
        assert_relative_eq!(mesh.bounding_box().max.z, 3.0);
    }

    #[test]
    fn test_sphere_is_closed_and_outward() {
        let mesh = sphere(2.0, 48);
        assert!(mesh.is_closed());
        let exact = 4.0 / 3.0 * PI * 8.0;
        assert_relative_eq!(mesh.volume(), exact, max_relative = 0.03);
    }
}
