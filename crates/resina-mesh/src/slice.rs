//! Mesh slicing: intersect a triangle mesh with horizontal planes.

use std::collections::HashMap;

use rayon::prelude::*;
use resina_math::Point2;

use crate::clipper::{closing, union_ex, OffsetJoinType};
use crate::mesh::TriangleMesh;
use crate::polygon::{ExPolygon, ExPolygons, Polygon};

/// Slice `mesh` at every height in `heights`.
///
/// Each layer is a set of disjoint polygons with holes. A positive
/// `closing_radius` additionally closes gaps narrower than twice the radius.
pub fn slice_mesh(mesh: &TriangleMesh, heights: &[f64], closing_radius: f64) -> Vec<ExPolygons> {
    if mesh.is_empty() {
        return vec![Vec::new(); heights.len()];
    }
    let tris = extract_triangles(mesh);
    heights
        .par_iter()
        .map(|&z| {
            let contours = slice_at(&tris, z);
            let layer = union_ex(&nest_contours(contours));
            if closing_radius > 0.0 {
                closing(&layer, closing_radius, OffsetJoinType::Miter)
            } else {
                layer
            }
        })
        .collect()
}

/// Slice a mesh made of overlapping closed solids without cavities.
///
/// Every contour is filled and the layer is their union, so a part
/// swallowed by another never turns into a hole.
pub fn slice_mesh_solid(mesh: &TriangleMesh, heights: &[f64], closing_radius: f64) -> Vec<ExPolygons> {
    if mesh.is_empty() {
        return vec![Vec::new(); heights.len()];
    }
    let tris = extract_triangles(mesh);
    heights
        .par_iter()
        .map(|&z| {
            let filled: ExPolygons = slice_at(&tris, z)
                .into_iter()
                .filter(|c| c.area() > 1e-12)
                .map(ExPolygon::new)
                .collect();
            let layer = union_ex(&filled);
            if closing_radius > 0.0 {
                closing(&layer, closing_radius, OffsetJoinType::Miter)
            } else {
                layer
            }
        })
        .collect()
}

/// Raw closed contours of `mesh` at height `z`, in no particular winding.
pub fn slice_contours(mesh: &TriangleMesh, z: f64) -> Vec<Polygon> {
    slice_at(&extract_triangles(mesh), z)
}

#[derive(Debug, Clone, Copy)]
struct Tri {
    v: [[f64; 3]; 3],
    z_min: f64,
    z_max: f64,
}

fn extract_triangles(mesh: &TriangleMesh) -> Vec<Tri> {
    mesh.triangles()
        .map(|t| {
            let v = t.map(|p| [p.x, p.y, p.z]);
            Tri {
                v,
                z_min: v[0][2].min(v[1][2]).min(v[2][2]),
                z_max: v[0][2].max(v[1][2]).max(v[2][2]),
            }
        })
        .collect()
}

type Key = (u64, u64);

fn key(p: &[f64; 2]) -> Key {
    // Normalize -0.0 so equal coordinates hash equally.
    ((p[0] + 0.0).to_bits(), (p[1] + 0.0).to_bits())
}

fn slice_at(tris: &[Tri], z: f64) -> Vec<Polygon> {
    let segments: Vec<([f64; 2], [f64; 2])> = tris
        .iter()
        .filter(|t| t.z_min <= z && t.z_max >= z)
        .filter_map(|t| triangle_plane_intersection(t, z))
        .collect();
    chain_segments(&segments)
}

/// Vertices exactly on the plane count as above it, so every crossing
/// triangle contributes exactly one segment.
fn triangle_plane_intersection(tri: &Tri, z: f64) -> Option<([f64; 2], [f64; 2])> {
    let above = tri.v.map(|v| v[2] >= z);
    if above.iter().all(|&a| a) || above.iter().all(|&a| !a) {
        return None;
    }
    let mut pts = Vec::with_capacity(2);
    for k in 0..3 {
        let (a, b) = (tri.v[k], tri.v[(k + 1) % 3]);
        if above[k] != above[(k + 1) % 3] {
            pts.push(edge_point(a, b, z));
        }
    }
    match pts[..] {
        [p, q] if p != q => Some((p, q)),
        _ => None,
    }
}

/// Interpolate with a canonical endpoint order so neighbouring triangles
/// produce bit-identical points on their shared edge.
fn edge_point(a: [f64; 3], b: [f64; 3], z: f64) -> [f64; 2] {
    let (lo, hi) = if (a[2], a[0], a[1]) <= (b[2], b[0], b[1]) { (a, b) } else { (b, a) };
    let t = (z - lo[2]) / (hi[2] - lo[2]);
    [lo[0] + t * (hi[0] - lo[0]), lo[1] + t * (hi[1] - lo[1])]
}

fn chain_segments(segments: &[([f64; 2], [f64; 2])]) -> Vec<Polygon> {
    let mut incident: HashMap<Key, Vec<usize>> = HashMap::with_capacity(segments.len() * 2);
    for (i, (a, b)) in segments.iter().enumerate() {
        incident.entry(key(a)).or_default().push(i);
        incident.entry(key(b)).or_default().push(i);
    }

    let mut used = vec![false; segments.len()];
    let mut contours = Vec::new();

    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (first, mut cursor) = segments[start];
        let mut chain = vec![Point2::new(first[0], first[1])];

        loop {
            if key(&cursor) == key(&first) {
                break;
            }
            chain.push(Point2::new(cursor[0], cursor[1]));
            let next = incident
                .get(&key(&cursor))
                .and_then(|list| list.iter().copied().find(|&s| !used[s]));
            let Some(s) = next else { break };
            used[s] = true;
            let (a, b) = segments[s];
            cursor = if key(&a) == key(&cursor) { b } else { a };
        }

        if chain.len() >= 3 {
            contours.push(Polygon::new(chain));
        }
    }
    contours
}

/// Assign holes to outer contours by containment depth.
pub fn nest_contours(mut contours: Vec<Polygon>) -> ExPolygons {
    contours.retain(|c| c.area() > 1e-12);
    contours.sort_by(|a, b| b.area().total_cmp(&a.area()));

    // parent[i]: smallest earlier (larger) contour containing contour i
    let mut parent: Vec<Option<usize>> = vec![None; contours.len()];
    let mut depth = vec![0usize; contours.len()];
    for i in 0..contours.len() {
        let probe = contours[i].points[0];
        for j in (0..i).rev() {
            if contours[j].contains(&probe) {
                parent[i] = Some(j);
                depth[i] = depth[j] + 1;
                break;
            }
        }
    }

    let mut out: Vec<ExPolygon> = Vec::new();
    let mut slot: HashMap<usize, usize> = HashMap::new();
    for i in 0..contours.len() {
        if depth[i] % 2 == 0 {
            slot.insert(i, out.len());
            out.push(ExPolygon::new(contours[i].clone()));
        }
    }
    for i in 0..contours.len() {
        if depth[i] % 2 == 1 {
            if let Some(&o) = parent[i].and_then(|p| slot.get(&p)) {
                let mut hole = contours[i].clone();
                hole.make_cw();
                out[o].holes.push(hole);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::total_area;
    use crate::primitives::{cube, cylinder};
    use approx::assert_relative_eq;
    use resina_math::{Transform, Vec3};

    #[test]
    fn test_slice_cube_layers() {
        let mesh = cube(10.0, 10.0, 10.0);
        let layers = slice_mesh(&mesh, &[0.5, 5.0, 9.5, 11.0], 0.0);
        assert_eq!(layers.len(), 4);
        for layer in &layers[..3] {
            assert_eq!(layer.len(), 1);
            assert_relative_eq!(total_area(layer), 100.0, epsilon = 1e-6);
        }
        assert!(layers[3].is_empty());
    }

    #[test]
    fn test_slice_tube_has_hole() {
        let mut outer = cylinder(5.0, 10.0, 48);
        let mut inner = cylinder(2.0, 10.0, 48);
        inner.flip();
        outer.merge(&inner);
        outer.transform(&Transform::translation(0.0, 0.0, 1.0));

        let layers = slice_mesh(&outer, &[5.0], 0.0);
        assert_eq!(layers[0].len(), 1);
        assert_eq!(layers[0][0].holes.len(), 1);
        let ring = std::f64::consts::PI * (25.0 - 4.0);
        assert_relative_eq!(total_area(&layers[0]), ring, max_relative = 0.01);
    }

    #[test]
    fn test_separate_islands() {
        let mut a = cube(2.0, 2.0, 2.0);
        let mut b = cube(2.0, 2.0, 2.0);
        b.translate(&Vec3::new(5.0, 0.0, 0.0));
        a.merge(&b);
        let layers = slice_mesh(&a, &[1.0], 0.0);
        assert_eq!(layers[0].len(), 2);
    }

    #[test]
    fn test_solid_slice_fills_nested_parts() {
        let mut outer = cylinder(5.0, 10.0, 48);
        let inner = cylinder(2.0, 12.0, 48);
        outer.merge(&inner);

        let nested = slice_mesh(&outer, &[5.0], 0.0);
        assert_eq!(nested[0][0].holes.len(), 1);

        let solid = slice_mesh_solid(&outer, &[5.0, 11.0], 0.0);
        assert_eq!(solid[0].len(), 1);
        assert!(solid[0][0].holes.is_empty());
        assert_relative_eq!(total_area(&solid[0]), std::f64::consts::PI * 25.0, max_relative = 0.01);
        assert_relative_eq!(total_area(&solid[1]), std::f64::consts::PI * 4.0, max_relative = 0.01);
    }
}
