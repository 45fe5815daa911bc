//! Triangle splitting along the surface of the other operand.

use rayon::prelude::*;
use resina_math::{Aabb3, Point3, Vec3};
use resina_mesh::{AabbMesh, TriangleMesh};

/// Distances below this count as lying on a plane (mm).
pub(crate) const PLANE_EPS: f64 = 1e-7;

/// A piece of an input triangle, wound like its source.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fragment {
    pub tri: [Point3; 3],
    pub normal: Vec3,
}

impl Fragment {
    pub fn centroid(&self) -> Point3 {
        Point3::from((self.tri[0].coords + self.tri[1].coords + self.tri[2].coords) / 3.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Plane {
    n: Vec3,
    d: f64,
}

impl Plane {
    fn through(n: Vec3, p: &Point3) -> Option<Self> {
        let n = n.try_normalize(1e-15)?;
        Some(Self { n, d: n.dot(&p.coords) })
    }

    fn of_triangle(t: &[Point3; 3]) -> Option<Self> {
        Self::through((t[1] - t[0]).cross(&(t[2] - t[0])), &t[0])
    }

    fn distance(&self, p: &Point3) -> f64 {
        self.n.dot(&p.coords) - self.d
    }
}

/// Cut every triangle of `target` along the triangles of `tool` it meets.
///
/// Non-coplanar neighbours contribute their supporting plane. Coplanar
/// neighbours contribute the planes through their edges, so the overlap
/// region ends up as separate fragments.
pub(crate) fn split_mesh(target: &TriangleMesh, tool: &AabbMesh) -> Vec<Fragment> {
    (0..target.num_triangles())
        .into_par_iter()
        .flat_map_iter(|i| {
            let tri = target.triangle(i);
            let normal = target.triangle_normal(i);
            let planes = cutting_planes(&tri, tool);
            split_triangle(tri, normal, &planes)
        })
        .collect()
}

fn cutting_planes(tri: &[Point3; 3], tool: &AabbMesh) -> Vec<Plane> {
    let Some(own) = Plane::of_triangle(tri) else {
        return Vec::new();
    };
    let bb = Aabb3::from_points(tri);
    let mut planes = Vec::new();

    for face in tool.query_box(&bb, PLANE_EPS) {
        let other = tool.mesh().triangle(face);
        let Some(plane) = Plane::of_triangle(&other) else {
            continue;
        };
        let da = tri.map(|p| plane.distance(&p));
        let db = other.map(|p| own.distance(&p));

        if da.iter().all(|d| d.abs() < PLANE_EPS) {
            for k in 0..3 {
                let (p, q) = (other[k], other[(k + 1) % 3]);
                if let Some(edge_plane) = Plane::through((q - p).cross(&plane.n), &p) {
                    planes.push(edge_plane);
                }
            }
        } else if straddles(&da) && straddles(&db) {
            planes.push(plane);
        }
    }
    planes
}

fn straddles(d: &[f64; 3]) -> bool {
    let pos = d.iter().any(|&x| x > PLANE_EPS);
    let neg = d.iter().any(|&x| x < -PLANE_EPS);
    pos && neg
}

fn split_triangle(tri: [Point3; 3], normal: Vec3, planes: &[Plane]) -> Vec<Fragment> {
    let mut pieces: Vec<Vec<Point3>> = vec![tri.to_vec()];
    for plane in planes {
        let mut next = Vec::with_capacity(pieces.len() + 1);
        for poly in pieces {
            let (front, back) = clip_polygon(&poly, plane);
            next.extend([front, back].into_iter().flatten());
        }
        pieces = next;
    }

    pieces
        .iter()
        .flat_map(|poly| {
            (1..poly.len() - 1).filter_map(move |k| {
                let t = [poly[0], poly[k], poly[k + 1]];
                let area2 = (t[1] - t[0]).cross(&(t[2] - t[0])).norm();
                (area2 > 1e-14).then_some(Fragment { tri: t, normal })
            })
        })
        .collect()
}

/// Split a convex polygon into the parts in front of and behind `plane`.
/// A side that does not exist is `None`.
fn clip_polygon(poly: &[Point3], plane: &Plane) -> (Option<Vec<Point3>>, Option<Vec<Point3>>) {
    let d: Vec<f64> = poly
        .iter()
        .map(|p| {
            let v = plane.distance(p);
            if v.abs() < PLANE_EPS {
                0.0
            } else {
                v
            }
        })
        .collect();

    if d.iter().all(|&v| v >= 0.0) {
        return (Some(poly.to_vec()), None);
    }
    if d.iter().all(|&v| v <= 0.0) {
        return (None, Some(poly.to_vec()));
    }

    let mut front = Vec::with_capacity(poly.len() + 1);
    let mut back = Vec::with_capacity(poly.len() + 1);
    let n = poly.len();
    for i in 0..n {
        let (p, q) = (poly[i], poly[(i + 1) % n]);
        let (dp, dq) = (d[i], d[(i + 1) % n]);
        if dp >= 0.0 {
            front.push(p);
        }
        if dp <= 0.0 {
            back.push(p);
        }
        if (dp > 0.0 && dq < 0.0) || (dp < 0.0 && dq > 0.0) {
            let x = p + (q - p) * (dp / (dp - dq));
            front.push(x);
            back.push(x);
        }
    }

    let keep = |v: Vec<Point3>| (v.len() >= 3).then_some(v);
    (keep(front), keep(back))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_mesh::primitives::cube;

    fn area(frags: &[Fragment]) -> f64 {
        frags
            .iter()
            .map(|f| (f.tri[1] - f.tri[0]).cross(&(f.tri[2] - f.tri[0])).norm() / 2.0)
            .sum()
    }

    #[test]
    fn test_clip_polygon_square() {
        let square = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ];
        let plane = Plane::through(Vec3::x(), &Point3::new(0.5, 0.0, 0.0)).unwrap();
        let (front, back) = clip_polygon(&square, &plane);
        assert_eq!(front.unwrap().len(), 4);
        assert_eq!(back.unwrap().len(), 4);
    }

    #[test]
    fn test_split_preserves_area() {
        let target = cube(2.0, 2.0, 2.0);
        let mut tool = cube(2.0, 2.0, 2.0);
        tool.translate(&Vec3::new(1.0, 1.0, 1.0));
        let frags = split_mesh(&target, &AabbMesh::new(tool));
        assert!(frags.len() > target.num_triangles());
        assert_relative_eq!(area(&frags), 24.0, epsilon = 1e-9);
    }
}
