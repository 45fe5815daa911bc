//! Bounding volume hierarchy over a triangle mesh for ray and distance queries.

use resina_math::{Aabb3, Point3, Vec3};

use crate::mesh::TriangleMesh;

const LEAF_SIZE: usize = 4;

/// Tilted probe directions for inside tests; they avoid running exactly
/// along edges of axis-aligned geometry.
const PROBE_DIRS: [[f64; 3]; 3] = [
    [1.0, 1e-7, 1.3e-7],
    [-1.1e-7, 1.0, 0.7e-7],
    [0.9e-7, -1.2e-7, 1.0],
];

/// Result of a ray query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Distance along the (unit) ray direction, `INFINITY` on a miss.
    pub distance: f64,
    /// Index of the hit triangle.
    pub face: Option<usize>,
    /// Unit normal of the hit triangle.
    pub normal: Vec3,
    /// The ray left through the back of the face, so its origin is inside.
    pub is_inside: bool,
}

impl Hit {
    /// A miss.
    pub fn none() -> Self {
        Self {
            distance: f64::INFINITY,
            face: None,
            normal: Vec3::zeros(),
            is_inside: false,
        }
    }

    /// Whether anything was hit.
    pub fn is_hit(&self) -> bool {
        self.face.is_some()
    }
}

/// Closest-point query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Closest {
    /// Squared distance to the closest point.
    pub squared_distance: f64,
    /// Triangle containing the closest point.
    pub face: usize,
    /// The closest point on the surface.
    pub point: Point3,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf { bb: Aabb3, start: usize, end: usize },
    Inner { bb: Aabb3, left: usize, right: usize },
}

impl Node {
    fn bb(&self) -> &Aabb3 {
        match self {
            Node::Leaf { bb, .. } | Node::Inner { bb, .. } => bb,
        }
    }
}

/// A mesh with an AABB tree for ray casting and distance queries.
#[derive(Debug, Clone)]
pub struct AabbMesh {
    mesh: TriangleMesh,
    nodes: Vec<Node>,
    order: Vec<usize>,
    normals: Vec<Vec3>,
}

impl AabbMesh {
    /// Build the tree over `mesh`.
    pub fn new(mesh: TriangleMesh) -> Self {
        let normals = (0..mesh.num_triangles())
            .map(|i| mesh.triangle_normal(i))
            .collect();
        let mut index = Self {
            order: (0..mesh.num_triangles()).collect(),
            mesh,
            nodes: Vec::new(),
            normals,
        };
        if !index.order.is_empty() {
            let centroids: Vec<Point3> = index
                .mesh
                .triangles()
                .map(|[a, b, c]| Point3::from((a.coords + b.coords + c.coords) / 3.0))
                .collect();
            let n = index.order.len();
            index.build(&centroids, 0, n);
        }
        index
    }

    /// The indexed mesh.
    pub fn mesh(&self) -> &TriangleMesh {
        &self.mesh
    }

    /// Unit normal of triangle `face`.
    pub fn face_normal(&self, face: usize) -> Vec3 {
        self.normals[face]
    }

    /// Lowest Z of the mesh.
    pub fn ground_level(&self) -> f64 {
        self.mesh.bounding_box().min.z
    }

    fn build(&mut self, centroids: &[Point3], start: usize, end: usize) -> usize {
        let mut bb = Aabb3::empty();
        let mut cb = Aabb3::empty();
        for &t in &self.order[start..end] {
            for p in self.mesh.triangle(t) {
                bb.include_point(&p);
            }
            cb.include_point(&centroids[t]);
        }

        let slot = self.nodes.len();
        if end - start <= LEAF_SIZE {
            self.nodes.push(Node::Leaf { bb, start, end });
            return slot;
        }

        let axis = cb.longest_axis();
        let mid = (start + end) / 2;
        self.order[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
            centroids[a][axis].total_cmp(&centroids[b][axis])
        });

        self.nodes.push(Node::Leaf { bb, start, end });
        let left = self.build(centroids, start, mid);
        let right = self.build(centroids, mid, end);
        self.nodes[slot] = Node::Inner { bb, left, right };
        slot
    }

    /// Nearest intersection of the ray `src + t * dir`, `t > 0`.
    pub fn query_ray_hit(&self, src: &Point3, dir: &Vec3) -> Hit {
        let Some(dir) = dir.try_normalize(0.0) else {
            return Hit::none();
        };
        let mut best = Hit::none();
        self.walk_ray(src, &dir, &mut |face, t| {
            if t < best.distance {
                best = self.make_hit(face, t, &dir);
            }
        });
        best
    }

    /// Every intersection of the ray, nearest first.
    pub fn query_ray_hits(&self, src: &Point3, dir: &Vec3) -> Vec<Hit> {
        let Some(dir) = dir.try_normalize(0.0) else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        self.walk_ray(src, &dir, &mut |face, t| hits.push(self.make_hit(face, t, &dir)));
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn make_hit(&self, face: usize, t: f64, dir: &Vec3) -> Hit {
        let normal = self.normals[face];
        Hit {
            distance: t,
            face: Some(face),
            normal,
            is_inside: normal.dot(dir) > 0.0,
        }
    }

    fn walk_ray(&self, src: &Point3, dir: &Vec3, visit: &mut impl FnMut(usize, f64)) {
        if self.nodes.is_empty() {
            return;
        }
        let inv = Vec3::new(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z);
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            if !ray_hits_box(src, &inv, node.bb()) {
                continue;
            }
            match *node {
                Node::Leaf { start, end, .. } => {
                    for &face in &self.order[start..end] {
                        if let Some(t) = ray_triangle(src, dir, &self.mesh.triangle(face)) {
                            visit(face, t);
                        }
                    }
                }
                Node::Inner { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
    }

    /// Triangles whose bounding boxes overlap `bb` (with `tol` slack).
    pub fn query_box(&self, bb: &Aabb3, tol: f64) -> Vec<usize> {
        let mut out = Vec::new();
        if self.nodes.is_empty() {
            return out;
        }
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            if !node.bb().overlaps(bb, tol) {
                continue;
            }
            match *node {
                Node::Leaf { start, end, .. } => {
                    out.extend(self.order[start..end].iter().copied().filter(|&f| {
                        Aabb3::from_points(&self.mesh.triangle(f)).overlaps(bb, tol)
                    }));
                }
                Node::Inner { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        out
    }

    /// Closest surface point to `p`, `None` for an empty mesh.
    pub fn closest(&self, p: &Point3) -> Option<Closest> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best: Option<Closest> = None;
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            let bound = best.map_or(f64::INFINITY, |b| b.squared_distance);
            if box_squared_distance(p, node.bb()) > bound {
                continue;
            }
            match *node {
                Node::Leaf { start, end, .. } => {
                    for &face in &self.order[start..end] {
                        let [a, b, c] = self.mesh.triangle(face);
                        let q = closest_point_on_triangle(p, &a, &b, &c);
                        let d2 = (q - p).norm_squared();
                        if best.map_or(true, |b| d2 < b.squared_distance) {
                            best = Some(Closest {
                                squared_distance: d2,
                                face,
                                point: q,
                            });
                        }
                    }
                }
                Node::Inner { left, right, .. } => {
                    let dl = box_squared_distance(p, self.nodes[left].bb());
                    let dr = box_squared_distance(p, self.nodes[right].bb());
                    if dl < dr {
                        stack.push(right);
                        stack.push(left);
                    } else {
                        stack.push(left);
                        stack.push(right);
                    }
                }
            }
        }
        best
    }

    /// Squared distance from `p` to the surface.
    pub fn squared_distance(&self, p: &Point3) -> f64 {
        self.closest(p).map_or(f64::INFINITY, |c| c.squared_distance)
    }

    /// Normal of the face nearest to `p`.
    pub fn normal_at(&self, p: &Point3) -> Option<Vec3> {
        self.closest(p).map(|c| self.normals[c.face])
    }

    /// Whether `p` is enclosed by the mesh (ray parity, majority of three probes).
    pub fn is_inside(&self, p: &Point3) -> bool {
        let votes = PROBE_DIRS
            .iter()
            .filter(|d| {
                let dir = Vec3::new(d[0], d[1], d[2]);
                self.query_ray_hits(p, &dir).len() % 2 == 1
            })
            .count();
        votes >= 2
    }

    /// Distance to the surface, negative inside.
    pub fn signed_distance(&self, p: &Point3) -> f64 {
        let d = self.squared_distance(p).sqrt();
        if self.is_inside(p) {
            -d
        } else {
            d
        }
    }
}

fn ray_hits_box(src: &Point3, inv: &Vec3, bb: &Aabb3) -> bool {
    let mut tmin = 0.0f64;
    let mut tmax = f64::INFINITY;
    for k in 0..3 {
        let t1 = (bb.min[k] - src[k]) * inv[k];
        let t2 = (bb.max[k] - src[k]) * inv[k];
        let (lo, hi) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        // NaN from 0 * inf means the ray runs inside the slab plane.
        if !lo.is_nan() {
            tmin = tmin.max(lo);
        }
        if !hi.is_nan() {
            tmax = tmax.min(hi);
        }
    }
    tmin <= tmax + 1e-9
}

fn box_squared_distance(p: &Point3, bb: &Aabb3) -> f64 {
    let mut d2 = 0.0;
    for k in 0..3 {
        let v = p[k];
        if v < bb.min[k] {
            d2 += (bb.min[k] - v).powi(2);
        } else if v > bb.max[k] {
            d2 += (v - bb.max[k]).powi(2);
        }
    }
    d2
}

/// Möller–Trumbore intersection; returns `t > 0` along `dir`.
pub fn ray_triangle(src: &Point3, dir: &Vec3, tri: &[Point3; 3]) -> Option<f64> {
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let h = dir.cross(&e2);
    let a = e1.dot(&h);
    if a.abs() < 1e-14 {
        return None;
    }
    let f = 1.0 / a;
    let s = src - tri[0];
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(&e1);
    let v = f * dir.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = f * e2.dot(&q);
    (t > 1e-12).then_some(t)
}

/// Closest point to `p` on triangle `abc` (Voronoi region walk).
pub fn closest_point_on_triangle(p: &Point3, a: &Point3, b: &Point3, c: &Point3) -> Point3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{cube, sphere};
    use approx::assert_relative_eq;

    #[test]
    fn test_ray_hit_from_outside_and_inside() {
        let index = AabbMesh::new(cube(10.0, 10.0, 10.0));

        let hit = index.query_ray_hit(&Point3::new(5.0, 5.0, 20.0), &-Vec3::z());
        assert!(hit.is_hit());
        assert_relative_eq!(hit.distance, 10.0, epsilon = 1e-9);
        assert!(!hit.is_inside);
        assert_relative_eq!(hit.normal, Vec3::z(), epsilon = 1e-12);

        let inner = index.query_ray_hit(&Point3::new(5.0, 5.0, 5.0), &Vec3::z());
        assert!(inner.is_inside);
        assert_relative_eq!(inner.distance, 5.0, epsilon = 1e-9);

        let miss = index.query_ray_hit(&Point3::new(20.0, 5.0, 5.0), &Vec3::z());
        assert!(!miss.is_hit());
    }

    #[test]
    fn test_distance_queries() {
        let index = AabbMesh::new(cube(10.0, 10.0, 10.0));
        assert_relative_eq!(index.squared_distance(&Point3::new(5.0, 5.0, 13.0)), 9.0, epsilon = 1e-9);
        assert_relative_eq!(index.signed_distance(&Point3::new(5.0, 5.0, 8.0)), -2.0, epsilon = 1e-9);
        let n = index.normal_at(&Point3::new(12.0, 5.0, 5.0)).unwrap();
        assert_relative_eq!(n, Vec3::x(), epsilon = 1e-12);
    }

    #[test]
    fn test_inside_sphere() {
        let index = AabbMesh::new(sphere(5.0, 32));
        assert!(index.is_inside(&Point3::origin()));
        assert!(index.is_inside(&Point3::new(0.0, 0.0, 4.0)));
        assert!(!index.is_inside(&Point3::new(0.0, 0.0, 5.5)));
        assert!(!index.is_inside(&Point3::new(6.0, 0.0, 0.0)));
    }
}
