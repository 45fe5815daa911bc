//! 2D polygons on the bed plane.

use resina_math::{BoundingBox, Point2, Vec2};

/// A closed 2D polygon. The closing edge is implicit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polygon {
    /// Vertices in order.
    pub points: Vec<Point2>,
}

impl Polygon {
    /// Create a polygon from points.
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }

    /// Axis-aligned rectangle, counter-clockwise.
    pub fn rectangle(bb: &BoundingBox) -> Self {
        Self::new(bb.corners().to_vec())
    }

    /// Regular polygon approximating a circle, counter-clockwise.
    pub fn circle(center: Point2, radius: f64, steps: usize) -> Self {
        let steps = steps.max(3);
        Self::new(
            (0..steps)
                .map(|i| {
                    let (s, c) = (2.0 * std::f64::consts::PI * i as f64 / steps as f64).sin_cos();
                    Point2::new(center.x + radius * c, center.y + radius * s)
                })
                .collect(),
        )
    }

    /// Whether the polygon has fewer than three points.
    pub fn is_empty(&self) -> bool {
        self.points.len() < 3
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Signed area, positive for counter-clockwise winding.
    pub fn signed_area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let mut twice = 0.0;
        for i in 0..n {
            let (a, b) = (self.points[i], self.points[(i + 1) % n]);
            twice += a.x * b.y - b.x * a.y;
        }
        twice / 2.0
    }

    /// Absolute area.
    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// Counter-clockwise winding?
    pub fn is_ccw(&self) -> bool {
        self.signed_area() > 0.0
    }

    /// Force counter-clockwise winding.
    pub fn make_ccw(&mut self) {
        if self.signed_area() < 0.0 {
            self.points.reverse();
        }
    }

    /// Force clockwise winding.
    pub fn make_cw(&mut self) {
        if self.signed_area() > 0.0 {
            self.points.reverse();
        }
    }

    /// Move every point by `v`.
    pub fn translate(&mut self, v: &Vec2) {
        for p in &mut self.points {
            *p += v;
        }
    }

    /// Rotate about the origin by `angle` radians.
    pub fn rotate(&mut self, angle: f64) {
        let (s, c) = angle.sin_cos();
        for p in &mut self.points {
            *p = Point2::new(c * p.x - s * p.y, s * p.x + c * p.y);
        }
    }

    /// Even-odd point containment; boundary points count as inside.
    pub fn contains(&self, p: &Point2) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            if point_on_segment(p, &a, &b, 1e-9) {
                return true;
            }
            if (a.y > p.y) != (b.y > p.y) {
                let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if p.x < x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Area centroid, falling back to the vertex average for degenerate rings.
    pub fn centroid(&self) -> Point2 {
        let n = self.points.len();
        let a = self.signed_area();
        if n == 0 {
            return Point2::origin();
        }
        if a.abs() < 1e-12 {
            let sum = self.points.iter().fold(Vec2::zeros(), |acc, p| acc + p.coords);
            return Point2::from(sum / n as f64);
        }
        let mut c = Vec2::zeros();
        for i in 0..n {
            let (p, q) = (self.points[i], self.points[(i + 1) % n]);
            let cross = p.x * q.y - q.x * p.y;
            c += (p.coords + q.coords) * cross;
        }
        Point2::from(c / (6.0 * a))
    }

    /// Bounding box.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(&self.points)
    }

    /// Convex hull, counter-clockwise (monotone chain).
    pub fn convex_hull(&self) -> Polygon {
        convex_hull(&self.points)
    }

    /// Whether no two non-adjacent edges cross.
    pub fn is_simple(&self) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        for i in 0..n {
            let (a, b) = (self.points[i], self.points[(i + 1) % n]);
            for j in (i + 2)..n {
                if i == 0 && j == n - 1 {
                    continue;
                }
                let (c, d) = (self.points[j], self.points[(j + 1) % n]);
                if segments_cross(&a, &b, &c, &d) {
                    return false;
                }
            }
        }
        true
    }
}

/// A polygon with holes. The contour is counter-clockwise and the holes
/// are clockwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExPolygon {
    /// Outer boundary.
    pub contour: Polygon,
    /// Holes inside the contour.
    pub holes: Vec<Polygon>,
}

/// A set of disjoint polygons with holes.
pub type ExPolygons = Vec<ExPolygon>;

impl ExPolygon {
    /// Polygon without holes.
    pub fn new(mut contour: Polygon) -> Self {
        contour.make_ccw();
        Self {
            contour,
            holes: Vec::new(),
        }
    }

    /// Polygon with holes; windings are normalized.
    pub fn with_holes(contour: Polygon, holes: Vec<Polygon>) -> Self {
        let mut ex = Self::new(contour);
        ex.holes = holes
            .into_iter()
            .map(|mut h| {
                h.make_cw();
                h
            })
            .collect();
        ex
    }

    /// Whether the contour is degenerate.
    pub fn is_empty(&self) -> bool {
        self.contour.is_empty()
    }

    /// Contour area minus hole areas.
    pub fn area(&self) -> f64 {
        self.contour.area() - self.holes.iter().map(Polygon::area).sum::<f64>()
    }

    /// Inside the contour and not strictly inside any hole.
    pub fn contains(&self, p: &Point2) -> bool {
        self.contour.contains(p) && !self.holes.iter().any(|h| strictly_inside(h, p))
    }

    /// Move by `v`.
    pub fn translate(&mut self, v: &Vec2) {
        self.contour.translate(v);
        for h in &mut self.holes {
            h.translate(v);
        }
    }

    /// Rotate about the origin.
    pub fn rotate(&mut self, angle: f64) {
        self.contour.rotate(angle);
        for h in &mut self.holes {
            h.rotate(angle);
        }
    }

    /// Bounding box of the contour.
    pub fn bounding_box(&self) -> BoundingBox {
        self.contour.bounding_box()
    }

    /// Convex hull of the contour.
    pub fn convex_hull(&self) -> Polygon {
        self.contour.convex_hull()
    }

    /// Non-degenerate, simple contour with positive area.
    pub fn is_valid(&self) -> bool {
        !self.contour.is_empty() && self.area() > 0.0 && self.contour.is_simple()
    }
}

/// Total area of a polygon set.
pub fn total_area(polys: &[ExPolygon]) -> f64 {
    polys.iter().map(ExPolygon::area).sum()
}

/// Bounding box of a polygon set.
pub fn bounding_box_of(polys: &[ExPolygon]) -> BoundingBox {
    let mut bb = BoundingBox::empty();
    for p in polys {
        bb.merge(&p.bounding_box());
    }
    bb
}

/// Convex hull of a point set, counter-clockwise without repeated points.
pub fn convex_hull(points: &[Point2]) -> Polygon {
    let mut pts: Vec<Point2> = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup_by(|a, b| (*a - *b).norm_squared() < 1e-18);
    if pts.len() < 3 {
        return Polygon::new(pts);
    }

    let cross = |o: &Point2, a: &Point2, b: &Point2| (a - o).perp(&(b - o));
    let mut lower: Vec<Point2> = Vec::new();
    for p in &pts {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }
    let mut upper: Vec<Point2> = Vec::new();
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    Polygon::new(lower)
}

fn strictly_inside(poly: &Polygon, p: &Point2) -> bool {
    let n = poly.points.len();
    if n < 3 {
        return false;
    }
    for i in 0..n {
        if point_on_segment(p, &poly.points[i], &poly.points[(i + 1) % n], 1e-9) {
            return false;
        }
    }
    poly.contains(p)
}

fn point_on_segment(p: &Point2, a: &Point2, b: &Point2, tol: f64) -> bool {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 < tol * tol {
        return (p - a).norm() <= tol;
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (a + ab * t - p).norm() <= tol
}

/// Proper crossing of two segments (shared endpoints and touching do not count).
pub fn segments_cross(a: &Point2, b: &Point2, c: &Point2, d: &Point2) -> bool {
    let d1 = (b - a).perp(&(c - a));
    let d2 = (b - a).perp(&(d - a));
    let d3 = (d - c).perp(&(a - c));
    let d4 = (d - c).perp(&(b - c));
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}
