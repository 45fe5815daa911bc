//! Convex outline helpers: inflation and no-fit polygons.

use resina_math::{Point2, Vec2};
use resina_mesh::polygon::convex_hull;
use resina_mesh::Polygon;

/// Largest arc step when rounding inflated corners.
const ARC_STEP: f64 = std::f64::consts::PI / 8.0;

/// Grow a counter-clockwise convex polygon by `delta`.
///
/// Corner arcs are circumscribed, so the result contains every point
/// within `delta` of the input.
pub fn inflate_convex(hull: &Polygon, delta: f64) -> Polygon {
    let n = hull.len();
    if delta <= 0.0 || n < 3 {
        return hull.clone();
    }
    let normal = |a: &Point2, b: &Point2| {
        let e = b - a;
        Vec2::new(e.y, -e.x).normalize()
    };

    let mut points = Vec::with_capacity(n * 4);
    for i in 0..n {
        let prev = hull.points[(i + n - 1) % n];
        let cur = hull.points[i];
        let next = hull.points[(i + 1) % n];
        let n1 = normal(&prev, &cur);
        let n2 = normal(&cur, &next);
        let a1 = n1.y.atan2(n1.x);
        let sweep = (n2.y.atan2(n2.x) - a1).rem_euclid(2.0 * std::f64::consts::PI);
        let steps = (sweep / ARC_STEP).ceil().max(1.0) as usize;
        let step = sweep / steps as f64;
        let r = delta / (step / 2.0).cos();
        for k in 0..=steps {
            let (s, c) = (a1 + step * k as f64).sin_cos();
            points.push(cur + Vec2::new(c, s) * r);
        }
    }
    convex_hull(&points)
}

/// Translations of `moving` that make it touch or overlap `fixed`.
///
/// Both polygons are convex; the interior of the result is where they
/// overlap.
pub fn no_fit_polygon(fixed: &Polygon, moving: &Polygon) -> Polygon {
    let mut sums = Vec::with_capacity(fixed.len() * moving.len());
    for p in &fixed.points {
        for q in &moving.points {
            sums.push(p - q.coords);
        }
    }
    convex_hull(&sums)
}

/// Whether `p` lies inside the counter-clockwise convex `poly` by more than
/// `tol`.
pub fn strictly_inside_convex(poly: &Polygon, p: &Point2, tol: f64) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    (0..n).all(|i| {
        let a = poly.points[i];
        let e = poly.points[(i + 1) % n] - a;
        e.perp(&(p - a)) > tol * e.norm()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_math::BoundingBox;

    fn square(size: f64) -> Polygon {
        Polygon::rectangle(&BoundingBox::new(Point2::origin(), Point2::new(size, size)))
    }

    #[test]
    fn test_inflate_contains_offset() {
        let grown = inflate_convex(&square(10.0), 2.0);
        let bb = grown.bounding_box();
        assert_relative_eq!(bb.min.x, -2.0 / (ARC_STEP / 2.0).cos(), epsilon = 1e-9);
        // Every point at distance 2 from the corner is covered.
        for k in 0..32 {
            let a = k as f64 / 32.0 * std::f64::consts::FRAC_PI_2;
            let p = Point2::new(10.0 + 2.0 * a.cos() * 0.999, 10.0 + 2.0 * a.sin() * 0.999);
            assert!(grown.contains(&p));
        }
        assert_eq!(inflate_convex(&square(1.0), 0.0), square(1.0));
    }

    #[test]
    fn test_nfp_of_squares() {
        let nfp = no_fit_polygon(&square(10.0), &square(4.0));
        let bb = nfp.bounding_box();
        assert_relative_eq!(bb.min.x, -4.0);
        assert_relative_eq!(bb.max.x, 10.0);
        assert!(strictly_inside_convex(&nfp, &Point2::new(0.0, 0.0), 1e-9));
        assert!(!strictly_inside_convex(&nfp, &Point2::new(10.0, 3.0), 1e-9));
        assert!(!strictly_inside_convex(&nfp, &Point2::new(-5.0, 0.0), 1e-9));
    }
}
