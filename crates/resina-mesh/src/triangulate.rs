//! Ear-clipping triangulation of polygons with holes.

use resina_math::Point2;
use tracing::debug;

use crate::polygon::{segments_cross, ExPolygon};

/// Triangulate `ex` into counter-clockwise triangles.
///
/// Returns the vertex list (contour points followed by hole points) and
/// triangles indexing into it. Holes are joined to the contour with
/// zero-width bridges before clipping.
pub fn triangulate_expolygon(ex: &ExPolygon) -> (Vec<Point2>, Vec<[u32; 3]>) {
    let mut contour = ex.contour.clone();
    contour.make_ccw();

    let mut verts: Vec<Point2> = contour.points.clone();
    let mut ring: Vec<usize> = (0..verts.len()).collect();

    let mut holes: Vec<Vec<usize>> = Vec::with_capacity(ex.holes.len());
    for hole in &ex.holes {
        if hole.is_empty() {
            continue;
        }
        let mut h = hole.clone();
        h.make_cw();
        let start = verts.len();
        verts.extend_from_slice(&h.points);
        holes.push((start..verts.len()).collect());
    }

    // Rightmost holes first keeps later bridges from crossing earlier ones.
    holes.sort_by(|a, b| max_x(&verts, b).total_cmp(&max_x(&verts, a)));

    for (k, hole) in holes.iter().enumerate() {
        let (hi, _) = hole
            .iter()
            .enumerate()
            .max_by(|a, b| verts[*a.1].x.total_cmp(&verts[*b.1].x))
            .unwrap_or((0, &hole[0]));
        let hp = verts[hole[hi]];

        let others = &holes[k + 1..];
        let mut best: Option<(f64, usize)> = None;
        for (ri, &vi) in ring.iter().enumerate() {
            let d = (verts[vi] - hp).norm_squared();
            if best.is_some_and(|(bd, _)| bd <= d) {
                continue;
            }
            if bridge_visible(&verts, &ring, others, hole, &hp, &verts[vi]) {
                best = Some((d, ri));
            }
        }
        let Some((_, ri)) = best else {
            debug!(hole = k, "no visible bridge for hole, skipping");
            continue;
        };

        let mut spliced = Vec::with_capacity(ring.len() + hole.len() + 2);
        spliced.extend_from_slice(&ring[..=ri]);
        for j in 0..hole.len() {
            spliced.push(hole[(hi + j) % hole.len()]);
        }
        spliced.push(hole[hi]);
        spliced.push(ring[ri]);
        spliced.extend_from_slice(&ring[ri + 1..]);
        ring = spliced;
    }

    let mut triangles = Vec::with_capacity(ring.len().saturating_sub(2));
    ear_clip(&verts, ring, &mut triangles);
    (verts, triangles)
}

fn max_x(verts: &[Point2], idx: &[usize]) -> f64 {
    idx.iter().map(|&i| verts[i].x).fold(f64::NEG_INFINITY, f64::max)
}

fn bridge_visible(
    verts: &[Point2],
    ring: &[usize],
    others: &[Vec<usize>],
    hole: &[usize],
    a: &Point2,
    b: &Point2,
) -> bool {
    let crosses = |loop_: &[usize]| {
        let n = loop_.len();
        (0..n).any(|i| {
            let (p, q) = (verts[loop_[i]], verts[loop_[(i + 1) % n]]);
            segments_cross(a, b, &p, &q)
        })
    };
    !crosses(ring) && !crosses(hole) && !others.iter().any(|h| crosses(h))
}

fn ear_clip(verts: &[Point2], mut remaining: Vec<usize>, out: &mut Vec<[u32; 3]>) {
    while remaining.len() > 3 {
        let n = remaining.len();
        let mut clipped = false;

        for i in 0..n {
            let prev = remaining[(i + n - 1) % n];
            let cur = remaining[i];
            let next = remaining[(i + 1) % n];
            let (a, b, c) = (verts[prev], verts[cur], verts[next]);

            if (b - a).perp(&(c - a)) <= 0.0 {
                continue;
            }

            // Only reflex vertices can lie inside a convex corner's triangle.
            let blocked = (0..n).any(|k| {
                let j = remaining[k];
                let p = verts[j];
                if j == prev || j == cur || j == next || p == a || p == b || p == c {
                    return false;
                }
                let (pp, pn) = (verts[remaining[(k + n - 1) % n]], verts[remaining[(k + 1) % n]]);
                (p - pp).perp(&(pn - pp)) <= 0.0 && inside_triangle(&p, &a, &b, &c)
            });
            if blocked {
                continue;
            }

            out.push([prev as u32, cur as u32, next as u32]);
            remaining.remove(i);
            clipped = true;
            break;
        }

        if !clipped {
            debug!(left = remaining.len(), "ear clipping stalled on degenerate ring");
            return;
        }
    }

    if let [a, b, c] = remaining[..] {
        if (verts[b] - verts[a]).perp(&(verts[c] - verts[a])) > 0.0 {
            out.push([a as u32, b as u32, c as u32]);
        }
    }
}

fn inside_triangle(p: &Point2, a: &Point2, b: &Point2, c: &Point2) -> bool {
    let d1 = (b - a).perp(&(p - a));
    let d2 = (c - b).perp(&(p - b));
    let d3 = (a - c).perp(&(p - c));
    d1 >= 0.0 && d2 >= 0.0 && d3 >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::Polygon;
    use approx::assert_relative_eq;
    use resina_math::{BoundingBox, Vec2};

    fn area(verts: &[Point2], tris: &[[u32; 3]]) -> f64 {
        tris.iter()
            .map(|t| {
                let (a, b, c) = (verts[t[0] as usize], verts[t[1] as usize], verts[t[2] as usize]);
                (b - a).perp(&(c - a)) / 2.0
            })
            .sum()
    }

    #[test]
    fn test_concave_polygon() {
        let l_shape = Polygon::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 2.0),
            Point2::new(0.0, 2.0),
        ]);
        let (verts, tris) = triangulate_expolygon(&ExPolygon::new(l_shape));
        assert_eq!(tris.len(), 4);
        assert_relative_eq!(area(&verts, &tris), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_square_with_two_holes() {
        let outer = Polygon::rectangle(&BoundingBox::new(Point2::origin(), Point2::new(10.0, 10.0)));
        let mut h1 = Polygon::rectangle(&BoundingBox::new(Point2::origin(), Point2::new(2.0, 2.0)));
        let mut h2 = h1.clone();
        h1.translate(&Vec2::new(2.0, 4.0));
        h2.translate(&Vec2::new(6.0, 4.0));
        let ex = ExPolygon::with_holes(outer, vec![h1, h2]);

        let (verts, tris) = triangulate_expolygon(&ex);
        assert_relative_eq!(area(&verts, &tris), 92.0, epsilon = 1e-9);
        assert!(tris.iter().all(|t| {
            let (a, b, c) = (verts[t[0] as usize], verts[t[1] as usize], verts[t[2] as usize]);
            (b - a).perp(&(c - a)) > 0.0
        }));
    }
}
