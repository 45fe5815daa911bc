//! Automatic support point placement.
//!
//! Layers are walked bottom up. A part with nothing under it is an island
//! and always gets a point. Regions that stick out past what the layer
//! below can carry are sampled on a global grid and along their outline;
//! a sample is dropped when a point already placed nearby carries it.

use std::collections::HashMap;

use rayon::prelude::*;
use resina_math::{down, Point2, Point3, Vec2, EPSILON};
use resina_mesh::clipper::{difference, intersection, offset, OffsetJoinType};
use resina_mesh::polygon::total_area;
use resina_mesh::{AabbMesh, ExPolygon, ExPolygons, Polygon};
use resina_support::SupportPoint;
use tracing::debug;

use crate::error::{PrintError, Result};

/// Grid spacing at 100% density (mm).
pub const BASE_SPACING_MM: f64 = 3.0;

/// Steepest wall, measured from vertical, that carries itself (degrees).
pub const SELF_SUPPORT_ANGLE_DEG: f64 = 55.0;

const MIN_OVERHANG_AREA: f64 = 1e-3;

/// Placement settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportPointsConfig {
    /// Density relative to the default, 1.0 = 100%.
    pub density_relative: f64,
    /// Points are never placed closer than this (mm).
    pub minimal_distance: f64,
    /// Diameter of the head that will grab each point (mm).
    pub head_diameter: f64,
}

impl Default for SupportPointsConfig {
    fn default() -> Self {
        Self {
            density_relative: 1.0,
            minimal_distance: 1.0,
            head_diameter: 0.4,
        }
    }
}

impl SupportPointsConfig {
    /// Distance between samples on overhangs.
    pub fn spacing(&self) -> f64 {
        let density = self.density_relative.max(0.01);
        (BASE_SPACING_MM / density.sqrt()).max(self.minimal_distance)
    }
}

struct Candidate {
    pos: Point2,
    island: bool,
}

/// Place support points for a model sliced at `heights`.
///
/// `layers[i]` is the cross section at `heights[i]`. `stop` is polled once
/// per layer.
pub fn generate_support_points(
    emesh: &AabbMesh,
    layers: &[ExPolygons],
    heights: &[f64],
    cfg: &SupportPointsConfig,
    stop: &dyn Fn() -> bool,
) -> Result<Vec<SupportPoint>> {
    let spacing = cfg.spacing();
    let head_r = 0.5 * cfg.head_diameter;
    let n = layers.len().min(heights.len());

    let candidates: Vec<Vec<Candidate>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let below = if i == 0 {
                None
            } else {
                Some((&layers[i - 1], heights[i] - heights[i - 1]))
            };
            layer_candidates(&layers[i], below, spacing, head_r)
        })
        .collect();

    let mut placed: Vec<SupportPoint> = Vec::new();
    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    let cell = |p: &Point2| ((p.x / spacing).floor() as i64, (p.y / spacing).floor() as i64);

    for (i, layer) in candidates.iter().enumerate() {
        if stop() {
            return Err(PrintError::Canceled);
        }
        for c in layer {
            let pos = snap_to_surface(emesh, &c.pos, heights[i], spacing);
            let (cx, cy) = cell(&c.pos);
            let mut covered = false;
            let mut crowded = false;
            for dx in -1..=1 {
                for dy in -1..=1 {
                    for &idx in grid.get(&(cx + dx, cy + dy)).into_iter().flatten() {
                        let p = &placed[idx];
                        let dxy = (Vec2::new(p.pos.x, p.pos.y) - c.pos.coords).norm();
                        if dxy < spacing && pos.z - p.pos.z < spacing {
                            covered = true;
                        }
                        if (pos - p.pos).norm() < cfg.minimal_distance {
                            crowded = true;
                        }
                    }
                }
            }
            if crowded || (covered && !c.island) {
                continue;
            }
            grid.entry((cx, cy)).or_default().push(placed.len());
            placed.push(SupportPoint {
                pos,
                head_front_radius: head_r,
                island: c.island,
            });
        }
    }

    debug!(points = placed.len(), layers = n, spacing, "support points generated");
    Ok(placed)
}

fn layer_candidates(
    layer: &ExPolygons,
    below: Option<(&ExPolygons, f64)>,
    spacing: f64,
    inset: f64,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for part in layer {
        let part = std::slice::from_ref(part);
        let (overhangs, island) = match below {
            None => (part.to_vec(), true),
            Some((prev, dz)) => {
                let touching = total_area(&intersection(part, prev)) > MIN_OVERHANG_AREA;
                let reach = dz * SELF_SUPPORT_ANGLE_DEG.to_radians().tan();
                let carried = offset(prev, reach, OffsetJoinType::Miter);
                (difference(part, &carried), !touching)
            }
        };
        if island {
            out.push(Candidate {
                pos: inner_point(&part[0]),
                island: true,
            });
        }
        for o in overhangs.iter().filter(|o| o.area() > MIN_OVERHANG_AREA) {
            // Samples keep off the rim; slivers thinner than the inset use
            // their outline as is.
            let mut inner = offset(std::slice::from_ref(o), -inset, OffsetJoinType::Miter);
            if inner.is_empty() {
                inner.push(o.clone());
            }
            for region in &inner {
                let samples = grid_samples(region, spacing).into_iter().chain(
                    std::iter::once(&region.contour)
                        .chain(region.holes.iter())
                        .flat_map(|c| outline_samples(c, spacing)),
                );
                out.extend(samples.map(|pos| Candidate { pos, island }));
            }
        }
    }
    out
}

fn inner_point(poly: &ExPolygon) -> Point2 {
    let c = poly.contour.centroid();
    if poly.contains(&c) {
        return c;
    }
    poly.contour.points.first().copied().unwrap_or(c)
}

fn grid_samples(poly: &ExPolygon, spacing: f64) -> Vec<Point2> {
    let bb = poly.bounding_box();
    let (x0, x1) = ((bb.min.x / spacing).ceil() as i64, (bb.max.x / spacing).floor() as i64);
    let (y0, y1) = ((bb.min.y / spacing).ceil() as i64, (bb.max.y / spacing).floor() as i64);
    let mut out = Vec::new();
    for iy in y0..=y1 {
        for ix in x0..=x1 {
            let p = Point2::new(ix as f64 * spacing, iy as f64 * spacing);
            if poly.contains(&p) {
                out.push(p);
            }
        }
    }
    out
}

fn outline_samples(contour: &Polygon, spacing: f64) -> Vec<Point2> {
    let pts = &contour.points;
    let mut out = Vec::new();
    let mut carry = 0.0;
    for (i, a) in pts.iter().enumerate() {
        let b = &pts[(i + 1) % pts.len()];
        let len = (b - a).norm();
        if len < EPSILON {
            continue;
        }
        let mut t = carry;
        while t < len {
            out.push(a + (b - a) * (t / len));
            t += spacing;
        }
        carry = t - len;
    }
    out
}

/// Move a sample from its slice plane down onto the surface it hangs from.
fn snap_to_surface(emesh: &AabbMesh, p: &Point2, z: f64, max_drop: f64) -> Point3 {
    let src = Point3::new(p.x, p.y, z);
    let hit = emesh.query_ray_hit(&src, &down());
    if hit.is_hit() && hit.distance <= max_drop {
        Point3::new(p.x, p.y, z - hit.distance)
    } else {
        src
    }
}

/// Drop points in blockers; enforcers win over blockers. With
/// `enforcers_only` every point outside an enforcer is dropped.
///
/// `blockers` and `enforcers` are sliced at `levels`, or empty.
pub fn filter_by_modifiers(
    pts: &mut Vec<SupportPoint>,
    blockers: &[ExPolygons],
    enforcers: &[ExPolygons],
    enforcers_only: bool,
    levels: &[f64],
) {
    pts.retain(|sp| {
        let idx = levels.partition_point(|l| *l < sp.pos.z);
        if idx >= levels.len() {
            return false;
        }
        let p = Point2::new(sp.pos.x, sp.pos.y);
        let inside = |layers: &[ExPolygons]| {
            layers.get(idx).is_some_and(|l| l.iter().any(|e| e.contains(&p)))
        };
        if inside(enforcers) {
            return true;
        }
        !(enforcers_only || inside(blockers))
    });
}
