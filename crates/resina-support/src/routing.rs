//! Collision probes and route searches shared by the tree synthesizers.
//!
//! Clearance is measured by casting rings of rays ("beams") along the path
//! a primitive would occupy. A beam hit distance shorter than the primitive
//! means it would cut into the model.

use std::collections::HashMap;
use std::f64::consts::PI;

use rayon::prelude::*;
use resina_math::{down, Point3, Vec3, EPSILON};
use resina_mesh::AabbMesh;

use crate::builder::SupportTreeBuilder;
use crate::config::SupportTreeConfig;
use crate::ctl::JobController;
use crate::error::Result;
use crate::optimize::Optimizer;
use crate::point::{ground_level, SupportPoint, SupportableMesh};
use crate::primitives::{Anchor, Head, Junction, Pedestal};

/// Rays per beam.
pub const BEAM_SAMPLES: usize = 8;

/// Rays per pinhead probe.
pub const PINHEAD_SAMPLES: usize = 16;

/// Radius growth per mm of pillar length at full widening.
pub const WIDENING_SCALE: f64 = 0.02;

/// Polar angle from +Z and azimuth of `n`.
pub fn dir_to_spheric(n: &Vec3) -> (f64, f64) {
    let len = n.norm();
    if len <= 0.0 {
        return (PI, 0.0);
    }
    ((n.z / len).clamp(-1.0, 1.0).acos(), n.y.atan2(n.x))
}

/// Unit vector for a polar angle from +Z and an azimuth.
pub fn spheric_to_dir(polar: f64, azimuth: f64) -> Vec3 {
    let (sp, cp) = polar.sin_cos();
    let (sa, ca) = azimuth.sin_cos();
    Vec3::new(ca * sp, sa * sp, cp)
}

/// Evenly spaced points on circles perpendicular to a direction.
#[derive(Debug, Clone)]
pub struct PointRing {
    a: Vec3,
    b: Vec3,
    samples: usize,
}

impl PointRing {
    /// A ring around `dir` with `samples` points.
    pub fn new(dir: &Vec3, samples: usize) -> Self {
        let dir = dir.try_normalize(0.0).unwrap_or_else(down);
        let helper = if dir.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
        let a = dir.cross(&helper).normalize();
        let b = dir.cross(&a);
        Self {
            a,
            b,
            samples: samples.max(1),
        }
    }

    /// Point `i` of the ring of radius `r` around `center`.
    pub fn get(&self, i: usize, center: &Point3, r: f64) -> Point3 {
        let phi = 2.0 * PI * i as f64 / self.samples as f64;
        let (s, c) = phi.sin_cos();
        center + (self.a * c + self.b * s) * r
    }
}

/// A sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    /// Centre.
    pub p: Point3,
    /// Radius.
    pub r: f64,
}

impl Ball {
    /// Ball at `p` with radius `r`.
    pub fn new(p: Point3, r: f64) -> Self {
        Self { p, r }
    }
}

/// A cone-shaped probe: radius `r1` at `src`, `r2` one unit along `dir`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beam {
    /// Start centre.
    pub src: Point3,
    /// Unit direction.
    pub dir: Vec3,
    /// Radius at the start.
    pub r1: f64,
    /// Radius one unit along `dir`.
    pub r2: f64,
}

impl Beam {
    /// Constant radius probe.
    pub fn cylinder(src: Point3, dir: Vec3, r: f64) -> Self {
        Self {
            src,
            dir: dir.try_normalize(0.0).unwrap_or_else(down),
            r1: r,
            r2: r,
        }
    }

    /// Probe tapering from ball `a` to ball `b`.
    pub fn between(a: &Ball, b: &Ball) -> Self {
        let d = b.p - a.p;
        let len = d.norm();
        if len <= EPSILON {
            return Self::cylinder(a.p, down(), a.r);
        }
        Self {
            src: a.p,
            dir: d / len,
            r1: a.r,
            r2: (b.r - a.r) / len + a.r,
        }
    }
}

/// Free distance along a ray from `src`, looking past a thin model shell
/// the ray starts in when that shell is no thicker than `max_inside`.
fn free_distance(mesh: &AabbMesh, src: &Point3, dir: &Vec3, max_inside: f64, skip: f64) -> f64 {
    let hit = mesh.query_ray_hit(src, dir);
    if !hit.is_inside {
        return hit.distance;
    }
    if hit.distance > max_inside {
        return 0.0;
    }
    let resume = hit.distance + skip;
    let next = mesh.query_ray_hit(&(src + dir * resume), dir);
    resume + next.distance
}

/// Distance a beam travels before touching the model, `INFINITY` if never.
///
/// `sd` is added to both radii as clearance.
pub fn beam_mesh_hit(mesh: &AabbMesh, beam: &Beam, sd: f64) -> f64 {
    let ring = PointRing::new(&beam.dir, BEAM_SAMPLES);
    let dst = beam.src + beam.dir;
    (0..BEAM_SAMPLES)
        .into_par_iter()
        .map(|i| {
            let p_src = ring.get(i, &beam.src, beam.r1 + sd);
            let p_dst = ring.get(i, &dst, beam.r2 + sd);
            let raydir = (p_dst - p_src).try_normalize(0.0).unwrap_or(beam.dir);
            free_distance(mesh, &p_src, &raydir, 2.0 * beam.r1 + sd, sd)
        })
        .reduce(|| f64::INFINITY, f64::min)
}

/// Free length in front of a pinhead placed at `s` pointing along `dir`.
pub fn pinhead_mesh_hit(
    mesh: &AabbMesh,
    s: &Point3,
    dir: &Vec3,
    r_pin: f64,
    r_back: f64,
    width: f64,
    sd: f64,
) -> f64 {
    let ring = PointRing::new(dir, PINHEAD_SAMPLES);
    let back = s + dir * (r_pin + width + r_back);
    (0..PINHEAD_SAMPLES)
        .into_par_iter()
        .map(|i| {
            let ps = ring.get(i, s, r_pin + sd);
            let pe = ring.get(i, &back, r_back + sd);
            let n = (pe - ps).try_normalize(0.0).unwrap_or(*dir);
            let src = ps + n * sd;
            let hit = mesh.query_ray_hit(&src, &n);
            if !hit.is_inside {
                return hit.distance;
            }
            if hit.distance > r_pin {
                return 0.0;
            }
            let resume = hit.distance + 2.0 * sd;
            resume + mesh.query_ray_hit(&(ps + n * resume), &n).distance
        })
        .reduce(|| f64::INFINITY, f64::min)
}

/// Radius of a branch of radius `r` after `len` mm towards the ground.
pub fn widened_radius(cfg: &SupportTreeConfig, r: f64, len: f64) -> f64 {
    r + WIDENING_SCALE * cfg.pillar_widening_factor * len.max(0.0)
}

/// Zero elevation puts pillar bases next to the model.
pub fn is_zero_elevation(sm: &SupportableMesh) -> bool {
    sm.pad_cfg.embed_object.enabled || sm.cfg.object_elevation_mm < EPSILON
}

/// A route from a junction to the ground: bridges through `path`, then a
/// pillar onto `pillar_base`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundConnection {
    /// Junctions from the source down to the pillar top.
    pub path: Vec<Junction>,
    /// Where the pillar meets the ground. `None` when no route exists.
    pub pillar_base: Option<Pedestal>,
}

impl GroundConnection {
    /// Whether the route exists.
    pub fn is_valid(&self) -> bool {
        !self.path.is_empty() && self.pillar_base.is_some()
    }
}

/// Score a route leaving `source` along `dir` for `bridge_len` mm, then
/// dropping vertically to `gndlvl`.
///
/// A feasible route scores above 1, shorter routes higher. Blocked routes
/// score in `[-1, 0)` by how much of the required clearance they have.
pub fn check_ground_route(
    sm: &SupportableMesh,
    source: &Junction,
    dir: &Vec3,
    bridge_len: f64,
    gndlvl: f64,
) -> (GroundConnection, f64) {
    let cfg = &sm.cfg;
    let sd = cfg.safety_distance(source.r);
    let bridge_end = source.pos + dir * bridge_len;
    if bridge_end.z <= gndlvl + EPSILON {
        return (GroundConnection::default(), -1.0);
    }

    let mut ratio = f64::INFINITY;
    let end_r = widened_radius(cfg, source.r, bridge_len);
    if bridge_len > EPSILON {
        let beam = Beam::between(&Ball::new(source.pos, source.r), &Ball::new(bridge_end, end_r));
        ratio = ratio.min(beam_mesh_hit(&sm.emesh, &beam, sd) / bridge_len);
    }

    let down_l = bridge_end.z - gndlvl;
    let gnd_r = widened_radius(cfg, end_r, down_l);
    let gp = Point3::new(bridge_end.x, bridge_end.y, gndlvl);
    let beam = Beam::between(&Ball::new(bridge_end, end_r), &Ball::new(gp, gnd_r));
    ratio = ratio.min(beam_mesh_hit(&sm.emesh, &beam, sd) / down_l);

    let with_base = gnd_r >= cfg.head_back_radius_mm;
    let base_r = if with_base {
        cfg.base_radius_mm.max(gnd_r)
    } else {
        gnd_r
    };
    if is_zero_elevation(sm) {
        let gap = base_r + cfg.pillar_base_safety_distance_mm;
        ratio = ratio.min(sm.emesh.squared_distance(&gp).sqrt() / gap);
    }

    if ratio < 1.0 {
        return (GroundConnection::default(), ratio.max(0.0) - 1.0);
    }

    let mut path = vec![source.clone()];
    if bridge_len > EPSILON {
        path.push(Junction::new(bridge_end, end_r));
    }
    let conn = GroundConnection {
        path,
        pillar_base: Some(Pedestal::new(gp, cfg.base_height_mm, base_r, gnd_r)),
    };
    (conn, 1.0 + 1.0 / (1.0 + bridge_len + down_l))
}

/// Search bridge direction and length for a clear route to the ground.
///
/// Tries a straight drop first. Directions stay within `bridge_slope` of
/// straight down and bridges within `max_bridge_length_mm`.
pub fn deepsearch_ground_connection(
    ctl: &JobController,
    sm: &SupportableMesh,
    source: &Junction,
    init_dir: &Vec3,
) -> GroundConnection {
    if ctl.stopped() {
        return GroundConnection::default();
    }
    let gndlvl = ground_level(sm);
    let (conn, _) = check_ground_route(sm, source, &down(), 0.0, gndlvl);
    if conn.is_valid() {
        return conn;
    }

    let cfg = &sm.cfg;
    let (polar, azimuth) = dir_to_spheric(init_dir);
    let min_polar = PI - cfg.bridge_slope;
    let best = Optimizer::default()
        .with_max_iterations(SupportTreeConfig::OPTIMIZER_MAX_ITERATIONS)
        .with_stop_score(1.0)
        .maximize(
            |x: &[f64; 3]| check_ground_route(sm, source, &spheric_to_dir(x[0], x[1]), x[2], gndlvl).1,
            [polar.max(min_polar), azimuth, 0.0],
            [(min_polar, PI), (-PI, PI), (0.0, cfg.max_bridge_length_mm)],
        );
    let [p, a, len] = best.params;
    check_ground_route(sm, source, &spheric_to_dir(p, a), len, gndlvl).0
}

/// Add the primitives of `conn` to `builder`. Returns the pillar id.
///
/// Pillars too thin for a base reach into the pad by its wall thickness.
pub fn build_ground_connection(
    builder: &SupportTreeBuilder,
    sm: &SupportableMesh,
    conn: &GroundConnection,
) -> Result<Option<i64>> {
    let (Some(base), Some(last)) = (&conn.pillar_base, conn.path.last()) else {
        return Ok(None);
    };
    for w in conn.path.windows(2) {
        builder.add_diffbridge(w[0].pos, w[1].pos, w[0].r, w[1].r)?;
        builder.add_junction(w[1].pos, w[1].r)?;
    }

    let with_base = base.r_top >= sm.cfg.head_back_radius_mm;
    let mut h = last.pos.z - base.pos.z;
    if !with_base {
        h += sm.pad_cfg.wall_thickness_mm;
    }
    let endpt = last.pos - Vec3::new(0.0, 0.0, h);
    let pid = builder.add_pillar(endpt, h, last.r, base.r_top)?;
    if with_base {
        builder.add_pillar_base(pid, base.height, base.r_bottom)?;
    }
    Ok(Some(pid))
}

/// Find a pinhead for support point `idx` that fits without cutting into
/// the model, trying the fallback back radius when the full one does not.
pub fn calculate_pinhead_placement(sm: &SupportableMesh, idx: usize) -> Option<Head> {
    let cfg = &sm.cfg;
    let sp = sm.pts.get(idx)?;
    let hp = sp.pos;
    let n = sm.emesh.normal_at(&hp)?;
    let (polar, azimuth) = dir_to_spheric(&n);
    if polar < PI - SupportTreeConfig::NORMAL_CUTOFF_ANGLE {
        return None;
    }
    let polar = polar.max(PI - cfg.bridge_slope);
    let pin_r = if sp.head_front_radius > 0.0 {
        sp.head_front_radius
    } else {
        cfg.head_front_radius_mm
    };
    let gndlvl = ground_level(sm);

    let mut back_r = cfg.head_back_radius_mm;
    loop {
        let (lmin, lmax) = if back_r < cfg.head_back_radius_mm {
            (0.0, cfg.head_penetration_mm)
        } else {
            (cfg.head_width_mm, cfg.head_width_mm)
        };
        let sd = cfg.safety_distance(back_r);
        let needed = |l: f64| l + 2.0 * back_r + 2.0 * pin_r - cfg.head_penetration_mm;

        let mut nn = spheric_to_dir(polar, azimuth);
        let mut width = lmin;
        let mut t = pinhead_mesh_hit(&sm.emesh, &hp, &nn, pin_r, back_r, width, sd);
        if t < needed(width) {
            let best = Optimizer::default()
                .with_max_iterations(SupportTreeConfig::OPTIMIZER_MAX_ITERATIONS)
                .with_stop_score(0.0)
                .maximize(
                    |x: &[f64; 3]| {
                        let d = spheric_to_dir(x[0], x[1]);
                        pinhead_mesh_hit(&sm.emesh, &hp, &d, pin_r, back_r, x[2], sd) - needed(x[2])
                    },
                    [polar, azimuth, lmin],
                    [(PI - cfg.bridge_slope, PI), (-PI, PI), (lmin, lmax)],
                );
            nn = spheric_to_dir(best.params[0], best.params[1]);
            width = best.params[2];
            t = best.score + needed(width);
        }

        let w = needed(width);
        if t > w && hp.z + w * nn.z >= gndlvl {
            return Some(Head::new(back_r, pin_r, width, cfg.head_penetration_mm, nn, hp));
        }
        if back_r > cfg.head_fallback_radius_mm {
            back_r = cfg.head_fallback_radius_mm;
        } else {
            return None;
        }
    }
}

/// Find a head anchoring junction `j` on the model surface below it.
///
/// The anchor points from the surface up to `j`, at most `bridge_slope`
/// away from vertical, with its junction point exactly at `j`.
pub fn calculate_anchor_placement(sm: &SupportableMesh, j: &Junction) -> Option<Anchor> {
    let cfg = &sm.cfg;
    let pin_r = cfg.head_front_radius_mm;
    let pen = cfg.head_penetration_mm;
    let first = j.r.min(cfg.head_back_radius_mm);
    let mut radii = vec![first];
    if cfg.head_fallback_radius_mm < first {
        radii.push(cfg.head_fallback_radius_mm);
    }

    for back_r in radii {
        let sd = cfg.safety_distance(back_r);
        let evaluate = |x: &[f64; 2]| -> (f64, Option<Anchor>) {
            let dir = spheric_to_dir(x[0], x[1]);
            let hit = sm.emesh.query_ray_hit(&j.pos, &(-dir));
            if !hit.is_hit() || hit.is_inside {
                return (-1.0, None);
            }
            let dist = hit.distance;
            let width = dist - 2.0 * pin_r - back_r + pen;
            let max_width = cfg.head_width_mm;
            if width < 0.0 || width > max_width {
                return (-1.0 + 0.5 / (1.0 + (width - max_width).abs()), None);
            }
            let hitp = j.pos - dir * dist;
            let need = width + 2.0 * back_r + 2.0 * pin_r - pen;
            let t = pinhead_mesh_hit(&sm.emesh, &hitp, &dir, pin_r, back_r, width, sd);
            if t < need {
                return ((t / need).max(0.0) - 1.0, None);
            }
            let anchor = Head::new(back_r, pin_r, width, pen, dir, hitp);
            (1.0 + 1.0 / (1.0 + dist), Some(anchor))
        };

        let best = Optimizer::default()
            .with_max_iterations(SupportTreeConfig::OPTIMIZER_MAX_ITERATIONS)
            .with_stop_score(1.0)
            .maximize(
                |x: &[f64; 2]| evaluate(x).0,
                [0.0, 0.0],
                [(0.0, cfg.bridge_slope), (-PI, PI)],
            );
        if let (_, Some(anchor)) = evaluate(&best.params) {
            return Some(anchor);
        }
    }
    None
}

/// Whether `pt` lies outside the downward cone of half angle `angle`
/// hanging from `supp`.
pub fn is_outside_support_cone(supp: &Point3, pt: &Point3, angle: f64) -> bool {
    let v = pt - supp;
    if v.z >= 0.0 {
        return true;
    }
    let horizontal = (v.x * v.x + v.y * v.y).sqrt();
    horizontal > -v.z * angle.tan() + EPSILON
}

/// Highest point reachable from both `a` and `b` by descending at most
/// `angle` away from vertical.
///
/// When one point already lies in the other's cone, that point is the
/// merge point.
pub fn find_merge_pt(a: &Point3, b: &Point3, angle: f64) -> Option<Point3> {
    let tan = angle.tan();
    let ab = Vec3::new(b.x - a.x, b.y - a.y, 0.0);
    let d = ab.norm();
    if d <= EPSILON {
        return Some(if a.z <= b.z { *a } else { *b });
    }
    if tan <= EPSILON {
        return None;
    }
    if !is_outside_support_cone(a, b, angle) {
        return Some(*b);
    }
    if !is_outside_support_cone(b, a, angle) {
        return Some(*a);
    }

    // In the vertical plane through a and b, with x measured from a.
    let z = (a.z + b.z - d / tan) / 2.0;
    let x = ((a.z - z) * tan).clamp(0.0, d);
    let p = a + ab * (x / d);
    Some(Point3::new(p.x, p.y, z))
}

/// Indices of `pts` with no earlier point closer than `eps`.
pub fn non_duplicate_indices(pts: &[SupportPoint], eps: f64) -> Vec<usize> {
    let cell = eps.max(EPSILON);
    let key = |p: &Point3| {
        (
            (p.x / cell).floor() as i64,
            (p.y / cell).floor() as i64,
            (p.z / cell).floor() as i64,
        )
    };
    let mut grid: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
    let mut kept = Vec::with_capacity(pts.len());
    for (i, sp) in pts.iter().enumerate() {
        let (cx, cy, cz) = key(&sp.pos);
        let mut duplicate = false;
        'search: for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(list) = grid.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    if list.iter().any(|&k| (pts[k].pos - sp.pos).norm() < eps) {
                        duplicate = true;
                        break 'search;
                    }
                }
            }
        }
        if !duplicate {
            grid.entry((cx, cy, cz)).or_default().push(i);
            kept.push(i);
        }
    }
    kept
}
