//! Pillar based support tree.
//!
//! Heads facing the ground get vertical pillars, grouped so that close
//! heads share one pillar through side bridges. Heads above the model are
//! bridged to a nearby pillar, routed around the model to the ground, or
//! anchored on the model surface below. Finally pillars are cross-linked
//! for stiffness.

use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;

use rayon::prelude::*;
use resina_math::{down, Point3, Vec3, EPSILON};
use tracing::{debug, warn};

use crate::builder::{SupportTreeBuilder, DEFAULT_MESH_STEPS};
use crate::config::{PillarConnectionMode, SupportTreeConfig};
use crate::ctl::JobController;
use crate::error::Result;
use crate::point::{ground_level, SupportableMesh};
use crate::primitives::{Head, Junction, Pillar};
use crate::routing::{
    beam_mesh_hit, build_ground_connection, calculate_pinhead_placement,
    deepsearch_ground_connection, dir_to_spheric, is_zero_elevation, non_duplicate_indices,
    spheric_to_dir, Beam,
};

/// Support points closer than this are supported once.
pub const DUPLICATE_EPS: f64 = 0.1;

/// Directions tried when walking a pillar away from the model.
const BASE_SEARCH_DIRECTIONS: usize = 16;
/// Spots tried around a tall pillar for a helper pillar.
const HELPER_PILLAR_DIRECTIONS: usize = 8;

fn xy_distance(a: &Point3, b: &Point3) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Deduplicate the support points and place a head on each, in parallel.
///
/// Returns `(support point id, head)` pairs in id order; `None` marks points
/// no head fits on.
pub(crate) fn place_pinheads(
    sm: &SupportableMesh,
    ctl: &JobController,
) -> Result<Vec<(usize, Option<Head>)>> {
    let filtered = non_duplicate_indices(&sm.pts, DUPLICATE_EPS);
    let placed: Vec<(usize, Option<Head>)> = filtered
        .par_iter()
        .map(|&i| {
            if ctl.stopped() {
                return (i, None);
            }
            (i, calculate_pinhead_placement(sm, i))
        })
        .collect();
    ctl.check()?;
    Ok(placed)
}

type Step<'a> = (u32, &'static str, fn(&mut DefaultSupportTree<'a>) -> Result<()>);

/// State of one pillar tree synthesis.
pub struct DefaultSupportTree<'a> {
    sm: &'a SupportableMesh,
    builder: &'a SupportTreeBuilder,
    ctl: &'a JobController,
    gndlvl: f64,
    iheads: Vec<usize>,
    iheadless: Vec<usize>,
    iheads_onmodel: Vec<usize>,
    head_to_ground_scans: HashMap<usize, f64>,
    pillar_clusters: Vec<Vec<usize>>,
    pillar_index: Vec<i64>,
}

impl<'a> DefaultSupportTree<'a> {
    /// Prepare a synthesis over `sm` into `builder`.
    pub fn new(
        sm: &'a SupportableMesh,
        builder: &'a SupportTreeBuilder,
        ctl: &'a JobController,
    ) -> Self {
        Self {
            sm,
            builder,
            ctl,
            gndlvl: ground_level(sm),
            iheads: Vec::new(),
            iheadless: Vec::new(),
            iheads_onmodel: Vec::new(),
            head_to_ground_scans: HashMap::new(),
            pillar_clusters: Vec::new(),
            pillar_index: Vec::new(),
        }
    }

    /// Run every step, reporting progress through the controller.
    pub fn execute(
        builder: &'a SupportTreeBuilder,
        sm: &'a SupportableMesh,
        ctl: &'a JobController,
    ) -> Result<()> {
        let mut tree = Self::new(sm, builder, ctl);
        let steps: [Step<'a>; 6] = [
            (10, "Generating pinheads", Self::add_pinheads),
            (30, "Classification", Self::classify),
            (50, "Routing to ground", Self::routing_to_ground),
            (60, "Routing supports to model surface", Self::routing_to_model),
            (70, "Interconnecting pillars", Self::interconnect_pillars),
            (80, "Merging support mesh", Self::merge_result),
        ];
        for (percent, label, step) in steps {
            ctl.check()?;
            ctl.status(percent, label);
            step(&mut tree)?;
        }
        ctl.status(100, "Done");
        Ok(())
    }

    fn cfg(&self) -> &'a SupportTreeConfig {
        &self.sm.cfg
    }

    /// Place a head on every distinct support point.
    pub fn add_pinheads(&mut self) -> Result<()> {
        for (id, head) in place_pinheads(self.sm, self.ctl)? {
            match head {
                Some(head) => {
                    self.builder.add_head(id, head)?;
                    self.iheads.push(id);
                }
                None => self.iheadless.push(id),
            }
        }
        debug!(
            heads = self.iheads.len(),
            headless = self.iheadless.len(),
            "pinheads placed"
        );
        Ok(())
    }

    /// Split heads into ground facing clusters and heads above the model.
    pub fn classify(&mut self) -> Result<()> {
        let mut ground = Vec::new();
        for &id in &self.iheads {
            let Some(head) = self.builder.head(id) else {
                continue;
            };
            let jp = head.junction_point();
            let sd = self.cfg().safety_distance(head.r_back_mm);
            let t = beam_mesh_hit(
                &self.sm.emesh,
                &Beam::cylinder(jp, down(), head.r_back_mm),
                sd,
            );
            self.head_to_ground_scans.insert(id, t);
            if t > jp.z - self.gndlvl {
                ground.push(id);
            } else {
                self.iheads_onmodel.push(id);
            }
        }
        self.pillar_clusters = self.cluster_heads(&ground);
        debug!(
            ground = ground.len(),
            onmodel = self.iheads_onmodel.len(),
            clusters = self.pillar_clusters.len(),
            "heads classified"
        );
        Ok(())
    }

    /// Greedy grouping of heads whose pillar bases would collide.
    fn cluster_heads(&self, ids: &[usize]) -> Vec<Vec<usize>> {
        let cfg = self.cfg();
        let points: Vec<Point3> = ids
            .iter()
            .filter_map(|&id| self.builder.head(id).map(|h| h.junction_point()))
            .collect();
        let close = |a: &Point3, b: &Point3| {
            xy_distance(a, b) < 2.0 * cfg.base_radius_mm && (a - b).norm() < cfg.max_bridge_length_mm
        };
        let max_size = cfg.max_bridges_on_pillar as usize + 1;

        let mut assigned = vec![false; points.len()];
        let mut clusters = Vec::new();
        for a in 0..points.len() {
            if assigned[a] {
                continue;
            }
            assigned[a] = true;
            let mut members = vec![a];
            for b in a + 1..points.len() {
                if members.len() >= max_size {
                    break;
                }
                if !assigned[b] && members.iter().all(|&m| close(&points[m], &points[b])) {
                    assigned[b] = true;
                    members.push(b);
                }
            }
            clusters.push(members.into_iter().map(|k| ids[k]).collect());
        }
        clusters
    }

    /// One pillar per cluster; other cluster members bridge onto it.
    pub fn routing_to_ground(&mut self) -> Result<()> {
        let clusters = std::mem::take(&mut self.pillar_clusters);
        for cluster in &clusters {
            self.ctl.check()?;
            let heads: Vec<Head> = cluster
                .iter()
                .filter_map(|&id| self.builder.head(id))
                .collect();
            let Some(center) = central_head(&heads) else {
                continue;
            };
            let center_id = center.id as usize;
            if center.pillar_id < 0
                && !self.create_ground_pillar(
                    center.junction_point(),
                    &center.dir,
                    center.r_back_mm,
                    Some(center_id),
                )?
            {
                warn!(head = center_id, "failed to route ground facing support point");
                self.builder.invalidate_head(center_id)?;
            }
            let center_pillar = self.builder.head(center_id).map_or(-1, |h| h.pillar_id);

            for side in heads.iter().filter(|h| h.id != center.id) {
                let side_id = side.id as usize;
                if center_pillar >= 0 && self.connect_to_nearpillar(side, center_pillar)? {
                    continue;
                }
                if self.search_pillar_and_connect(side)? {
                    continue;
                }
                if !self.create_ground_pillar(
                    side.junction_point(),
                    &side.dir,
                    side.r_back_mm,
                    Some(side_id),
                )? {
                    warn!(head = side_id, "failed to route ground facing support point");
                    self.builder.invalidate_head(side_id)?;
                }
            }
        }
        self.pillar_clusters = clusters;
        Ok(())
    }

    /// Route heads hanging above the model.
    pub fn routing_to_model(&mut self) -> Result<()> {
        for id in self.iheads_onmodel.clone() {
            self.ctl.check()?;
            let Some(head) = self.builder.head(id) else {
                continue;
            };
            if !head.is_valid() {
                continue;
            }
            if self.search_pillar_and_connect(&head)? || self.connect_to_ground(&head)? {
                continue;
            }
            if !self.cfg().ground_facing_only && self.connect_to_model_body(&head)? {
                continue;
            }
            warn!(head = id, "failed to route model facing support point");
            self.builder.invalidate_head(id)?;
        }
        Ok(())
    }

    /// Cross-link every ground pillar with its nearest neighbours.
    pub fn interconnect_pillars(&mut self) -> Result<()> {
        let cfg = self.cfg();
        let pillars: Vec<Pillar> = self
            .pillar_index
            .iter()
            .filter_map(|&pid| self.builder.pillar(pid))
            .collect();
        let mut done: HashSet<(i64, i64)> = HashSet::new();

        for (k, a) in pillars.iter().enumerate() {
            self.ctl.check()?;
            let mut near: Vec<(f64, usize)> = pillars
                .iter()
                .enumerate()
                .filter(|(m, _)| *m != k)
                .map(|(m, b)| (xy_distance(&a.startpoint(), &b.startpoint()), m))
                .filter(|(d, _)| *d <= cfg.max_pillar_link_distance_mm)
                .collect();
            near.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
            near.truncate(SupportTreeConfig::PILLAR_CASCADE_NEIGHBORS);
            for (_, m) in near {
                let b = &pillars[m];
                if done.insert((a.id.min(b.id), a.id.max(b.id))) {
                    self.interconnect(a, b)?;
                }
            }
        }

        for pid in self.pillar_index.clone() {
            self.ctl.check()?;
            let Some(p) = self.builder.pillar(pid) else {
                continue;
            };
            let wanted = if p.height > SupportTreeConfig::MAX_DUAL_PILLAR_HEIGHT_MM {
                SupportTreeConfig::PILLAR_CASCADE_NEIGHBORS as u32
            } else if p.height > SupportTreeConfig::MAX_SOLO_PILLAR_HEIGHT_MM {
                1
            } else {
                0
            };
            let missing = wanted.saturating_sub(p.links);
            if missing == 0 {
                continue;
            }
            let added = self.add_helper_pillars(&p, missing)?;
            if added < missing {
                debug!(pillar = pid, links = p.links + added, wanted, "tall pillar lacks cross links");
            }
        }
        Ok(())
    }

    /// Stand up to `count` helper pillars in a ring around `p`, each
    /// cross-linked to it. Returns how many got linked.
    fn add_helper_pillars(&mut self, p: &Pillar, count: u32) -> Result<u32> {
        let cfg = self.cfg();
        let r = p.r_start;
        let gap = cfg.base_radius_mm + cfg.pillar_base_safety_distance_mm;
        let dist = (2.0 * cfg.base_radius_mm + cfg.pillar_base_safety_distance_mm)
            .min(cfg.max_pillar_link_distance_mm);
        let sp = p.startpoint();
        let h = sp.z - self.gndlvl;
        if h <= cfg.base_height_mm {
            return Ok(0);
        }

        let mut added = 0;
        for k in 0..HELPER_PILLAR_DIRECTIONS {
            if added == count {
                break;
            }
            let az = 2.0 * PI * k as f64 / HELPER_PILLAR_DIRECTIONS as f64;
            let top = Point3::new(sp.x + dist * az.cos(), sp.y + dist * az.sin(), sp.z);
            let bottom = Point3::new(top.x, top.y, self.gndlvl);
            if !self.floor_is_clear(&bottom, gap) || !self.bridge_is_clear(&top, &bottom, r) {
                continue;
            }
            let hid = self.builder.add_pillar(bottom, h, r, r)?;
            if hid < 0 {
                continue;
            }
            self.builder
                .add_pillar_base(hid, cfg.base_height_mm, cfg.base_radius_mm)?;
            self.pillar_index.push(hid);
            let Some(helper) = self.builder.pillar(hid) else {
                continue;
            };
            if self.interconnect(p, &helper)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Materialize the merged mesh into the builder's cache.
    pub fn merge_result(&mut self) -> Result<()> {
        let mesh = self.builder.merged_mesh(DEFAULT_MESH_STEPS);
        self.ctl.check()?;
        debug!(triangles = mesh.num_triangles(), "support mesh merged");
        Ok(())
    }

    fn bridge_is_clear(&self, s: &Point3, e: &Point3, r: f64) -> bool {
        let len = (e - s).norm();
        if len <= EPSILON {
            return true;
        }
        let sd = self.cfg().safety_distance(r);
        beam_mesh_hit(&self.sm.emesh, &Beam::cylinder(*s, e - s, r), sd) >= len
    }

    /// Drop a pillar from `jp` to the ground, walking it away from the
    /// model first when its base would come too close in zero elevation.
    fn create_ground_pillar(
        &mut self,
        jp: Point3,
        sourcedir: &Vec3,
        radius: f64,
        head_id: Option<usize>,
    ) -> Result<bool> {
        let cfg = self.cfg();
        let with_base = radius >= cfg.head_back_radius_mm;
        let mut gndlvl = self.gndlvl;
        if !with_base {
            gndlvl -= self.sm.pad_cfg.wall_thickness_mm;
        }
        let base_r = if with_base { cfg.base_radius_mm } else { 0.0 };
        let gap = base_r + cfg.pillar_base_safety_distance_mm;

        let mut top = jp;
        if !self.floor_is_clear(&jp, gap) {
            let Some(p) = self.search_base_clearance(&jp, sourcedir, radius, gap) else {
                return Ok(false);
            };
            match head_id {
                Some(id) => self.builder.add_head_bridge(id, p)?,
                None => self.builder.add_bridge(jp, p, radius)?,
            };
            self.builder.add_junction(p, radius)?;
            top = p;
        }

        let h = top.z - gndlvl;
        if h <= EPSILON {
            return Ok(false);
        }
        let pid = match head_id {
            Some(id) if top == jp => self.builder.add_pillar_from_head(id, h)?,
            _ => self
                .builder
                .add_pillar(top - Vec3::new(0.0, 0.0, h), h, radius, radius)?,
        };
        if pid < 0 {
            return Ok(false);
        }
        if with_base {
            self.builder
                .add_pillar_base(pid, cfg.base_height_mm, cfg.base_radius_mm)?;
        }
        self.pillar_index.push(pid);
        Ok(true)
    }

    fn floor_is_clear(&self, p: &Point3, gap: f64) -> bool {
        if !is_zero_elevation(self.sm) {
            return true;
        }
        let floor = Point3::new(p.x, p.y, self.gndlvl);
        self.sm.emesh.squared_distance(&floor) >= gap * gap
    }

    fn search_base_clearance(
        &self,
        jp: &Point3,
        sourcedir: &Vec3,
        radius: f64,
        gap: f64,
    ) -> Option<Point3> {
        let cfg = self.cfg();
        let (_, azimuth) = dir_to_spheric(sourcedir);
        let polar = PI - cfg.bridge_slope;
        let max_len = cfg.max_bridge_length_mm * radius / cfg.head_back_radius_mm;
        let sd = cfg.safety_distance(radius);
        for k in 0..BASE_SEARCH_DIRECTIONS {
            let az = azimuth + 2.0 * PI * k as f64 / BASE_SEARCH_DIRECTIONS as f64;
            let dir = spheric_to_dir(polar, az);
            let mut t = radius;
            while t <= max_len {
                let p = jp + dir * t;
                if p.z - self.gndlvl < cfg.base_height_mm {
                    break;
                }
                if self.floor_is_clear(&p, gap)
                    && self.bridge_is_clear(jp, &p, radius)
                    && beam_mesh_hit(&self.sm.emesh, &Beam::cylinder(p, down(), radius), sd)
                        >= p.z - self.gndlvl
                {
                    return Some(p);
                }
                t += radius;
            }
        }
        None
    }

    /// Bridge `head` onto pillar `pid`, extending the pillar upward when
    /// the bridge would land above its top.
    fn connect_to_nearpillar(&mut self, head: &Head, pid: i64) -> Result<bool> {
        let cfg = self.cfg();
        let Some(pillar) = self.builder.pillar(pid) else {
            return Ok(false);
        };
        if pillar.bridges >= cfg.max_bridges_on_pillar {
            return Ok(false);
        }
        let hjp = head.junction_point();
        let r = head.r_back_mm;
        let top = pillar.startpoint();
        let d2 = xy_distance(&hjp, &top);
        if d2 <= EPSILON {
            return Ok(false);
        }

        let bridge_z = hjp.z - d2 * cfg.bridge_slope.tan();
        if bridge_z <= pillar.endpoint().z + cfg.base_height_mm {
            return Ok(false);
        }
        let bridge_end = Point3::new(top.x, top.y, bridge_z);
        let max_len = r * cfg.max_bridge_length_mm / cfg.head_back_radius_mm;
        if (bridge_end - hjp).norm() > max_len || !self.bridge_is_clear(&hjp, &bridge_end, r) {
            return Ok(false);
        }

        let zdiff = bridge_z - top.z;
        if zdiff > EPSILON {
            if !self.bridge_is_clear(&top, &bridge_end, pillar.r_start) {
                return Ok(false);
            }
            self.builder
                .add_pillar(top, zdiff, pillar.r_start, pillar.r_start)?;
        }
        self.builder.add_junction(bridge_end, pillar.r_start.max(r))?;
        self.builder.add_head_bridge(head.id as usize, bridge_end)?;
        self.builder.increment_bridges(pid)?;
        Ok(true)
    }

    /// Try the ground pillars nearest to `head` in order of distance.
    fn search_pillar_and_connect(&mut self, head: &Head) -> Result<bool> {
        let jp = head.junction_point();
        let reach = self.cfg().max_bridge_length_mm;
        let mut candidates: Vec<(f64, i64)> = self
            .pillar_index
            .iter()
            .filter_map(|&pid| {
                self.builder
                    .pillar(pid)
                    .map(|p| (xy_distance(&p.startpoint(), &jp), pid))
            })
            .filter(|(d, _)| *d <= reach)
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (_, pid) in candidates {
            if self.connect_to_nearpillar(head, pid)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Search a bridged route around the model down to the ground.
    fn connect_to_ground(&mut self, head: &Head) -> Result<bool> {
        let source = Junction::new(head.junction_point(), head.r_back_mm);
        let conn = deepsearch_ground_connection(self.ctl, self.sm, &source, &head.dir);
        if !conn.is_valid() {
            return Ok(false);
        }
        match build_ground_connection(self.builder, self.sm, &conn)? {
            Some(pid) => {
                self.pillar_index.push(pid);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stand a short pillar on the model surface below `head`, ending in
    /// an anchor.
    fn connect_to_model_body(&mut self, head: &Head) -> Result<bool> {
        let cfg = self.cfg();
        let id = head.id as usize;
        let Some(&t) = self.head_to_ground_scans.get(&id) else {
            return Ok(false);
        };
        if !t.is_finite() {
            return Ok(false);
        }
        let hjp = head.junction_point();
        let r_back = head.r_back_mm;

        // The scan went straight down, so the tail angle saturates at 45 degrees.
        let mut h = ((PI / 4.0).sin() * head.fullwidth()).min(t - r_back);
        if r_back < cfg.head_back_radius_mm {
            h = h.max(0.0);
        } else if h <= 0.0 {
            return Ok(false);
        }
        let endp = hjp - Vec3::new(0.0, 0.0, t - h);

        let center_hit = self.sm.emesh.query_ray_hit(&hjp, &down());
        let hitp = if (center_hit.distance - t).abs() < 2.0 * r_back {
            hjp + down() * center_hit.distance
        } else {
            hjp + down() * t
        };
        let Some(taildir) = (endp - hitp).try_normalize(EPSILON) else {
            return Ok(false);
        };

        self.builder.add_pillar_from_head(id, hjp.z - endp.z)?;
        let dist = (hitp - endp).norm() + cfg.head_penetration_mm;
        let mut width = dist - 2.0 * head.r_pin_mm - r_back;
        if width < 0.0 {
            warn!(head = id, width, "negative anchor width");
            width = 0.0;
        }
        self.builder.add_anchor(Head::new(
            r_back,
            head.r_pin_mm,
            width,
            cfg.head_penetration_mm,
            taildir,
            hitp,
        ))?;
        Ok(true)
    }

    /// Zig-zag or crossing bridges between two pillars, top to bottom.
    fn interconnect(&mut self, a: &Pillar, b: &Pillar) -> Result<bool> {
        let cfg = self.cfg();
        let (sa, sb) = (a.startpoint(), b.startpoint());
        let d = xy_distance(&sa, &sb);
        if d <= EPSILON || d > cfg.max_pillar_link_distance_mm {
            return Ok(false);
        }
        let r = a.r_start.min(b.r_start);
        let zstep = d * cfg.bridge_slope.tan();
        let bottom = a.endpoint().z.max(b.endpoint().z) + cfg.base_height_mm + r;
        let cross = match cfg.pillar_connection_mode {
            PillarConnectionMode::Cross => true,
            PillarConnectionMode::Zigzag => false,
            PillarConnectionMode::Dynamic => d > 2.0 * cfg.base_radius_mm,
        };
        let at = |p: &Point3, z: f64| Point3::new(p.x, p.y, z);

        let mut z = sa.z.min(sb.z);
        let mut forward = true;
        let mut linked = false;
        while z - zstep >= bottom {
            let (from, to) = if forward { (sa, sb) } else { (sb, sa) };
            let (s, e) = (at(&from, z), at(&to, z - zstep));
            if self.bridge_is_clear(&s, &e, r) {
                self.builder.add_crossbridge(s, e, r)?;
                linked = true;
            }
            if cross {
                let (s, e) = (at(&to, z), at(&from, z - zstep));
                if self.bridge_is_clear(&s, &e, r) {
                    self.builder.add_crossbridge(s, e, r)?;
                    linked = true;
                }
            } else {
                forward = !forward;
            }
            z -= zstep;
        }
        if linked {
            self.builder.increment_links(a.id)?;
            self.builder.increment_links(b.id)?;
        }
        Ok(linked)
    }
}

/// The valid head nearest to the cluster centroid in plan view.
fn central_head(heads: &[Head]) -> Option<Head> {
    let valid: Vec<&Head> = heads.iter().filter(|h| h.is_valid()).collect();
    if valid.is_empty() {
        return None;
    }
    let n = valid.len() as f64;
    let (cx, cy) = valid.iter().fold((0.0, 0.0), |(x, y), h| {
        let jp = h.junction_point();
        (x + jp.x / n, y + jp.y / n)
    });
    let centroid = Point3::new(cx, cy, 0.0);
    valid
        .into_iter()
        .min_by(|a, b| {
            let da = xy_distance(&a.junction_point(), &centroid);
            let db = xy_distance(&b.junction_point(), &centroid);
            da.total_cmp(&db).then(a.id.cmp(&b.id))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::SupportPoint;
    use approx::assert_relative_eq;
    use resina_mesh::primitives::cube;
    use resina_mesh::TriangleMesh;

    fn box_at(x: f64, y: f64, z: f64, min: Point3) -> TriangleMesh {
        let mut m = cube(x, y, z);
        m.translate(&min.coords);
        m
    }

    fn plate(points: &[(f64, f64)]) -> SupportableMesh {
        let mesh = box_at(20.0, 20.0, 1.0, Point3::new(-10.0, -10.0, 5.0));
        let pts = points
            .iter()
            .map(|&(x, y)| SupportPoint::new(Point3::new(x, y, 5.0), 0.2))
            .collect();
        let cfg = SupportTreeConfig {
            object_elevation_mm: 5.0,
            ..Default::default()
        };
        SupportableMesh::new(mesh, pts, cfg)
    }

    fn run(sm: &SupportableMesh) -> SupportTreeBuilder {
        let ctl = JobController::new();
        let builder = SupportTreeBuilder::new(ctl.clone());
        DefaultSupportTree::execute(&builder, sm, &ctl).unwrap();
        builder
    }

    #[test]
    fn test_single_point_gets_pillar_to_ground() {
        let sm = plate(&[(0.0, 0.0)]);
        let builder = run(&sm);
        assert_eq!(builder.pillars().len(), 1);
        assert_eq!(builder.pedestals().len(), 1);
        let bb = builder.retrieve_mesh().bounding_box();
        assert_relative_eq!(bb.min.z, 0.0, epsilon = 1e-4);
        assert_relative_eq!(bb.max.z, 5.5, epsilon = 1e-4);
    }

    #[test]
    fn test_close_heads_share_a_pillar() {
        let sm = plate(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]);
        let builder = run(&sm);
        let pillars = builder.pillars();
        assert_eq!(pillars.len(), 1);
        assert_eq!(pillars[0].bridges, 2);
        assert!(builder.heads().iter().all(|h| h.is_valid()));
    }

    #[test]
    fn test_duplicate_points_get_one_head() {
        let sm = plate(&[(0.0, 0.0), (0.01, 0.0)]);
        let builder = run(&sm);
        assert_eq!(builder.heads().len(), 1);
    }

    #[test]
    fn test_head_above_model_is_anchored() {
        let mut mesh = box_at(20.0, 20.0, 1.0, Point3::new(-10.0, -10.0, 10.0));
        mesh.merge(&box_at(6.0, 6.0, 1.0, Point3::new(-3.0, -3.0, 5.0)));
        let pts = vec![SupportPoint::new(Point3::new(0.0, 0.0, 10.0), 0.2)];
        let sm = SupportableMesh::new(mesh.clone(), pts.clone(), SupportTreeConfig::default());
        let builder = run(&sm);
        assert_eq!(builder.anchors().len(), 1);
        assert_relative_eq!(builder.anchors()[0].pos.z, 6.0, epsilon = 1e-6);
        assert!(builder.head(0).unwrap().is_valid());

        let cfg = SupportTreeConfig {
            ground_facing_only: true,
            ..Default::default()
        };
        let builder = run(&SupportableMesh::new(mesh, pts, cfg));
        assert!(builder.anchors().is_empty());
        assert!(!builder.head(0).unwrap().is_valid());
    }

    #[test]
    fn test_distant_pillars_are_cross_linked() {
        let mut sm = plate(&[(0.0, 0.0), (6.0, 0.0)]);
        sm.cfg.object_elevation_mm = 20.0;
        let builder = run(&sm);
        assert_eq!(builder.pillars().len(), 2);
        assert!(!builder.crossbridges().is_empty());
        assert!(builder.pillars().iter().all(|p| p.links == 1));
    }

    #[test]
    fn test_lone_tall_pillar_gets_a_helper() {
        let mut sm = plate(&[(0.0, 0.0)]);
        sm.cfg.object_elevation_mm = 20.0;
        let builder = run(&sm);
        let pillars = builder.pillars();
        assert_eq!(pillars.len(), 2);
        assert!(!builder.crossbridges().is_empty());
        assert!(pillars.iter().all(|p| p.links == 1));
        assert_eq!(builder.pedestals().len(), 2);
        let bb = builder.retrieve_mesh().bounding_box();
        assert_relative_eq!(bb.min.z, -15.0, epsilon = 1e-4);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let sm = plate(&[(0.0, 0.0), (1.0, 0.5), (6.0, 0.0), (-5.0, 3.0)]);
        let a = run(&sm).retrieve_mesh();
        let b = run(&sm).retrieve_mesh();
        assert_relative_eq!(a.volume(), b.volume(), epsilon = 1e-9);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cancel_stops_execution() {
        let sm = plate(&[(0.0, 0.0)]);
        let ctl = JobController::new().with_stop(std::sync::Arc::new(|| true));
        let builder = SupportTreeBuilder::new(ctl.clone());
        assert_eq!(
            DefaultSupportTree::execute(&builder, &sm, &ctl),
            Err(crate::error::SupportError::Canceled)
        );
    }
}
