//! Branching support tree.
//!
//! Heads are leaves of a tree grown top-down: the highest open node is
//! routed to the nearest reachable target, which is either another node
//! (the two merge into a junction), a sample point on the bed, or a
//! sample point on an upward facing part of the model. Branches thicken
//! with the weight they carry.

use std::collections::HashMap;

use resina_math::{down, Point3, Vec3, EPSILON};
use tracing::{debug, warn};

use crate::builder::{SupportTreeBuilder, DEFAULT_MESH_STEPS};
use crate::ctl::JobController;
use crate::default_tree::place_pinheads;
use crate::error::Result;
use crate::point::{ground_level, SupportableMesh};
use crate::primitives::{Anchor, Junction};
use crate::routing::{
    beam_mesh_hit, build_ground_connection, calculate_anchor_placement, check_ground_route,
    deepsearch_ground_connection, find_merge_pt, is_outside_support_cone, Ball, Beam,
    GroundConnection,
};

/// Candidates examined first for each node; doubled while none fits.
const INITIAL_CANDIDATES: usize = 5;

/// Radius growth per unit of carried weight, scaled by the widening factor.
const WEIGHT_WIDENING: f64 = 0.05;

/// Upper bound for bed and model sample counts.
const MAX_SAMPLES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Leaf(usize),
    Junction,
}

#[derive(Debug, Clone)]
struct Node {
    pos: Point3,
    rmin: f64,
    weight: f64,
    kind: NodeKind,
    children: Vec<usize>,
    open: bool,
    alive: bool,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Bed(Point3),
    Mesh(Point3),
    Merge(usize, Point3),
}

#[derive(Debug, Clone)]
enum Root {
    Ground(GroundConnection),
    Model(Point3, Anchor),
}

/// Grows and materializes one branching tree.
pub struct BranchingTree<'a> {
    sm: &'a SupportableMesh,
    builder: &'a SupportTreeBuilder,
    ctl: &'a JobController,
    gndlvl: f64,
    nodes: Vec<Node>,
    bed: Vec<Point3>,
    mesh_samples: Vec<Point3>,
    roots: HashMap<usize, Root>,
}

impl<'a> BranchingTree<'a> {
    /// Run the whole synthesis into `builder`.
    pub fn execute(
        builder: &'a SupportTreeBuilder,
        sm: &'a SupportableMesh,
        ctl: &'a JobController,
    ) -> Result<()> {
        ctl.status(10, "Generating pinheads");
        let mut tree = Self {
            sm,
            builder,
            ctl,
            gndlvl: ground_level(sm),
            nodes: Vec::new(),
            bed: Vec::new(),
            mesh_samples: Vec::new(),
            roots: HashMap::new(),
        };
        tree.add_leaves()?;

        ctl.check()?;
        ctl.status(30, "Sampling targets");
        tree.bed = tree.sample_bed();
        if !sm.cfg.ground_facing_only {
            tree.mesh_samples = tree.sample_model();
        }
        debug!(
            leaves = tree.nodes.len(),
            bed = tree.bed.len(),
            model = tree.mesh_samples.len(),
            "branching targets sampled"
        );

        ctl.status(50, "Routing branches");
        while let Some(n) = tree.highest_open() {
            ctl.check()?;
            tree.route(n)?;
        }

        ctl.check()?;
        ctl.status(80, "Merging support mesh");
        tree.materialize()?;
        builder.merged_mesh(DEFAULT_MESH_STEPS);
        ctl.check()?;
        ctl.status(100, "Done");
        Ok(())
    }

    fn add_leaves(&mut self) -> Result<()> {
        for (id, head) in place_pinheads(self.sm, self.ctl)? {
            let Some(head) = head else {
                continue;
            };
            let node = Node {
                pos: head.junction_point(),
                rmin: head.r_back_mm,
                weight: 0.0,
                kind: NodeKind::Leaf(id),
                children: Vec::new(),
                open: true,
                alive: true,
            };
            self.builder.add_head(id, head)?;
            self.nodes.push(node);
        }
        Ok(())
    }

    fn sample_bed(&self) -> Vec<Point3> {
        let cfg = &self.sm.cfg;
        let Some(first) = self.nodes.first() else {
            return Vec::new();
        };
        let (mut lo, mut hi) = ((first.pos.x, first.pos.y), (first.pos.x, first.pos.y));
        for n in &self.nodes {
            lo = (lo.0.min(n.pos.x), lo.1.min(n.pos.y));
            hi = (hi.0.max(n.pos.x), hi.1.max(n.pos.y));
        }
        let reach = cfg.max_bridge_length_mm;
        let (w, h) = (hi.0 - lo.0 + 2.0 * reach, hi.1 - lo.1 + 2.0 * reach);
        let mut step = 2.0 * cfg.base_radius_mm.max(EPSILON);
        while ((w / step).floor() + 1.0) * ((h / step).floor() + 1.0) > MAX_SAMPLES as f64 {
            step *= 2.0;
        }
        let (nx, ny) = ((w / step).floor() as usize + 1, (h / step).floor() as usize + 1);
        let mut samples = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                samples.push(Point3::new(
                    lo.0 - reach + i as f64 * step,
                    lo.1 - reach + j as f64 * step,
                    self.gndlvl,
                ));
            }
        }
        samples
    }

    fn sample_model(&self) -> Vec<Point3> {
        let emesh = &self.sm.emesh;
        let mesh = emesh.mesh();
        let up: Vec<usize> = (0..mesh.num_triangles())
            .filter(|&i| emesh.face_normal(i).z > 0.5)
            .collect();
        let stride = up.len().div_ceil(MAX_SAMPLES).max(1);
        up.iter()
            .step_by(stride)
            .map(|&i| {
                let [a, b, c] = mesh.triangle(i);
                Point3::from((a.coords + b.coords + c.coords) / 3.0)
            })
            .collect()
    }

    fn radius(&self, n: usize) -> f64 {
        let node = &self.nodes[n];
        node.rmin + WEIGHT_WIDENING * self.sm.cfg.pillar_widening_factor * node.weight
    }

    fn highest_open(&self) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.open && n.alive)
            .max_by(|(i, a), (j, b)| a.pos.z.total_cmp(&b.pos.z).then(j.cmp(i)))
            .map(|(i, _)| i)
    }

    fn candidates(&self, n: usize) -> Vec<(f64, Target)> {
        let cfg = &self.sm.cfg;
        let p = self.nodes[n].pos;
        let slope = cfg.bridge_slope;
        let mut out = Vec::new();

        let drop = Point3::new(p.x, p.y, self.gndlvl);
        out.push(((p - drop).norm(), Target::Bed(drop)));
        for g in &self.bed {
            if !is_outside_support_cone(&p, g, slope) {
                out.push(((p - g).norm(), Target::Bed(*g)));
            }
        }
        for m in &self.mesh_samples {
            if !is_outside_support_cone(&p, m, slope) {
                out.push(((p - m).norm(), Target::Mesh(*m)));
            }
        }
        let floor = self.gndlvl + cfg.base_height_mm;
        for (k, other) in self.nodes.iter().enumerate() {
            if k == n || !other.open || !other.alive {
                continue;
            }
            if let Some(c) = find_merge_pt(&p, &other.pos, slope) {
                if c.z > floor {
                    out.push(((p - c).norm(), Target::Merge(k, c)));
                }
            }
        }
        out.sort_by(|a, b| a.0.total_cmp(&b.0));
        out
    }

    fn route(&mut self, n: usize) -> Result<()> {
        let candidates = self.candidates(n);
        let mut tried = 0;
        let mut k = INITIAL_CANDIDATES;
        while tried < candidates.len() {
            for (_, target) in &candidates[tried..k.min(candidates.len())] {
                let routed = match *target {
                    Target::Merge(m, c) => self.merge(n, m, c),
                    Target::Bed(g) => self.connect_to_bed(n, g),
                    Target::Mesh(p) => self.connect_to_model(n, p),
                };
                if routed {
                    return Ok(());
                }
            }
            tried = k.min(candidates.len());
            k *= 2;
        }
        self.route_unreachable(n)
    }

    fn beam_is_clear(&self, a: &Ball, b: &Ball) -> bool {
        let len = (b.p - a.p).norm();
        if len <= EPSILON {
            return true;
        }
        let sd = self.sm.cfg.safety_distance(a.r);
        beam_mesh_hit(&self.sm.emesh, &Beam::between(a, b), sd) >= len
    }

    fn merge(&mut self, n: usize, m: usize, c: Point3) -> bool {
        let (pn, pm) = (self.nodes[n].pos, self.nodes[m].pos);
        let (rn, rm) = (self.radius(n), self.radius(m));
        let (ln, lm) = ((c - pn).norm(), (c - pm).norm());

        if lm <= EPSILON {
            // `m` already lies in the cone of `n`: hang `n` below it.
            if !self.beam_is_clear(&Ball::new(pn, rn), &Ball::new(pm, rm.max(rn))) {
                return false;
            }
            let (carried, rmin) = (self.nodes[n].weight + ln, self.nodes[n].rmin);
            let target = &mut self.nodes[m];
            target.weight += carried;
            target.rmin = target.rmin.max(rmin);
            target.children.push(n);
            self.nodes[n].open = false;
            return true;
        }

        let weight = self.nodes[n].weight + self.nodes[m].weight + ln + lm;
        let rmin = self.nodes[n].rmin.max(self.nodes[m].rmin);
        let rc = rmin + WEIGHT_WIDENING * self.sm.cfg.pillar_widening_factor * weight;
        if !self.beam_is_clear(&Ball::new(pn, rn), &Ball::new(c, rc))
            || !self.beam_is_clear(&Ball::new(pm, rm), &Ball::new(c, rc))
        {
            return false;
        }
        self.nodes[n].open = false;
        self.nodes[m].open = false;
        self.nodes.push(Node {
            pos: c,
            rmin,
            weight,
            kind: NodeKind::Junction,
            children: vec![n, m],
            open: true,
            alive: true,
        });
        true
    }

    fn connect_to_bed(&mut self, n: usize, g: Point3) -> bool {
        let cfg = &self.sm.cfg;
        let p = self.nodes[n].pos;
        let source = Junction::new(p, self.radius(n));
        let d = ((g.x - p.x).powi(2) + (g.y - p.y).powi(2)).sqrt();
        let (dir, len) = if d <= EPSILON {
            (down(), 0.0)
        } else {
            let tan = cfg.bridge_slope.tan();
            if tan <= EPSILON {
                return false;
            }
            let end = Point3::new(g.x, g.y, p.z - d / tan);
            match (end - p).try_normalize(EPSILON) {
                Some(dir) => (dir, (end - p).norm()),
                None => return false,
            }
        };
        let (conn, _) = check_ground_route(self.sm, &source, &dir, len, self.gndlvl);
        if !conn.is_valid() {
            return false;
        }
        self.roots.insert(n, Root::Ground(conn));
        self.nodes[n].open = false;
        true
    }

    fn connect_to_model(&mut self, n: usize, sample: Point3) -> bool {
        let cfg = &self.sm.cfg;
        if self.nodes[n].weight > cfg.max_weight_on_model_support {
            return false;
        }
        let p = self.nodes[n].pos;
        let r = self.radius(n);
        let reach = 2.0 * cfg.head_front_radius_mm + cfg.head_width_mm + cfg.head_back_radius_mm
            - cfg.head_penetration_mm;
        let j = sample + Vec3::new(0.0, 0.0, reach);
        if j.z >= p.z || is_outside_support_cone(&p, &j, cfg.bridge_slope) {
            return false;
        }
        let Some(anchor) = calculate_anchor_placement(self.sm, &Junction::new(j, r)) else {
            return false;
        };
        if !self.beam_is_clear(&Ball::new(p, r), &Ball::new(j, r)) {
            return false;
        }
        self.roots.insert(n, Root::Model(j, anchor));
        self.nodes[n].open = false;
        true
    }

    fn deepsearch(&self, n: usize) -> Option<GroundConnection> {
        let source = Junction::new(self.nodes[n].pos, self.radius(n));
        let conn = deepsearch_ground_connection(self.ctl, self.sm, &source, &down());
        conn.is_valid().then_some(conn)
    }

    fn route_unreachable(&mut self, n: usize) -> Result<()> {
        self.nodes[n].open = false;
        if let Some(conn) = self.deepsearch(n) {
            self.roots.insert(n, Root::Ground(conn));
            return Ok(());
        }
        warn!(node = n, "unroutable branch, discarding it");
        self.discard(n)
    }

    /// Drop node `n`; each child gets one more chance at its own route.
    fn discard(&mut self, n: usize) -> Result<()> {
        self.nodes[n].alive = false;
        if let NodeKind::Leaf(id) = self.nodes[n].kind {
            self.builder.invalidate_head(id)?;
        }
        for child in std::mem::take(&mut self.nodes[n].children) {
            self.ctl.check()?;
            match self.deepsearch(child) {
                Some(conn) => {
                    self.roots.insert(child, Root::Ground(conn));
                }
                None => self.discard(child)?,
            }
        }
        Ok(())
    }

    fn materialize(&self) -> Result<()> {
        let mut roots: Vec<(&usize, &Root)> = self.roots.iter().collect();
        roots.sort_by_key(|(n, _)| **n);
        for (&n, root) in roots {
            if !self.nodes[n].alive {
                continue;
            }
            let r = self.radius(n);
            match root {
                Root::Ground(conn) => {
                    build_ground_connection(self.builder, self.sm, conn)?;
                }
                Root::Model(j, anchor) => {
                    self.builder
                        .add_diffbridge(self.nodes[n].pos, *j, r, r)?;
                    self.builder.add_junction(*j, r)?;
                    self.builder.add_anchor(anchor.clone())?;
                }
            }
            self.materialize_subtree(n)?;
        }
        Ok(())
    }

    fn materialize_subtree(&self, n: usize) -> Result<()> {
        let node = &self.nodes[n];
        let r = self.radius(n);
        if node.kind == NodeKind::Junction {
            self.builder.add_junction(node.pos, r)?;
        }
        for &c in &node.children {
            if !self.nodes[c].alive || self.roots.contains_key(&c) {
                continue;
            }
            self.builder
                .add_diffbridge(self.nodes[c].pos, node.pos, self.radius(c), r)?;
            self.materialize_subtree(c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupportTreeConfig;
    use crate::point::SupportPoint;
    use approx::assert_relative_eq;
    use resina_mesh::primitives::cube;

    fn plate(points: &[(f64, f64)]) -> SupportableMesh {
        let mut mesh = cube(20.0, 20.0, 1.0);
        mesh.translate(&Vec3::new(-10.0, -10.0, 5.0));
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
        BranchingTree::execute(&builder, sm, &ctl).unwrap();
        builder
    }

    #[test]
    fn test_neighbouring_heads_merge() {
        let sm = plate(&[(0.0, 0.0), (4.0, 0.0), (0.0, 4.0), (4.0, 4.0)]);
        let builder = run(&sm);
        assert!(builder.heads().iter().all(|h| h.is_valid()));
        let bases = builder.pedestals().len();
        assert!((1..4).contains(&bases), "{bases} bases");
        let bb = builder.retrieve_mesh().bounding_box();
        assert_relative_eq!(bb.min.z, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_single_head_drops_to_bed() {
        let sm = plate(&[(0.0, 0.0)]);
        let builder = run(&sm);
        assert_eq!(builder.pillars().len(), 1);
        let bb = builder.retrieve_mesh().bounding_box();
        assert_relative_eq!(bb.min.z, 0.0, epsilon = 1e-4);
        assert_relative_eq!(bb.max.z, 5.5, epsilon = 1e-4);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let sm = plate(&[(0.0, 0.0), (3.0, 1.0), (-4.0, 2.0), (1.0, -5.0)]);
        assert_eq!(run(&sm).retrieve_mesh(), run(&sm).retrieve_mesh());
    }

    #[test]
    fn test_merge_into_lower_node_in_cone() {
        let sm = plate(&[]);
        let ctl = JobController::new();
        let builder = SupportTreeBuilder::new(ctl.clone());
        let leaf = |pos: Point3, id| Node {
            pos,
            rmin: 0.5,
            weight: 0.0,
            kind: NodeKind::Leaf(id),
            children: Vec::new(),
            open: true,
            alive: true,
        };
        let mut tree = BranchingTree {
            sm: &sm,
            builder: &builder,
            ctl: &ctl,
            gndlvl: 0.0,
            nodes: vec![
                leaf(Point3::new(0.0, 0.0, 4.0), 0),
                leaf(Point3::new(1.0, 0.0, 2.0), 1),
            ],
            bed: Vec::new(),
            mesh_samples: Vec::new(),
            roots: HashMap::new(),
        };
        assert!(tree.merge(0, 1, Point3::new(1.0, 0.0, 2.0)));
        assert!(!tree.nodes[0].open);
        assert_eq!(tree.nodes[1].children, vec![0]);
        assert_relative_eq!(tree.nodes[1].weight, 5.0f64.sqrt());
    }
}
