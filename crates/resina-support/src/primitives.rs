//! Geometric building blocks of a support tree and their meshes.
//!
//! Every primitive keeps just enough parameters to generate its own closed
//! mesh on demand through [`SupportPrimitive::to_mesh`].

use resina_math::{down, Point3, Transform, Vec3, EPSILON};
use resina_mesh::primitives::{cylinder, halfcone, sphere};
use resina_mesh::TriangleMesh;

/// Id of a primitive that is not (or no longer) part of the tree.
pub const ID_UNSET: i64 = -1;

/// Anything that can be meshed.
pub trait SupportPrimitive {
    /// Closed mesh with `steps` segments around round features.
    fn to_mesh(&self, steps: usize) -> TriangleMesh;
}

/// Map the +Z axis onto `dir` and the origin onto `pos`.
fn oriented(mut mesh: TriangleMesh, dir: &Vec3, pos: &Point3) -> TriangleMesh {
    let place = Transform::translation(pos.x, pos.y, pos.z)
        .then(&Transform::rotation_between(&Vec3::z(), dir));
    mesh.transform(&place);
    mesh
}

fn lifted(mut mesh: TriangleMesh, dz: f64) -> TriangleMesh {
    mesh.translate(&Vec3::new(0.0, 0.0, dz));
    mesh
}

/// A pinhead: a small ball sunk into the model, a neck, and a back ball
/// where the rest of the tree attaches.
#[derive(Debug, Clone, PartialEq)]
pub struct Head {
    /// Direction from the model surface towards the back ball.
    pub dir: Vec3,
    /// Support point on the model surface.
    pub pos: Point3,
    /// Back ball radius.
    pub r_back_mm: f64,
    /// Pin ball radius.
    pub r_pin_mm: f64,
    /// Neck length between the balls.
    pub width_mm: f64,
    /// Depth of the pin inside the model.
    pub penetration_mm: f64,
    /// Support point id, [`ID_UNSET`] once invalidated.
    pub id: i64,
    /// Pillar starting at this head.
    pub pillar_id: i64,
    /// Bridge leaving this head.
    pub bridge_id: i64,
}

impl Head {
    /// A head with no id and no connections.
    pub fn new(
        r_back_mm: f64,
        r_pin_mm: f64,
        width_mm: f64,
        penetration_mm: f64,
        dir: Vec3,
        pos: Point3,
    ) -> Self {
        Self {
            dir,
            pos,
            r_back_mm,
            r_pin_mm,
            width_mm,
            penetration_mm,
            id: ID_UNSET,
            pillar_id: ID_UNSET,
            bridge_id: ID_UNSET,
        }
    }

    /// Length from pin tip to back ball end.
    pub fn real_width(&self) -> f64 {
        2.0 * self.r_pin_mm + self.width_mm + 2.0 * self.r_back_mm
    }

    /// Length outside the model.
    pub fn fullwidth(&self) -> f64 {
        self.real_width() - self.penetration_mm
    }

    /// Centre of the back ball.
    pub fn junction_point(&self) -> Point3 {
        self.pos + self.dir * (self.fullwidth() - self.r_back_mm)
    }

    /// Pillar radius a head of this size can carry.
    pub fn request_pillar_radius(&self, radius: f64) -> f64 {
        if radius > 0.0 && radius < self.r_back_mm {
            radius
        } else {
            self.r_back_mm
        }
    }

    /// Drop the head from the tree.
    pub fn invalidate(&mut self) {
        self.id = ID_UNSET;
    }

    /// Whether the head is part of the tree.
    pub fn is_valid(&self) -> bool {
        self.id >= 0
    }
}

impl Default for Head {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, down(), Point3::origin())
    }
}

impl SupportPrimitive for Head {
    fn to_mesh(&self, steps: usize) -> TriangleMesh {
        // Along +Z: pin ball centre, then back ball centre.
        let d_pin = self.r_pin_mm - self.penetration_mm;
        let d_back = self.fullwidth() - self.r_back_mm;

        let mut mesh = lifted(sphere(self.r_pin_mm, steps), d_pin);
        if d_back - d_pin > EPSILON {
            mesh.merge(&lifted(
                halfcone(d_back - d_pin, self.r_pin_mm, self.r_back_mm, steps),
                d_pin,
            ));
        }
        mesh.merge(&lifted(sphere(self.r_back_mm, steps), d_back));
        oriented(mesh, &self.dir, &self.pos)
    }
}

/// A head anchoring a branch on the model surface.
pub type Anchor = Head;

/// A ball joining several branches.
#[derive(Debug, Clone, PartialEq)]
pub struct Junction {
    /// Centre.
    pub pos: Point3,
    /// Radius.
    pub r: f64,
    /// Builder id.
    pub id: i64,
}

impl Junction {
    /// A junction with no id.
    pub fn new(pos: Point3, r: f64) -> Self {
        Self {
            pos,
            r,
            id: ID_UNSET,
        }
    }
}

impl SupportPrimitive for Junction {
    fn to_mesh(&self, steps: usize) -> TriangleMesh {
        let mut mesh = sphere(self.r, steps);
        mesh.translate(&self.pos.coords);
        mesh
    }
}

/// A vertical column standing on `endpt`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pillar {
    /// Bottom centre.
    pub endpt: Point3,
    /// Length.
    pub height: f64,
    /// Radius at the top.
    pub r_start: f64,
    /// Radius at the bottom.
    pub r_end: f64,
    /// Builder id.
    pub id: i64,
    /// The pillar hangs from a head.
    pub starts_from_head: bool,
    /// Head or junction at the top.
    pub start_junction_id: i64,
    /// Side bridges attached so far.
    pub bridges: u32,
    /// Cross links to other pillars.
    pub links: u32,
}

impl Pillar {
    /// A pillar of `height` above `endpt`.
    pub fn new(endpt: Point3, height: f64, r_start: f64, r_end: f64) -> Self {
        Self {
            endpt,
            height,
            r_start,
            r_end,
            id: ID_UNSET,
            starts_from_head: false,
            start_junction_id: ID_UNSET,
            bridges: 0,
            links: 0,
        }
    }

    /// Top centre.
    pub fn startpoint(&self) -> Point3 {
        self.endpt + Vec3::new(0.0, 0.0, self.height)
    }

    /// Bottom centre.
    pub fn endpoint(&self) -> Point3 {
        self.endpt
    }
}

impl SupportPrimitive for Pillar {
    fn to_mesh(&self, steps: usize) -> TriangleMesh {
        if self.height <= EPSILON {
            return TriangleMesh::new();
        }
        let mut mesh = halfcone(self.height, self.r_end, self.r_start, steps);
        mesh.translate(&self.endpt.coords);
        mesh
    }
}

/// A cone widening a pillar's foot.
#[derive(Debug, Clone, PartialEq)]
pub struct Pedestal {
    /// Bottom centre.
    pub pos: Point3,
    /// Cone height.
    pub height: f64,
    /// Radius on the ground.
    pub r_bottom: f64,
    /// Radius where the pillar enters.
    pub r_top: f64,
    /// Builder id.
    pub id: i64,
}

impl Pedestal {
    /// A base with no id.
    pub fn new(pos: Point3, height: f64, r_bottom: f64, r_top: f64) -> Self {
        Self {
            pos,
            height,
            r_bottom,
            r_top,
            id: ID_UNSET,
        }
    }
}

impl SupportPrimitive for Pedestal {
    fn to_mesh(&self, steps: usize) -> TriangleMesh {
        if self.height <= EPSILON {
            return TriangleMesh::new();
        }
        let mut mesh = halfcone(self.height, self.r_bottom, self.r_top, steps);
        mesh.translate(&self.pos.coords);
        mesh
    }
}

/// A straight rod between two points.
#[derive(Debug, Clone, PartialEq)]
pub struct Bridge {
    /// One end.
    pub startp: Point3,
    /// Other end.
    pub endp: Point3,
    /// Radius.
    pub r: f64,
    /// Builder id.
    pub id: i64,
}

impl Bridge {
    /// A bridge with no id.
    pub fn new(startp: Point3, endp: Point3, r: f64) -> Self {
        Self {
            startp,
            endp,
            r,
            id: ID_UNSET,
        }
    }

    /// Distance between the ends.
    pub fn length(&self) -> f64 {
        (self.endp - self.startp).norm()
    }

    /// Unit direction from start to end.
    pub fn dir(&self) -> Vec3 {
        (self.endp - self.startp)
            .try_normalize(0.0)
            .unwrap_or_else(down)
    }
}

impl SupportPrimitive for Bridge {
    fn to_mesh(&self, steps: usize) -> TriangleMesh {
        let len = self.length();
        if len <= EPSILON {
            return TriangleMesh::new();
        }
        oriented(cylinder(self.r, len, steps), &self.dir(), &self.startp)
    }
}

/// A rod whose radius changes from `r` to `end_r`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffBridge {
    /// Narrow end.
    pub startp: Point3,
    /// Wide end.
    pub endp: Point3,
    /// Radius at `startp`.
    pub r: f64,
    /// Radius at `endp`.
    pub end_r: f64,
    /// Builder id.
    pub id: i64,
}

impl DiffBridge {
    /// A tapered bridge with no id.
    pub fn new(startp: Point3, endp: Point3, r: f64, end_r: f64) -> Self {
        Self {
            startp,
            endp,
            r,
            end_r,
            id: ID_UNSET,
        }
    }

    /// Distance between the ends.
    pub fn length(&self) -> f64 {
        (self.endp - self.startp).norm()
    }
}

impl SupportPrimitive for DiffBridge {
    fn to_mesh(&self, steps: usize) -> TriangleMesh {
        let len = self.length();
        if len <= EPSILON {
            return TriangleMesh::new();
        }
        let dir = (self.endp - self.startp) / len;
        let mut mesh = oriented(halfcone(len, self.r, self.end_r, steps), &dir, &self.startp);

        // Round both ends so consecutive segments join without notches.
        let mut cap = sphere(self.r, steps);
        cap.translate(&self.startp.coords);
        mesh.merge(&cap);
        let mut cap = sphere(self.end_r, steps);
        cap.translate(&self.endp.coords);
        mesh.merge(&cap);
        mesh
    }
}
