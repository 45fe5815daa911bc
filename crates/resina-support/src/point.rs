//! Support points and the input bundle of a synthesis run.

use resina_math::Point3;
use resina_mesh::{AabbMesh, TriangleMesh};

use crate::config::{PadConfig, SupportTreeConfig};

/// A point on the model surface that needs a support head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupportPoint {
    /// Position on the surface.
    pub pos: Point3,
    /// Pin radius requested for this point.
    pub head_front_radius: f64,
    /// The point holds up an otherwise unsupported island.
    pub island: bool,
}

impl SupportPoint {
    /// A regular point with the given pin radius.
    pub fn new(pos: Point3, head_front_radius: f64) -> Self {
        Self {
            pos,
            head_front_radius,
            island: false,
        }
    }
}

/// Everything a synthesizer reads. Not modified during synthesis.
#[derive(Debug, Clone)]
pub struct SupportableMesh {
    /// The model with a ray/distance index.
    pub emesh: AabbMesh,
    /// Points to support.
    pub pts: Vec<SupportPoint>,
    /// Tree settings.
    pub cfg: SupportTreeConfig,
    /// Pad settings.
    pub pad_cfg: PadConfig,
    /// Height of the model bottom.
    pub zoffset: f64,
}

impl SupportableMesh {
    /// Bundle `mesh` with its points; `zoffset` starts at the mesh bottom.
    pub fn new(mesh: TriangleMesh, pts: Vec<SupportPoint>, cfg: SupportTreeConfig) -> Self {
        let emesh = AabbMesh::new(mesh);
        let zoffset = emesh.ground_level();
        Self {
            emesh,
            pts,
            cfg,
            pad_cfg: PadConfig::default(),
            zoffset,
        }
    }

    /// Replace the pad settings.
    pub fn with_pad(mut self, pad_cfg: PadConfig) -> Self {
        self.pad_cfg = pad_cfg;
        self
    }

    /// Override the model bottom height.
    pub fn with_zoffset(mut self, zoffset: f64) -> Self {
        self.zoffset = zoffset;
        self
    }
}

/// Height where pillars end.
///
/// Elevated models put the ground `object_elevation_mm` below the model;
/// embedded models rest in the pad so pillars stop on its top.
pub fn ground_level(sm: &SupportableMesh) -> f64 {
    let embed = sm.pad_cfg.embed_object.enabled;
    let mut level = sm.zoffset;
    if embed {
        level += sm.pad_cfg.wall_thickness_mm;
    } else if sm.cfg.enabled {
        level -= sm.cfg.object_elevation_mm;
    }
    level
}
