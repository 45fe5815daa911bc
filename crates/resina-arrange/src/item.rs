//! Items handed to the packer.

use std::fmt;
use std::sync::Arc;

use resina_math::Vec2;
use resina_mesh::{ExPolygon, Polygon};

/// Bed index of an item that has not been (or could not be) placed.
pub const UNARRANGED: i32 = -1;

/// Callback receiving an item once its placement is decided.
pub type ArrangeSetter = Arc<dyn Fn(&ArrangePolygon) + Send + Sync>;

/// One outline to pack.
///
/// `translation` and `rotation` are read as the starting placement and
/// overwritten with the result. The translation is relative to the logical
/// bed the item ends up on; see [`ArrangeBed::logical_bed_offset`].
///
/// [`ArrangeBed::logical_bed_offset`]: crate::ArrangeBed::logical_bed_offset
#[derive(Clone)]
pub struct ArrangePolygon {
    /// Outline in item coordinates.
    pub poly: ExPolygon,
    /// Placement offset.
    pub translation: Vec2,
    /// Rotation about the item origin (radians).
    pub rotation: f64,
    /// Extra footprint growth for this item only (mm).
    pub inflation: f64,
    /// Logical bed, or [`UNARRANGED`].
    pub bed_idx: i32,
    /// Higher priorities are packed first.
    pub priority: i32,
    /// Absolute rotations tried when rotations are allowed.
    pub allowed_rotations: Vec<f64>,
    /// Called by [`ArrangePolygon::apply`].
    pub setter: Option<ArrangeSetter>,
}

impl Default for ArrangePolygon {
    fn default() -> Self {
        Self {
            poly: ExPolygon::default(),
            translation: Vec2::zeros(),
            rotation: 0.0,
            inflation: 0.0,
            bed_idx: UNARRANGED,
            priority: 0,
            allowed_rotations: vec![0.0],
            setter: None,
        }
    }
}

impl fmt::Debug for ArrangePolygon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrangePolygon")
            .field("poly", &self.poly)
            .field("translation", &self.translation)
            .field("rotation", &self.rotation)
            .field("inflation", &self.inflation)
            .field("bed_idx", &self.bed_idx)
            .field("priority", &self.priority)
            .field("allowed_rotations", &self.allowed_rotations)
            .field("setter", &self.setter.is_some())
            .finish()
    }
}

impl ArrangePolygon {
    /// An unplaced item with the given outline.
    pub fn new(poly: ExPolygon) -> Self {
        Self {
            poly,
            ..Default::default()
        }
    }

    /// Set the starting translation.
    pub fn with_translation(mut self, translation: Vec2) -> Self {
        self.translation = translation;
        self
    }

    /// Set the footprint growth.
    pub fn with_inflation(mut self, inflation: f64) -> Self {
        self.inflation = inflation;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the result callback.
    pub fn with_setter(mut self, setter: ArrangeSetter) -> Self {
        self.setter = Some(setter);
        self
    }

    /// Whether the item has a bed.
    pub fn is_arranged(&self) -> bool {
        self.bed_idx != UNARRANGED
    }

    /// Outline rotated and then translated into place.
    pub fn transformed_poly(&self) -> ExPolygon {
        let mut p = self.poly.clone();
        p.rotate(self.rotation);
        p.translate(&self.translation);
        p
    }

    /// Convex hull of the outline at `rotation`, before translation.
    pub(crate) fn rotated_hull(&self, rotation: f64) -> Polygon {
        let mut hull = self.poly.convex_hull();
        hull.rotate(rotation);
        hull
    }

    /// Degenerate or self-intersecting outlines are never placed.
    pub(crate) fn is_packable(&self) -> bool {
        self.poly.is_valid() && self.poly.area() > resina_math::EPSILON
    }

    /// Hand the result to the setter, if any.
    pub fn apply(&self) {
        if let Some(setter) = &self.setter {
            setter(self);
        }
    }
}
