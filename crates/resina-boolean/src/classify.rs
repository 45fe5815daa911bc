//! Fragment classification against the other operand.

use resina_mesh::AabbMesh;

use crate::split::{Fragment, PLANE_EPS};

/// Where a fragment lies relative to the other operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Location {
    Inside,
    Outside,
    /// On the other surface, facing the same way.
    CoplanarSame,
    /// On the other surface, facing the opposite way.
    CoplanarOpposite,
}

pub(crate) fn classify(frag: &Fragment, other: &AabbMesh) -> Location {
    let c = frag.centroid();
    if let Some(closest) = other.closest(&c) {
        if closest.squared_distance < (10.0 * PLANE_EPS).powi(2) {
            let dot = frag.normal.dot(&other.face_normal(closest.face));
            if dot > 1.0 - 1e-6 {
                return Location::CoplanarSame;
            }
            if dot < -1.0 + 1e-6 {
                return Location::CoplanarOpposite;
            }
        }
    }
    if other.is_inside(&c) {
        Location::Inside
    } else {
        Location::Outside
    }
}
