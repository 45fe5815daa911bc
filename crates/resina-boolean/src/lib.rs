#![warn(missing_docs)]

//! Mesh boolean operations for the resina SLA core.
//!
//! Booleans work on closed, outward-oriented triangle meshes:
//! 1. Disjoint bounding boxes take a shortcut
//! 2. Each triangle is split along the surface of the other operand
//! 3. Fragments are classified as inside, outside or coplanar
//! 4. Fragments are kept per operation and welded into the result
//!
//! The [`csg`] module evaluates ordered part lists with nested groups.

pub mod csg;
pub mod error;
pub mod ops;
pub mod validate;

mod classify;
mod split;

pub use csg::{
    check_csgmesh_booleans, csgmesh_merge_positive_parts, perform_csgmesh_booleans, CsgPart,
    CsgStackOp,
};
pub use error::{BooleanError, Result};
pub use ops::{difference, intersection, perform, try_boolean, union, BooleanOp};
pub use validate::{does_bound_a_volume, does_self_intersect, validate, MeshValidation};
