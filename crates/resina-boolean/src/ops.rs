//! Boolean operations on closed triangle meshes.

use rayon::prelude::*;
use resina_math::{Point3, EPSILON, MERGE_TOLERANCE};
use resina_mesh::{AabbMesh, TriangleMesh};
use tracing::{debug, warn};

use crate::classify::{classify, Location};
use crate::validate::does_self_intersect;
use crate::error::{BooleanError, Result};
use crate::split::{split_mesh, Fragment};

/// CSG boolean operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BooleanOp {
    /// Combine both solids.
    #[default]
    Union,
    /// Subtract the second solid from the first.
    Difference,
    /// Keep only the overlapping region.
    Intersection,
}

/// Compute `a op b` without touching the inputs.
///
/// Both operands must be non-empty, enclose a positive volume and not
/// cross themselves.
pub fn try_boolean(a: &TriangleMesh, b: &TriangleMesh, op: BooleanOp) -> Result<TriangleMesh> {
    check_operand(a, "first")?;
    check_operand(b, "second")?;

    if !a.bounding_box().overlaps(&b.bounding_box(), 0.0) {
        return Ok(disjoint(a, b, op));
    }

    let index_a = AabbMesh::new(a.clone());
    let index_b = AabbMesh::new(b.clone());

    let (frags_a, frags_b) = rayon::join(|| split_mesh(a, &index_b), || split_mesh(b, &index_a));
    debug!(
        fragments_a = frags_a.len(),
        fragments_b = frags_b.len(),
        ?op,
        "split operands"
    );

    let keep_a = |loc: Location| match op {
        BooleanOp::Union => matches!(loc, Location::Outside | Location::CoplanarSame),
        BooleanOp::Intersection => matches!(loc, Location::Inside | Location::CoplanarSame),
        BooleanOp::Difference => matches!(loc, Location::Outside | Location::CoplanarOpposite),
    };
    let keep_b = |loc: Location| match op {
        BooleanOp::Union => loc == Location::Outside,
        BooleanOp::Intersection | BooleanOp::Difference => loc == Location::Inside,
    };

    let kept_a = select(&frags_a, &index_b, keep_a);
    let mut kept_b = select(&frags_b, &index_a, keep_b);
    if op == BooleanOp::Difference {
        for t in &mut kept_b {
            t.swap(1, 2);
        }
    }

    let mut triangles = kept_a;
    triangles.extend(kept_b);
    let mut mesh = TriangleMesh::from_triangles(&triangles);
    mesh.merge_vertices(MERGE_TOLERANCE);
    Ok(mesh)
}

fn select(
    frags: &[Fragment],
    other: &AabbMesh,
    keep: impl Fn(Location) -> bool + Sync,
) -> Vec<[Point3; 3]> {
    frags
        .par_iter()
        .filter(|f| keep(classify(f, other)))
        .map(|f| f.tri)
        .collect()
}

fn check_operand(mesh: &TriangleMesh, which: &str) -> Result<()> {
    if mesh.is_empty() {
        return Err(BooleanError::EmptyMesh {
            details: format!("{which} operand has no triangles"),
        });
    }
    let volume = mesh.volume();
    if volume <= EPSILON {
        return Err(BooleanError::NotSolid {
            details: format!("{which} operand has volume {volume:.6}"),
        });
    }
    if does_self_intersect(mesh) {
        return Err(BooleanError::SelfIntersecting {
            details: format!("{which} operand"),
        });
    }
    Ok(())
}

fn disjoint(a: &TriangleMesh, b: &TriangleMesh, op: BooleanOp) -> TriangleMesh {
    match op {
        BooleanOp::Union => {
            let mut out = a.clone();
            out.merge(b);
            out
        }
        BooleanOp::Difference => a.clone(),
        BooleanOp::Intersection => TriangleMesh::new(),
    }
}

/// Apply `op` in place. On failure `dst` is left unchanged and the error is logged.
pub fn perform(op: BooleanOp, dst: &mut TriangleMesh, src: &TriangleMesh) -> bool {
    match try_boolean(dst, src, op) {
        Ok(result) => {
            *dst = result;
            true
        }
        Err(err) => {
            warn!(?op, %err, "mesh boolean failed, keeping destination unchanged");
            false
        }
    }
}

/// `a ∪= b`.
pub fn union(a: &mut TriangleMesh, b: &TriangleMesh) -> bool {
    perform(BooleanOp::Union, a, b)
}

/// `a −= b`.
pub fn difference(a: &mut TriangleMesh, b: &TriangleMesh) -> bool {
    perform(BooleanOp::Difference, a, b)
}

/// `a ∩= b`.
pub fn intersection(a: &mut TriangleMesh, b: &TriangleMesh) -> bool {
    perform(BooleanOp::Intersection, a, b)
}
