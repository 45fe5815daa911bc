//! Evaluation of a flat list of CSG parts with explicit stack operations.
//!
//! Each part carries a mesh, a placement, the boolean operation that
//! combines it into the current result and a stack operation. `Push`
//! opens a nested group whose result is combined into the enclosing one
//! with the pushing part's operation once a part with `Pop` closes it.

use rayon::prelude::*;
use resina_math::Transform;
use resina_mesh::TriangleMesh;
use tracing::{debug, warn};

use crate::ops::{perform, BooleanOp};
use crate::validate::{validate, MeshValidation};

/// Stack operation attached to a CSG part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsgStackOp {
    /// Open a nested group before applying this part.
    Push,
    /// Apply the part to the current group.
    #[default]
    Continue,
    /// Close the current group after applying this part.
    Pop,
}

/// One entry of a CSG list.
#[derive(Debug, Clone, Default)]
pub struct CsgPart {
    /// Geometry in part coordinates; `None` for pure stack markers.
    pub mesh: Option<TriangleMesh>,
    /// Placement of the part.
    pub transform: Transform,
    /// How the part combines into the current group.
    pub operation: BooleanOp,
    /// Group handling around this part.
    pub stack_op: CsgStackOp,
}

impl CsgPart {
    /// A part with identity placement that continues the current group.
    pub fn new(mesh: TriangleMesh, operation: BooleanOp) -> Self {
        Self {
            mesh: Some(mesh),
            operation,
            ..Default::default()
        }
    }

    /// Set the placement.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Set the stack operation.
    pub fn with_stack_op(mut self, stack_op: CsgStackOp) -> Self {
        self.stack_op = stack_op;
        self
    }

    /// The part mesh in world coordinates, `None` when absent or empty.
    pub fn placed_mesh(&self) -> Option<TriangleMesh> {
        let mesh = self.mesh.as_ref().filter(|m| !m.is_empty())?;
        let mut placed = mesh.clone();
        placed.transform(&self.transform);
        Some(placed)
    }
}

struct Frame {
    op: BooleanOp,
    mesh: Option<TriangleMesh>,
}

impl Frame {
    fn new(op: BooleanOp) -> Self {
        Self { op, mesh: None }
    }
}

fn combine(op: BooleanOp, dst: &mut Option<TriangleMesh>, src: Option<TriangleMesh>) {
    match (dst.as_mut(), src) {
        (None, Some(src)) if op == BooleanOp::Union => *dst = Some(src),
        (Some(d), Some(s)) => {
            perform(op, d, &s);
        }
        _ => {}
    }
}

/// Evaluate `parts` in order and return the combined mesh.
///
/// Part meshes are placed in parallel; the combination itself runs
/// sequentially. Boolean failures are logged and leave the partial
/// result unchanged.
pub fn perform_csgmesh_booleans(parts: &[CsgPart]) -> TriangleMesh {
    let mut placed: Vec<Option<TriangleMesh>> =
        parts.par_iter().map(CsgPart::placed_mesh).collect();

    let mut stack = vec![Frame::new(BooleanOp::Union)];
    for (idx, part) in parts.iter().enumerate() {
        let mut op = part.operation;
        if part.stack_op == CsgStackOp::Push {
            stack.push(Frame::new(op));
            op = BooleanOp::Union;
        }

        if let Some(top) = stack.last_mut() {
            combine(op, &mut top.mesh, placed[idx].take());
        }

        if part.stack_op == CsgStackOp::Pop {
            if stack.len() < 2 {
                warn!(part = idx, "unbalanced CSG pop ignored");
                continue;
            }
            if let Some(frame) = stack.pop() {
                if let Some(parent) = stack.last_mut() {
                    combine(frame.op, &mut parent.mesh, frame.mesh);
                }
            }
        }
    }

    // Fold any groups left open.
    while stack.len() > 1 {
        if let Some(frame) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                combine(frame.op, &mut parent.mesh, frame.mesh);
            }
        }
    }

    let result = stack.pop().and_then(|f| f.mesh).unwrap_or_default();
    debug!(parts = parts.len(), triangles = result.num_triangles(), "CSG evaluated");
    result
}

/// Check every part that takes part in a boolean.
///
/// `visitor` is called with the index and validation result of each
/// failing part. Returns the index of the first failing part. Parts
/// without a mesh and stack push/pop markers always pass.
pub fn check_csgmesh_booleans(
    parts: &[CsgPart],
    mut visitor: impl FnMut(usize, &MeshValidation),
) -> Option<usize> {
    let results: Vec<Option<MeshValidation>> = parts
        .par_iter()
        .map(|part| {
            if part.stack_op != CsgStackOp::Continue {
                return None;
            }
            let mesh = part.placed_mesh()?;
            let v = validate(&mesh);
            (!v.is_valid()).then_some(v)
        })
        .collect();

    let mut first = None;
    for (idx, bad) in results.iter().enumerate() {
        if let Some(v) = bad {
            visitor(idx, v);
            first.get_or_insert(idx);
        }
    }
    first
}

/// Plain concatenation of the positive part meshes, skipping the booleans.
pub fn csgmesh_merge_positive_parts(parts: &[CsgPart]) -> TriangleMesh {
    let mut out = TriangleMesh::new();
    for part in parts {
        if part.operation == BooleanOp::Union {
            if let Some(m) = part.placed_mesh() {
                out.merge(&m);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_mesh::primitives::cube;

    fn unit_at(x: f64, y: f64, z: f64) -> TriangleMesh {
        let mut m = cube(1.0, 1.0, 1.0);
        m.translate(&resina_math::Vec3::new(x, y, z));
        m
    }

    #[test]
    fn test_union_then_difference() {
        let parts = vec![
            CsgPart::new(cube(2.0, 2.0, 2.0), BooleanOp::Union),
            CsgPart::new(unit_at(0.5, 0.5, 1.5), BooleanOp::Difference),
        ];
        let mesh = perform_csgmesh_booleans(&parts);
        assert_relative_eq!(mesh.volume(), 8.0 - 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_pushed_group_applies_its_operation() {
        // 3x1x1 bar minus (union of two unit cubes) evaluated as a group.
        let parts = vec![
            CsgPart::new(cube(3.0, 1.0, 1.0), BooleanOp::Union),
            CsgPart::new(unit_at(0.0, 0.0, 0.0), BooleanOp::Difference)
                .with_stack_op(CsgStackOp::Push),
            CsgPart::new(unit_at(2.0, 0.0, 0.0), BooleanOp::Union)
                .with_stack_op(CsgStackOp::Pop),
        ];
        let mesh = perform_csgmesh_booleans(&parts);
        assert_relative_eq!(mesh.volume(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_difference_without_destination_is_skipped() {
        let parts = vec![
            CsgPart::new(cube(1.0, 1.0, 1.0), BooleanOp::Difference),
            CsgPart::new(unit_at(3.0, 0.0, 0.0), BooleanOp::Union),
        ];
        let mesh = perform_csgmesh_booleans(&parts);
        assert_relative_eq!(mesh.volume(), 1.0, epsilon = 1e-9);
        assert!(mesh.bounding_box().min.x >= 3.0 - 1e-9);
    }

    #[test]
    fn test_transform_is_applied() {
        let parts = vec![CsgPart::new(cube(1.0, 1.0, 1.0), BooleanOp::Union)
            .with_transform(Transform::translation(0.0, 0.0, 5.0))];
        let mesh = perform_csgmesh_booleans(&parts);
        assert_relative_eq!(mesh.bounding_box().min.z, 5.0);
    }

    #[test]
    fn test_check_reports_first_bad_part() {
        let mut open = cube(1.0, 1.0, 1.0);
        open.indices.truncate(10);
        let parts = vec![
            CsgPart::new(cube(1.0, 1.0, 1.0), BooleanOp::Union),
            CsgPart::new(open.clone(), BooleanOp::Difference),
            CsgPart::new(open, BooleanOp::Union),
            CsgPart {
                mesh: None,
                ..Default::default()
            },
        ];
        let mut visited = Vec::new();
        let first = check_csgmesh_booleans(&parts, |idx, v| {
            assert!(!v.bounds_volume);
            visited.push(idx);
        });
        assert_eq!(first, Some(1));
        assert_eq!(visited, vec![1, 2]);
    }
}
