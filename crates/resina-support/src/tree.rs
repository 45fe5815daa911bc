//! Entry points: synthesize a tree, slice supports and pad.

use std::time::Instant;

use resina_math::EPSILON;
use resina_mesh::clipper::union;
use resina_mesh::{slice_mesh, slice_mesh_solid, ExPolygons, TriangleMesh};
use tracing::{info, warn};

use crate::branching::BranchingTree;
use crate::builder::SupportTreeBuilder;
use crate::config::SupportTreeType;
use crate::ctl::JobController;
use crate::default_tree::DefaultSupportTree;
use crate::error::{Result, SupportError};
use crate::point::SupportableMesh;

/// Build the support tree for `sm` and return its merged mesh.
///
/// Disabled supports give an empty mesh. Organic trees are not available
/// and report [`SupportError::NotImplemented`].
pub fn create_support_tree(sm: &SupportableMesh, ctl: &JobController) -> Result<TriangleMesh> {
    let builder = SupportTreeBuilder::new(ctl.clone());
    if sm.cfg.enabled {
        let start = Instant::now();
        match sm.cfg.tree_type {
            SupportTreeType::Default => DefaultSupportTree::execute(&builder, sm, ctl)?,
            SupportTreeType::Branching => BranchingTree::execute(&builder, sm, ctl)?,
            SupportTreeType::Organic => {
                return Err(SupportError::NotImplemented("organic support trees".into()))
            }
        }
        info!(
            tree = ?sm.cfg.tree_type,
            points = sm.pts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "support tree created"
        );
    }
    let mesh = builder.merge_and_cleanup()?;
    if sm.cfg.enabled && !sm.pts.is_empty() && mesh.is_empty() {
        warn!("support tree is empty");
    }
    Ok(mesh)
}

/// Slice support and pad at `heights` and merge them per layer.
///
/// The pad is only sliced up to its top.
pub fn slice(
    support: &TriangleMesh,
    pad: &TriangleMesh,
    heights: &[f64],
    closing_radius: f64,
) -> Vec<ExPolygons> {
    let mut layers = slice_mesh_solid(support, heights, closing_radius);
    if pad.is_empty() {
        return layers;
    }
    let top = pad.bounding_box().max.z;
    let n = heights.iter().take_while(|z| **z <= top + EPSILON).count();
    let pad_layers = slice_mesh(pad, &heights[..n], closing_radius);
    for (layer, pad_layer) in layers.iter_mut().zip(pad_layers) {
        *layer = union(layer, &pad_layer);
    }
    layers
}
