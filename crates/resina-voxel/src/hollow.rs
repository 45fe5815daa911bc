//! Interior cavity generation for hollowed prints.

use resina_math::EPSILON;
use resina_mesh::TriangleMesh;
use tracing::debug;

use crate::convert::{grid_to_mesh, mesh_to_grid, MeshToGridParams};
use crate::error::{Result, VoxelError};
use crate::grid::{get_voxel_scale, VoxelGrid};
use crate::sweep::{dilate_grid, redistance_grid};

/// Hollowing parameters (mm).
#[derive(Debug, Clone, PartialEq)]
pub struct HollowingConfig {
    /// Wall thickness left around the cavity.
    pub min_thickness: f64,
    /// Grid resolution selector in `[0, 1]`.
    pub quality: f64,
    /// Closing radius smoothing narrow cavity features.
    pub closing_distance: f64,
    /// Whether hollowing runs at all.
    pub enabled: bool,
}

impl Default for HollowingConfig {
    fn default() -> Self {
        Self {
            min_thickness: 2.0,
            quality: 0.5,
            closing_distance: 0.5,
            enabled: true,
        }
    }
}

impl HollowingConfig {
    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.min_thickness <= 0.0 {
            return Err(VoxelError::InvalidSettings(
                "min_thickness must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(VoxelError::InvalidSettings(
                "quality must lie in [0, 1]".into(),
            ));
        }
        if self.closing_distance < 0.0 {
            return Err(VoxelError::InvalidSettings(
                "closing_distance must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// A generated cavity.
#[derive(Debug, Clone)]
pub struct Interior {
    /// Cavity surface, facing outwards.
    pub mesh: TriangleMesh,
    /// Distance field the cavity was extracted from.
    pub grid: VoxelGrid,
    /// Level of `grid` the cavity lies on (voxels).
    pub iso_surface: f64,
    /// Requested wall thickness (mm).
    pub thickness: f64,
}

/// Voxels per mm for hollowing a mesh of `mesh_volume` mm³.
///
/// At least 3.5 samples across the wall, at most 8 per mm shrinking for
/// large models, interpolated by `quality`.
pub fn hollowing_voxel_scale(mesh_volume: f64, hc: &HollowingConfig) -> f64 {
    const MIN_SAMPLES_IN_WALL: f64 = 3.5;
    const MAX_OVERSAMPLING: f64 = 8.0;
    const UNIT_VOLUME: f64 = 500_000.0;

    let divider = (mesh_volume / UNIT_VOLUME).max(1.0);
    let min_oversampling = (MIN_SAMPLES_IN_WALL / hc.min_thickness).max(1.0);
    let max_oversampling = min_oversampling.max(MAX_OVERSAMPLING / divider);
    min_oversampling + (max_oversampling - min_oversampling) * hc.quality
}

/// Build the cavity of `mesh`. `stop` is polled between phases.
pub fn generate_interior(
    mesh: &TriangleMesh,
    hc: &HollowingConfig,
    stop: &dyn Fn() -> bool,
) -> Result<Interior> {
    hc.validate()?;
    let voxel_scale = hollowing_voxel_scale(mesh.volume(), hc);
    debug!(voxel_scale, volume = mesh.volume(), "hollowing grid resolution");

    let grid = mesh_to_grid(mesh, &MeshToGridParams::default().with_voxel_scale(voxel_scale))?;
    let check = || if stop() { Err(VoxelError::Interrupted) } else { Ok(()) };
    check()?;

    let offset = hc.min_thickness;
    let closing = hc.closing_distance;
    let scale = get_voxel_scale(&grid) as f64;
    let in_range = 1.1 * (offset + closing);
    let mut grid = dilate_grid(&grid, (1.0 / scale) as f32, in_range as f32);
    check()?;

    let iso_surface = if closing > EPSILON {
        let narrow = 1.0;
        grid = redistance_grid(&grid, (-(offset + closing) * scale) as f32, narrow, narrow);
        grid = dilate_grid(&grid, (1.1 * closing.ceil()) as f32, 0.0);
        closing * scale
    } else {
        -offset * scale
    };
    check()?;

    let cavity = grid_to_mesh(&grid, iso_surface, 0.0, false);
    check()?;

    Ok(Interior {
        mesh: cavity,
        grid,
        iso_surface,
        thickness: offset,
    })
}

/// Add the inverted cavity surface to `mesh`.
pub fn hollow_mesh(mesh: &mut TriangleMesh, interior: &Interior) {
    if mesh.is_empty() || interior.mesh.is_empty() {
        return;
    }
    let mut inner = interior.mesh.clone();
    inner.flip();
    mesh.merge(&inner);
}
