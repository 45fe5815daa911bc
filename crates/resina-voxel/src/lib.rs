#![warn(missing_docs)]

//! Signed distance grids for the resina SLA core.
//!
//! Meshes are voxelized into dense narrow-band distance grids
//! ([`mesh_to_grid`]), combined or offset directly in the distance domain
//! and turned back into triangle meshes ([`grid_to_mesh`]). Hollowing is
//! built on top of these operations.

pub mod convert;
pub mod error;
pub mod grid;
pub mod hollow;
pub mod sweep;

pub use convert::{grid_to_mesh, mesh_to_grid, MeshToGridParams, StatusFn};
pub use error::{Result, VoxelError};
pub use grid::{
    get_distance_raw, get_voxel_scale, grid_difference, grid_intersection, grid_union,
    is_grid_empty, rescale_grid, VoxelGrid,
};
pub use hollow::{generate_interior, hollow_mesh, HollowingConfig, Interior};
pub use sweep::{dilate_grid, redistance_grid, redistance_grid_iso};
