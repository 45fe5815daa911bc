//! Error types for voxel operations.

use thiserror::Error;

/// Errors raised by the voxel engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoxelError {
    /// The status callback asked to stop.
    #[error("voxelization interrupted")]
    Interrupted,

    /// Parameters out of range.
    #[error("invalid voxel settings: {0}")]
    InvalidSettings(String),
}

/// Result type for voxel operations.
pub type Result<T> = std::result::Result<T, VoxelError>;
