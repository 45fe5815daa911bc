//! Error types for mesh operations.

use thiserror::Error;

/// Errors that can occur while building or querying meshes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    /// Mesh has no triangles.
    #[error("mesh is empty")]
    EmptyMesh,

    /// A triangle references a vertex that does not exist.
    #[error("triangle {triangle} references vertex {index} but mesh has {count} vertices")]
    IndexOutOfRange {
        /// Offending triangle.
        triangle: usize,
        /// Offending vertex index.
        index: u32,
        /// Number of vertices in the mesh.
        count: usize,
    },

    /// Mesh has degenerate geometry.
    #[error("mesh has degenerate geometry: {0}")]
    DegenerateMesh(String),

    /// Slicing operation failed.
    #[error("slicing failed at z={0}: {1}")]
    SliceFailed(f64, String),
}

/// Result type for mesh operations.
pub type Result<T> = std::result::Result<T, MeshError>;
