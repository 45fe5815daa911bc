//! Error types for boolean operations.

use thiserror::Error;

/// Errors that can occur during boolean operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BooleanError {
    /// An operand has no triangles.
    #[error("empty operand: {details}")]
    EmptyMesh {
        /// Which operand was empty.
        details: String,
    },

    /// An operand does not enclose a positive volume.
    #[error("operand does not bound a volume: {details}")]
    NotSolid {
        /// Which operand failed and why.
        details: String,
    },

    /// An operand has crossing triangles.
    #[error("self-intersecting operand: {details}")]
    SelfIntersecting {
        /// Which operand crosses itself.
        details: String,
    },
}

/// Result type for boolean operations.
pub type Result<T> = std::result::Result<T, BooleanError>;
