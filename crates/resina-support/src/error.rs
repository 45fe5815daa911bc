//! Error types for support synthesis.

use thiserror::Error;

/// Errors raised while building supports or pads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SupportError {
    /// The requested tree flavour has no implementation.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The builder was already merged and cleaned up.
    #[error("support tree builder is finalized")]
    Finalized,

    /// The job controller asked to stop.
    #[error("support generation canceled")]
    Canceled,

    /// Settings out of range. The message is user facing.
    #[error("{0}")]
    InvalidConfig(String),
}

/// Result type for support operations.
pub type Result<T> = std::result::Result<T, SupportError>;
