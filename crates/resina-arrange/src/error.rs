//! Error types for arrangement.

use thiserror::Error;

/// Errors raised by the arrangement engine.
///
/// Items that do not fit are not errors; they end up with
/// [`UNARRANGED`](crate::UNARRANGED) as their bed index.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArrangeError {
    /// Parameters out of range.
    #[error("invalid arrange parameters: {0}")]
    InvalidParams(String),
}

/// Result type for arrangement.
pub type Result<T> = std::result::Result<T, ArrangeError>;
