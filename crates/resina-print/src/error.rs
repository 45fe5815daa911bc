//! Error types for the print pipeline.

use resina_support::SupportError;
use resina_voxel::VoxelError;
use thiserror::Error;

/// Errors raised by [`Print`](crate::Print) operations.
#[derive(Error, Debug)]
pub enum PrintError {
    /// The job was canceled. Steps completed before the cancel stay valid.
    #[error("print processing canceled")]
    Canceled,

    /// A config key has no invalidation bucket.
    #[error("unknown config option: {0}")]
    UnknownOption(String),

    /// A config value could not be read.
    #[error("invalid config: {0}")]
    Config(String),

    /// Pre-flight validation failed. The message is user facing.
    #[error("{0}")]
    Validation(String),

    /// A step could not produce usable output. The message is user facing.
    #[error("{0}")]
    Slicing(String),

    /// Export was not possible.
    #[error("{0}")]
    Export(String),

    /// Support synthesis failed.
    #[error("support generation failed: {0}")]
    Support(SupportError),

    /// Hollowing failed.
    #[error("hollowing failed: {0}")]
    Voxel(VoxelError),

    /// Arrangement parameters were rejected.
    #[error("arrangement failed: {0}")]
    Arrange(#[from] resina_arrange::ArrangeError),

    /// Writing an archive failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SupportError> for PrintError {
    fn from(e: SupportError) -> Self {
        match e {
            SupportError::Canceled => PrintError::Canceled,
            other => PrintError::Support(other),
        }
    }
}

impl From<VoxelError> for PrintError {
    fn from(e: VoxelError) -> Self {
        match e {
            VoxelError::Interrupted => PrintError::Canceled,
            other => PrintError::Voxel(other),
        }
    }
}

impl From<serde_json::Error> for PrintError {
    fn from(e: serde_json::Error) -> Self {
        PrintError::Config(e.to_string())
    }
}

impl From<toml::de::Error> for PrintError {
    fn from(e: toml::de::Error) -> Self {
        PrintError::Config(e.to_string())
    }
}

/// Result type for print operations.
pub type Result<T> = std::result::Result<T, PrintError>;
