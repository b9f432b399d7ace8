//! Error types for job loading and persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for job operations.
pub type Result<T> = std::result::Result<T, JobError>;

/// Errors reading or writing job files.
#[derive(Debug, Error)]
pub enum JobError {
    /// No job file exists at the given path.
    #[error("job does not exist at location: {0}")]
    NotFound(PathBuf),

    /// The file exists but is not a valid job document.
    #[error("job document is malformed: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Filesystem failure while reading or atomically rewriting.
    #[error("job file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
