//! Error types for the core domain layer

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core domain errors
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed project structure detected at load
    #[error("invalid project: {0}")]
    ProjectInvalid(String),

    /// Requested scene id does not exist in the project
    #[error("scene not found: {0}")]
    SceneResolveFailed(String),

    /// Schedule rule contains an unparseable day, time or date
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}
