//! Player layer error types

use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, PlayerError>;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error(transparent)]
    Core(#[from] stagecast_core::CoreError),

    #[error(transparent)]
    Dmx(#[from] stagecast_dmx::DmxError),

    /// The video collaborator refused an operation
    #[error("video sink: {0}")]
    VideoSink(String),

    /// The project source knows no such show
    #[error("show not found: {0}")]
    ShowNotFound(String),

    /// The project has no playable scene
    #[error("no playable scene in project {0}")]
    NoScene(String),

    /// Playback control issued before any show was loaded
    #[error("no show loaded")]
    NothingLoaded,

    /// Configuration load/save failed
    #[error("config io: {0}")]
    ConfigIo(String),
}
