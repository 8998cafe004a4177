//! DMX layer error types

use thiserror::Error;

/// Result type alias for DMX operations
pub type Result<T> = std::result::Result<T, DmxError>;

#[derive(Error, Debug)]
pub enum DmxError {
    /// Transport could not be opened
    #[error("transport open failed: {0}")]
    TransportOpen(String),

    /// Send attempted while the transport is down
    #[error("transport not connected")]
    NotConnected,

    /// Receiver could not bind its UDP socket
    #[error("receiver bind failed: {0}")]
    ReceiverBind(String),

    /// Recording load/save failed
    #[error("recording io: {0}")]
    RecordingIo(String),

    /// Malformed wire data
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
