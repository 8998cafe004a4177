//! Stagecast DMX
//!
//! The I/O half of the lighting pipeline:
//! - Output transports sharing one contract ([`DmxTransport`]): Art-Net UDP,
//!   sACN/E1.31 multicast, and USB serial (ENTTEC Open break-timing or
//!   ENTTEC Pro/DMXKing framing)
//! - The fixed-rate output engine ([`DmxEngine`]) owning the live universe
//! - Art-Net capture into trimmable `.dmxr` recordings
//!   ([`ArtNetRecorder`], [`RecordingStore`])
//! - Scene ↔ recording links ([`SceneLinkBook`])

pub mod artnet;
pub mod engine;
pub mod error;
pub mod links;
pub mod recorder;
pub mod recording;
pub mod sacn;
pub mod serial;
pub mod transport;

pub use engine::DmxEngine;
pub use error::{DmxError, Result};
pub use links::{SceneLinkBook, SceneRecordingLink};
pub use recorder::{ArtNetRecorder, LiveFrame, RecorderStatus};
pub use recording::{DmxRecording, RecordedFrame, RecordingInfo, RecordingStore};
pub use transport::{create_transport, DmxMode, DmxOutputConfig, DmxTransport};
