//! Video collaborator interface
//!
//! The hardware decoder lives outside this crate; playback only needs a
//! narrow surface: load/transport controls, the natural duration once it is
//! known, and an upstream event feed (position, end-of-file). Warp mapping
//! descriptors pass through untouched.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use stagecast_core::VideoMapping;

use crate::Result;

/// Upstream signals from the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEvent {
    /// Decoder-reported playback position
    Position { position_ms: u64 },
    /// The loaded asset played to its natural end
    EndOfFile,
}

/// The video collaborator seam.
///
/// Transport calls on a sink with no loaded asset are no-ops, never errors;
/// a scene may legitimately be DMX-only.
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Load an asset, handing over the effective warp descriptor verbatim.
    async fn load(&self, path: &Path, mapping: Option<&VideoMapping>) -> Result<()>;

    async fn play(&self, looped: bool) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn seek(&self, position_ms: u64) -> Result<()>;

    /// Natural duration of the loaded asset, once the decoder knows it.
    fn duration_ms(&self) -> Option<u64>;

    /// Subscribe to decoder events.
    fn subscribe(&self) -> broadcast::Receiver<VideoEvent>;
}

/// Headless sink: tracks state, emits nothing on its own.
///
/// Stands in for the hardware decoder on dev machines and in tests; the
/// test hooks below drive the events a real decoder would send.
pub struct NullVideoSink {
    loaded: Mutex<Option<PathBuf>>,
    mapping: Mutex<Option<VideoMapping>>,
    duration_ms: Mutex<Option<u64>>,
    playing: Mutex<bool>,
    events: broadcast::Sender<VideoEvent>,
}

impl NullVideoSink {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            loaded: Mutex::new(None),
            mapping: Mutex::new(None),
            duration_ms: Mutex::new(None),
            playing: Mutex::new(false),
            events,
        }
    }

    /// A sink that reports a fixed natural duration for whatever it loads.
    pub fn with_duration(duration_ms: u64) -> Self {
        let sink = Self::new();
        *sink.duration_ms.lock() = Some(duration_ms);
        sink
    }

    pub fn loaded_path(&self) -> Option<PathBuf> {
        self.loaded.lock().clone()
    }

    pub fn mapping(&self) -> Option<VideoMapping> {
        self.mapping.lock().clone()
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.lock()
    }

    /// Push an end-of-file event, as the decoder would at the end of the
    /// asset.
    pub fn emit_end_of_file(&self) {
        let _ = self.events.send(VideoEvent::EndOfFile);
    }

    /// Push a decoder position report.
    pub fn emit_position(&self, position_ms: u64) {
        let _ = self.events.send(VideoEvent::Position { position_ms });
    }
}

impl Default for NullVideoSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoSink for NullVideoSink {
    async fn load(&self, path: &Path, mapping: Option<&VideoMapping>) -> Result<()> {
        *self.loaded.lock() = Some(path.to_path_buf());
        *self.mapping.lock() = mapping.cloned();
        debug!("null video sink loaded {}", path.display());
        Ok(())
    }

    async fn play(&self, _looped: bool) -> Result<()> {
        *self.playing.lock() = true;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        *self.playing.lock() = false;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        *self.playing.lock() = true;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.playing.lock() = false;
        Ok(())
    }

    async fn seek(&self, _position_ms: u64) -> Result<()> {
        Ok(())
    }

    fn duration_ms(&self) -> Option<u64> {
        *self.duration_ms.lock()
    }

    fn subscribe(&self) -> broadcast::Receiver<VideoEvent> {
        self.events.subscribe()
    }
}
