//! DMX recordings and the on-disk store
//!
//! A recording is a self-describing JSON document (`.dmxr`): capture
//! metadata, trim points and a timestamped frame list. Frames need not be
//! evenly spaced; playback seeks to the latest frame at or before the
//! requested time on the trimmed timeline. Unknown fields from newer
//! writers ride along untouched.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use stagecast_core::{DmxFrame, DMX_CHANNELS};

use crate::{DmxError, Result};

/// On-disk suffix for recordings
pub const RECORDING_EXT: &str = "dmxr";

const FORMAT_VERSION: &str = "1.0";

/// One captured frame, stamped in milliseconds from recording start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedFrame {
    #[serde(rename = "t")]
    pub timestamp_ms: u64,
    #[serde(rename = "d")]
    pub channels: Vec<u8>,
}

/// A complete DMX recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmxRecording {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// ISO-8601 UTC capture timestamp
    #[serde(default)]
    pub recorded_at: String,
    #[serde(default)]
    pub duration_ms: u64,
    /// Nominal capture rate; metadata only, playback follows timestamps
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub universe: u16,
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub trim_start_ms: u64,
    #[serde(default)]
    pub trim_end_ms: u64,
    #[serde(default)]
    pub frames: Vec<RecordedFrame>,
    /// Fields from newer writers, preserved across load/save
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> String {
    FORMAT_VERSION.to_string()
}

fn default_fps() -> u32 {
    stagecast_core::DEFAULT_DMX_FPS
}

impl DmxRecording {
    pub fn new(name: impl Into<String>, universe: u16) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            recorded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: 0,
            fps: default_fps(),
            universe,
            source_ip: String::new(),
            trim_start_ms: 0,
            trim_end_ms: 0,
            frames: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Append a captured frame, padding or truncating to 512 channels.
    pub fn push_frame(&mut self, timestamp_ms: u64, channels: &[u8]) {
        let mut padded = vec![0u8; DMX_CHANNELS];
        let len = channels.len().min(DMX_CHANNELS);
        padded[..len].copy_from_slice(&channels[..len]);
        self.frames.push(RecordedFrame {
            timestamp_ms,
            channels: padded,
        });
        self.duration_ms = self.duration_ms.max(timestamp_ms);
    }

    /// Close out a capture: the untrimmed recording spans its full duration.
    pub fn finalize(&mut self) {
        self.trim_end_ms = self.duration_ms;
    }

    pub fn trimmed_duration_ms(&self) -> u64 {
        self.trim_end_ms.saturating_sub(self.trim_start_ms)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Channel state at `time_ms` on the trimmed timeline.
    ///
    /// Returns the latest frame whose timestamp is at or before
    /// `time_ms + trim_start`; past the trimmed duration the last frame
    /// holds. `None` before the first frame or for an empty recording.
    pub fn frame_at(&self, time_ms: u64) -> Option<DmxFrame> {
        if self.frames.is_empty() {
            return None;
        }
        if time_ms > self.trimmed_duration_ms() {
            return self.frames.last().map(|f| to_frame(&f.channels));
        }

        let adjusted = time_ms + self.trim_start_ms;
        let idx = self
            .frames
            .partition_point(|f| f.timestamp_ms <= adjusted);
        if idx == 0 {
            None
        } else {
            Some(to_frame(&self.frames[idx - 1].channels))
        }
    }

    /// Restore invariants after deserialization: 512 channels per frame,
    /// timestamp order, trim points inside the recording.
    pub fn normalize(&mut self) {
        for frame in &mut self.frames {
            frame.channels.resize(DMX_CHANNELS, 0);
        }
        self.frames.sort_by_key(|f| f.timestamp_ms);
        if let Some(last) = self.frames.last() {
            self.duration_ms = self.duration_ms.max(last.timestamp_ms);
        }
        if self.trim_end_ms == 0 || self.trim_end_ms > self.duration_ms {
            self.trim_end_ms = self.duration_ms;
        }
        self.trim_start_ms = self.trim_start_ms.min(self.trim_end_ms);
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| DmxError::RecordingIo(format!("{}: {e}", path.display())))?;
        let mut recording: DmxRecording = serde_json::from_str(&raw)
            .map_err(|e| DmxError::RecordingIo(format!("{}: {e}", path.display())))?;
        recording.normalize();
        if recording.name.is_empty() {
            if let Some(stem) = path.file_stem() {
                recording.name = stem.to_string_lossy().into_owned();
            }
        }
        Ok(recording)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DmxError::RecordingIo(format!("{}: {e}", parent.display())))?;
        }
        let raw = serde_json::to_string(self)
            .map_err(|e| DmxError::RecordingIo(e.to_string()))?;
        fs::write(path, raw)
            .map_err(|e| DmxError::RecordingIo(format!("{}: {e}", path.display())))?;
        info!(
            "recording '{}' saved: {} frames, {}ms",
            self.name,
            self.frames.len(),
            self.duration_ms
        );
        Ok(())
    }
}

fn to_frame(channels: &[u8]) -> DmxFrame {
    let mut frame = [0u8; DMX_CHANNELS];
    let len = channels.len().min(DMX_CHANNELS);
    frame[..len].copy_from_slice(&channels[..len]);
    frame
}

/// Summary of a stored recording, without the frame data
#[derive(Debug, Clone, Serialize)]
pub struct RecordingInfo {
    pub name: String,
    pub recorded_at: String,
    pub duration_ms: u64,
    pub trimmed_duration_ms: u64,
    pub fps: u32,
    pub universe: u16,
    pub source_ip: String,
    pub trim_start_ms: u64,
    pub trim_end_ms: u64,
    pub frame_count: usize,
}

impl From<&DmxRecording> for RecordingInfo {
    fn from(r: &DmxRecording) -> Self {
        Self {
            name: r.name.clone(),
            recorded_at: r.recorded_at.clone(),
            duration_ms: r.duration_ms,
            trimmed_duration_ms: r.trimmed_duration_ms(),
            fps: r.fps,
            universe: r.universe,
            source_ip: r.source_ip.clone(),
            trim_start_ms: r.trim_start_ms,
            trim_end_ms: r.trim_end_ms,
            frame_count: r.frames.len(),
        }
    }
}

/// Directory of `.dmxr` files
#[derive(Debug, Clone)]
pub struct RecordingStore {
    dir: PathBuf,
}

impl RecordingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{RECORDING_EXT}"))
    }

    pub fn save(&self, recording: &DmxRecording) -> Result<PathBuf> {
        let path = self.path_for(&recording.name);
        recording.save(&path)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<DmxRecording> {
        DmxRecording::load(&self.path_for(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }

    /// Every loadable recording in the directory; unreadable files are
    /// logged and skipped.
    pub fn list(&self) -> Vec<RecordingInfo> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut infos: Vec<RecordingInfo> = entries
            .flatten()
            .filter(|e| {
                e.path().extension().and_then(|x| x.to_str()) == Some(RECORDING_EXT)
            })
            .filter_map(|e| match DmxRecording::load(&e.path()) {
                Ok(recording) => Some(RecordingInfo::from(&recording)),
                Err(err) => {
                    warn!("skipping unreadable recording {}: {err}", e.path().display());
                    None
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .map_err(|e| DmxError::RecordingIo(format!("{}: {e}", path.display())))?;
        info!("recording '{name}' deleted");
        Ok(true)
    }

    /// Adjust trim points and persist. Rejects `start > end` and points
    /// outside the recording.
    pub fn set_trim(&self, name: &str, trim_start_ms: u64, trim_end_ms: u64) -> Result<DmxRecording> {
        let mut recording = self.load(name)?;
        if trim_start_ms > trim_end_ms || trim_end_ms > recording.duration_ms {
            return Err(DmxError::RecordingIo(format!(
                "trim range {trim_start_ms}..{trim_end_ms} outside 0..{}",
                recording.duration_ms
            )));
        }
        recording.trim_start_ms = trim_start_ms;
        recording.trim_end_ms = trim_end_ms;
        self.save(&recording)?;
        Ok(recording)
    }
}
