//! Stagecast Player
//!
//! The playback layer of the show player:
//! - [`ScenePlayer`] — per-scene state machine, master clock and the 40 Hz
//!   sync loop tying video position to DMX output
//! - [`PlaybackScheduler`] — weekly schedule evaluation on a timer task
//! - [`ShowController`] — show/scene resolution and the single-active-scene
//!   invariant
//! - [`VideoSink`] — the seam to the hardware video collaborator

pub mod config;
pub mod controller;
pub mod cues;
pub mod error;
pub mod scene;
pub mod scheduler;
pub mod video;

pub use config::AppConfig;
pub use controller::{ControllerStatus, ProjectSource, ShowController};
pub use cues::{Cue, CueSheet};
pub use error::{PlayerError, Result};
pub use scene::{PlayerEvent, ScenePlayer, SceneState, SceneStatus};
pub use scheduler::{PlaybackScheduler, SchedulerEvent};
pub use video::{NullVideoSink, VideoEvent, VideoSink};
