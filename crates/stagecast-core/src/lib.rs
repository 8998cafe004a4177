//! Stagecast Core
//!
//! Domain model and pure playback math for the Stagecast show player.
//!
//! This crate provides:
//! - The project/scene data model handed over by the external parser
//!   ([`Project`], [`Scene`], [`DmxSequence`])
//! - The keyframe evaluator ([`sequence::evaluate`])
//! - The frame blender ([`blend::blend`])
//! - The master playback clock ([`MasterClock`])
//! - The weekly schedule model and grid evaluation ([`Schedule`])
//!
//! Everything here is synchronous and deterministic; the I/O layers live in
//! `stagecast-dmx` and `stagecast-player`.

pub mod blend;
pub mod clock;
pub mod error;
pub mod project;
pub mod schedule;
pub mod sequence;

pub use blend::{blend, BlendMode};
pub use clock::MasterClock;
pub use error::{CoreError, Result};
pub use project::{MediaItem, MediaKind, Project, Scene, SceneElement, VideoMapping};
pub use schedule::{Schedule, ScheduleException, ScheduleMode, ScheduleRule};
pub use sequence::{evaluate, DmxSequence, EasingType, Keyframe};

/// Channels in one DMX-512 universe
pub const DMX_CHANNELS: usize = 512;

/// One full universe frame
pub type DmxFrame = [u8; DMX_CHANNELS];

/// Default DMX refresh rate in Hz
pub const DEFAULT_DMX_FPS: u32 = 40;

/// Default Art-Net UDP port
pub const ARTNET_PORT: u16 = 6454;
