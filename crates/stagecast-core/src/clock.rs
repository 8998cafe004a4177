//! Master playback clock
//!
//! One monotonic elapsed-time source shared by the video and DMX sides of a
//! scene. Pausing accumulates dead time; seeking re-anchors the start so the
//! next read lands on the target position. Callers pass the current
//! [`Instant`], which keeps the clock deterministic under test.

use std::time::{Duration, Instant};

/// Monotonic scene clock with pause accounting
#[derive(Debug, Clone, Copy, Default)]
pub struct MasterClock {
    start: Option<Instant>,
    paused_at: Option<Instant>,
    paused_accum: Duration,
}

impl MasterClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the clock at position zero.
    pub fn start(&mut self, now: Instant) {
        self.start = Some(now);
        self.paused_at = None;
        self.paused_accum = Duration::ZERO;
    }

    /// Stop the clock; elapsed reads return zero until the next start.
    pub fn stop(&mut self) {
        self.start = None;
        self.paused_at = None;
        self.paused_accum = Duration::ZERO;
    }

    pub fn is_running(&self) -> bool {
        self.start.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Freeze the clock. No-op unless running and not already paused.
    pub fn pause(&mut self, now: Instant) {
        if self.start.is_some() && self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Unfreeze, adding the frozen span to the pause accumulator.
    pub fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_accum += now.saturating_duration_since(paused_at);
        }
    }

    /// Re-anchor so the next elapsed read returns `position_ms`. Ignored on
    /// a stopped clock.
    ///
    /// Works while paused: the pause point becomes the anchor, so the clock
    /// stays frozen at the new position until resume.
    pub fn seek(&mut self, now: Instant, position_ms: u64) {
        if self.start.is_none() {
            return;
        }
        let anchor = self.paused_at.unwrap_or(now);
        self.paused_accum = Duration::ZERO;
        self.start = anchor
            .checked_sub(Duration::from_millis(position_ms))
            .or(Some(anchor));
    }

    /// Elapsed playback time, excluding paused spans.
    pub fn elapsed(&self, now: Instant) -> Duration {
        let Some(start) = self.start else {
            return Duration::ZERO;
        };
        let anchor = self.paused_at.unwrap_or(now);
        anchor
            .saturating_duration_since(start)
            .saturating_sub(self.paused_accum)
    }

    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        self.elapsed(now).as_millis() as u64
    }
}
