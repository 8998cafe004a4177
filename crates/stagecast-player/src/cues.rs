//! Timed cues on the scene timeline
//!
//! A cue sheet is a time-sorted list with a first-unfired cursor. The sync
//! loop advances the cursor each tick; a seek re-arms everything at or after
//! the new position, and a scene loop rewinds the sheet completely.

/// A point on the timeline that fires once per pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub time_ms: u64,
    pub id: String,
}

impl Cue {
    pub fn new(time_ms: u64, id: impl Into<String>) -> Self {
        Self {
            time_ms,
            id: id.into(),
        }
    }
}

/// Sorted cue list with a fire cursor
#[derive(Debug, Default, Clone)]
pub struct CueSheet {
    cues: Vec<Cue>,
    cursor: usize,
}

impl CueSheet {
    pub fn new(mut cues: Vec<Cue>) -> Self {
        cues.sort_by_key(|c| c.time_ms);
        Self { cues, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Fire everything due at or before `position_ms`, in order. Each cue
    /// fires at most once per pass.
    pub fn advance_to(&mut self, position_ms: u64) -> &[Cue] {
        let start = self.cursor;
        while self.cursor < self.cues.len() && self.cues[self.cursor].time_ms <= position_ms {
            self.cursor += 1;
        }
        &self.cues[start..self.cursor]
    }

    /// Re-arm for a new position: cues before it count as already fired,
    /// cues at or after it will fire again.
    pub fn seek(&mut self, position_ms: u64) {
        self.cursor = self.cues.partition_point(|c| c.time_ms < position_ms);
    }

    /// Back to the top for the next scene pass.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}
