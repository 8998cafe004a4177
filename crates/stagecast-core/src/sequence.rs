//! DMX sequence model and keyframe evaluator
//!
//! A sequence is a set of keyframes grouped by fixture. Evaluation is a pure
//! function of `(sequence, time)`: fixtures interpolate independently and
//! overlapping channels merge highest-takes-precedence into one 512-channel
//! frame.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{DmxFrame, DMX_CHANNELS};

/// Easing applied to the progress between two keyframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EasingType {
    /// Constant speed
    #[default]
    Linear,
    /// Slow start, fast end
    EaseIn,
    /// Fast start, slow end
    EaseOut,
    /// Slow start and end, fast middle
    EaseInOut,
}

/// A single keyframe: channel values for one fixture at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Seconds from sequence start
    pub time: f64,
    #[serde(default = "default_fixture")]
    pub fixture_id: String,
    pub values: Vec<u8>,
}

fn default_fixture() -> String {
    "default".to_string()
}

/// A keyframed lighting sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmxSequence {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Total duration in seconds
    #[serde(default)]
    pub duration: f64,
    #[serde(default, rename = "loop")]
    pub looped: bool,
    /// Playback speed multiplier
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default)]
    pub interpolation: EasingType,
    #[serde(default)]
    pub keyframes: Vec<Keyframe>,
}

fn default_speed() -> f64 {
    1.0
}

impl DmxSequence {
    /// Restore the load-time invariant: keyframes sorted by time.
    ///
    /// The sort is stable, so each fixture's keyframes stay time-ordered
    /// relative to each other no matter how the export interleaved them.
    pub fn normalize(&mut self) {
        self.keyframes
            .sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(Ordering::Equal));
    }
}

/// Evaluate a sequence at `t_seconds`, producing one universe frame.
///
/// Returns `None` when the sequence has no keyframes. Fixtures interpolate
/// independently; overlapping channels combine HTP.
pub fn evaluate(sequence: &DmxSequence, t_seconds: f64) -> Option<DmxFrame> {
    if sequence.keyframes.is_empty() {
        return None;
    }

    let mut t = t_seconds * sequence.speed;
    if sequence.looped && sequence.duration > 0.0 && t > sequence.duration {
        t %= sequence.duration;
    }

    let mut fixtures: BTreeMap<&str, Vec<&Keyframe>> = BTreeMap::new();
    for keyframe in &sequence.keyframes {
        fixtures
            .entry(keyframe.fixture_id.as_str())
            .or_default()
            .push(keyframe);
    }

    let mut frame = [0u8; DMX_CHANNELS];
    for keyframes in fixtures.values() {
        let values = interpolate(keyframes, t, sequence.interpolation);
        for (channel, value) in values.iter().enumerate().take(DMX_CHANNELS) {
            frame[channel] = frame[channel].max(*value);
        }
    }

    Some(frame)
}

/// Interpolate one fixture's keyframes at time `t`.
///
/// Before the first keyframe the first values hold; after the last the last
/// values hold. Coincident keyframe times resolve to the earlier keyframe.
fn interpolate(keyframes: &[&Keyframe], t: f64, easing: EasingType) -> Vec<u8> {
    let mut prev: Option<&Keyframe> = None;
    let mut next: Option<&Keyframe> = None;
    for keyframe in keyframes {
        if keyframe.time <= t {
            prev = Some(keyframe);
        } else {
            next = Some(keyframe);
            break;
        }
    }

    let Some(prev) = prev else {
        return keyframes[0].values.clone();
    };
    let Some(next) = next else {
        return prev.values.clone();
    };
    if next.time <= prev.time {
        return prev.values.clone();
    }

    let progress = ((t - prev.time) / (next.time - prev.time)).clamp(0.0, 1.0);
    let eased = ease(progress, easing);

    let channels = prev.values.len().max(next.values.len());
    (0..channels)
        .map(|i| {
            let a = prev.values.get(i).copied().unwrap_or(0) as f64;
            let b = next.values.get(i).copied().unwrap_or(0) as f64;
            (a + (b - a) * eased).round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Apply an easing function to normalized progress (0.0 - 1.0)
pub fn ease(t: f64, easing: EasingType) -> f64 {
    let t = t.clamp(0.0, 1.0);
    match easing {
        EasingType::Linear => t,
        EasingType::EaseIn => t * t,
        EasingType::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
        EasingType::EaseInOut => {
            if t < 0.5 {
                2.0 * t * t
            } else {
                1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
            }
        }
    }
}
