//! Frame blending between project sequences and recorded overlays

use serde::{Deserialize, Serialize};

use crate::{DmxFrame, DMX_CHANNELS};

/// How a scene combines its project sequence with a linked recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Only the project's DMX sequence
    ProjectOnly,
    /// Only the linked recording
    RecordingOnly,
    /// Recording wins wherever it is non-zero
    #[default]
    RecordingPriority,
    /// Highest takes precedence
    Blend,
}

const ZEROS: DmxFrame = [0u8; DMX_CHANNELS];

/// Blend two optional frames under `mode`. A missing side counts as all-zero;
/// the output is always a full universe frame.
pub fn blend(project: Option<&DmxFrame>, recording: Option<&DmxFrame>, mode: BlendMode) -> DmxFrame {
    let p = project.unwrap_or(&ZEROS);
    let r = recording.unwrap_or(&ZEROS);

    let mut out = [0u8; DMX_CHANNELS];
    match mode {
        BlendMode::ProjectOnly => out.copy_from_slice(p),
        BlendMode::RecordingOnly => out.copy_from_slice(r),
        BlendMode::RecordingPriority => {
            for i in 0..DMX_CHANNELS {
                out[i] = if r[i] > 0 { r[i] } else { p[i] };
            }
        }
        BlendMode::Blend => {
            for i in 0..DMX_CHANNELS {
                out[i] = p[i].max(r[i]);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(prefix: &[u8]) -> DmxFrame {
        let mut f = [0u8; DMX_CHANNELS];
        f[..prefix.len()].copy_from_slice(prefix);
        f
    }

    #[test]
    fn project_only_ignores_recording() {
        let p = frame(&[1, 2, 3]);
        let r = frame(&[9, 9, 9]);
        assert_eq!(blend(Some(&p), Some(&r), BlendMode::ProjectOnly), p);
    }

    #[test]
    fn recording_only_ignores_project() {
        let p = frame(&[1, 2, 3]);
        let r = frame(&[9, 9, 9]);
        assert_eq!(blend(Some(&p), Some(&r), BlendMode::RecordingOnly), r);
    }

    #[test]
    fn recording_priority_falls_through_on_zero() {
        let p = frame(&[100, 100, 100]);
        let r = frame(&[0, 200, 0]);

        let out = blend(Some(&p), Some(&r), BlendMode::RecordingPriority);
        assert_eq!(&out[..3], &[100, 200, 100]);
    }

    #[test]
    fn htp_blend_is_commutative() {
        let p = frame(&[100, 0, 30]);
        let r = frame(&[0, 200, 40]);

        let ab = blend(Some(&p), Some(&r), BlendMode::Blend);
        let ba = blend(Some(&r), Some(&p), BlendMode::Blend);
        assert_eq!(ab, ba);
        assert_eq!(&ab[..3], &[100, 200, 40]);
    }

    #[test]
    fn missing_sides_count_as_zeros() {
        let p = frame(&[50]);

        assert_eq!(blend(Some(&p), None, BlendMode::Blend), p);
        assert_eq!(blend(None, Some(&p), BlendMode::RecordingPriority), p);
        assert_eq!(blend(None, None, BlendMode::Blend), ZEROS);
    }
}
