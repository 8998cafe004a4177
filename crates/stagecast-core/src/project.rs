//! Project data model
//!
//! The project-file parser is an external collaborator; it hands this crate a
//! fully deserialized [`Project`]. The types here mirror the exported show
//! package: scenes with their elements, media descriptors, DMX sequences and
//! optional warp-mapping descriptors. Warp geometry is opaque to the playback
//! core and passes through untouched to the video collaborator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::sequence::DmxSequence;

/// Canvas resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Media/element kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

/// A media asset shipped with the show package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub path: PathBuf,
    #[serde(default)]
    pub duration_ms: u64,
}

/// An element placed in a scene, referencing a media asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    #[serde(default)]
    pub name: String,
    pub media_id: String,
    #[serde(default)]
    pub autoplay: bool,
    #[serde(default, rename = "loop")]
    pub looped: bool,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

fn default_volume() -> f64 {
    1.0
}

/// Per-scene playback settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SceneSettings {
    #[serde(default, rename = "loop")]
    pub looped: bool,
}

/// Smallest standalone unit of playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Milliseconds; 0 = use the primary video's natural duration
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub settings: SceneSettings,
    #[serde(default)]
    pub elements: Vec<SceneElement>,
    #[serde(default)]
    pub linked_lighting_sequence_id: Option<String>,
}

impl Scene {
    /// The element driving the master clock: the autoplay video if one
    /// exists, otherwise the first video element.
    pub fn primary_video(&self) -> Option<&SceneElement> {
        let mut videos = self
            .elements
            .iter()
            .filter(|e| e.kind == MediaKind::Video)
            .peekable();
        let first = videos.peek().copied();
        videos.find(|e| e.autoplay).or(first)
    }
}

/// Opaque warp/mapping descriptor handed verbatim to the video collaborator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoMapping {
    #[serde(default)]
    pub enabled: bool,
    /// Restricts the mapping to one scene; `None` = project-global
    #[serde(default)]
    pub scene_id: Option<String>,
    /// Geometry payload, never interpreted here
    #[serde(default)]
    pub descriptor: Value,
}

/// A loaded show package
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub dmx_sequences: Vec<DmxSequence>,
    /// Project-global mapping, overridden by per-scene entries
    #[serde(default)]
    pub video_mapping: Option<VideoMapping>,
    #[serde(default)]
    pub video_mappings: Vec<VideoMapping>,
    #[serde(default)]
    pub start_scene_id: Option<String>,
}

fn default_framerate() -> u32 {
    30
}

impl Project {
    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == id)
    }

    /// The declared start scene, falling back to the first scene.
    pub fn start_scene(&self) -> Option<&Scene> {
        self.start_scene_id
            .as_deref()
            .and_then(|id| self.scene(id))
            .or_else(|| self.scenes.first())
    }

    pub fn media_item(&self, id: &str) -> Option<&MediaItem> {
        self.media.iter().find(|m| m.id == id)
    }

    pub fn dmx_sequence(&self, id: &str) -> Option<&DmxSequence> {
        self.dmx_sequences.iter().find(|s| s.id == id)
    }

    /// The lighting sequence linked to a scene, if any.
    pub fn scene_sequence(&self, scene: &Scene) -> Option<&DmxSequence> {
        scene
            .linked_lighting_sequence_id
            .as_deref()
            .and_then(|id| self.dmx_sequence(id))
    }

    /// Effective mapping for a scene: an enabled scene-specific entry wins
    /// over the enabled project-global one; disabled entries are skipped.
    pub fn scene_mapping(&self, scene_id: &str) -> Option<&VideoMapping> {
        self.video_mappings
            .iter()
            .find(|m| m.enabled && m.scene_id.as_deref() == Some(scene_id))
            .or_else(|| self.video_mapping.as_ref().filter(|m| m.enabled))
    }

    /// Longest scene duration, for dashboards.
    pub fn total_duration_ms(&self) -> u64 {
        self.scenes.iter().map(|s| s.duration_ms).max().unwrap_or(0)
    }

    /// Restore load-time invariants (keyframe ordering).
    pub fn normalize(&mut self) {
        for sequence in &mut self.dmx_sequences {
            sequence.normalize();
        }
    }

    /// Structural validation: unique scene ids, resolvable media and
    /// sequence references.
    pub fn validate(&self) -> Result<()> {
        for (i, scene) in self.scenes.iter().enumerate() {
            if self.scenes[..i].iter().any(|s| s.id == scene.id) {
                return Err(CoreError::ProjectInvalid(format!(
                    "duplicate scene id: {}",
                    scene.id
                )));
            }
            if let Some(seq_id) = scene.linked_lighting_sequence_id.as_deref() {
                if self.dmx_sequence(seq_id).is_none() {
                    return Err(CoreError::ProjectInvalid(format!(
                        "scene {} links unknown sequence {}",
                        scene.id, seq_id
                    )));
                }
            }
            for element in &scene.elements {
                if self.media_item(&element.media_id).is_none() {
                    return Err(CoreError::ProjectInvalid(format!(
                        "scene {} element {} references unknown media {}",
                        scene.id, element.id, element.media_id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_element(id: &str, autoplay: bool) -> SceneElement {
        SceneElement {
            id: id.to_string(),
            kind: MediaKind::Video,
            name: String::new(),
            media_id: "m1".to_string(),
            autoplay,
            looped: false,
            volume: 1.0,
        }
    }

    fn media(id: &str) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            name: String::new(),
            kind: MediaKind::Video,
            path: PathBuf::from("media/clip.mp4"),
            duration_ms: 0,
        }
    }

    #[test]
    fn primary_video_prefers_autoplay() {
        let scene = Scene {
            id: "s1".to_string(),
            name: String::new(),
            duration_ms: 0,
            settings: SceneSettings::default(),
            elements: vec![video_element("e1", false), video_element("e2", true)],
            linked_lighting_sequence_id: None,
        };

        assert_eq!(scene.primary_video().map(|e| e.id.as_str()), Some("e2"));
    }

    #[test]
    fn primary_video_falls_back_to_first() {
        let scene = Scene {
            id: "s1".to_string(),
            name: String::new(),
            duration_ms: 0,
            settings: SceneSettings::default(),
            elements: vec![video_element("e1", false), video_element("e2", false)],
            linked_lighting_sequence_id: None,
        };

        assert_eq!(scene.primary_video().map(|e| e.id.as_str()), Some("e1"));
    }

    #[test]
    fn start_scene_resolution_order() {
        let mut project = Project {
            id: "p".to_string(),
            scenes: vec![
                Scene {
                    id: "s1".to_string(),
                    name: String::new(),
                    duration_ms: 0,
                    settings: SceneSettings::default(),
                    elements: vec![],
                    linked_lighting_sequence_id: None,
                },
                Scene {
                    id: "s2".to_string(),
                    name: String::new(),
                    duration_ms: 0,
                    settings: SceneSettings::default(),
                    elements: vec![],
                    linked_lighting_sequence_id: None,
                },
            ],
            ..Default::default()
        };

        assert_eq!(project.start_scene().map(|s| s.id.as_str()), Some("s1"));
        project.start_scene_id = Some("s2".to_string());
        assert_eq!(project.start_scene().map(|s| s.id.as_str()), Some("s2"));
        project.start_scene_id = Some("missing".to_string());
        assert_eq!(project.start_scene().map(|s| s.id.as_str()), Some("s1"));
    }

    #[test]
    fn scene_mapping_prefers_scene_specific() {
        let project = Project {
            id: "p".to_string(),
            video_mapping: Some(VideoMapping {
                enabled: true,
                scene_id: None,
                descriptor: Value::String("global".to_string()),
            }),
            video_mappings: vec![
                VideoMapping {
                    enabled: false,
                    scene_id: Some("s1".to_string()),
                    descriptor: Value::String("disabled".to_string()),
                },
                VideoMapping {
                    enabled: true,
                    scene_id: Some("s2".to_string()),
                    descriptor: Value::String("scene".to_string()),
                },
            ],
            ..Default::default()
        };

        // Disabled per-scene entry is skipped in favor of the global one
        let m1 = project.scene_mapping("s1").unwrap();
        assert_eq!(m1.descriptor, Value::String("global".to_string()));

        let m2 = project.scene_mapping("s2").unwrap();
        assert_eq!(m2.descriptor, Value::String("scene".to_string()));
    }

    #[test]
    fn validate_rejects_dangling_references() {
        let project = Project {
            id: "p".to_string(),
            scenes: vec![Scene {
                id: "s1".to_string(),
                name: String::new(),
                duration_ms: 1000,
                settings: SceneSettings::default(),
                elements: vec![video_element("e1", true)],
                linked_lighting_sequence_id: Some("missing".to_string()),
            }],
            media: vec![media("m1")],
            ..Default::default()
        };

        assert!(matches!(
            project.validate(),
            Err(CoreError::ProjectInvalid(_))
        ));
    }

    #[test]
    fn project_round_trips_through_serde() {
        let project = Project {
            id: "p".to_string(),
            name: "Demo".to_string(),
            scenes: vec![Scene {
                id: "s1".to_string(),
                name: "Opening".to_string(),
                duration_ms: 2000,
                settings: SceneSettings { looped: true },
                elements: vec![video_element("e1", true)],
                linked_lighting_sequence_id: None,
            }],
            media: vec![media("m1")],
            ..Default::default()
        };

        let json = serde_json::to_string(&project).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(back, project);
        assert!(json.contains("\"loop\":true"));
    }
}
