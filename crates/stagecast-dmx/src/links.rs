//! Scene ↔ recording links
//!
//! Associates scenes with named recordings and a blend policy, persisted as
//! a small JSON document. One link per scene; disabled links stay stored
//! but are invisible to playback.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stagecast_core::BlendMode;

use crate::{DmxError, Result};

/// Ties one scene to one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecordingLink {
    pub scene_id: String,
    /// `.dmxr` name without extension
    pub recording_name: String,
    #[serde(default)]
    pub mode: BlendMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Shifts the recording timeline relative to the scene clock
    #[serde(default)]
    pub offset_ms: i64,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LinkDocument {
    #[serde(default = "document_version")]
    version: String,
    #[serde(default)]
    links: Vec<SceneRecordingLink>,
}

fn document_version() -> String {
    "1.0".to_string()
}

/// Persistent map of scene id → link
pub struct SceneLinkBook {
    path: PathBuf,
    links: Mutex<HashMap<String, SceneRecordingLink>>,
}

impl SceneLinkBook {
    /// Open the book at `path`, loading any existing document. A corrupt
    /// file is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut links = HashMap::new();

        if path.exists() {
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<LinkDocument>(&raw).map_err(|e| e.to_string()))
            {
                Ok(document) => {
                    for link in document.links {
                        links.insert(link.scene_id.clone(), link);
                    }
                    info!("loaded {} scene links from {}", links.len(), path.display());
                }
                Err(e) => warn!("unreadable link book {}: {e}", path.display()),
            }
        }

        Self {
            path,
            links: Mutex::new(links),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The enabled link for a scene, if any.
    pub fn active_link(&self, scene_id: &str) -> Option<SceneRecordingLink> {
        self.links
            .lock()
            .get(scene_id)
            .filter(|l| l.enabled)
            .cloned()
    }

    /// Every stored link, enabled or not.
    pub fn all(&self) -> Vec<SceneRecordingLink> {
        let mut links: Vec<_> = self.links.lock().values().cloned().collect();
        links.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));
        links
    }

    /// Create or replace the link for a scene.
    pub fn link(
        &self,
        scene_id: &str,
        recording_name: &str,
        mode: BlendMode,
        offset_ms: i64,
    ) -> Result<()> {
        self.links.lock().insert(
            scene_id.to_string(),
            SceneRecordingLink {
                scene_id: scene_id.to_string(),
                recording_name: recording_name.to_string(),
                mode,
                enabled: true,
                offset_ms,
            },
        );
        self.save()?;
        info!("scene {scene_id} linked to recording '{recording_name}'");
        Ok(())
    }

    pub fn unlink(&self, scene_id: &str) -> Result<bool> {
        let removed = self.links.lock().remove(scene_id).is_some();
        if removed {
            self.save()?;
            info!("scene {scene_id} unlinked");
        }
        Ok(removed)
    }

    pub fn set_mode(&self, scene_id: &str, mode: BlendMode) -> Result<bool> {
        self.update(scene_id, |link| link.mode = mode)
    }

    pub fn set_enabled(&self, scene_id: &str, enabled: bool) -> Result<bool> {
        self.update(scene_id, |link| link.enabled = enabled)
    }

    pub fn set_offset(&self, scene_id: &str, offset_ms: i64) -> Result<bool> {
        self.update(scene_id, |link| link.offset_ms = offset_ms)
    }

    fn update(&self, scene_id: &str, apply: impl FnOnce(&mut SceneRecordingLink)) -> Result<bool> {
        let found = {
            let mut links = self.links.lock();
            match links.get_mut(scene_id) {
                Some(link) => {
                    apply(link);
                    true
                }
                None => false,
            }
        };
        if found {
            self.save()?;
        }
        Ok(found)
    }

    fn save(&self) -> Result<()> {
        let document = LinkDocument {
            version: document_version(),
            links: self.all(),
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DmxError::RecordingIo(format!("{}: {e}", parent.display())))?;
        }
        let raw = serde_json::to_string_pretty(&document)
            .map_err(|e| DmxError::RecordingIo(e.to_string()))?;
        fs::write(&self.path, raw)
            .map_err(|e| DmxError::RecordingIo(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_book() -> SceneLinkBook {
        let path = std::env::temp_dir()
            .join("stagecast-links")
            .join(uuid::Uuid::new_v4().to_string())
            .join("dmx_scene_links.json");
        SceneLinkBook::open(path)
    }

    #[test]
    fn link_and_lookup() {
        let book = temp_book();
        book.link("s1", "chase", BlendMode::Blend, 250).unwrap();

        let link = book.active_link("s1").unwrap();
        assert_eq!(link.recording_name, "chase");
        assert_eq!(link.mode, BlendMode::Blend);
        assert_eq!(link.offset_ms, 250);
        assert!(book.active_link("s2").is_none());
    }

    #[test]
    fn disabled_links_are_invisible_to_playback() {
        let book = temp_book();
        book.link("s1", "chase", BlendMode::RecordingPriority, 0)
            .unwrap();

        book.set_enabled("s1", false).unwrap();
        assert!(book.active_link("s1").is_none());
        assert_eq!(book.all().len(), 1);

        book.set_enabled("s1", true).unwrap();
        assert!(book.active_link("s1").is_some());
    }

    #[test]
    fn relinking_replaces_per_scene() {
        let book = temp_book();
        book.link("s1", "first", BlendMode::RecordingPriority, 0)
            .unwrap();
        book.link("s1", "second", BlendMode::RecordingOnly, 0)
            .unwrap();

        assert_eq!(book.all().len(), 1);
        assert_eq!(book.active_link("s1").unwrap().recording_name, "second");
    }

    #[test]
    fn persists_across_reopen() {
        let book = temp_book();
        let path = book.path().to_path_buf();
        book.link("s1", "chase", BlendMode::ProjectOnly, -100)
            .unwrap();
        book.set_mode("s1", BlendMode::Blend).unwrap();

        let reopened = SceneLinkBook::open(path);
        let link = reopened.active_link("s1").unwrap();
        assert_eq!(link.mode, BlendMode::Blend);
        assert_eq!(link.offset_ms, -100);
    }

    #[test]
    fn unlink_and_missing_updates() {
        let book = temp_book();
        book.link("s1", "chase", BlendMode::Blend, 0).unwrap();

        assert!(book.unlink("s1").unwrap());
        assert!(!book.unlink("s1").unwrap());
        assert!(!book.set_mode("s1", BlendMode::Blend).unwrap());
    }
}
