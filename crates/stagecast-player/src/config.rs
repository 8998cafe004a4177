//! Appliance configuration
//!
//! One JSON document for the whole player: DMX output selection, playback
//! defaults, the active show, and data directories. Loaded once at start,
//! saved whenever the control surface mutates it. Missing or corrupt files
//! fall back to defaults rather than blocking boot.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stagecast_core::ARTNET_PORT;
use stagecast_dmx::DmxOutputConfig;

use crate::{PlayerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub dmx: DmxOutputConfig,

    /// Start playback as soon as a show is active after boot
    #[serde(default = "default_true")]
    pub autoplay: bool,
    /// Loop setting used by autoplay and restart
    #[serde(default = "default_true", rename = "loop")]
    pub looped: bool,

    #[serde(default)]
    pub active_show_id: Option<String>,
    #[serde(default)]
    pub active_scene_id: Option<String>,

    #[serde(default = "default_shows_path")]
    pub shows_path: PathBuf,
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    #[serde(default = "default_recordings_path")]
    pub recordings_path: PathBuf,

    /// Bring the Art-Net listener up at boot
    #[serde(default)]
    pub recorder_listen: bool,
    #[serde(default = "default_recorder_bind")]
    pub recorder_bind: String,

    #[serde(skip)]
    path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_shows_path() -> PathBuf {
    PathBuf::from("shows")
}

fn default_config_path() -> PathBuf {
    PathBuf::from("config")
}

fn default_recordings_path() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_recorder_bind() -> String {
    format!("0.0.0.0:{ARTNET_PORT}")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dmx: DmxOutputConfig::default(),
            autoplay: true,
            looped: true,
            active_show_id: None,
            active_scene_id: None,
            shows_path: default_shows_path(),
            config_path: default_config_path(),
            recordings_path: default_recordings_path(),
            recorder_listen: false,
            recorder_bind: default_recorder_bind(),
            path: None,
        }
    }
}

impl AppConfig {
    /// Load from `path`, falling back to defaults when the file is missing
    /// or unreadable. The path sticks for later [`AppConfig::save`] calls.
    pub fn load(path: &Path) -> Self {
        let mut config = if path.exists() {
            match fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<AppConfig>(&raw).map_err(|e| e.to_string()))
            {
                Ok(config) => {
                    info!("config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("unreadable config {}: {e}; using defaults", path.display());
                    AppConfig::default()
                }
            }
        } else {
            info!("no config at {}, using defaults", path.display());
            AppConfig::default()
        };
        config.path = Some(path.to_path_buf());
        config
    }

    /// Persist to the path this config was loaded from.
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| PlayerError::ConfigIo("config has no backing file".to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PlayerError::ConfigIo(format!("{}: {e}", parent.display())))?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| PlayerError::ConfigIo(e.to_string()))?;
        fs::write(path, raw).map_err(|e| PlayerError::ConfigIo(format!("{}: {e}", path.display())))?;
        Ok(())
    }

    /// Where the scheduler document lives.
    pub fn schedule_file(&self) -> PathBuf {
        self.config_path.join("schedule.json")
    }

    /// Where the scene-link book lives.
    pub fn links_file(&self) -> PathBuf {
        self.config_path.join("dmx_scene_links.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file() -> PathBuf {
        std::env::temp_dir()
            .join("stagecast-config")
            .join(uuid::Uuid::new_v4().to_string())
            .join("config.json")
    }

    #[test]
    fn missing_file_yields_defaults_with_sticky_path() {
        let path = temp_file();
        let config = AppConfig::load(&path);

        assert!(config.autoplay);
        assert!(config.looped);
        assert_eq!(config.recorder_bind, "0.0.0.0:6454");

        // Saving works straight away
        config.save().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn round_trips_settings() {
        let path = temp_file();
        let mut config = AppConfig::load(&path);
        config.active_show_id = Some("gala".to_string());
        config.autoplay = false;
        config.save().unwrap();

        let reloaded = AppConfig::load(&path);
        assert_eq!(reloaded.active_show_id.as_deref(), Some("gala"));
        assert!(!reloaded.autoplay);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let path = temp_file();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let config = AppConfig::load(&path);
        assert_eq!(config, {
            let mut d = AppConfig::default();
            d.path = Some(path.clone());
            d
        });
    }

    #[test]
    fn derived_paths() {
        let config = AppConfig::default();
        assert_eq!(config.schedule_file(), PathBuf::from("config/schedule.json"));
        assert_eq!(
            config.links_file(),
            PathBuf::from("config/dmx_scene_links.json")
        );
    }
}
