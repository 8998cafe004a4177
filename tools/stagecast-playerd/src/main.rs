//! Stagecast player daemon
//!
//! Headless wiring of the playback stack: config, DMX engine, Art-Net
//! recorder, scheduler and show controller. Video goes to the null sink
//! unless a hardware decoder integration is linked in; the control surface
//! (HTTP or otherwise) is an external collaborator driving the controller.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stagecast_core::Project;
use stagecast_dmx::{create_transport, ArtNetRecorder, DmxEngine, RecordingStore, SceneLinkBook};
use stagecast_player::{
    AppConfig, NullVideoSink, PlaybackScheduler, PlayerError, ProjectSource, ShowController,
};

#[derive(Parser, Debug)]
#[command(name = "stagecast-playerd", about = "Stagecast show-player daemon", version)]
struct Args {
    /// Path to the appliance configuration
    #[arg(short, long, default_value = "config/player.json")]
    config: PathBuf,

    /// Load this show at boot, overriding the configured one
    #[arg(long)]
    show: Option<String>,
}

/// Shows on disk: `<shows>/<id>/project.json`, already exported in the
/// player package format. Stands in for the external project parser.
struct DirectoryShows {
    root: PathBuf,
}

impl ProjectSource for DirectoryShows {
    fn resolve(&self, show_id: &str) -> stagecast_player::Result<Project> {
        let path = self.root.join(show_id).join("project.json");
        let raw = fs::read_to_string(&path)
            .map_err(|_| PlayerError::ShowNotFound(show_id.to_string()))?;
        let mut project: Project = serde_json::from_str(&raw).map_err(|e| {
            PlayerError::Core(stagecast_core::CoreError::ProjectInvalid(format!(
                "{}: {e}",
                path.display()
            )))
        })?;
        // Media paths in the package are relative to the show directory
        let base = self.root.join(show_id);
        for item in &mut project.media {
            if item.path.is_relative() {
                item.path = base.join(&item.path);
            }
        }
        Ok(project)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = AppConfig::load(&args.config);

    fs::create_dir_all(&config.shows_path)
        .with_context(|| format!("creating {}", config.shows_path.display()))?;
    fs::create_dir_all(&config.config_path)
        .with_context(|| format!("creating {}", config.config_path.display()))?;

    // DMX output
    let engine = Arc::new(DmxEngine::new(create_transport(&config.dmx), config.dmx.fps));
    if config.dmx.enabled {
        if let Err(e) = engine.start().await {
            warn!("dmx output unavailable: {e}");
        }
    } else {
        info!("dmx output disabled in config");
    }

    // Art-Net capture
    let recordings = RecordingStore::new(&config.recordings_path);
    let recorder = Arc::new(ArtNetRecorder::new(recordings.clone()));
    if config.recorder_listen {
        if let Err(e) = recorder.start_listening(&config.recorder_bind) {
            warn!("art-net recorder unavailable: {e}");
        }
    }

    // Orchestration
    let controller = Arc::new(ShowController::new(
        Arc::new(DirectoryShows {
            root: config.shows_path.clone(),
        }),
        Arc::new(NullVideoSink::new()),
        engine,
        Arc::new(SceneLinkBook::open(config.links_file())),
        recordings,
    ));
    controller.attach_recorder(recorder);

    // Scheduler: triggers start non-looping playback
    let scheduler = Arc::new(PlaybackScheduler::new(config.schedule_file()));
    let events = scheduler.start();
    let _trigger_task = controller.attach_scheduler(scheduler, events);

    // Restore the active show, then autoplay if configured
    let boot_show = args.show.as_ref().or(config.active_show_id.as_ref());
    if let Some(show_id) = boot_show {
        match controller
            .load_show(show_id, config.active_scene_id.as_deref())
            .await
        {
            Ok(()) => {
                if config.autoplay {
                    if let Err(e) = controller.play(config.looped).await {
                        warn!("autoplay failed: {e}");
                    }
                }
            }
            Err(e) => warn!("active show '{show_id}' not restored: {e}"),
        }
    }

    info!("stagecast-playerd running; ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;

    info!("shutting down");
    controller.shutdown().await;
    Ok(())
}
