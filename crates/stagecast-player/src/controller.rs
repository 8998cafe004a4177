//! Show orchestration
//!
//! The controller owns at most one active [`ScenePlayer`]. Scene swaps are
//! synchronous: the old player is fully stopped and joined before the next
//! one loads. Playback controls delegate to the active player; scheduler
//! triggers map to non-looping playback.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use stagecast_core::{CoreError, Project};
use stagecast_dmx::{ArtNetRecorder, DmxEngine, RecordingStore, SceneLinkBook};

use crate::scene::{PlayerEvent, ScenePlayer, SceneStatus};
use crate::scheduler::{PlaybackScheduler, SchedulerEvent};
use crate::video::VideoSink;
use crate::{PlayerError, Result};

/// Resolves show ids to parsed projects. The package/filesystem layer is an
/// external collaborator behind this seam; it hands back a ready
/// [`Project`] value.
pub trait ProjectSource: Send + Sync {
    fn resolve(&self, show_id: &str) -> Result<Project>;
}

/// Full status snapshot for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub show_id: Option<String>,
    pub show_name: Option<String>,
    pub scene: Option<SceneStatus>,
    pub dmx_connected: bool,
}

/// Top-level orchestrator
pub struct ShowController {
    source: Arc<dyn ProjectSource>,
    video: Arc<dyn VideoSink>,
    engine: Arc<DmxEngine>,
    links: Arc<SceneLinkBook>,
    recordings: RecordingStore,
    active: AsyncMutex<Option<ScenePlayer>>,
    project: Mutex<Option<Arc<Project>>>,
    show_id: Mutex<Option<String>>,
    scheduler: Mutex<Option<Arc<PlaybackScheduler>>>,
    recorder: Mutex<Option<Arc<ArtNetRecorder>>>,
}

impl ShowController {
    pub fn new(
        source: Arc<dyn ProjectSource>,
        video: Arc<dyn VideoSink>,
        engine: Arc<DmxEngine>,
        links: Arc<SceneLinkBook>,
        recordings: RecordingStore,
    ) -> Self {
        Self {
            source,
            video,
            engine,
            links,
            recordings,
            active: AsyncMutex::new(None),
            project: Mutex::new(None),
            show_id: Mutex::new(None),
            scheduler: Mutex::new(None),
            recorder: Mutex::new(None),
        }
    }

    /// Load a show: stop whatever is playing, resolve and validate the
    /// project, then load the scene to play — the explicit id if given,
    /// else the declared start scene, else the first scene.
    pub async fn load_show(&self, show_id: &str, scene_id: Option<&str>) -> Result<()> {
        let mut active = self.active.lock().await;
        Self::stop_active(&mut active).await;

        let mut project = self.source.resolve(show_id)?;
        project.normalize();
        project.validate()?;
        let project = Arc::new(project);

        let scene = match scene_id {
            Some(id) => project
                .scene(id)
                .cloned()
                .ok_or_else(|| CoreError::SceneResolveFailed(id.to_string()))?,
            None => project
                .start_scene()
                .cloned()
                .ok_or_else(|| PlayerError::NoScene(show_id.to_string()))?,
        };
        let scene_name = scene.name.clone();

        let mut player = ScenePlayer::new(
            project.clone(),
            scene,
            self.video.clone(),
            self.engine.clone(),
        );
        player.load(&self.links, &self.recordings).await?;

        *self.project.lock() = Some(project);
        *self.show_id.lock() = Some(show_id.to_string());
        *active = Some(player);
        info!("show '{show_id}' loaded, scene '{scene_name}' ready");
        Ok(())
    }

    /// Switch to a scene of the loaded show and start it.
    pub async fn play_scene(&self, scene_id: &str, looped: bool) -> Result<()> {
        let project = self
            .project
            .lock()
            .clone()
            .ok_or(PlayerError::NothingLoaded)?;
        let scene = project
            .scene(scene_id)
            .cloned()
            .ok_or_else(|| CoreError::SceneResolveFailed(scene_id.to_string()))?;

        let mut active = self.active.lock().await;
        Self::stop_active(&mut active).await;

        let mut player = ScenePlayer::new(
            project,
            scene,
            self.video.clone(),
            self.engine.clone(),
        );
        player.load(&self.links, &self.recordings).await?;
        player.play(looped).await?;
        *active = Some(player);
        info!("playing scene '{scene_id}'");
        Ok(())
    }

    pub async fn play(&self, looped: bool) -> Result<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(player) => player.play(looped).await,
            None => Err(PlayerError::NothingLoaded),
        }
    }

    pub async fn pause(&self) -> Result<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(player) => player.pause().await,
            None => Ok(()),
        }
    }

    pub async fn resume(&self) -> Result<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(player) => player.resume().await,
            None => Ok(()),
        }
    }

    pub async fn stop(&self) -> Result<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(player) => player.stop().await,
            None => Ok(()),
        }
    }

    pub async fn seek(&self, position_ms: u64) -> Result<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(player) => player.seek(position_ms).await,
            None => Err(PlayerError::NothingLoaded),
        }
    }

    pub async fn has_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Event feed of the active player, if any.
    pub async fn subscribe_player(&self) -> Option<broadcast::Receiver<PlayerEvent>> {
        self.active.lock().await.as_ref().map(|p| p.subscribe())
    }

    /// Consume scheduler triggers: scheduled playbacks do not loop.
    pub fn attach_scheduler(
        self: &Arc<Self>,
        scheduler: Arc<PlaybackScheduler>,
        mut events: mpsc::Receiver<SchedulerEvent>,
    ) -> JoinHandle<()> {
        *self.scheduler.lock() = Some(scheduler);
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(SchedulerEvent::Trigger) = events.recv().await {
                if let Err(e) = controller.play(false).await {
                    warn!("scheduled playback skipped: {e}");
                }
            }
        })
    }

    /// Register the recorder for ordered shutdown.
    pub fn attach_recorder(&self, recorder: Arc<ArtNetRecorder>) {
        *self.recorder.lock() = Some(recorder);
    }

    pub async fn status(&self) -> ControllerStatus {
        let scene = {
            let active = self.active.lock().await;
            active.as_ref().map(|p| p.status())
        };
        ControllerStatus {
            show_id: self.show_id.lock().clone(),
            show_name: self
                .project
                .lock()
                .as_ref()
                .map(|p| p.name.clone()),
            scene,
            dmx_connected: self.engine.is_connected(),
        }
    }

    /// Ordered teardown: scene player first, then the DMX engine (blackout
    /// egress), then scheduler and recorder. The stopped player stays
    /// visible to status queries.
    pub async fn shutdown(&self) {
        {
            let active = self.active.lock().await;
            if let Some(player) = active.as_ref() {
                if let Err(e) = player.stop().await {
                    warn!("stopping active scene failed: {e}");
                }
            }
        }
        self.engine.shutdown().await;

        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        let recorder = self.recorder.lock().take();
        if let Some(recorder) = recorder {
            recorder.stop_listening().await;
        }
        info!("show controller shut down");
    }

    async fn stop_active(active: &mut Option<ScenePlayer>) {
        if let Some(player) = active.take() {
            if let Err(e) = player.stop().await {
                warn!("stopping active scene failed: {e}");
            }
        }
    }
}
