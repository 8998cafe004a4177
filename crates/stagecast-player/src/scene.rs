//! Scene playback
//!
//! One [`ScenePlayer`] drives a single scene: the master clock, the video
//! sink and the 40 Hz sync loop that turns elapsed time into DMX frames.
//! Per tick the loop runs evaluate → blend → commit → cues → position, in
//! that order, so observers never see a position whose frame has not been
//! committed.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use stagecast_core::{
    blend, evaluate, BlendMode, DmxSequence, MasterClock, Project, Scene,
};
use stagecast_dmx::{DmxEngine, DmxRecording, RecordingStore, SceneLinkBook, SceneRecordingLink};

use crate::cues::{Cue, CueSheet};
use crate::video::{VideoEvent, VideoSink};
use crate::Result;

/// Scene playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneState {
    Idle,
    Loading,
    Playing,
    Paused,
    Stopped,
    Error,
}

/// Typed observer events replacing ad-hoc callbacks
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    State(SceneState),
    /// Master-clock position, emitted once per sync tick while playing
    Position { position_ms: u64 },
    /// A timeline cue fired
    Cue { id: String, time_ms: u64 },
    /// The scene wrapped around; count starts at 1
    Looped { count: u32 },
    /// Non-looping scene reached its end
    Completed,
}

/// Status snapshot for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct SceneStatus {
    pub scene_id: String,
    pub scene_name: String,
    pub state: SceneState,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub loop_count: u32,
    pub has_sequence: bool,
    pub has_recording: bool,
}

/// Sync cadence: 40 Hz
const SYNC_INTERVAL: Duration = Duration::from_millis(25);

struct Shared {
    state: Mutex<SceneState>,
    clock: Mutex<MasterClock>,
    cues: Mutex<CueSheet>,
    looped: AtomicBool,
    loop_count: AtomicU32,
    running: AtomicBool,
    events: broadcast::Sender<PlayerEvent>,
}

impl Shared {
    fn state(&self) -> SceneState {
        *self.state.lock()
    }

    // All transitions funnel through here; the sync loop, user calls and
    // completion handling stay serialized on the state lock.
    fn transition(&self, to: SceneState) {
        let mut state = self.state.lock();
        if *state != to {
            *state = to;
            let _ = self.events.send(PlayerEvent::State(to));
        }
    }
}

/// Synchronized playback of one scene
pub struct ScenePlayer {
    project: Arc<Project>,
    scene: Scene,
    video: Arc<dyn VideoSink>,
    engine: Arc<DmxEngine>,
    sequence: Option<DmxSequence>,
    recording: Option<Arc<DmxRecording>>,
    link: Option<SceneRecordingLink>,
    shared: Arc<Shared>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl ScenePlayer {
    pub fn new(
        project: Arc<Project>,
        scene: Scene,
        video: Arc<dyn VideoSink>,
        engine: Arc<DmxEngine>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            project,
            scene,
            video,
            engine,
            sequence: None,
            recording: None,
            link: None,
            shared: Arc::new(Shared {
                state: Mutex::new(SceneState::Idle),
                clock: Mutex::new(MasterClock::new()),
                cues: Mutex::new(CueSheet::default()),
                looped: AtomicBool::new(false),
                loop_count: AtomicU32::new(0),
                running: AtomicBool::new(false),
                events,
            }),
            sync_task: Mutex::new(None),
        }
    }

    /// Resolve scene resources: the linked sequence, an enabled recording
    /// link and its recording, and the primary video with its effective
    /// mapping descriptor.
    pub async fn load(&mut self, links: &SceneLinkBook, recordings: &RecordingStore) -> Result<()> {
        self.shared.transition(SceneState::Loading);

        self.sequence = self.project.scene_sequence(&self.scene).cloned();
        if let Some(sequence) = &self.sequence {
            info!(
                "scene '{}': lighting sequence '{}'",
                self.scene.name, sequence.name
            );
        }

        self.link = links.active_link(&self.scene.id);
        self.recording = None;
        if let Some(link) = &self.link {
            match recordings.load(&link.recording_name) {
                Ok(recording) => {
                    info!(
                        "scene '{}': recording '{}' ({:?})",
                        self.scene.name, link.recording_name, link.mode
                    );
                    self.recording = Some(Arc::new(recording));
                }
                // A missing recording degrades to sequence-only playback
                Err(e) => warn!("linked recording '{}' unavailable: {e}", link.recording_name),
            }
        }

        if let Some(element) = self.scene.primary_video() {
            if let Some(item) = self.project.media_item(&element.media_id) {
                let mapping = self.project.scene_mapping(&self.scene.id);
                if let Err(e) = self.video.load(&item.path, mapping).await {
                    self.shared.transition(SceneState::Error);
                    return Err(e);
                }
                info!("scene '{}': video {}", self.scene.name, item.path.display());
            }
        }

        self.shared.transition(SceneState::Idle);
        Ok(())
    }

    /// Replace the scene's timeline cues.
    pub fn set_cues(&self, cues: Vec<Cue>) {
        *self.shared.cues.lock() = CueSheet::new(cues);
    }

    /// Start playback. `looped` overrides the scene's own loop setting for
    /// this run. Playing is idempotent; a paused scene resumes.
    pub async fn play(&self, looped: bool) -> Result<()> {
        match self.shared.state() {
            SceneState::Playing => return Ok(()),
            SceneState::Paused => return self.resume().await,
            _ => {}
        }

        self.shared.looped.store(looped, Ordering::SeqCst);
        self.shared.loop_count.store(0, Ordering::SeqCst);
        self.shared.cues.lock().rewind();
        self.shared.clock.lock().start(Instant::now());
        self.shared.running.store(true, Ordering::SeqCst);

        self.video.play(looped).await?;
        self.spawn_sync_loop();
        self.shared.transition(SceneState::Playing);
        info!("scene '{}' playback started (loop={looped})", self.scene.name);
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        if self.shared.state() != SceneState::Playing {
            return Ok(());
        }
        self.shared.clock.lock().pause(Instant::now());
        self.video.pause().await?;
        self.shared.transition(SceneState::Paused);
        info!("scene '{}' paused", self.scene.name);
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        if self.shared.state() != SceneState::Paused {
            return Ok(());
        }
        self.shared.clock.lock().resume(Instant::now());
        self.video.resume().await?;
        self.shared.transition(SceneState::Playing);
        info!("scene '{}' resumed", self.scene.name);
        Ok(())
    }

    /// Jump the master clock; cues at or after the target re-arm.
    pub async fn seek(&self, position_ms: u64) -> Result<()> {
        self.shared.clock.lock().seek(Instant::now(), position_ms);
        self.shared.cues.lock().seek(position_ms);
        self.video.seek(position_ms).await?;
        debug!("scene '{}' seek to {position_ms}ms", self.scene.name);
        Ok(())
    }

    /// Stop playback: halt the sync loop (joined within 1 s), stop video
    /// and black out the universe.
    pub async fn stop(&self) -> Result<()> {
        self.shared.running.store(false, Ordering::SeqCst);

        let handle = self.sync_task.lock().take();
        let mut panicked = false;
        if let Some(handle) = handle {
            match tokio::time::timeout(Duration::from_secs(1), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    warn!("sync loop panicked: {e}");
                    panicked = true;
                }
                Ok(Err(_)) => {}
                Err(_) => warn!("sync loop did not stop within 1s"),
            }
        }

        self.shared.clock.lock().stop();
        self.video.stop().await?;
        self.engine.blackout();
        self.shared.transition(if panicked {
            SceneState::Error
        } else {
            SceneState::Stopped
        });
        info!("scene '{}' stopped", self.scene.name);
        Ok(())
    }

    pub fn state(&self) -> SceneState {
        self.shared.state()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == SceneState::Playing
    }

    pub fn position_ms(&self) -> u64 {
        self.shared.clock.lock().elapsed_ms(Instant::now())
    }

    /// Scene duration; a zero-duration scene runs on the video's natural
    /// length.
    pub fn duration_ms(&self) -> u64 {
        if self.scene.duration_ms > 0 {
            self.scene.duration_ms
        } else {
            self.video.duration_ms().unwrap_or(0)
        }
    }

    pub fn loop_count(&self) -> u32 {
        self.shared.loop_count.load(Ordering::SeqCst)
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> SceneStatus {
        SceneStatus {
            scene_id: self.scene.id.clone(),
            scene_name: self.scene.name.clone(),
            state: self.state(),
            position_ms: self.position_ms(),
            duration_ms: self.duration_ms(),
            loop_count: self.loop_count(),
            has_sequence: self.sequence.is_some(),
            has_recording: self.recording.is_some(),
        }
    }

    fn spawn_sync_loop(&self) {
        let shared = self.shared.clone();
        let engine = self.engine.clone();
        let video = self.video.clone();
        let sequence = self.sequence.clone();
        let recording = self.recording.clone();
        let link = self.link.clone();
        let scene_duration = self.scene.duration_ms;
        let scene_name = self.scene.name.clone();
        let mut video_events = video.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SYNC_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while shared.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }

                // Drain decoder events; end-of-file is the scene end when no
                // fixed duration is set
                let mut video_ended = false;
                loop {
                    match video_events.try_recv() {
                        Ok(VideoEvent::EndOfFile) => video_ended = true,
                        Ok(VideoEvent::Position { .. }) => {}
                        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }

                if shared.state() != SceneState::Playing {
                    continue;
                }

                let elapsed_ms = shared.clock.lock().elapsed_ms(Instant::now());

                // evaluate → blend → commit
                let mode = link.as_ref().map(|l| l.mode).unwrap_or(BlendMode::ProjectOnly);
                let project_frame = sequence
                    .as_ref()
                    .and_then(|s| evaluate(s, elapsed_ms as f64 / 1000.0));
                let recording_frame = recording.as_ref().and_then(|r| {
                    let offset = link.as_ref().map(|l| l.offset_ms).unwrap_or(0);
                    let t = (elapsed_ms as i64).saturating_add(offset).max(0) as u64;
                    r.frame_at(t)
                });
                if project_frame.is_some() || recording_frame.is_some() {
                    let frame = blend(project_frame.as_ref(), recording_frame.as_ref(), mode);
                    engine.set_channels(1, &frame);
                }

                // Cues fire only after the frame is committed
                let fired: Vec<Cue> = shared.cues.lock().advance_to(elapsed_ms).to_vec();
                for cue in fired {
                    let _ = shared.events.send(PlayerEvent::Cue {
                        id: cue.id,
                        time_ms: cue.time_ms,
                    });
                }

                let _ = shared
                    .events
                    .send(PlayerEvent::Position { position_ms: elapsed_ms });

                // End of scene: fixed duration, or decoder EOF when duration
                // rides on the video
                let duration = if scene_duration > 0 {
                    scene_duration
                } else {
                    video.duration_ms().unwrap_or(0)
                };
                let ended =
                    (duration > 0 && elapsed_ms >= duration) || (duration == 0 && video_ended);
                if !ended {
                    continue;
                }

                if shared.looped.load(Ordering::SeqCst) {
                    shared.clock.lock().start(Instant::now());
                    shared.cues.lock().rewind();
                    let count = shared.loop_count.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Err(e) = video.seek(0).await {
                        warn!("video restart failed: {e}");
                    }
                    debug!("scene '{scene_name}' loop #{count}");
                    let _ = shared.events.send(PlayerEvent::Looped { count });
                } else {
                    shared.running.store(false, Ordering::SeqCst);
                    shared.clock.lock().stop();
                    if let Err(e) = video.stop().await {
                        warn!("video stop failed: {e}");
                    }
                    engine.blackout();
                    shared.transition(SceneState::Stopped);
                    info!("scene '{scene_name}' completed");
                    let _ = shared.events.send(PlayerEvent::Completed);
                    break;
                }
            }
            debug!("sync loop for '{scene_name}' ended");
        });

        *self.sync_task.lock() = Some(handle);
    }
}
