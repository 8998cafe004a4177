//! Playback scheduling
//!
//! Runs the weekly [`Schedule`] on a timer task: sleep toward the next
//! computed fire point, re-check the exception list at the fire minute, and
//! emit a trigger event. Mutations persist to disk immediately and wake the
//! task so the next fire is recomputed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stagecast_core::{Schedule, ScheduleException, ScheduleMode, ScheduleRule};

use crate::{PlayerError, Result};

/// Events emitted by the scheduler task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A fire point was reached (or continuous mode was configured)
    Trigger,
}

/// How far ahead the grid is scanned; a week covers every weekly rule
const FIRE_HORIZON_DAYS: u64 = 8;

/// Re-check cadence when idle, and the cap on any single sleep so schedule
/// edits and clock adjustments are picked up promptly
const IDLE_RECHECK: Duration = Duration::from_secs(30);

/// Weekly playback scheduler with on-disk persistence
pub struct PlaybackScheduler {
    path: PathBuf,
    schedule: Arc<Mutex<Schedule>>,
    changed: Arc<Notify>,
    running: Arc<AtomicBool>,
    event_tx: Mutex<Option<mpsc::Sender<SchedulerEvent>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackScheduler {
    /// Create a scheduler persisting to `path` (e.g. `config/schedule.json`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schedule: Arc::new(Mutex::new(Schedule::default())),
            changed: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            event_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted schedule and start the timer task. Returns the
    /// trigger channel; continuous mode fires once immediately.
    pub fn start(&self) -> mpsc::Receiver<SchedulerEvent> {
        let (tx, rx) = mpsc::channel(8);

        *self.schedule.lock() = self.load_schedule();
        *self.event_tx.lock() = Some(tx.clone());
        self.running.store(true, Ordering::SeqCst);

        let schedule = self.schedule.clone();
        let changed = self.changed.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            let mut last_fired: Option<NaiveDateTime> = None;

            while running.load(Ordering::SeqCst) {
                let now = Local::now().naive_local();
                let next = schedule.lock().next_fire_after(now, FIRE_HORIZON_DAYS);

                let sleep_for = match next {
                    Some(fire) => {
                        let millis = (fire - now).num_milliseconds().max(0) as u64;
                        Duration::from_millis(millis).min(IDLE_RECHECK)
                    }
                    None => IDLE_RECHECK,
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = changed.notified() => continue,
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let Some(fire) = next else { continue };
                let now = Local::now().naive_local();
                if now < fire || last_fired == Some(fire) {
                    continue;
                }
                last_fired = Some(fire);

                // Exceptions are consulted again at the fire minute; an
                // edit made while we slept can still suppress this fire
                let due = schedule.lock().times_on(fire.date()).contains(&fire.time());
                if !due {
                    debug!("fire at {fire} suppressed by exception");
                    continue;
                }

                info!("schedule trigger at {fire}");
                if tx.send(SchedulerEvent::Trigger).await.is_err() {
                    break;
                }
            }
            debug!("scheduler task stopped");
        });

        *self.task.lock() = Some(handle);
        info!("scheduler started");

        self.fire_continuous();
        rx
    }

    /// Stop the timer task, joining it briefly.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.changed.notify_waiters();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                warn!("scheduler task did not stop within 2s");
            }
        }
        *self.event_tx.lock() = None;
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the current schedule.
    pub fn schedule(&self) -> Schedule {
        self.schedule.lock().clone()
    }

    /// Replace the whole schedule; continuous mode re-fires.
    pub fn set_schedule(&self, schedule: Schedule) -> Result<()> {
        schedule.validate()?;
        *self.schedule.lock() = schedule;
        self.persist()?;
        self.changed.notify_waiters();
        self.fire_continuous();
        Ok(())
    }

    /// Add a rule, generating an id when none is given. Returns the id.
    pub fn add_rule(&self, mut rule: ScheduleRule) -> Result<String> {
        if rule.id.is_empty() {
            rule.id = Uuid::new_v4().to_string();
        }
        validate_rule(&rule)?;
        let id = rule.id.clone();
        self.schedule.lock().rules.push(rule);
        self.persist()?;
        self.changed.notify_waiters();
        Ok(id)
    }

    pub fn remove_rule(&self, rule_id: &str) -> Result<bool> {
        let removed = {
            let mut schedule = self.schedule.lock();
            let before = schedule.rules.len();
            schedule.rules.retain(|r| r.id != rule_id);
            schedule.rules.len() != before
        };
        if removed {
            self.persist()?;
            self.changed.notify_waiters();
        }
        Ok(removed)
    }

    pub fn update_rule(&self, rule_id: &str, rule: ScheduleRule) -> Result<bool> {
        let rule = ScheduleRule {
            id: rule_id.to_string(),
            ..rule
        };
        validate_rule(&rule)?;
        let updated = {
            let mut schedule = self.schedule.lock();
            match schedule.rules.iter_mut().find(|r| r.id == rule_id) {
                Some(slot) => {
                    *slot = rule;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.persist()?;
            self.changed.notify_waiters();
        }
        Ok(updated)
    }

    /// Add or replace the exception for a date.
    pub fn add_exception(&self, exception: ScheduleException) -> Result<()> {
        validate_exception(&exception)?;
        {
            let mut schedule = self.schedule.lock();
            schedule.exceptions.retain(|e| e.date != exception.date);
            schedule.exceptions.push(exception);
        }
        self.persist()?;
        self.changed.notify_waiters();
        Ok(())
    }

    pub fn remove_exception(&self, date: &str) -> Result<bool> {
        let removed = {
            let mut schedule = self.schedule.lock();
            let before = schedule.exceptions.len();
            schedule.exceptions.retain(|e| e.date != date);
            schedule.exceptions.len() != before
        };
        if removed {
            self.persist()?;
            self.changed.notify_waiters();
        }
        Ok(removed)
    }

    pub fn set_mode(&self, mode: ScheduleMode) -> Result<()> {
        self.schedule.lock().mode = mode;
        self.persist()?;
        self.changed.notify_waiters();
        self.fire_continuous();
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.schedule.lock().enabled = enabled;
        self.persist()?;
        self.changed.notify_waiters();
        Ok(())
    }

    /// Earliest future fire time, for dashboards.
    pub fn next_trigger(&self) -> Option<NaiveDateTime> {
        self.schedule
            .lock()
            .next_fire_after(Local::now().naive_local(), FIRE_HORIZON_DAYS)
    }

    /// Remaining fire times today.
    pub fn triggers_today(&self) -> Vec<chrono::NaiveTime> {
        self.schedule.lock().times_on(Local::now().date_naive())
    }

    // Continuous mode fires once on every (re)configuration
    fn fire_continuous(&self) {
        let fire = {
            let schedule = self.schedule.lock();
            schedule.enabled && schedule.mode == ScheduleMode::Continuous
        };
        if !fire {
            return;
        }
        if let Some(tx) = self.event_tx.lock().as_ref() {
            if tx.try_send(SchedulerEvent::Trigger).is_ok() {
                info!("continuous mode trigger");
            }
        }
    }

    fn load_schedule(&self) -> Schedule {
        if !self.path.exists() {
            debug!("no schedule file at {}, using defaults", self.path.display());
            return Schedule::default();
        }
        match std::fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<Schedule>(&raw).map_err(|e| e.to_string()))
        {
            Ok(schedule) => {
                info!("schedule loaded from {}", self.path.display());
                schedule
            }
            Err(e) => {
                warn!("unreadable schedule {}: {e}", self.path.display());
                Schedule::default()
            }
        }
    }

    fn persist(&self) -> Result<()> {
        let schedule = self.schedule.lock().clone();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PlayerError::ConfigIo(format!("{}: {e}", parent.display())))?;
        }
        let raw = serde_json::to_string_pretty(&schedule)
            .map_err(|e| PlayerError::ConfigIo(e.to_string()))?;
        std::fs::write(&self.path, raw)
            .map_err(|e| PlayerError::ConfigIo(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}

// Check a mutation before it touches the live schedule
fn validate_rule(rule: &ScheduleRule) -> Result<()> {
    let probe = Schedule {
        rules: vec![rule.clone()],
        ..Schedule::default()
    };
    probe.validate()?;
    Ok(())
}

fn validate_exception(exception: &ScheduleException) -> Result<()> {
    let probe = Schedule {
        exceptions: vec![exception.clone()],
        ..Schedule::default()
    };
    probe.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join("stagecast-scheduler")
            .join(Uuid::new_v4().to_string())
            .join("schedule.json")
    }

    fn rule(days: &[&str], times: &[&str]) -> ScheduleRule {
        ScheduleRule {
            id: String::new(),
            days: days.iter().map(|d| d.to_string()).collect(),
            times: times.iter().map(|t| t.to_string()).collect(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn continuous_mode_fires_once_on_start_and_reconfigure() {
        let scheduler = PlaybackScheduler::new(temp_path());
        let mut schedule = Schedule::default();
        schedule.mode = ScheduleMode::Continuous;
        scheduler.set_schedule(schedule).unwrap();

        let mut events = scheduler.start();
        assert_eq!(events.recv().await, Some(SchedulerEvent::Trigger));

        // No further fires arrive on their own
        let quiet =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(quiet.is_err());

        // Reconfiguration fires again
        scheduler.set_mode(ScheduleMode::Continuous).unwrap();
        assert_eq!(events.recv().await, Some(SchedulerEvent::Trigger));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn manual_mode_never_fires() {
        let scheduler = PlaybackScheduler::new(temp_path());
        let mut events = scheduler.start();

        let quiet =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(quiet.is_err());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn rules_persist_and_reload() {
        let path = temp_path();
        let scheduler = PlaybackScheduler::new(&path);
        let _events = scheduler.start();

        let id = scheduler
            .add_rule(rule(&["mon", "wed"], &["09:00", "17:30"]))
            .unwrap();
        assert!(!id.is_empty());
        scheduler.set_mode(ScheduleMode::Scheduled).unwrap();
        scheduler
            .add_exception(ScheduleException {
                date: "2025-10-13".to_string(),
                times: vec![],
                reason: "holiday".to_string(),
            })
            .unwrap();
        scheduler.stop().await;

        let reloaded = PlaybackScheduler::new(&path);
        let _events = reloaded.start();
        let schedule = reloaded.schedule();
        assert_eq!(schedule.mode, ScheduleMode::Scheduled);
        assert_eq!(schedule.rules.len(), 1);
        assert_eq!(schedule.exceptions.len(), 1);
        reloaded.stop().await;
    }

    #[tokio::test]
    async fn rule_mutations() {
        let scheduler = PlaybackScheduler::new(temp_path());
        let _events = scheduler.start();

        let id = scheduler.add_rule(rule(&["fri"], &["20:00"])).unwrap();
        assert!(scheduler
            .update_rule(&id, rule(&["sat"], &["21:00"]))
            .unwrap());
        assert_eq!(scheduler.schedule().rules[0].days, vec!["sat"]);
        assert_eq!(scheduler.schedule().rules[0].id, id);

        assert!(scheduler.remove_rule(&id).unwrap());
        assert!(!scheduler.remove_rule(&id).unwrap());

        // Invalid rules are rejected before they persist
        assert!(scheduler.add_rule(rule(&["someday"], &["10:00"])).is_err());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn exception_replaces_same_date() {
        let scheduler = PlaybackScheduler::new(temp_path());
        let _events = scheduler.start();

        scheduler
            .add_exception(ScheduleException {
                date: "2025-12-24".to_string(),
                times: vec!["10:00".to_string()],
                reason: String::new(),
            })
            .unwrap();
        scheduler
            .add_exception(ScheduleException {
                date: "2025-12-24".to_string(),
                times: vec![],
                reason: "closed".to_string(),
            })
            .unwrap();

        let schedule = scheduler.schedule();
        assert_eq!(schedule.exceptions.len(), 1);
        assert!(schedule.exceptions[0].times.is_empty());

        assert!(scheduler.remove_exception("2025-12-24").unwrap());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn near_future_fire_triggers() {
        let scheduler = PlaybackScheduler::new(temp_path());

        // The next minute boundary is always 1..=60s out; schedule a fire
        // exactly there
        let soon = Local::now() + chrono::Duration::seconds(61);
        let day = soon.format("%a").to_string().to_lowercase();
        let time = soon.format("%H:%M").to_string();

        let mut schedule = Schedule::default();
        schedule.mode = ScheduleMode::Scheduled;
        schedule.rules.push(ScheduleRule {
            id: "near".to_string(),
            days: vec![day],
            times: vec![time],
            enabled: true,
        });
        scheduler.set_schedule(schedule).unwrap();

        let mut events = scheduler.start();
        let fired = tokio::time::timeout(Duration::from_secs(75), events.recv()).await;
        assert_eq!(fired.unwrap(), Some(SchedulerEvent::Trigger));

        scheduler.stop().await;
    }
}
