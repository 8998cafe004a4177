//! DMX output engine
//!
//! Owns the live 512-channel frame and a fixed-rate flusher task. Writers
//! mutate channels through the engine; the flusher snapshots the frame under
//! a short lock and pushes it to the transport outside of it, so the sync
//! loop is never blocked on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use stagecast_core::{DmxFrame, DMX_CHANNELS};

use crate::transport::DmxTransport;
use crate::Result;

/// Fixed-rate DMX output engine
pub struct DmxEngine {
    frame: Arc<Mutex<DmxFrame>>,
    transport: Arc<AsyncMutex<Box<dyn DmxTransport>>>,
    connected: Arc<AtomicBool>,
    last_send: Arc<Mutex<Option<Instant>>>,
    running: Arc<AtomicBool>,
    fps: u32,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl DmxEngine {
    pub fn new(transport: Box<dyn DmxTransport>, fps: u32) -> Self {
        Self {
            frame: Arc::new(Mutex::new([0u8; DMX_CHANNELS])),
            transport: Arc::new(AsyncMutex::new(transport)),
            connected: Arc::new(AtomicBool::new(false)),
            last_send: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            fps: fps.clamp(1, 60),
            flusher: Mutex::new(None),
        }
    }

    /// Connect the transport and start the flusher.
    ///
    /// A connect failure bubbles up, but the engine keeps running in a
    /// disconnected state: channel writes are accepted and frames drop
    /// until the transport comes back. Losing DMX never takes the show down.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.spawn_flusher();

        let result = self.transport.lock().await.connect().await;
        match result {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                info!("dmx engine started at {} Hz", self.fps);
                Ok(())
            }
            Err(e) => {
                warn!("dmx transport open failed, running disconnected: {e}");
                Err(e)
            }
        }
    }

    fn spawn_flusher(&self) {
        let frame = self.frame.clone();
        let transport = self.transport.clone();
        let connected = self.connected.clone();
        let last_send = self.last_send.clone();
        let running = self.running.clone();
        let interval = Duration::from_secs_f64(1.0 / self.fps as f64);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if !connected.load(Ordering::SeqCst) {
                    continue;
                }

                let snapshot = *frame.lock();
                let transport = transport.lock().await;
                if !transport.is_connected() {
                    continue;
                }
                match transport.send(&snapshot).await {
                    Ok(()) => *last_send.lock() = Some(Instant::now()),
                    // Send failures degrade, they never propagate
                    Err(e) => warn!("dmx send failed: {e}"),
                }
            }
            debug!("dmx flusher stopped");
        });

        *self.flusher.lock() = Some(handle);
    }

    /// Set one channel (1-based). Out-of-range channels are ignored.
    pub fn set_channel(&self, channel: u16, value: u8) {
        if (1..=DMX_CHANNELS as u16).contains(&channel) {
            self.frame.lock()[(channel - 1) as usize] = value;
        }
    }

    /// Bulk write starting at a 1-based channel; values running past
    /// channel 512 are silently truncated.
    pub fn set_channels(&self, start_channel: u16, values: &[u8]) {
        if start_channel == 0 || start_channel > DMX_CHANNELS as u16 {
            return;
        }
        let start = (start_channel - 1) as usize;
        let mut frame = self.frame.lock();
        let len = values.len().min(DMX_CHANNELS - start);
        frame[start..start + len].copy_from_slice(&values[..len]);
    }

    /// Zero the whole universe.
    pub fn blackout(&self) {
        *self.frame.lock() = [0u8; DMX_CHANNELS];
        info!("dmx blackout");
    }

    /// Snapshot of the current frame.
    pub fn frame(&self) -> DmxFrame {
        *self.frame.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn last_send(&self) -> Option<Instant> {
        *self.last_send.lock()
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Stop the flusher, push one blackout frame and release the transport.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let handle = self.flusher.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .is_err()
            {
                warn!("dmx flusher did not stop within 1s");
            }
        }

        self.blackout();
        let mut transport = self.transport.lock().await;
        if transport.is_connected() {
            let _ = transport.send(&[0u8; DMX_CHANNELS]).await;
            // Let the blackout egress before the handle drops
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Err(e) = transport.disconnect().await {
                warn!("dmx transport close failed: {e}");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("dmx engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::LoopbackTransport;

    fn engine_with_loopback(fps: u32) -> (DmxEngine, Arc<Mutex<Vec<DmxFrame>>>) {
        let transport = LoopbackTransport::new();
        let sent = transport.sent_frames();
        (DmxEngine::new(Box::new(transport), fps), sent)
    }

    #[test]
    fn channel_writes_are_one_based_and_clamped() {
        let (engine, _) = engine_with_loopback(40);

        engine.set_channel(1, 255);
        engine.set_channel(512, 7);
        engine.set_channel(0, 99);
        engine.set_channel(513, 99);

        let frame = engine.frame();
        assert_eq!(frame[0], 255);
        assert_eq!(frame[511], 7);
        assert!(frame[1..511].iter().all(|&v| v == 0));
    }

    #[test]
    fn bulk_writes_truncate_past_the_universe() {
        let (engine, _) = engine_with_loopback(40);

        engine.set_channels(511, &[1, 2, 3, 4]);

        let frame = engine.frame();
        assert_eq!(frame[510], 1);
        assert_eq!(frame[511], 2);
    }

    #[test]
    fn blackout_zeroes_everything() {
        let (engine, _) = engine_with_loopback(40);
        engine.set_channels(1, &[9; 64]);

        engine.blackout();
        assert_eq!(engine.frame(), [0u8; DMX_CHANNELS]);
    }

    #[test]
    fn fps_is_clamped_to_valid_range() {
        let (engine, _) = engine_with_loopback(0);
        assert_eq!(engine.fps(), 1);
        let (engine, _) = engine_with_loopback(600);
        assert_eq!(engine.fps(), 60);
    }

    #[tokio::test]
    async fn flusher_delivers_current_frame_at_rate() {
        let (engine, sent) = engine_with_loopback(40);
        engine.start().await.unwrap();

        engine.set_channel(1, 123);
        tokio::time::sleep(Duration::from_millis(200)).await;

        engine.shutdown().await;
        let frames = sent.lock();
        // ~8 ticks in 200ms at 40 Hz; allow generous jitter
        assert!(frames.len() >= 3, "only {} frames sent", frames.len());
        assert!(frames.iter().any(|f| f[0] == 123));
        // Shutdown blackout is the last word
        assert_eq!(*frames.last().unwrap(), [0u8; DMX_CHANNELS]);
        assert!(engine.last_send().is_some());
    }

    #[tokio::test]
    async fn failed_connect_leaves_engine_accepting_writes() {
        let engine = DmxEngine::new(Box::new(LoopbackTransport::failing()), 40);

        assert!(engine.start().await.is_err());
        assert!(!engine.is_connected());

        // Writes still land in the frame buffer
        engine.set_channel(5, 50);
        assert_eq!(engine.frame()[4], 50);

        engine.shutdown().await;
    }
}
