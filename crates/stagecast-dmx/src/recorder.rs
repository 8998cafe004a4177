//! Art-Net capture
//!
//! A UDP listener decoding ArtDmx datagrams. Every decoded frame feeds a
//! live-preview bus; while a recording is armed, frames on the armed
//! universe append to it with millisecond timestamps. The source IP is
//! stamped from the first captured frame.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stagecast_core::ARTNET_PORT;

use crate::artnet::decode_dmx;
use crate::recording::{DmxRecording, RecordingStore};
use crate::{DmxError, Result};

/// Default listener bind address
pub fn default_bind_addr() -> String {
    format!("0.0.0.0:{ARTNET_PORT}")
}

/// A decoded frame on the live-preview bus
#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub universe: u16,
    pub channels: Bytes,
    pub source: SocketAddr,
}

/// Recorder state for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct RecorderStatus {
    pub listening: bool,
    pub recording: bool,
    pub universe: Option<u16>,
    pub name: Option<String>,
    pub duration_ms: u64,
    pub frame_count: usize,
    pub frames_seen: u64,
    pub last_frame_age_ms: Option<u64>,
}

struct Armed {
    recording: DmxRecording,
    started: Instant,
}

/// Art-Net listener and recorder
pub struct ArtNetRecorder {
    store: RecordingStore,
    armed: Arc<Mutex<Option<Armed>>>,
    running: Arc<AtomicBool>,
    frames_seen: Arc<AtomicU64>,
    last_frame: Arc<Mutex<Option<Instant>>>,
    live_tx: broadcast::Sender<LiveFrame>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ArtNetRecorder {
    pub fn new(store: RecordingStore) -> Self {
        let (live_tx, _) = broadcast::channel(64);
        Self {
            store,
            armed: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            frames_seen: Arc::new(AtomicU64::new(0)),
            last_frame: Arc::new(Mutex::new(None)),
            live_tx,
            shutdown_tx: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &RecordingStore {
        &self.store
    }

    /// Live-preview feed; every decoded ArtDmx frame, armed or not.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveFrame> {
        self.live_tx.subscribe()
    }

    /// Bind the listener socket and start decoding.
    ///
    /// SO_REUSEADDR is set first so the recorder can share port 6454 with
    /// other Art-Net software on the host.
    pub fn start_listening(&self, bind_addr: &str) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            warn!("recorder already listening");
            return Ok(());
        }

        let addr: SocketAddr = bind_addr
            .parse()
            .map_err(|e| DmxError::ReceiverBind(format!("{bind_addr}: {e}")))?;

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| DmxError::ReceiverBind(e.to_string()))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| DmxError::ReceiverBind(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| DmxError::ReceiverBind(e.to_string()))?;
        socket
            .bind(&addr.into())
            .map_err(|e| DmxError::ReceiverBind(format!("{bind_addr}: {e}")))?;

        let socket = UdpSocket::from_std(socket.into())
            .map_err(|e| DmxError::ReceiverBind(e.to_string()))?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        self.running.store(true, Ordering::SeqCst);

        let armed = self.armed.clone();
        let frames_seen = self.frames_seen.clone();
        let last_frame = self.last_frame.clone();
        let live_tx = self.live_tx.clone();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    received = socket.recv_from(&mut buf) => match received {
                        Ok((len, from)) => process_datagram(
                            &buf[..len],
                            from,
                            &armed,
                            &frames_seen,
                            &last_frame,
                            &live_tx,
                        ),
                        Err(e) => warn!("art-net receive error: {e}"),
                    }
                }
            }
            debug!("art-net listener stopped");
        });

        *self.listener.lock() = Some(handle);
        info!("art-net recorder listening on {bind_addr}");
        Ok(())
    }

    /// Stop the listener, finishing any armed recording first. Joins the
    /// receive task within 2 seconds.
    pub async fn stop_listening(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if self.is_recording() {
            if let Err(e) = self.stop_recording() {
                warn!("closing armed recording failed: {e}");
            }
        }

        let shutdown = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown {
            let _ = tx.send(()).await;
        }

        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                warn!("art-net listener did not stop within 2s");
            }
        }
        info!("art-net recorder stopped listening");
    }

    pub fn is_listening(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_recording(&self) -> bool {
        self.armed.lock().is_some()
    }

    /// Arm a recording on one universe. Requires an active listener.
    pub fn start_recording(&self, name: &str, universe: u16) -> Result<()> {
        if !self.is_listening() {
            return Err(DmxError::ReceiverBind(
                "not listening; start_listening first".to_string(),
            ));
        }

        let mut armed = self.armed.lock();
        if armed.is_some() {
            return Err(DmxError::RecordingIo("already recording".to_string()));
        }

        *armed = Some(Armed {
            recording: DmxRecording::new(name, universe),
            started: Instant::now(),
        });
        info!("recording '{name}' armed on universe {universe}");
        Ok(())
    }

    /// Disarm, persist and return the recording. `Ok(None)` when nothing
    /// was armed.
    pub fn stop_recording(&self) -> Result<Option<DmxRecording>> {
        let armed = self.armed.lock().take();
        let Some(mut armed) = armed else {
            return Ok(None);
        };

        armed.recording.finalize();
        info!(
            "recording '{}' stopped: {} frames, {}ms",
            armed.recording.name,
            armed.recording.frame_count(),
            armed.recording.duration_ms
        );
        self.store.save(&armed.recording)?;
        Ok(Some(armed.recording))
    }

    pub fn status(&self) -> RecorderStatus {
        let armed = self.armed.lock();
        let (universe, name, duration_ms, frame_count) = match armed.as_ref() {
            Some(a) => (
                Some(a.recording.universe),
                Some(a.recording.name.clone()),
                a.recording.duration_ms,
                a.recording.frame_count(),
            ),
            None => (None, None, 0, 0),
        };

        RecorderStatus {
            listening: self.is_listening(),
            recording: armed.is_some(),
            universe,
            name,
            duration_ms,
            frame_count,
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            last_frame_age_ms: self
                .last_frame
                .lock()
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

fn process_datagram(
    packet: &[u8],
    from: SocketAddr,
    armed: &Mutex<Option<Armed>>,
    frames_seen: &AtomicU64,
    last_frame: &Mutex<Option<Instant>>,
    live_tx: &broadcast::Sender<LiveFrame>,
) {
    let Some((universe, frame)) = decode_dmx(packet) else {
        return;
    };

    frames_seen.fetch_add(1, Ordering::Relaxed);
    *last_frame.lock() = Some(Instant::now());

    {
        let mut armed = armed.lock();
        if let Some(active) = armed.as_mut() {
            if active.recording.universe == universe {
                let timestamp_ms = active.started.elapsed().as_millis() as u64;
                active.recording.push_frame(timestamp_ms, &frame);
                if active.recording.source_ip.is_empty() {
                    active.recording.source_ip = from.ip().to_string();
                }
            }
        }
    }

    // Preview always fires, even with no recording armed
    let _ = live_tx.send(LiveFrame {
        universe,
        channels: Bytes::copy_from_slice(&frame),
        source: from,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artnet::encode_dmx;
    use stagecast_core::DMX_CHANNELS;

    fn temp_store() -> RecordingStore {
        let dir = std::env::temp_dir()
            .join("stagecast-recorder")
            .join(uuid::Uuid::new_v4().to_string());
        RecordingStore::new(dir)
    }

    async fn sender_for(target: SocketAddr) -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(target).await.unwrap();
        socket
    }

    #[tokio::test]
    async fn captures_frames_on_the_armed_universe() {
        let recorder = ArtNetRecorder::new(temp_store());
        let bind = "127.0.0.1:16454";
        recorder.start_listening(bind).unwrap();
        recorder.start_recording("capture", 3).unwrap();

        let sender = sender_for(bind.parse().unwrap()).await;
        let packet = encode_dmx(3, &[0x42u8; DMX_CHANNELS]).unwrap();
        sender.send(&packet).await.unwrap();
        // A frame on another universe must not be captured
        let other = encode_dmx(9, &[0x11u8; DMX_CHANNELS]).unwrap();
        sender.send(&other).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let recording = recorder.stop_recording().unwrap().unwrap();
        assert_eq!(recording.frame_count(), 1);
        assert_eq!(recording.frames[0].channels, vec![0x42u8; DMX_CHANNELS]);
        assert_eq!(recording.universe, 3);
        assert!(recording.source_ip.starts_with("127.0.0.1"));
        // Persisted by stop_recording
        assert!(recorder.store().exists("capture"));

        recorder.stop_listening().await;
    }

    #[tokio::test]
    async fn preview_fires_without_an_armed_recording() {
        let recorder = ArtNetRecorder::new(temp_store());
        let bind = "127.0.0.1:16455";
        recorder.start_listening(bind).unwrap();
        let mut preview = recorder.subscribe();

        let sender = sender_for(bind.parse().unwrap()).await;
        let packet = encode_dmx(0, &[7u8; DMX_CHANNELS]).unwrap();
        sender.send(&packet).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), preview.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.universe, 0);
        assert_eq!(frame.channels[0], 7);

        let status = recorder.status();
        assert!(status.listening);
        assert!(!status.recording);
        assert_eq!(status.frames_seen, 1);

        recorder.stop_listening().await;
    }

    #[tokio::test]
    async fn foreign_datagrams_are_ignored() {
        let recorder = ArtNetRecorder::new(temp_store());
        let bind = "127.0.0.1:16456";
        recorder.start_listening(bind).unwrap();
        recorder.start_recording("noise", 0).unwrap();

        let sender = sender_for(bind.parse().unwrap()).await;
        sender.send(b"definitely not artnet").await.unwrap();
        sender.send(&[0u8; 4]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        let recording = recorder.stop_recording().unwrap().unwrap();
        assert_eq!(recording.frame_count(), 0);
        assert_eq!(recorder.status().frames_seen, 0);

        recorder.stop_listening().await;
    }

    #[tokio::test]
    async fn recording_requires_a_listener() {
        let recorder = ArtNetRecorder::new(temp_store());
        assert!(recorder.start_recording("nope", 0).is_err());
    }

    #[tokio::test]
    async fn double_arm_is_rejected() {
        let recorder = ArtNetRecorder::new(temp_store());
        recorder.start_listening("127.0.0.1:16457").unwrap();
        recorder.start_recording("first", 0).unwrap();
        assert!(recorder.start_recording("second", 0).is_err());
        recorder.stop_listening().await;
    }
}
