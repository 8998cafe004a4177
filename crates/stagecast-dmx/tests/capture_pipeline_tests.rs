//! End-to-end capture pipeline: Art-Net packets over real UDP into an armed
//! recorder, through the store, and back out via timed playback lookups.

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::UdpSocket;

use stagecast_dmx::artnet::encode_dmx;
use stagecast_dmx::{ArtNetRecorder, RecordingStore};

fn temp_store() -> RecordingStore {
    let dir: PathBuf = std::env::temp_dir()
        .join("stagecast-capture-tests")
        .join(uuid::Uuid::new_v4().to_string());
    RecordingStore::new(dir)
}

#[tokio::test]
async fn armed_capture_stamps_time_and_source_then_plays_back() {
    let bind = "127.0.0.1:16470";
    let recorder = ArtNetRecorder::new(temp_store());
    recorder.start_listening(bind).unwrap();
    recorder.start_recording("console-take", 3).unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.connect(bind).await.unwrap();

    // First frame lands ~300ms after arming
    tokio::time::sleep(Duration::from_millis(300)).await;
    let packet = encode_dmx(3, &[0x42u8; 512]).unwrap();
    sender.send(&packet).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = encode_dmx(3, &[0x43u8; 512]).unwrap();
    sender.send(&second).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let recording = recorder.stop_recording().unwrap().unwrap();
    recorder.stop_listening().await;

    assert_eq!(recording.frame_count(), 2);
    assert_eq!(recording.universe, 3);
    assert!(recording.source_ip.starts_with("127.0.0.1"));

    // Arming-relative timestamps, with scheduling slack
    let t0 = recording.frames[0].timestamp_ms;
    let t1 = recording.frames[1].timestamp_ms;
    assert!((250..=700).contains(&t0), "first frame at {t0}ms");
    assert!(t1 > t0, "timestamps must be monotonic");
    assert_eq!(recording.frames[0].channels, vec![0x42u8; 512]);

    // Reload from disk (stop_recording persisted it) and seek around
    let store = recorder.store();
    let loaded = store.load("console-take").unwrap();
    assert_eq!(loaded.frame_count(), 2);
    assert!(loaded.frame_at(0).is_none(), "no frame before the first stamp");
    assert_eq!(loaded.frame_at(t0).unwrap()[0], 0x42);
    assert_eq!(loaded.frame_at(t1).unwrap()[0], 0x43);
    // Past the end the last frame holds
    assert_eq!(loaded.frame_at(t1 + 60_000).unwrap()[0], 0x43);
}

#[tokio::test]
async fn short_payloads_are_zero_padded_to_a_full_universe() {
    // Hand-build an ArtDmx packet carrying only 4 slots
    let bind = "127.0.0.1:16471";
    let recorder = ArtNetRecorder::new(temp_store());
    recorder.start_listening(bind).unwrap();
    recorder.start_recording("short", 0).unwrap();

    let mut packet = Vec::new();
    packet.extend_from_slice(b"Art-Net\0");
    packet.extend_from_slice(&[0x00, 0x50]); // opcode 0x5000 LE
    packet.extend_from_slice(&[0x00, 0x0e]); // protocol version BE
    packet.push(0); // sequence
    packet.push(0); // physical
    packet.extend_from_slice(&0u16.to_le_bytes()); // universe
    packet.extend_from_slice(&4u16.to_be_bytes()); // length
    packet.extend_from_slice(&[10, 20, 30, 40]);

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.connect(bind).await.unwrap();
    sender.send(&packet).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let recording = recorder.stop_recording().unwrap().unwrap();
    recorder.stop_listening().await;

    assert_eq!(recording.frame_count(), 1);
    let channels = &recording.frames[0].channels;
    assert_eq!(&channels[..4], &[10, 20, 30, 40]);
    assert_eq!(channels.len(), 512);
    assert!(channels[4..].iter().all(|&v| v == 0));
}
