//! sACN / E1.31 DMX output
//!
//! Streams DMX over UDP as ANSI E1.31 data packets: root layer, framing
//! layer and DMP layer assembled directly, multicast to the universe's
//! derived group by default, unicast otherwise.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::info;
use uuid::Uuid;

use stagecast_core::{DmxFrame, DMX_CHANNELS};

use crate::transport::DmxTransport;
use crate::{DmxError, Result};

/// E1.31 well-known port (ACN-SDT multicast)
pub const E131_PORT: u16 = 5568;

/// Full data packet: 126 bytes of headers + 512 slots
pub const E131_PACKET_LEN: usize = 638;

const VECTOR_ROOT_DATA: u32 = 0x0000_0004;
const VECTOR_FRAMING_DATA: u32 = 0x0000_0002;
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;
const ACN_PACKET_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";

/// sACN output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SacnConfig {
    #[serde(default = "default_universe")]
    pub universe: u16,
    /// Multicast to the derived group (true) or unicast to `destination`
    #[serde(default = "default_multicast")]
    pub multicast: bool,
    /// Unicast target, only used when `multicast` is off
    #[serde(default)]
    pub destination: Option<String>,
    /// E1.31 source priority, 0-200
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_source_name")]
    pub source_name: String,
}

fn default_universe() -> u16 {
    1
}

fn default_multicast() -> bool {
    true
}

fn default_priority() -> u8 {
    100
}

fn default_source_name() -> String {
    "Stagecast".to_string()
}

impl Default for SacnConfig {
    fn default() -> Self {
        Self {
            universe: default_universe(),
            multicast: default_multicast(),
            destination: None,
            priority: default_priority(),
            source_name: default_source_name(),
        }
    }
}

/// Multicast group for a universe per E1.31: `239.255.<hi>.<lo>`.
pub fn universe_multicast_addr(universe: u16) -> Ipv4Addr {
    Ipv4Addr::new(239, 255, (universe >> 8) as u8, (universe & 0xff) as u8)
}

fn put_flags_length(packet: &mut [u8], offset: usize, pdu_len: usize) {
    // High nibble 0x7, low 12 bits = PDU length from this offset
    let value = 0x7000u16 | (pdu_len as u16 & 0x0fff);
    packet[offset] = (value >> 8) as u8;
    packet[offset + 1] = (value & 0xff) as u8;
}

/// Assemble one E1.31 data packet.
pub fn encode_data_packet(
    cid: &[u8; 16],
    source_name: &str,
    priority: u8,
    sequence: u8,
    universe: u16,
    data: &DmxFrame,
) -> Vec<u8> {
    let mut packet = vec![0u8; E131_PACKET_LEN];

    // Root layer
    packet[0..2].copy_from_slice(&16u16.to_be_bytes()); // preamble size
    packet[2..4].copy_from_slice(&0u16.to_be_bytes()); // postamble size
    packet[4..16].copy_from_slice(&ACN_PACKET_IDENTIFIER);
    put_flags_length(&mut packet, 16, E131_PACKET_LEN - 16);
    packet[18..22].copy_from_slice(&VECTOR_ROOT_DATA.to_be_bytes());
    packet[22..38].copy_from_slice(cid);

    // Framing layer
    put_flags_length(&mut packet, 38, E131_PACKET_LEN - 38);
    packet[40..44].copy_from_slice(&VECTOR_FRAMING_DATA.to_be_bytes());
    let name = source_name.as_bytes();
    let name_len = name.len().min(63); // UTF-8, null-terminated field of 64
    packet[44..44 + name_len].copy_from_slice(&name[..name_len]);
    packet[108] = priority;
    packet[109..111].copy_from_slice(&0u16.to_be_bytes()); // sync address
    packet[111] = sequence;
    packet[112] = 0; // options
    packet[113..115].copy_from_slice(&universe.to_be_bytes());

    // DMP layer
    put_flags_length(&mut packet, 115, E131_PACKET_LEN - 115);
    packet[117] = VECTOR_DMP_SET_PROPERTY;
    packet[118] = 0xa1; // address & data type
    packet[119..121].copy_from_slice(&0u16.to_be_bytes()); // first property address
    packet[121..123].copy_from_slice(&1u16.to_be_bytes()); // address increment
    packet[123..125].copy_from_slice(&((DMX_CHANNELS + 1) as u16).to_be_bytes());
    packet[125] = 0x00; // DMX start code
    packet[126..].copy_from_slice(data);

    packet
}

/// sACN UDP transport
pub struct SacnTransport {
    config: SacnConfig,
    cid: [u8; 16],
    sequence: AtomicU8,
    socket: Option<Arc<UdpSocket>>,
    target: Option<SocketAddr>,
}

impl SacnTransport {
    pub fn new(config: SacnConfig) -> Self {
        Self {
            config,
            cid: *Uuid::new_v4().as_bytes(),
            sequence: AtomicU8::new(0),
            socket: None,
            target: None,
        }
    }
}

#[async_trait]
impl DmxTransport for SacnTransport {
    async fn connect(&mut self) -> Result<()> {
        let target = if self.config.multicast {
            SocketAddr::new(
                IpAddr::V4(universe_multicast_addr(self.config.universe)),
                E131_PORT,
            )
        } else {
            let destination = self
                .config
                .destination
                .as_deref()
                .ok_or_else(|| DmxError::TransportOpen("sacn unicast needs a destination".into()))?;
            format!("{destination}:{E131_PORT}")
                .parse()
                .map_err(|e| DmxError::TransportOpen(format!("bad sacn destination: {e}")))?
        };

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| DmxError::TransportOpen(e.to_string()))?;
        if self.config.multicast {
            socket
                .set_multicast_ttl_v4(4)
                .map_err(|e| DmxError::TransportOpen(e.to_string()))?;
        }

        info!(
            "sacn output ready: {} universe {} priority {}",
            target, self.config.universe, self.config.priority
        );
        self.socket = Some(Arc::new(socket));
        self.target = Some(target);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let (Some(socket), Some(target)) = (&self.socket, self.target) {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            let blackout = encode_data_packet(
                &self.cid,
                &self.config.source_name,
                self.config.priority,
                sequence,
                self.config.universe,
                &[0u8; DMX_CHANNELS],
            );
            let _ = socket.send_to(&blackout, target).await;
        }
        self.socket = None;
        self.target = None;
        info!("sacn output closed");
        Ok(())
    }

    async fn send(&self, frame: &DmxFrame) -> Result<()> {
        let (Some(socket), Some(target)) = (&self.socket, self.target) else {
            return Err(DmxError::NotConnected);
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let packet = encode_data_packet(
            &self.cid,
            &self.config.source_name,
            self.config.priority,
            sequence,
            self.config.universe,
            frame,
        );
        socket.send_to(&packet, target).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SacnConfig::default();
        assert_eq!(config.universe, 1);
        assert!(config.multicast);
        assert_eq!(config.priority, 100);
    }

    #[test]
    fn multicast_group_derives_from_universe() {
        assert_eq!(
            universe_multicast_addr(1),
            Ipv4Addr::new(239, 255, 0, 1)
        );
        assert_eq!(
            universe_multicast_addr(0x1234),
            Ipv4Addr::new(239, 255, 0x12, 0x34)
        );
    }

    #[test]
    fn data_packet_layout() {
        let cid = [7u8; 16];
        let mut frame = [0u8; DMX_CHANNELS];
        frame[0] = 255;
        frame[511] = 17;

        let packet = encode_data_packet(&cid, "Stagecast", 100, 42, 3, &frame);

        assert_eq!(packet.len(), E131_PACKET_LEN);
        // Root layer: preamble, ACN identifier, vector, CID
        assert_eq!(&packet[0..2], &[0x00, 0x10]);
        assert_eq!(&packet[4..16], b"ASC-E1.17\0\0\0");
        assert_eq!(&packet[18..22], &[0, 0, 0, 4]);
        assert_eq!(&packet[22..38], &cid);
        // Framing: vector, priority, sequence, universe
        assert_eq!(&packet[40..44], &[0, 0, 0, 2]);
        assert_eq!(&packet[44..53], b"Stagecast");
        assert_eq!(packet[108], 100);
        assert_eq!(packet[111], 42);
        assert_eq!(&packet[113..115], &[0, 3]);
        // DMP: vector, address type, count 513, start code, slots
        assert_eq!(packet[117], 0x02);
        assert_eq!(packet[118], 0xa1);
        assert_eq!(&packet[123..125], &[0x02, 0x01]);
        assert_eq!(packet[125], 0x00);
        assert_eq!(packet[126], 255);
        assert_eq!(packet[637], 17);
    }

    #[test]
    fn flags_and_lengths_cover_the_tail() {
        let packet = encode_data_packet(&[0u8; 16], "", 100, 0, 1, &[0u8; DMX_CHANNELS]);

        let root = u16::from_be_bytes([packet[16], packet[17]]);
        assert_eq!(root & 0xf000, 0x7000);
        assert_eq!((root & 0x0fff) as usize, E131_PACKET_LEN - 16);

        let framing = u16::from_be_bytes([packet[38], packet[39]]);
        assert_eq!((framing & 0x0fff) as usize, E131_PACKET_LEN - 38);

        let dmp = u16::from_be_bytes([packet[115], packet[116]]);
        assert_eq!((dmp & 0x0fff) as usize, E131_PACKET_LEN - 115);
    }

    #[test]
    fn long_source_names_stay_null_terminated() {
        let long = "x".repeat(100);
        let packet = encode_data_packet(&[0u8; 16], &long, 100, 0, 1, &[0u8; DMX_CHANNELS]);

        // 63 name bytes max, byte 107 must remain the terminator
        assert_eq!(packet[44 + 62], b'x');
        assert_eq!(packet[107], 0);
    }

    #[tokio::test]
    async fn unicast_frames_arrive_with_rolling_sequence() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        // Point the unicast destination at our test receiver's port by
        // swapping the constant port out of the parsed target.
        let mut transport = SacnTransport::new(SacnConfig {
            multicast: false,
            destination: Some("127.0.0.1".to_string()),
            ..SacnConfig::default()
        });
        transport.connect().await.unwrap();
        transport.target = Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));

        transport.send(&[0u8; DMX_CHANNELS]).await.unwrap();
        transport.send(&[0u8; DMX_CHANNELS]).await.unwrap();

        let mut buf = vec![0u8; 1024];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, E131_PACKET_LEN);
        let first_seq = buf[111];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, E131_PACKET_LEN);
        assert_eq!(buf[111], first_seq.wrapping_add(1));
    }
}
