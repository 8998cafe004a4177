//! Art-Net DMX output
//!
//! Packets are built and parsed with `artnet_protocol`; the pure
//! [`encode_dmx`]/[`decode_dmx`] pair is shared by the output transport and
//! the capture path in [`crate::recorder`].

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use artnet_protocol::{ArtCommand, Output};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use stagecast_core::{DmxFrame, ARTNET_PORT, DMX_CHANNELS};

use crate::transport::DmxTransport;
use crate::{DmxError, Result};

/// Art-Net output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtNetConfig {
    /// Target node; a 255-terminated address switches the socket to broadcast
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub universe: u16,
}

fn default_ip() -> String {
    "255.255.255.255".to_string()
}

fn default_port() -> u16 {
    ARTNET_PORT
}

impl Default for ArtNetConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            universe: 0,
        }
    }
}

/// Build the ArtDmx packet for one universe frame.
///
/// The sequence byte stays 0 (resequencing disabled), so the packet is a
/// pure function of `(universe, data)`.
pub fn encode_dmx(universe: u16, data: &DmxFrame) -> Result<Vec<u8>> {
    let mut output = Output::default();
    output.subnet = universe;
    output.length = DMX_CHANNELS as u16;
    output.data = data.to_vec().into();

    ArtCommand::Output(output)
        .into_buffer()
        .map_err(|e| DmxError::Protocol(format!("artnet encode: {e:?}")))
}

/// Decode an ArtDmx packet into `(universe, frame)`, zero-padding short
/// payloads to 512 channels. Non-DMX Art-Net opcodes and foreign datagrams
/// yield `None`.
pub fn decode_dmx(packet: &[u8]) -> Option<(u16, DmxFrame)> {
    match ArtCommand::from_buffer(packet) {
        Ok(ArtCommand::Output(output)) => {
            let data: &[u8] = &output.data;
            let mut frame = [0u8; DMX_CHANNELS];
            let len = data.len().min(DMX_CHANNELS);
            frame[..len].copy_from_slice(&data[..len]);
            Some((output.subnet, frame))
        }
        Ok(_) => None,
        Err(e) => {
            debug!("artnet decode error: {e:?}");
            None
        }
    }
}

fn is_broadcast_target(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => ip.octets()[3] == 255,
        IpAddr::V6(_) => false,
    }
}

/// Art-Net UDP transport
pub struct ArtNetTransport {
    config: ArtNetConfig,
    socket: Option<Arc<UdpSocket>>,
    target: Option<SocketAddr>,
}

impl ArtNetTransport {
    pub fn new(config: ArtNetConfig) -> Self {
        Self {
            config,
            socket: None,
            target: None,
        }
    }
}

#[async_trait]
impl DmxTransport for ArtNetTransport {
    async fn connect(&mut self) -> Result<()> {
        let target: SocketAddr = format!("{}:{}", self.config.ip, self.config.port)
            .parse()
            .map_err(|e| DmxError::TransportOpen(format!("bad art-net target: {e}")))?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| DmxError::TransportOpen(e.to_string()))?;

        if is_broadcast_target(&target) {
            socket
                .set_broadcast(true)
                .map_err(|e| DmxError::TransportOpen(e.to_string()))?;
        }

        info!(
            "art-net output ready: {} universe {}",
            target, self.config.universe
        );
        self.socket = Some(Arc::new(socket));
        self.target = Some(target);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let (Some(socket), Some(target)) = (&self.socket, self.target) {
            let blackout = encode_dmx(self.config.universe, &[0u8; DMX_CHANNELS])?;
            let _ = socket.send_to(&blackout, target).await;
        }
        self.socket = None;
        self.target = None;
        info!("art-net output closed");
        Ok(())
    }

    async fn send(&self, frame: &DmxFrame) -> Result<()> {
        let (Some(socket), Some(target)) = (&self.socket, self.target) else {
            return Err(DmxError::NotConnected);
        };

        let packet = encode_dmx(self.config.universe, frame)?;
        socket.send_to(&packet, target).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}
