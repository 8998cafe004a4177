//! USB serial DMX output
//!
//! Two wire disciplines behind one transport:
//! - ENTTEC Open (raw FTDI): 250 kbaud 8N2, each frame preceded by a break
//!   and mark-after-break on the line itself
//! - ENTTEC Pro / DMXKing: 8N1 at the configured baud, frames wrapped in the
//!   widget protocol `7E 06 len_lo len_hi 00 <slots> E7`

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio_serial::{DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{info, warn};

use stagecast_core::{DmxFrame, DMX_CHANNELS};

use crate::transport::DmxTransport;
use crate::{DmxError, Result};

/// DMX line rate for ENTTEC Open framing
const DMX_BAUD: u32 = 250_000;
/// Break low time. The async timer stretches this; DMX only sets minimums.
const BREAK: Duration = Duration::from_micros(92);
/// Mark after break
const MARK_AFTER_BREAK: Duration = Duration::from_micros(12);
/// A write still pending after this is abandoned and the frame dropped
const WRITE_TIMEOUT: Duration = Duration::from_millis(50);

const PRO_START: u8 = 0x7E;
const PRO_END: u8 = 0xE7;
const PRO_SEND_DMX: u8 = 0x06;
const DMX_START_CODE: u8 = 0x00;

/// Serial wire discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialProtocol {
    EnttecOpen,
    #[default]
    EnttecPro,
    /// Same widget protocol as the Pro
    DmxKing,
}

/// Serial output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default)]
    pub protocol: SerialProtocol,
    /// Ignored for ENTTEC Open, which always runs at the DMX line rate
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud() -> u32 {
    DMX_BAUD
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            protocol: SerialProtocol::default(),
            baud_rate: default_baud(),
        }
    }
}

/// Frame a universe for the ENTTEC Pro / DMXKing widget protocol.
/// The length field counts the DMX start code plus the 512 slots.
pub fn frame_enttec_pro(data: &DmxFrame) -> Vec<u8> {
    let length = (DMX_CHANNELS + 1) as u16;
    let mut packet = Vec::with_capacity(DMX_CHANNELS + 6);
    packet.push(PRO_START);
    packet.push(PRO_SEND_DMX);
    packet.push((length & 0xff) as u8);
    packet.push((length >> 8) as u8);
    packet.push(DMX_START_CODE);
    packet.extend_from_slice(data);
    packet.push(PRO_END);
    packet
}

/// USB serial transport
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<Arc<AsyncMutex<SerialStream>>>,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self { config, port: None }
    }

    async fn write_frame(&self, port: &mut SerialStream, frame: &DmxFrame) -> io::Result<()> {
        match self.config.protocol {
            SerialProtocol::EnttecOpen => write_open_dmx(port, frame).await,
            SerialProtocol::EnttecPro | SerialProtocol::DmxKing => {
                port.write_all(&frame_enttec_pro(frame)).await
            }
        }
    }
}

/// Raw DMX framing: break, mark-after-break, start code, slots.
async fn write_open_dmx(port: &mut SerialStream, frame: &DmxFrame) -> io::Result<()> {
    port.set_break().map_err(io::Error::other)?;
    tokio::time::sleep(BREAK).await;
    port.clear_break().map_err(io::Error::other)?;
    tokio::time::sleep(MARK_AFTER_BREAK).await;

    let mut packet = Vec::with_capacity(DMX_CHANNELS + 1);
    packet.push(DMX_START_CODE);
    packet.extend_from_slice(frame);
    port.write_all(&packet).await
}

#[async_trait]
impl DmxTransport for SerialTransport {
    async fn connect(&mut self) -> Result<()> {
        let (baud, stop_bits) = match self.config.protocol {
            SerialProtocol::EnttecOpen => (DMX_BAUD, StopBits::Two),
            SerialProtocol::EnttecPro | SerialProtocol::DmxKing => {
                (self.config.baud_rate, StopBits::One)
            }
        };

        let stream = tokio_serial::new(&self.config.port, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(stop_bits)
            .open_native_async()
            .map_err(|e| DmxError::TransportOpen(format!("{}: {e}", self.config.port)))?;

        info!(
            "serial dmx ready: {} ({:?} @ {} baud)",
            self.config.port, self.config.protocol, baud
        );
        self.port = Some(Arc::new(AsyncMutex::new(stream)));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(port) = self.port.take() {
            let mut port = port.lock().await;
            if let Err(e) = self.write_frame(&mut port, &[0u8; DMX_CHANNELS]).await {
                warn!("serial blackout on close failed: {e}");
            }
        }
        info!("serial dmx closed");
        Ok(())
    }

    async fn send(&self, frame: &DmxFrame) -> Result<()> {
        let Some(port) = &self.port else {
            return Err(DmxError::NotConnected);
        };

        let write = async {
            let mut port = port.lock().await;
            self.write_frame(&mut port, frame).await
        };

        match tokio::time::timeout(WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DmxError::Io(e)),
            Err(_) => {
                warn!("serial write exceeded {WRITE_TIMEOUT:?}, frame dropped");
                Ok(())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pro_framing_wraps_the_universe() {
        let mut frame = [0u8; DMX_CHANNELS];
        frame[0] = 11;
        frame[511] = 22;

        let packet = frame_enttec_pro(&frame);

        assert_eq!(packet.len(), DMX_CHANNELS + 6);
        assert_eq!(packet[0], 0x7E);
        assert_eq!(packet[1], 0x06);
        // 513 = start code + slots, LSB first
        assert_eq!(packet[2], 0x01);
        assert_eq!(packet[3], 0x02);
        assert_eq!(packet[4], 0x00);
        assert_eq!(packet[5], 11);
        assert_eq!(packet[5 + 511], 22);
        assert_eq!(packet[packet.len() - 1], 0xE7);
    }

    #[test]
    fn default_config_is_a_pro_widget() {
        let config = SerialConfig::default();
        assert_eq!(config.protocol, SerialProtocol::EnttecPro);
        assert_eq!(config.baud_rate, 250_000);
        assert_eq!(config.port, "/dev/ttyUSB0");
    }

    #[tokio::test]
    async fn send_without_connect_reports_not_connected() {
        let transport = SerialTransport::new(SerialConfig::default());
        let result = transport.send(&[0u8; DMX_CHANNELS]).await;
        assert!(matches!(result, Err(DmxError::NotConnected)));
    }

    #[tokio::test]
    async fn connect_on_a_missing_device_is_transport_open() {
        let mut transport = SerialTransport::new(SerialConfig {
            port: "/dev/stagecast-nonexistent".to_string(),
            ..SerialConfig::default()
        });
        let result = transport.connect().await;
        assert!(matches!(result, Err(DmxError::TransportOpen(_))));
    }
}
