//! DMX transport contract and config-driven construction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stagecast_core::{DmxFrame, DEFAULT_DMX_FPS};

use crate::artnet::{ArtNetConfig, ArtNetTransport};
use crate::sacn::{SacnConfig, SacnTransport};
use crate::serial::{SerialConfig, SerialTransport};
use crate::Result;

/// Physical DMX output.
///
/// `send` must stay cheap in the common case: UDP is fire-and-forget, serial
/// writes are bounded by a timeout. Whether a dropped frame matters is the
/// engine's call, not the transport's.
#[async_trait]
pub trait DmxTransport: Send + Sync {
    async fn connect(&mut self) -> Result<()>;

    /// Release the device. Implementations transmit one all-zero frame
    /// first so fixtures go dark instead of holding the last look.
    async fn disconnect(&mut self) -> Result<()>;

    /// Transmit one full universe frame.
    async fn send(&self, frame: &DmxFrame) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Which physical output the player drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmxMode {
    #[default]
    Artnet,
    Sacn,
    Usb,
}

/// Umbrella output configuration, one section per driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmxOutputConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: DmxMode,
    /// Output refresh rate, clamped to [1, 60] by the engine
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub artnet: ArtNetConfig,
    #[serde(default)]
    pub sacn: SacnConfig,
    #[serde(default)]
    pub serial: SerialConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_fps() -> u32 {
    DEFAULT_DMX_FPS
}

impl Default for DmxOutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: DmxMode::default(),
            fps: DEFAULT_DMX_FPS,
            artnet: ArtNetConfig::default(),
            sacn: SacnConfig::default(),
            serial: SerialConfig::default(),
        }
    }
}

/// Build the transport selected by `config.mode`.
pub fn create_transport(config: &DmxOutputConfig) -> Box<dyn DmxTransport> {
    match config.mode {
        DmxMode::Artnet => Box::new(ArtNetTransport::new(config.artnet.clone())),
        DmxMode::Sacn => Box::new(SacnTransport::new(config.sacn.clone())),
        DmxMode::Usb => Box::new(SerialTransport::new(config.serial.clone())),
    }
}

/// Loopback transport collecting sent frames; used by engine and player
/// tests instead of real sockets.
#[cfg(any(test, feature = "test-transport"))]
pub mod testing {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct LoopbackTransport {
        sent: Arc<Mutex<Vec<DmxFrame>>>,
        connected: Arc<Mutex<bool>>,
        fail_connect: bool,
    }

    impl LoopbackTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// A transport whose `connect` always fails.
        pub fn failing() -> Self {
            Self {
                fail_connect: true,
                ..Self::default()
            }
        }

        /// Shared handle onto every frame sent so far.
        pub fn sent_frames(&self) -> Arc<Mutex<Vec<DmxFrame>>> {
            self.sent.clone()
        }
    }

    #[async_trait]
    impl DmxTransport for LoopbackTransport {
        async fn connect(&mut self) -> Result<()> {
            if self.fail_connect {
                return Err(crate::DmxError::TransportOpen("loopback refused".into()));
            }
            *self.connected.lock() = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.sent.lock().push([0u8; stagecast_core::DMX_CHANNELS]);
            *self.connected.lock() = false;
            Ok(())
        }

        async fn send(&self, frame: &DmxFrame) -> Result<()> {
            if !self.is_connected() {
                return Err(crate::DmxError::NotConnected);
            }
            self.sent.lock().push(*frame);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            *self.connected.lock()
        }
    }

}
