//! Node configuration
//!
//! Loaded once at startup from TOML; nothing here changes while a pipeline
//! runs. Every section and field is optional and falls back to the defaults
//! below.
//!
//! ```toml
//! [audio]
//! sample_rate = 48000
//! channels = 1
//!
//! [tx]
//! ring_blocks = 32
//!
//! [rx]
//! jitter_packets = 8
//! prefill_packets = 4
//! underrun = "silence"
//!
//! [network]
//! udp_port = 3333
//! peer = "192.168.4.2:3333"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::codec::DreqPolicy;
use crate::constants::{
    block_duration_us, BLOCKS_PER_PACKET, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE,
    DEFAULT_UDP_PORT, RX_JITTER_BUFFER_PKTS, TX_RING_BUFFER_BLOCKS,
};
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub tx: TxConfig,
    pub rx: RxConfig,
    pub device: DeviceConfig,
    pub network: NetworkConfig,
}

/// Stream profile shared by both nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

impl AudioConfig {
    pub fn stereo(&self) -> bool {
        self.channels == 2
    }

    /// Time the codec needs to produce one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_micros(block_duration_us(self.sample_rate))
    }

    /// Audio carried by one packet
    pub fn packet_duration(&self) -> Duration {
        self.block_duration() * BLOCKS_PER_PACKET as u32
    }
}

/// Transmit pipeline tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    /// Ring buffer capacity in blocks
    pub ring_blocks: usize,
    /// Wait per block while assembling a packet
    pub block_wait_ms: u64,
    /// Yield between hardware polls
    pub poll_interval_us: u64,
    /// Grace period between clearing the run flag and stopping the device
    pub stop_grace_ms: u64,
    /// Sequence number of the first packet of a run
    pub initial_sequence: u32,
    /// Send a session config packet ahead of the first audio packet
    pub announce_session: bool,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            ring_blocks: TX_RING_BUFFER_BLOCKS,
            block_wait_ms: 20,
            poll_interval_us: 1_000,
            stop_grace_ms: 100,
            initial_sequence: 0,
            announce_session: true,
        }
    }
}

impl TxConfig {
    pub fn block_wait(&self) -> Duration {
        Duration::from_millis(self.block_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// What the playback task feeds the codec when the jitter queue runs dry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnderrunPolicy {
    /// Write nothing; the codec drains what it already has
    #[default]
    Skip,
    /// Write one packet worth of silent blocks
    Silence,
}

/// Receive pipeline tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RxConfig {
    /// Jitter queue capacity in packets
    pub jitter_packets: usize,
    /// Wait for the next packet, roughly one packet interval
    pub packet_wait_ms: u64,
    /// Packets buffered before playback starts, and again after each
    /// underrun. 0 plays the first packet as soon as it arrives.
    pub prefill_packets: usize,
    pub stop_grace_ms: u64,
    pub underrun: UnderrunPolicy,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            jitter_packets: RX_JITTER_BUFFER_PKTS,
            packet_wait_ms: 50,
            prefill_packets: 0,
            stop_grace_ms: 100,
            underrun: UnderrunPolicy::Skip,
        }
    }
}

impl RxConfig {
    pub fn packet_wait(&self) -> Duration {
        Duration::from_millis(self.packet_wait_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Codec handshake tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub dreq_attempts: u32,
    pub dreq_interval_ms: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let policy = DreqPolicy::default();
        Self {
            dreq_attempts: policy.attempts,
            dreq_interval_ms: policy.interval_ms,
        }
    }
}

impl DeviceConfig {
    pub fn dreq_policy(&self) -> DreqPolicy {
        DreqPolicy {
            attempts: self.dreq_attempts,
            interval_ms: self.dreq_interval_ms,
        }
    }
}

/// UDP transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: IpAddr,
    pub udp_port: u16,
    /// Where the sender streams to
    pub peer: Option<SocketAddr>,
    pub broadcast: bool,
    /// Poll timeout of one receive call
    pub recv_timeout_ms: u64,
    /// Kernel socket buffer size
    pub socket_buffer_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_port: DEFAULT_UDP_PORT,
            peer: None,
            broadcast: false,
            recv_timeout_ms: 10,
            socket_buffer_bytes: 64 * 1024,
        }
    }
}

impl NetworkConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.udp_port)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

impl AppConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Per-user config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("net", "meshnet", "meshnet-audio")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the per-user config file, or defaults when there is none
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(8_000..=48_000).contains(&self.audio.sample_rate) {
            return Err(Error::Config(format!(
                "sample_rate {} outside 8000..=48000",
                self.audio.sample_rate
            )));
        }
        if !(1..=2).contains(&self.audio.channels) {
            return Err(Error::Config(format!(
                "channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }
        if self.tx.ring_blocks < BLOCKS_PER_PACKET {
            return Err(Error::Config(format!(
                "tx.ring_blocks must hold at least one packet ({} blocks)",
                BLOCKS_PER_PACKET
            )));
        }
        if self.rx.jitter_packets == 0 {
            return Err(Error::Config("rx.jitter_packets must be non-zero".into()));
        }
        if self.rx.prefill_packets > self.rx.jitter_packets {
            return Err(Error::Config(format!(
                "rx.prefill_packets ({}) exceeds rx.jitter_packets ({})",
                self.rx.prefill_packets, self.rx.jitter_packets
            )));
        }
        if self.tx.block_wait_ms == 0 || self.rx.packet_wait_ms == 0 {
            return Err(Error::Config("wait timeouts must be non-zero".into()));
        }
        if self.device.dreq_attempts == 0 {
            return Err(Error::Config("device.dreq_attempts must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.tx.ring_blocks, 32);
        assert_eq!(config.rx.jitter_packets, 8);
        assert_eq!(config.rx.prefill_packets, 0);
        assert_eq!(config.device.dreq_policy(), DreqPolicy::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [audio]
            channels = 2

            [rx]
            underrun = "silence"

            [network]
            peer = "10.0.0.2:3333"
            "#,
        )
        .unwrap();

        assert!(config.audio.stereo());
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.rx.underrun, UnderrunPolicy::Silence);
        assert_eq!(config.rx.jitter_packets, 8);
        assert_eq!(config.network.peer, Some("10.0.0.2:3333".parse().unwrap()));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            AppConfig::from_toml("[audio]\nchannels = 3\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[tx]\nring_blocks = 1\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[rx]\njitter_packets = 4\nprefill_packets = 5\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[audio]\nsample_rate = \"fast\"\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AppConfig::default();
        config.network.peer = Some("192.168.4.2:3333".parse().unwrap());
        config.rx.underrun = UnderrunPolicy::Silence;

        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_packet_duration() {
        let audio = AudioConfig::default();
        assert_eq!(audio.block_duration(), Duration::from_micros(5_333));
        assert_eq!(audio.packet_duration(), Duration::from_micros(10_666));
    }
}
