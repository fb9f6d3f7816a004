//! Configuration types for the Sendspin client
//!
//! Configuration is read from `client.toml` in the platform config directory
//! (or an explicit path) and falls back to defaults for anything missing.

use crate::protocol::AudioFormatSpec;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a `SendspinClient`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the Sendspin server (ws:// or wss://)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Human-readable client name
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Client id override (the persisted id is used when None)
    #[serde(default)]
    pub client_id: Option<String>,

    /// Hard timeout for the WebSocket connect (default: 10000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Time to wait for `server/hello` before treating the session as usable
    /// anyway (default: 5000ms)
    #[serde(default = "default_handshake_grace_ms")]
    pub handshake_grace_ms: u64,

    /// Deadline for answering `server/hello` with `client/state` (default: 5000ms)
    #[serde(default = "default_state_ack_deadline_ms")]
    pub state_ack_deadline_ms: u64,

    /// Clock synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Playback scheduling settings
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Reconnection settings
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Capabilities declared in `client/hello`
    #[serde(default)]
    pub capabilities: CapabilityConfig,
}

/// Clock synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between time requests (default: 5000ms)
    pub interval_ms: u64,

    /// Kalman process noise Q (default: 100)
    pub process_noise: f64,

    /// Kalman measurement noise R (default: 10000)
    pub measurement_noise: f64,

    /// Variance of a fresh estimate (default: 1_000_000)
    pub initial_variance: f64,

    /// Outstanding time requests older than this are discarded (default: 30000ms)
    pub request_ttl_ms: u64,
}

/// Playback scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Lead time for the first buffer after a stream start or resync (default: 500ms)
    pub buffer_ahead_ms: u64,

    /// Minimum distance between now and any scheduled start (default: 10ms)
    pub schedule_epsilon_ms: u64,

    /// Interval of the finished-buffer purge tick (default: 100ms)
    pub purge_interval_ms: u64,

    /// Initial volume, 0.0-1.0 (default: 1.0)
    pub initial_volume: f32,

    /// Initial mute flag (default: false)
    pub initial_muted: bool,
}

/// Reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum automatic reconnect attempts (default: 5)
    pub max_attempts: u32,

    /// Base backoff delay, multiplied by min(attempt, 3) (default: 2000ms)
    pub base_delay_ms: u64,
}

/// Capabilities declared during the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Playable formats, in order of preference
    pub supported_formats: Vec<AudioFormatSpec>,

    /// Buffer capacity in milliseconds announced to the server
    pub buffer_capacity_ms: u32,

    /// Product name sent as device info
    pub product_name: Option<String>,

    /// Manufacturer sent as device info
    pub manufacturer: Option<String>,
}

fn default_server_url() -> String {
    "ws://localhost:8927/sendspin".to_string()
}

fn default_client_name() -> String {
    "Sendspin Player".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_handshake_grace_ms() -> u64 {
    5_000
}

fn default_state_ack_deadline_ms() -> u64 {
    5_000
}

fn format(codec: &str, channels: u16, sample_rate: u32, bit_depth: u16) -> AudioFormatSpec {
    AudioFormatSpec {
        codec: codec.to_string(),
        channels,
        sample_rate,
        bit_depth,
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            client_name: default_client_name(),
            client_id: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_grace_ms: default_handshake_grace_ms(),
            state_ack_deadline_ms: default_state_ack_deadline_ms(),
            sync: SyncConfig::default(),
            playback: PlaybackConfig::default(),
            reconnect: ReconnectConfig::default(),
            capabilities: CapabilityConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            process_noise: 100.0,
            measurement_noise: 10_000.0,
            initial_variance: 1_000_000.0,
            request_ttl_ms: 30_000,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_ahead_ms: 500,
            schedule_epsilon_ms: 10,
            purge_interval_ms: 100,
            initial_volume: 1.0,
            initial_muted: false,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
        }
    }
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        let mut supported_formats = vec![
            format("opus", 2, 48_000, 16),
            format("pcm", 2, 48_000, 16),
            format("pcm", 2, 44_100, 16),
            format("pcm", 2, 48_000, 24),
        ];
        if cfg!(feature = "symphonia-decode") {
            supported_formats.push(format("flac", 2, 48_000, 16));
            supported_formats.push(format("flac", 2, 44_100, 16));
        }

        Self {
            supported_formats,
            buffer_capacity_ms: 2_000,
            product_name: None,
            manufacturer: None,
        }
    }
}

impl ClientConfig {
    /// Create a config for a server URL with defaults for everything else
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Handshake grace period as a Duration
    pub fn handshake_grace(&self) -> Duration {
        Duration::from_millis(self.handshake_grace_ms)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `server_url` is not a ws:// or wss:// URL
    /// - `client_name` is empty
    /// - any timeout or interval is zero
    /// - Kalman noise constants are not positive
    /// - `initial_volume` is outside 0.0-1.0
    /// - no supported format is declared
    pub fn validate(&self) -> Result<()> {
        if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "server_url must start with ws:// or wss://, got {}",
                self.server_url
            )));
        }

        if self.client_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "client_name must not be empty".to_string(),
            ));
        }

        if self.connect_timeout_ms == 0 || self.handshake_grace_ms == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_ms and handshake_grace_ms must be non-zero".to_string(),
            ));
        }

        if self.sync.interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "sync.interval_ms must be non-zero".to_string(),
            ));
        }

        if self.sync.process_noise <= 0.0
            || self.sync.measurement_noise <= 0.0
            || self.sync.initial_variance <= 0.0
        {
            return Err(Error::InvalidConfig(
                "Kalman noise constants and initial variance must be positive".to_string(),
            ));
        }

        if self.playback.purge_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "playback.purge_interval_ms must be non-zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.playback.initial_volume) {
            return Err(Error::InvalidConfig(format!(
                "playback.initial_volume must be in range 0.0-1.0, got {}",
                self.playback.initial_volume
            )));
        }

        if self.capabilities.supported_formats.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one supported format is required".to_string(),
            ));
        }

        Ok(())
    }
}

/// Platform config directory for the client
pub fn config_dir() -> PathBuf {
    directories::ProjectDirs::from("io", "sendspin", "sendspin-client")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| {
            directories::BaseDirs::new()
                .map(|d| d.home_dir().join(".sendspin"))
                .unwrap_or_else(|| PathBuf::from(".").join(".sendspin"))
        })
}

/// Load configuration from file or defaults
///
/// With no explicit path, `client.toml` in [`config_dir`] is used. A missing
/// file yields the default configuration.
pub fn load_config(custom_path: Option<&Path>) -> Result<ClientConfig> {
    let config_path = match custom_path {
        Some(path) => path.to_path_buf(),
        None => config_dir().join("client.toml"),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        let config: ClientConfig = toml::from_str(&content).map_err(|e| {
            Error::InvalidConfig(format!("{}: {}", config_path.display(), e))
        })?;
        Ok(config)
    } else {
        Ok(ClientConfig::default())
    }
}
