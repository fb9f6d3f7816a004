//! Sendspin synchronized audio streaming client
//!
//! Connects to a Sendspin server as a player, keeps a Kalman-filtered
//! estimate of the server clock, decodes the audio stream and schedules every
//! buffer at the local instant matching its server timestamp.
//!
//! # Features
//!
//! - **Session handshake**: `client/hello` / `server/hello` with a grace period
//! - **Clock sync**: NTP-style exchanges filtered into offset, drift and variance
//! - **Codecs**: PCM (16/24/32-bit), Opus, and a symphonia fallback for others
//! - **Drift correction**: none, sample, rate or full resync depending on error
//! - **Reconnection**: linear backoff after abnormal closes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  SendspinClient (handle: connect / disconnect / volume)   │
//! │  ↓ commands                        ↑ ClientEvent (bcast)  │
//! │  Session task                                             │
//! │  ├─ WebSocketTransport (control text / audio binary)     │
//! │  ├─ SessionMachine (handshake, state, server commands)   │
//! │  ├─ SyncEngine → KalmanClock → SharedClock               │
//! │  ├─ DecodePipeline (PCM inline, Opus on a worker task)   │
//! │  └─ ReconnectionSupervisor                                │
//! │     ↓                                                     │
//! │  PlaybackScheduler (drift correction) → AudioSink         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use sendspin_client::ClientConfig;
//!
//! let config = ClientConfig::new("ws://localhost:8927/sendspin");
//! assert!(config.validate().is_ok());
//! assert_eq!(config.reconnect.max_attempts, 5);
//! ```

#![warn(clippy::all)]

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod supervisor;
pub mod sync;
pub mod transport;

// Re-exports for public API
pub use audio::{Codec, DecodedBuffer, StreamInfo};
pub use client::{ClientSnapshot, SendspinClient};
pub use config::{
    load_config, CapabilityConfig, ClientConfig, PlaybackConfig, ReconnectConfig, SyncConfig,
};
pub use error::{Error, Result};
pub use events::{ClientEvent, ErrorReport, Severity};
pub use playback::{AudioSink, ChannelSink, DriftMode, NullSink, SinkEvent};
pub use session::SessionState;
pub use sync::ClockEstimate;

#[cfg(feature = "cpal-output")]
pub use playback::CpalSink;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
