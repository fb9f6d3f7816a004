//! Sendspin control message types
//!
//! Every control message travels as a JSON text frame of the form
//! `{"type": "<kind>", "payload": {...}}`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Protocol version announced in `client/hello`
pub const PROTOCOL_VERSION: u32 = 1;

/// Role this client registers for
pub const PLAYER_ROLE: &str = "player@v1";

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Identity and capability declaration
    #[serde(rename = "client/hello")]
    Hello(ClientHello),

    /// Playback readiness and volume/mute state
    #[serde(rename = "client/state")]
    State(ClientState),

    /// Clock synchronization request
    #[serde(rename = "client/time")]
    Time(ClientTime),
}

impl ClientMessage {
    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Hello(_) => "client/hello",
            ClientMessage::State(_) => "client/state",
            ClientMessage::Time(_) => "client/time",
        }
    }
}

/// Payload of `client/hello`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientHello {
    /// Persistent client identifier
    pub client_id: String,

    /// Human-readable client name
    pub name: String,

    /// Protocol version
    pub version: u32,

    /// Roles this client can take (e.g. `player@v1`)
    pub supported_roles: Vec<String>,

    /// Optional device description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,

    /// Player capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_support: Option<PlayerSupport>,
}

/// Device description sent with the handshake
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    /// Product name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,

    /// Manufacturer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    /// Software version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
}

/// Player role capabilities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSupport {
    /// Formats the client can play
    pub supported_formats: Vec<AudioFormatSpec>,

    /// Buffer capacity in milliseconds of audio
    pub buffer_capacity: u32,

    /// Runtime commands the client honours (`volume`, `mute`)
    pub supported_commands: Vec<String>,
}

/// One playable {codec, channels, sample_rate, bit_depth} tuple
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormatSpec {
    /// Codec name (`pcm`, `opus`, `flac`)
    pub codec: String,

    /// Channel count
    pub channels: u16,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Bits per sample
    pub bit_depth: u16,
}

/// Payload of `client/state`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientState {
    /// Player role state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerState>,
}

/// Player readiness and output level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerState {
    /// Readiness
    pub state: PlayerSyncState,

    /// Volume 0-100
    pub volume: u8,

    /// Mute flag
    pub muted: bool,
}

/// Playback readiness reported to the server
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlayerSyncState {
    /// Ready to play in sync
    Synchronized,
    /// Player cannot play
    Error,
}

/// Payload of `client/time`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientTime {
    /// Local monotonic time in microseconds when the request was sent
    pub client_transmitted: i64,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Counter-handshake
    #[serde(rename = "server/hello")]
    Hello(ServerHello),

    /// Clock synchronization response
    #[serde(rename = "server/time")]
    Time(ServerTime),

    /// A new stream begins
    #[serde(rename = "stream/start")]
    StreamStart(StreamStart),

    /// The active stream ended
    #[serde(rename = "stream/end")]
    StreamEnd(StreamEnd),

    /// Discard buffered audio (seek)
    #[serde(rename = "stream/clear")]
    StreamClear(StreamClear),

    /// Player state pushed by the server
    #[serde(rename = "server/state")]
    State(ServerState),

    /// Player command
    #[serde(rename = "server/command")]
    Command(ServerCommand),

    /// Error report
    #[serde(rename = "server/error")]
    Error(ServerError),

    /// Simplified deployments: handshake and registration in one message
    #[serde(rename = "connected")]
    Connected(Connected),
}

/// Untyped envelope used to dispatch on `type` before decoding the payload
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl ServerMessage {
    /// Parse a JSON text frame
    ///
    /// Returns `Ok(None)` for message types this client does not handle.
    /// Malformed JSON or a bad payload for a known type is an error.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| Error::ProtocolViolation(format!("Malformed control message: {}", e)))?;

        // Messages without a payload decode as empty objects so that payload
        // structs with defaulted fields still parse.
        let payload = match envelope.payload {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };

        fn decode<T: serde::de::DeserializeOwned>(
            kind: &str,
            payload: serde_json::Value,
        ) -> Result<T> {
            serde_json::from_value(payload)
                .map_err(|e| Error::ProtocolViolation(format!("Invalid {} payload: {}", kind, e)))
        }

        let kind = envelope.kind.as_str();
        let message = match kind {
            "server/hello" => ServerMessage::Hello(decode(kind, payload)?),
            "server/time" => ServerMessage::Time(decode(kind, payload)?),
            "stream/start" => ServerMessage::StreamStart(decode(kind, payload)?),
            "stream/end" => ServerMessage::StreamEnd(decode(kind, payload)?),
            "stream/clear" => ServerMessage::StreamClear(decode(kind, payload)?),
            "server/state" => ServerMessage::State(decode(kind, payload)?),
            "server/command" => ServerMessage::Command(decode(kind, payload)?),
            "server/error" => ServerMessage::Error(decode(kind, payload)?),
            "connected" => ServerMessage::Connected(decode(kind, payload)?),
            _ => return Ok(None),
        };

        Ok(Some(message))
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload of `server/hello`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerHello {
    /// Server identifier
    pub server_id: String,

    /// Human-readable server name
    pub name: String,

    /// Protocol version spoken by the server
    #[serde(default)]
    pub version: u32,

    /// Roles the server activated for this client
    #[serde(default)]
    pub active_roles: Vec<String>,
}

/// Payload of `server/time`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerTime {
    /// Echo of the request's `client_transmitted`
    pub client_transmitted: i64,

    /// Server clock when the request arrived (µs)
    pub server_received: i64,

    /// Server clock when the response left (µs)
    pub server_transmitted: i64,
}

/// Payload of `stream/start`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamStart {
    /// Stream identifier (generated locally when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,

    /// Audio format for the player role
    pub player: StreamPlayerConfig,

    /// Track duration in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Media metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StreamMetadata>,
}

/// Audio format of a stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamPlayerConfig {
    /// Codec name
    pub codec: String,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count
    pub channels: u16,

    /// Bits per sample
    pub bit_depth: u16,

    /// Base64 codec header (Opus head, FLAC STREAMINFO)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_header: Option<String>,
}

/// Media metadata attached to a stream
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamMetadata {
    /// Track title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Artist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    /// Album
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,

    /// Artwork URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
}

/// Payload of `stream/end`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamEnd {
    /// Roles whose stream ended
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Payload of `stream/clear`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamClear {
    /// Roles whose buffers should be cleared
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Payload of `server/state`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerState {
    /// Player volume/mute update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerUpdate>,
}

/// Partial volume/mute update
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerUpdate {
    /// New volume 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,

    /// New mute flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

/// Payload of `server/command`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerCommand {
    /// Player command
    pub player: PlayerCommand,
}

/// Player command
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerCommand {
    /// Which command
    pub command: PlayerCommandKind,

    /// Volume for `volume`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,

    /// Mute flag for `mute`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
}

/// Supported player commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlayerCommandKind {
    /// Set volume
    Volume,
    /// Set mute
    Mute,
}

/// Payload of `server/error`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerError {
    /// Machine-readable code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Description
    pub message: String,
}

/// Payload of `connected`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connected {
    /// Client id assigned by the gateway
    pub client_id: String,

    /// Whether the gateway authenticated the client
    #[serde(default)]
    pub authenticated: bool,

    /// Whether the client is registered with the server
    #[serde(default)]
    pub registered: bool,
}
