//! Sendspin wire protocol: JSON control messages and binary audio frames

pub mod frame;
pub mod messages;

pub use frame::{AudioFrame, BinaryFrame, AUDIO_FRAME_TYPE};
pub use messages::{
    AudioFormatSpec, ClientHello, ClientMessage, ClientState, ClientTime, Connected, DeviceInfo,
    PlayerCommand, PlayerCommandKind, PlayerState, PlayerSupport, PlayerSyncState, PlayerUpdate,
    ServerCommand, ServerError, ServerHello, ServerMessage, ServerState, ServerTime, StreamClear,
    StreamEnd, StreamMetadata, StreamPlayerConfig, StreamStart, PLAYER_ROLE, PROTOCOL_VERSION,
};
