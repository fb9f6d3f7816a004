//! Session lifecycle states

use serde::Serialize;
use std::fmt;

/// Lifecycle of one session
///
/// ```text
/// disconnected → connecting → authenticating → ready → syncing → streaming
///        ↑______________________________________________________________|
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No socket
    Disconnected,
    /// Socket opening
    Connecting,
    /// Hello sent, waiting for the server's
    Authenticating,
    /// Handshake complete
    Ready,
    /// Clock sync running, no stream
    Syncing,
    /// Stream active
    Streaming,
}

impl SessionState {
    /// True once the handshake completed
    pub fn is_established(&self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Syncing | SessionState::Streaming
        )
    }

    /// Check if a transition is allowed
    ///
    /// Any state may drop to `Disconnected`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Authenticating) => true,
            (Authenticating, Ready) => true,
            (Ready, Syncing) => true,
            (Ready | Syncing, Streaming) => true,
            (Streaming, Syncing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Syncing => "syncing",
            SessionState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}
