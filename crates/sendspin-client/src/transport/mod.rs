//! Session transport

pub mod websocket;

pub use websocket::WebSocketTransport;

use crate::protocol::{AudioFrame, ServerMessage};
use crate::Error;

/// Close code for an orderly shutdown
pub const NORMAL_CLOSE: u16 = 1000;

/// Close code reported when the socket dropped without a close frame
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Why and how the socket closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code
    pub code: u16,
    /// Close reason
    pub reason: String,
}

impl CloseInfo {
    /// Create close info
    pub fn new(code: u16, reason: &str) -> Self {
        Self {
            code,
            reason: reason.to_string(),
        }
    }

    /// Only code 1000 is a normal close
    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSE
    }

    /// Error form of an abnormal close
    pub fn to_error(&self) -> Error {
        Error::AbnormalClose {
            code: self.code,
            reason: self.reason.clone(),
        }
    }
}

/// One arrival on the session
#[derive(Debug)]
pub enum TransportEvent {
    /// Parsed control message
    Control(ServerMessage),
    /// Audio frame
    Audio(AudioFrame),
    /// Text or binary message that could not be parsed
    Malformed(Error),
    /// Socket closed; always the last event
    Closed(CloseInfo),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_classification() {
        assert!(CloseInfo::new(1000, "bye").is_normal());
        assert!(!CloseInfo::new(1001, "going away").is_normal());
        assert!(!CloseInfo::new(ABNORMAL_CLOSE, "dropped").is_normal());
    }

    #[test]
    fn test_abnormal_close_is_retryable() {
        let err = CloseInfo::new(1011, "server error").to_error();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("1011"));
    }
}
