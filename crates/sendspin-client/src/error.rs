//! Error types for the Sendspin client

/// Result type alias using the client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a Sendspin session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket error (connect, send or receive)
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// Connection closed by the peer with an abnormal close code
    #[error("Connection closed abnormally (code {code}): {reason}")]
    AbnormalClose {
        /// WebSocket close code, 1006 when the socket dropped without a close frame
        code: u16,
        /// Close reason sent by the server, if any
        reason: String,
    },

    /// Operation requires an open session
    #[error("Not connected")]
    NotConnected,

    /// Server broke the handshake or sent an unusable control message
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Malformed binary frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Codec the pipeline cannot decode
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Media decoding error
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Audio output device error
    #[error("Audio output error: {0}")]
    AudioOutputError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should be handed to the reconnection supervisor
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::WebSocketError(_)
                | Error::OperationTimeout(_)
                | Error::AbnormalClose { .. }
                | Error::IoError(_)
        )
    }

    /// Check if this error only affects a single audio frame
    ///
    /// Frame-level errors drop the frame and never end the session.
    pub fn is_frame_level(&self) -> bool {
        matches!(
            self,
            Error::InvalidFrame(_) | Error::UnsupportedCodec(_) | Error::DecodingError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocketError(err.to_string())
    }
}
