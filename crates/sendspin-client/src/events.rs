//! Events published to client subscribers

use crate::audio::StreamInfo;
use crate::session::SessionState;
use crate::Error;
use std::fmt;

/// How bad a reported error is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Session continues
    NonFatal,
    /// Session ended
    Fatal,
}

/// Error surfaced to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Severity
    pub severity: Severity,
    /// Description
    pub message: String,
}

impl ErrorReport {
    /// Non-fatal report from an error
    pub fn non_fatal(err: &Error) -> Self {
        Self {
            severity: Severity::NonFatal,
            message: err.to_string(),
        }
    }

    /// Fatal report from an error
    pub fn fatal(err: &Error) -> Self {
        Self {
            severity: Severity::Fatal,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::NonFatal => "error",
            Severity::Fatal => "fatal",
        };
        write!(f, "{}: {}", tag, self.message)
    }
}

/// Everything a UI needs to follow the session
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Lifecycle transition
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// A stream began
    StreamStarted(StreamInfo),
    /// The stream ended
    StreamEnded {
        /// Stream that ended
        stream_id: String,
    },
    /// Buffers were cleared (seek, skip)
    StreamCleared,
    /// Output level changed, locally or by the server
    VolumeChanged {
        /// Level 0.0-1.0
        volume: f32,
        /// Mute flag
        muted: bool,
    },
    /// Clock is synchronized and a stream is active
    AudioReady {
        /// Stream that became playable
        stream_id: String,
    },
    /// Something went wrong
    Error(ErrorReport),
}
