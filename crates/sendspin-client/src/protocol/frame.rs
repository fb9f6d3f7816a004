//! Binary audio frame codec
//!
//! ```text
//! ┌──────────┬────────────────────────────┬──────────────────┐
//! │ type: u8 │ timestamp: u64 BE (µs)      │ codec payload... │
//! └──────────┴────────────────────────────┴──────────────────┘
//! ```

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame type tag for audio data
pub const AUDIO_FRAME_TYPE: u8 = 4;

/// Size of the type tag plus timestamp
pub const FRAME_HEADER_LEN: usize = 9;

/// Binary message received on the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryFrame {
    /// Timestamped codec payload
    Audio(AudioFrame),
    /// A frame type this client does not play (artwork, visualizer data)
    Other {
        /// Frame type tag
        frame_type: u8,
    },
}

/// One unit of timestamped, codec-encoded audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Server clock playback time in microseconds, at most `i64::MAX`
    pub timestamp_us: u64,
    /// Encoded payload
    pub payload: Bytes,
}

impl BinaryFrame {
    /// Parse a binary WebSocket message
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(Error::InvalidFrame(format!(
                "frame is {} bytes, header needs {}",
                data.len(),
                FRAME_HEADER_LEN
            )));
        }

        let mut data = data;
        let frame_type = data.get_u8();
        if frame_type != AUDIO_FRAME_TYPE {
            return Ok(BinaryFrame::Other { frame_type });
        }

        let timestamp_us = data.get_u64();
        if timestamp_us > i64::MAX as u64 {
            return Err(Error::InvalidFrame(format!(
                "timestamp {} exceeds the signed microsecond range",
                timestamp_us
            )));
        }
        Ok(BinaryFrame::Audio(AudioFrame {
            timestamp_us,
            payload: data,
        }))
    }
}

impl AudioFrame {
    /// Encode into the binary wire layout
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u8(AUDIO_FRAME_TYPE);
        buf.put_u64(self.timestamp_us);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
