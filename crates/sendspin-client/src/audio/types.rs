//! Stream description and decoded audio buffers

use crate::protocol::{StreamMetadata, StreamStart};
use crate::{Error, Result};
use base64::Engine as _;
use std::fmt;
use std::time::Duration;

/// Codec of the active stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    /// Raw little-endian integer PCM
    Pcm,
    /// Opus packets
    Opus,
    /// Anything else, decoded best effort (`flac`, ...)
    Generic(String),
}

impl Codec {
    /// Map a wire codec name
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "pcm" => Codec::Pcm,
            "opus" => Codec::Opus,
            other => Codec::Generic(other.to_string()),
        }
    }

    /// Wire codec name
    pub fn name(&self) -> &str {
        match self {
            Codec::Pcm => "pcm",
            Codec::Opus => "opus",
            Codec::Generic(name) => name,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Format and metadata of the live stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Stream identifier
    pub stream_id: String,
    /// Codec
    pub codec: Codec,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Bits per sample
    pub bit_depth: u16,
    /// Decoded codec header
    pub codec_header: Option<Vec<u8>>,
    /// Track duration
    pub duration: Option<Duration>,
    /// Media metadata
    pub metadata: Option<StreamMetadata>,
}

impl StreamInfo {
    /// Build from a `stream/start` payload
    ///
    /// A missing stream id is generated locally. An undecodable codec header
    /// or a zero rate/channel count is a protocol violation.
    pub fn from_start(start: &StreamStart) -> Result<Self> {
        let player = &start.player;

        if player.sample_rate == 0 || player.channels == 0 {
            return Err(Error::ProtocolViolation(format!(
                "stream/start with sample_rate {} and channels {}",
                player.sample_rate, player.channels
            )));
        }

        let codec_header = player
            .codec_header
            .as_deref()
            .map(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| Error::ProtocolViolation(format!("invalid codec_header: {}", e)))
            })
            .transpose()?;

        Ok(Self {
            stream_id: start
                .stream_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            codec: Codec::from_name(&player.codec),
            sample_rate: player.sample_rate,
            channels: player.channels,
            bit_depth: player.bit_depth,
            codec_header,
            duration: start.duration_ms.map(Duration::from_millis),
            metadata: start.metadata.clone(),
        })
    }
}

/// Planar f32 samples tagged with their server timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    /// One Vec per channel, all the same length
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Server clock play time of the first sample
    pub server_timestamp_us: i64,
}

impl DecodedBuffer {
    /// Create a buffer
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32, server_timestamp_us: i64) -> Self {
        Self {
            channels,
            sample_rate,
            server_timestamp_us,
        }
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample frames
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// True when the buffer holds no samples
    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration at 1x in microseconds
    pub fn duration_us(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as i64 * 1_000_000) / self.sample_rate as i64
    }

    /// Interleave channels for output devices
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * self.channel_count());
        for i in 0..frames {
            for channel in &self.channels {
                out.push(channel.get(i).copied().unwrap_or(0.0));
            }
        }
        out
    }
}

/// Split interleaved samples into planar channels
pub fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }
    planar
}
