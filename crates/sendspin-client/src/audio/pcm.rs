//! Little-endian integer PCM

use super::decoder::AudioDecoder;
use crate::{Error, Result};
use tracing::trace;

/// Synchronous PCM de-interleaver
#[derive(Debug, Clone)]
pub struct PcmDecoder {
    channels: usize,
    bit_depth: u16,
    sample_rate: u32,
}

impl PcmDecoder {
    /// Create a decoder for 16, 24 or 32-bit samples
    pub fn new(sample_rate: u32, channels: u16, bit_depth: u16) -> Result<Self> {
        if !matches!(bit_depth, 16 | 24 | 32) {
            return Err(Error::UnsupportedCodec(format!(
                "pcm with bit depth {}",
                bit_depth
            )));
        }
        if channels == 0 {
            return Err(Error::UnsupportedCodec("pcm with 0 channels".to_string()));
        }

        Ok(Self {
            channels: channels as usize,
            bit_depth,
            sample_rate,
        })
    }

    fn bytes_per_sample(&self) -> usize {
        self.bit_depth as usize / 8
    }

    fn sample(&self, bytes: &[u8]) -> f32 {
        match self.bit_depth {
            16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
            24 => {
                let raw = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                raw as f32 / 8_388_608.0
            }
            _ => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                    / 2_147_483_648.0
            }
        }
    }
}

impl AudioDecoder for PcmDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<Vec<f32>>> {
        let bps = self.bytes_per_sample();
        let frame_len = bps * self.channels;
        let frames = payload.len() / frame_len;

        if payload.len() % frame_len != 0 {
            trace!(
                extra = payload.len() % frame_len,
                "Truncating partial PCM sample frame"
            );
        }

        let mut planar = vec![Vec::with_capacity(frames); self.channels];
        for frame in payload.chunks_exact(frame_len) {
            for (ch, bytes) in frame.chunks_exact(bps).enumerate() {
                planar[ch].push(self.sample(bytes));
            }
        }

        Ok(planar)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn codec_name(&self) -> &str {
        "pcm"
    }
}
