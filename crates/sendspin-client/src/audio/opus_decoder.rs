//! Opus decoding

use super::decoder::AudioDecoder;
use super::types::deinterleave;
use crate::{Error, Result};

/// Largest Opus frame: 120ms at 48kHz
const MAX_FRAME_SIZE: usize = 5760;

/// Stateful Opus decoder
pub struct OpusDecoder {
    decoder: opus::Decoder,
    sample_rate: u32,
    channels: usize,
}

// SAFETY: the libopus decoder state is only reached through `&mut self` and
// each instance is owned by a single worker task.
unsafe impl Send for OpusDecoder {}

impl OpusDecoder {
    /// Create a decoder for 1 or 2 channels
    ///
    /// Opus decodes at 8, 12, 16, 24 or 48 kHz; any other stream rate is
    /// decoded at 48 kHz.
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        let opus_channels = match channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            n => {
                return Err(Error::UnsupportedCodec(format!(
                    "opus with {} channels (1 or 2 supported)",
                    n
                )))
            }
        };

        let sample_rate = match sample_rate {
            8_000 | 12_000 | 16_000 | 24_000 | 48_000 => sample_rate,
            _ => 48_000,
        };

        let decoder = opus::Decoder::new(sample_rate, opus_channels).map_err(|e| {
            Error::DecodingError(format!("Failed to create Opus decoder: {:?}", e))
        })?;

        Ok(Self {
            decoder,
            sample_rate,
            channels: channels as usize,
        })
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<Vec<f32>>> {
        let mut output = vec![0f32; MAX_FRAME_SIZE * self.channels];

        let len = self
            .decoder
            .decode_float(payload, &mut output, false)
            .map_err(|e| Error::DecodingError(format!("Opus decoding failed: {:?}", e)))?;

        output.truncate(len * self.channels);
        Ok(deinterleave(&output, self.channels))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn codec_name(&self) -> &str {
        "opus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_decoder_creation() {
        let decoder = OpusDecoder::new(48_000, 2).unwrap();
        assert_eq!(decoder.sample_rate(), 48_000);
    }

    #[test]
    fn test_unsupported_rate_falls_back_to_48k() {
        let decoder = OpusDecoder::new(44_100, 1).unwrap();
        assert_eq!(decoder.sample_rate(), 48_000);
    }

    #[test]
    fn test_too_many_channels() {
        assert!(OpusDecoder::new(48_000, 6).is_err());
    }

    #[test]
    fn test_roundtrip_with_encoder() {
        let mut encoder =
            opus::Encoder::new(48_000, opus::Channels::Stereo, opus::Application::Audio).unwrap();
        let pcm: Vec<f32> = (0..960 * 2)
            .map(|i| ((i / 2) as f32 * 0.05).sin() * 0.3)
            .collect();
        let mut packet = vec![0u8; 4000];
        let len = encoder.encode_float(&pcm, &mut packet).unwrap();
        packet.truncate(len);

        let mut decoder = OpusDecoder::new(48_000, 2).unwrap();
        let planar = decoder.decode(&packet).unwrap();
        assert_eq!(planar.len(), 2);
        assert_eq!(planar[0].len(), 960);
    }

    #[test]
    fn test_invalid_packet_is_decoding_error() {
        let mut decoder = OpusDecoder::new(48_000, 2).unwrap();
        // Code 3 packet declaring zero frames
        let err = decoder.decode(&[0x03, 0x00]).unwrap_err();
        assert!(err.is_frame_level());
    }
}
