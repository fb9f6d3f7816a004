//! Decoder trait and per-stream decoder selection

use super::types::{Codec, StreamInfo};
use super::{opus_decoder::OpusDecoder, pcm::PcmDecoder};
use crate::Result;

/// Converts one encoded frame payload into planar f32 samples
pub trait AudioDecoder: Send {
    /// Decode a frame payload (without the binary frame header)
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<Vec<f32>>>;

    /// Output sample rate
    fn sample_rate(&self) -> u32;

    /// Codec name for logs
    fn codec_name(&self) -> &str;
}

/// Build the decoder for a stream
pub fn create_decoder(info: &StreamInfo) -> Result<Box<dyn AudioDecoder>> {
    match &info.codec {
        Codec::Pcm => Ok(Box::new(PcmDecoder::new(
            info.sample_rate,
            info.channels,
            info.bit_depth,
        )?)),
        Codec::Opus => Ok(Box::new(OpusDecoder::new(info.sample_rate, info.channels)?)),
        #[cfg(feature = "symphonia-decode")]
        Codec::Generic(name) => Ok(Box::new(super::generic::GenericDecoder::new(
            name,
            info.sample_rate,
            info.codec_header.clone(),
        ))),
        #[cfg(not(feature = "symphonia-decode"))]
        Codec::Generic(name) => Err(crate::Error::UnsupportedCodec(format!(
            "{} (enable the symphonia-decode feature)",
            name
        ))),
    }
}

/// True when frames of this codec are decoded on the worker task
pub fn is_async_codec(codec: &Codec) -> bool {
    !matches!(codec, Codec::Pcm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn info(codec: Codec, bit_depth: u16) -> StreamInfo {
        StreamInfo {
            stream_id: "s1".to_string(),
            codec,
            sample_rate: 48_000,
            channels: 2,
            bit_depth,
            codec_header: None,
            duration: None,
            metadata: None,
        }
    }

    #[test]
    fn test_create_pcm_decoder() {
        let decoder = create_decoder(&info(Codec::Pcm, 16)).unwrap();
        assert_eq!(decoder.codec_name(), "pcm");
        assert_eq!(decoder.sample_rate(), 48_000);
    }

    #[test]
    fn test_create_opus_decoder() {
        let decoder = create_decoder(&info(Codec::Opus, 16)).unwrap();
        assert_eq!(decoder.codec_name(), "opus");
    }

    #[test]
    fn test_pcm_bad_bit_depth_fails() {
        assert!(create_decoder(&info(Codec::Pcm, 12)).is_err());
    }

    #[cfg(not(feature = "symphonia-decode"))]
    #[test]
    fn test_generic_without_feature_is_unsupported() {
        let err = create_decoder(&info(Codec::Generic("flac".to_string()), 16)).err().unwrap();
        assert!(matches!(err, Error::UnsupportedCodec(_)));
    }

    #[test]
    fn test_async_codecs() {
        assert!(!is_async_codec(&Codec::Pcm));
        assert!(is_async_codec(&Codec::Opus));
        assert!(is_async_codec(&Codec::Generic("flac".to_string())));
    }
}
