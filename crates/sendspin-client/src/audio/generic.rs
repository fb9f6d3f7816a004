//! Best-effort decoding of container codecs through symphonia
//!
//! Each frame is format-detected on its own with the stream's codec header
//! prepended, so codecs whose frames are self-describing once the header is known
//! (FLAC with its STREAMINFO block) decode without extra state.

use super::decoder::AudioDecoder;
use super::types::deinterleave;
use crate::{Error, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Symphonia-backed decoder for codecs without a dedicated path
pub struct GenericDecoder {
    codec: String,
    sample_rate: u32,
    header: Option<Vec<u8>>,
}

impl GenericDecoder {
    /// Create a decoder for a named codec
    pub fn new(codec: &str, sample_rate: u32, header: Option<Vec<u8>>) -> Self {
        Self {
            codec: codec.to_string(),
            sample_rate,
            header,
        }
    }
}

impl AudioDecoder for GenericDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<Vec<f32>>> {
        let mut data = self.header.clone().unwrap_or_default();
        data.extend_from_slice(payload);

        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());
        let mut hint = Hint::new();
        hint.with_extension(&self.codec);

        let detected = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::DecodingError(format!("{} format detection failed: {}", self.codec, e)))?;

        let mut format = detected.format;
        let track = format
            .default_track()
            .ok_or_else(|| Error::DecodingError(format!("{} frame has no track", self.codec)))?;
        let track_id = track.id;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .unwrap_or(2);
        if let Some(rate) = track.codec_params.sample_rate {
            self.sample_rate = rate;
        }

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::UnsupportedCodec(format!("{}: {}", self.codec, e)))?;

        let mut samples: Vec<f32> = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(Error::DecodingError(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = decoder
                .decode(&packet)
                .map_err(|e| Error::DecodingError(e.to_string()))?;
            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        Ok(deinterleave(&samples, channels))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn codec_name(&self) -> &str {
        &self.codec
    }
}
