//! Audio decoding
//!
//! PCM frames are decoded inline on the session task. Opus and generic
//! frames are handed to a worker task that owns the stateful decoder and
//! schedules its output directly.

pub mod decoder;
pub mod opus_decoder;
pub mod pcm;
pub mod pipeline;
pub mod types;

#[cfg(feature = "symphonia-decode")]
pub mod generic;

pub use decoder::{create_decoder, AudioDecoder};
pub use opus_decoder::OpusDecoder;
pub use pcm::PcmDecoder;
pub use pipeline::DecodePipeline;
pub use types::{deinterleave, Codec, DecodedBuffer, StreamInfo};

#[cfg(feature = "symphonia-decode")]
pub use generic::GenericDecoder;
