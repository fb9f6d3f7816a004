//! Audio output sinks
//!
//! The scheduler hands every accepted buffer to an [`AudioSink`] together with
//! its local start time and playback rate. Sinks render, forward or discard.

use super::scheduler::ScheduledBuffer;
use crate::Result;
use tokio::sync::mpsc;

/// Destination for scheduled audio
pub trait AudioSink: Send {
    /// Queue a buffer for playback at its start time
    fn play(&mut self, buffer: &ScheduledBuffer) -> Result<()>;

    /// Stop every pending buffer
    fn flush(&mut self);

    /// Apply output level (0.0-1.0) and mute
    fn set_volume(&mut self, volume: f32, muted: bool);

    /// Name for logs
    fn name(&self) -> &str;
}

/// Discards audio; used when no output device is configured
#[derive(Debug, Default)]
pub struct NullSink {
    played: u64,
}

impl NullSink {
    /// Create a null sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers accepted so far
    pub fn played(&self) -> u64 {
        self.played
    }
}

impl AudioSink for NullSink {
    fn play(&mut self, _buffer: &ScheduledBuffer) -> Result<()> {
        self.played += 1;
        Ok(())
    }

    fn flush(&mut self) {}

    fn set_volume(&mut self, _volume: f32, _muted: bool) {}

    fn name(&self) -> &str {
        "null"
    }
}

/// What a [`ChannelSink`] observed
#[derive(Debug, Clone)]
pub enum SinkEvent {
    /// A buffer was scheduled
    Play(ScheduledBuffer),
    /// Pending audio was stopped
    Flush,
    /// Output level changed
    Volume {
        /// Level 0.0-1.0
        volume: f32,
        /// Mute flag
        muted: bool,
    },
}

/// Forwards sink calls over a channel, for embedding and tests
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver for its events
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AudioSink for ChannelSink {
    fn play(&mut self, buffer: &ScheduledBuffer) -> Result<()> {
        // A dropped receiver just means nobody is listening
        let _ = self.tx.send(SinkEvent::Play(buffer.clone()));
        Ok(())
    }

    fn flush(&mut self) {
        let _ = self.tx.send(SinkEvent::Flush);
    }

    fn set_volume(&mut self, volume: f32, muted: bool) {
        let _ = self.tx.send(SinkEvent::Volume { volume, muted });
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Convert the 0.0-1.0 level plus mute into a linear gain
pub fn effective_gain(volume: f32, muted: bool) -> f32 {
    if muted {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}
