//! Playback scheduling and audio output

pub mod drift;
pub mod scheduler;
pub mod sink;

#[cfg(feature = "cpal-output")]
pub mod cpal_sink;

pub use drift::{select_mode, DriftCorrection, DriftMode};
pub use scheduler::{
    PlaybackScheduler, ScheduleOutcome, ScheduledBuffer, SchedulerStats, SharedScheduler,
};
pub use sink::{AudioSink, ChannelSink, NullSink, SinkEvent};

#[cfg(feature = "cpal-output")]
pub use cpal_sink::CpalSink;
