//! Playback scheduler
//!
//! Maps server timestamps onto the local clock and keeps a gapless queue of
//! decoded buffers. The first buffer of a timeline (after stream start, clear
//! or resync) plays at its server time mapped through the clock offset. If
//! that instant is already behind `now + epsilon` the buffer falls back to the
//! rebased origin and the timeline keeps that lag. Later buffers follow the
//! end of the queue; the distance between where the clock places a buffer and
//! the queue end is the drift.
//!
//! ```text
//!   candidate = server_ts - offset
//!   first     = candidate            if candidate >= now + epsilon
//!             = origin               otherwise
//!   lag       = first - candidate
//!   drift     = (candidate + lag) - expected
//!   start     = max(expected, now + epsilon)
//!   expected' = start + duration / rate
//! ```

use super::drift::{DriftCorrection, DriftMode};
use super::sink::AudioSink;
use crate::audio::DecodedBuffer;
use crate::config::PlaybackConfig;
use crate::sync::SharedClock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Scheduler shared between the session task and the decode worker
pub type SharedScheduler = Arc<Mutex<PlaybackScheduler>>;

/// Decoded audio placed on the local timeline
#[derive(Debug, Clone)]
pub struct ScheduledBuffer {
    /// Planar samples
    pub buffer: Arc<DecodedBuffer>,
    /// Local start time in microseconds
    pub start_us: i64,
    /// Wall-clock play time at `playback_rate`
    pub duration_us: i64,
    /// Rate handed to the sink
    pub playback_rate: f64,
    /// Scheduler epoch the buffer belongs to
    pub epoch: u64,
}

impl ScheduledBuffer {
    /// Local time the buffer finishes
    pub fn end_us(&self) -> i64 {
        self.start_us.saturating_add(self.duration_us)
    }
}

/// Result of offering a decoded buffer to the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleOutcome {
    /// Buffer queued
    Scheduled {
        /// Local start time
        start_us: i64,
        /// Correction tier used
        mode: DriftMode,
        /// Playback rate used
        playback_rate: f64,
    },
    /// Drift was out of range; queue flushed and the buffer dropped
    Resynced {
        /// Measured drift
        drift_us: i64,
    },
    /// Buffer decoded for an earlier epoch
    Stale,
    /// Buffer had no samples
    Empty,
}

/// Timing constants in microseconds
#[derive(Debug, Clone, Copy)]
struct Timing {
    buffer_ahead_us: i64,
    epsilon_us: i64,
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Buffers queued
    pub scheduled: u64,
    /// Buffers dropped for belonging to an older epoch
    pub stale: u64,
    /// Forced resyncs
    pub resyncs: u64,
    /// Buffers whose start was clamped forward to `now + epsilon`
    pub clamped: u64,
}

/// Gapless playback queue with drift correction
pub struct PlaybackScheduler {
    timing: Timing,
    clock: SharedClock,
    sink: Box<dyn AudioSink>,
    queue: VecDeque<ScheduledBuffer>,
    epoch: u64,
    origin_us: Option<i64>,
    lag_us: Option<i64>,
    next_start_us: Option<i64>,
    correction: DriftCorrection,
    stats: SchedulerStats,
}

impl PlaybackScheduler {
    /// Create a scheduler reading offsets from `clock` and rendering to `sink`
    pub fn new(config: &PlaybackConfig, clock: SharedClock, sink: Box<dyn AudioSink>) -> Self {
        Self {
            timing: Timing {
                buffer_ahead_us: config.buffer_ahead_ms as i64 * 1_000,
                epsilon_us: config.schedule_epsilon_ms as i64 * 1_000,
            },
            clock,
            sink,
            queue: VecDeque::new(),
            epoch: 0,
            origin_us: None,
            lag_us: None,
            next_start_us: None,
            correction: DriftCorrection::default(),
            stats: SchedulerStats::default(),
        }
    }

    /// Wrap in the shared handle
    pub fn into_shared(self) -> SharedScheduler {
        Arc::new(Mutex::new(self))
    }

    /// Current epoch; bumps on every rebase and stop
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Fallback start for a late first buffer; the actual start once placed
    pub fn origin_us(&self) -> Option<i64> {
        self.origin_us
    }

    /// Where the next buffer would be placed
    pub fn next_expected_us(&self) -> Option<i64> {
        self.next_start_us.or(self.origin_us)
    }

    /// Number of queued, unfinished buffers
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Correction applied to the latest buffer
    pub fn correction(&self) -> DriftCorrection {
        self.correction
    }

    /// Counters
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Flush and place the next buffer at `now + buffer_ahead`
    ///
    /// Used for stream start, stream clear and forced resync.
    pub fn rebase(&mut self, now_us: i64) {
        self.flush();
        self.epoch += 1;
        self.origin_us = Some(now_us.saturating_add(self.timing.buffer_ahead_us));
        self.lag_us = None;
        self.next_start_us = None;
        self.correction = DriftCorrection::default();
        debug!(
            epoch = self.epoch,
            origin_us = self.origin_us,
            "Rebased playback timeline"
        );
    }

    /// Flush and forget the timeline; used at stream end and disconnect
    pub fn stop(&mut self) {
        self.flush();
        self.epoch += 1;
        self.origin_us = None;
        self.lag_us = None;
        self.next_start_us = None;
        self.correction = DriftCorrection::default();
    }

    /// Stop every pending buffer at the sink and empty the queue
    pub fn flush(&mut self) {
        if !self.queue.is_empty() {
            trace!(dropped = self.queue.len(), "Flushing playback queue");
        }
        self.queue.clear();
        self.sink.flush();
    }

    /// Evict buffers that finished playing
    pub fn purge(&mut self, now_us: i64) -> usize {
        let before = self.queue.len();
        self.queue.retain(|b| b.end_us() > now_us);
        before - self.queue.len()
    }

    /// Forward output level to the sink
    pub fn set_volume(&mut self, volume: f32, muted: bool) {
        self.sink.set_volume(volume, muted);
    }

    /// Place a decoded buffer on the local timeline
    pub fn schedule(&mut self, buffer: DecodedBuffer, epoch: u64, now_us: i64) -> ScheduleOutcome {
        if epoch != self.epoch {
            self.stats.stale += 1;
            trace!(epoch, current = self.epoch, "Dropping buffer from earlier epoch");
            return ScheduleOutcome::Stale;
        }
        if buffer.is_empty() {
            return ScheduleOutcome::Empty;
        }

        self.purge(now_us);

        let candidate = self.clock.read().server_to_local(buffer.server_timestamp_us);
        let earliest = now_us.saturating_add(self.timing.epsilon_us);

        let (expected, correction) = match (self.lag_us, self.next_start_us) {
            (Some(lag), Some(expected)) => {
                let drift = candidate.saturating_add(lag).saturating_sub(expected);
                let correction = DriftCorrection::for_drift(drift);
                if correction.mode == DriftMode::Resync {
                    warn!(drift_us = drift, "Drift out of range, resyncing playback");
                    self.stats.resyncs += 1;
                    self.rebase(now_us);
                    return ScheduleOutcome::Resynced { drift_us: drift };
                }
                (expected, correction)
            }
            _ => {
                let first = if candidate >= earliest {
                    candidate
                } else {
                    let origin = self
                        .origin_us
                        .unwrap_or_else(|| now_us.saturating_add(self.timing.buffer_ahead_us));
                    debug!(
                        late_us = earliest.saturating_sub(candidate),
                        origin_us = origin,
                        "First buffer is late, starting at origin"
                    );
                    origin
                };
                self.lag_us = Some(first.saturating_sub(candidate));
                self.origin_us = Some(first);
                (first, DriftCorrection::default())
            }
        };

        if expected < earliest {
            self.stats.clamped += 1;
        }
        let start_us = expected.max(earliest);
        let rate = correction.playback_rate;
        let duration_us = (buffer.duration_us() as f64 / rate).round() as i64;

        let scheduled = ScheduledBuffer {
            buffer: Arc::new(buffer),
            start_us,
            duration_us,
            playback_rate: rate,
            epoch: self.epoch,
        };

        if let Err(e) = self.sink.play(&scheduled) {
            warn!(sink = self.sink.name(), "Sink rejected buffer: {}", e);
        }

        self.next_start_us = Some(scheduled.end_us());
        self.queue.push_back(scheduled);
        self.correction = correction;
        self.stats.scheduled += 1;

        if correction.mode != DriftMode::None {
            trace!(mode = ?correction.mode, rate, start_us, "Scheduled with correction");
        }

        ScheduleOutcome::Scheduled {
            start_us,
            mode: correction.mode,
            playback_rate: rate,
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if !self.queue.is_empty() {
            info!(pending = self.queue.len(), "Dropping scheduler with queued audio");
            self.sink.flush();
        }
    }
}
