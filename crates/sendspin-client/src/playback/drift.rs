//! Drift correction policy
//!
//! Drift is the distance between where a buffer's timestamp says it belongs
//! and where the queue would place it next. Positive drift means the local
//! output is running ahead of the server.

use serde::Serialize;

/// Below this drift nothing is corrected
pub const NONE_THRESHOLD_US: i64 = 1_000;

/// Below this drift the buffer is accepted as-is
pub const SAMPLE_THRESHOLD_US: i64 = 15_000;

/// Below this drift the playback rate is nudged; at or above it the queue resyncs
pub const RESYNC_THRESHOLD_US: i64 = 200_000;

/// Playback rate while running ahead
pub const RATE_SLOW: f64 = 0.98;

/// Playback rate while running behind
pub const RATE_FAST: f64 = 1.02;

/// Correction tier chosen for a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftMode {
    /// In sync
    None,
    /// Small offset, accepted unmodified
    Sample,
    /// Moderate offset, corrected through the playback rate
    Rate,
    /// Large offset, queue flushed and timeline rebased
    Resync,
}

/// Pick the correction tier for a drift in microseconds
pub fn select_mode(drift_us: i64) -> DriftMode {
    let magnitude = drift_us.saturating_abs();
    if magnitude < NONE_THRESHOLD_US {
        DriftMode::None
    } else if magnitude < SAMPLE_THRESHOLD_US {
        DriftMode::Sample
    } else if magnitude < RESYNC_THRESHOLD_US {
        DriftMode::Rate
    } else {
        DriftMode::Resync
    }
}

/// Mode and playback rate applied to the latest buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DriftCorrection {
    /// Current tier
    pub mode: DriftMode,
    /// Rate handed to the sink
    pub playback_rate: f64,
}

impl DriftCorrection {
    /// Correction for a measured drift
    pub fn for_drift(drift_us: i64) -> Self {
        let mode = select_mode(drift_us);
        let playback_rate = match mode {
            DriftMode::Rate if drift_us > 0 => RATE_SLOW,
            DriftMode::Rate => RATE_FAST,
            _ => 1.0,
        };
        Self {
            mode,
            playback_rate,
        }
    }
}

impl Default for DriftCorrection {
    fn default() -> Self {
        Self {
            mode: DriftMode::None,
            playback_rate: 1.0,
        }
    }
}
