//! Kalman filter over NTP-style offset measurements
//!
//! State is the server-minus-local clock offset in microseconds. Each update
//! predicts `offset + drift`, grows the variance by the process noise and then
//! blends in the raw measurement with gain `K = P / (P + R)`.

use crate::config::SyncConfig;
use std::collections::VecDeque;

/// Number of raw measurements retained for drift estimation
pub const MEASUREMENT_WINDOW: usize = 10;

/// Number of most recent measurements used for the drift average
pub const DRIFT_SPAN: usize = 5;

/// Damping applied to the mean successive delta
pub const DRIFT_GAIN: f64 = 0.1;

/// Current estimate of the server clock relative to the local clock
#[derive(Debug, Clone, PartialEq)]
pub struct ClockEstimate {
    /// Server minus local, microseconds
    pub offset_us: f64,
    /// Offset change per sync round, microseconds
    pub drift_us: f64,
    /// Kalman uncertainty
    pub variance: f64,
    /// Local time of the last accepted measurement
    pub last_sync_us: Option<i64>,
    /// Number of accepted measurements
    pub sample_count: u64,
    /// Round-trip time of the last accepted measurement
    pub last_rtt_us: Option<i64>,
}

impl ClockEstimate {
    /// Fresh estimate with zero offset
    pub fn new(initial_variance: f64) -> Self {
        Self {
            offset_us: 0.0,
            drift_us: 0.0,
            variance: initial_variance,
            last_sync_us: None,
            sample_count: 0,
            last_rtt_us: None,
        }
    }

    /// An estimate is usable once at least one measurement was accepted
    pub fn is_valid(&self) -> bool {
        self.sample_count > 0
    }

    /// Map a server timestamp onto the local time base
    pub fn server_to_local(&self, server_us: i64) -> i64 {
        server_us.saturating_sub(self.offset_us.round() as i64)
    }
}

impl Default for ClockEstimate {
    fn default() -> Self {
        Self::new(SyncConfig::default().initial_variance)
    }
}

/// Raw offset of one timestamp exchange
///
/// `((server_received - t0) + (server_transmitted - t1)) / 2`
///
/// `None` when either difference does not fit in an i64.
pub fn raw_offset(t0: i64, server_received: i64, server_transmitted: i64, t1: i64) -> Option<f64> {
    let inbound = server_received.checked_sub(t0)?;
    let outbound = server_transmitted.checked_sub(t1)?;
    Some((inbound as f64 + outbound as f64) / 2.0)
}

/// One-dimensional Kalman filter for the clock offset
#[derive(Debug, Clone)]
pub struct KalmanClock {
    estimate: ClockEstimate,
    window: VecDeque<f64>,
    process_noise: f64,
    measurement_noise: f64,
    initial_variance: f64,
}

impl KalmanClock {
    /// Create a filter from sync settings
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_params(
            config.process_noise,
            config.measurement_noise,
            config.initial_variance,
        )
    }

    /// Create a filter with explicit noise constants
    pub fn with_params(process_noise: f64, measurement_noise: f64, initial_variance: f64) -> Self {
        Self {
            estimate: ClockEstimate::new(initial_variance),
            window: VecDeque::with_capacity(MEASUREMENT_WINDOW),
            process_noise,
            measurement_noise,
            initial_variance,
        }
    }

    /// Current estimate
    pub fn estimate(&self) -> &ClockEstimate {
        &self.estimate
    }

    /// Raw measurements currently in the window, oldest first
    pub fn window(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }

    /// Fold one raw offset measurement into the estimate
    pub fn update(&mut self, raw_offset_us: f64, rtt_us: i64, now_us: i64) -> &ClockEstimate {
        let est = &mut self.estimate;

        let predicted_offset = est.offset_us + est.drift_us;
        let predicted_variance = est.variance + self.process_noise;

        let gain = predicted_variance / (predicted_variance + self.measurement_noise);
        est.offset_us = predicted_offset + gain * (raw_offset_us - predicted_offset);
        est.variance = ((1.0 - gain) * predicted_variance).max(0.0);

        if self.window.len() == MEASUREMENT_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(raw_offset_us);
        est.drift_us = drift_from_window(&self.window);

        est.sample_count += 1;
        est.last_sync_us = Some(now_us);
        est.last_rtt_us = Some(rtt_us);

        &self.estimate
    }

    /// Forget everything; used on reconnect
    pub fn reset(&mut self) {
        self.estimate = ClockEstimate::new(self.initial_variance);
        self.window.clear();
    }
}

/// `DRIFT_GAIN` times the mean successive delta of the last `DRIFT_SPAN` entries
fn drift_from_window(window: &VecDeque<f64>) -> f64 {
    let span = window.len().min(DRIFT_SPAN);
    if span < 2 {
        return 0.0;
    }

    let recent: Vec<f64> = window.iter().skip(window.len() - span).copied().collect();
    let sum: f64 = recent.windows(2).map(|pair| pair[1] - pair[0]).sum();
    DRIFT_GAIN * sum / (span - 1) as f64
}
