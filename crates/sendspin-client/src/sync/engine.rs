//! Timestamp exchange bookkeeping
//!
//! The engine issues `client/time` requests, matches `server/time` responses
//! against outstanding requests and publishes the filtered estimate to a
//! shared handle read by the scheduler and snapshots.
//!
//! The first accepted measurement becomes the baseline. The Kalman filter
//! tracks the offset relative to it, so a large server/local clock gap is
//! exact from the first sync instead of converging from zero.

use super::kalman::{raw_offset, ClockEstimate, KalmanClock};
use crate::config::SyncConfig;
use crate::protocol::{ClientTime, ServerTime};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared, read-mostly clock estimate
pub type SharedClock = Arc<RwLock<ClockEstimate>>;

/// Why a time response was not folded into the estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRejection {
    /// No outstanding request carries this `client_transmitted`
    UnknownRequest,
    /// Receipt time precedes transmit time
    NegativeRtt,
    /// Server timestamps too far from the local clock to compute an offset
    OutOfRange,
}

/// Clock synchronization engine (single writer of the shared estimate)
#[derive(Debug)]
pub struct SyncEngine {
    kalman: KalmanClock,
    baseline_us: Option<f64>,
    shared: SharedClock,
    pending: VecDeque<i64>,
    request_ttl_us: i64,
}

impl SyncEngine {
    /// Create an engine publishing into a fresh shared estimate
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_shared(
            config,
            Arc::new(RwLock::new(ClockEstimate::new(config.initial_variance))),
        )
    }

    /// Create an engine publishing into an existing handle
    pub fn with_shared(config: &SyncConfig, shared: SharedClock) -> Self {
        let kalman = KalmanClock::new(config);
        *shared.write() = kalman.estimate().clone();
        Self {
            kalman,
            baseline_us: None,
            shared,
            pending: VecDeque::new(),
            request_ttl_us: config.request_ttl_ms as i64 * 1_000,
        }
    }

    /// Handle for readers
    pub fn shared(&self) -> SharedClock {
        Arc::clone(&self.shared)
    }

    /// Snapshot of the current estimate
    pub fn estimate(&self) -> ClockEstimate {
        self.shared.read().clone()
    }

    /// Number of requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Record a new request sent at `now_us` and build its payload
    pub fn begin_request(&mut self, now_us: i64) -> ClientTime {
        self.expire(now_us);
        self.pending.push_back(now_us);
        ClientTime {
            client_transmitted: now_us,
        }
    }

    /// Fold a `server/time` response received at `t1`
    pub fn handle_response(
        &mut self,
        response: &ServerTime,
        t1: i64,
    ) -> std::result::Result<ClockEstimate, SyncRejection> {
        self.expire(t1);

        let t0 = response.client_transmitted;
        let Some(index) = self.pending.iter().position(|&sent| sent == t0) else {
            debug!(client_transmitted = t0, "Ignoring time response without matching request");
            return Err(SyncRejection::UnknownRequest);
        };
        self.pending.remove(index);

        let rtt = t1 - t0;
        if rtt < 0 {
            warn!(rtt_us = rtt, "Rejecting time response with negative round trip");
            return Err(SyncRejection::NegativeRtt);
        }

        let Some(raw) = raw_offset(t0, response.server_received, response.server_transmitted, t1)
        else {
            warn!(
                server_received = response.server_received,
                server_transmitted = response.server_transmitted,
                "Rejecting time response with out of range timestamps"
            );
            return Err(SyncRejection::OutOfRange);
        };
        let baseline = *self.baseline_us.get_or_insert(raw);
        let filtered = self.kalman.update(raw - baseline, rtt, t1);
        let estimate = ClockEstimate {
            offset_us: baseline + filtered.offset_us,
            ..filtered.clone()
        };
        *self.shared.write() = estimate.clone();

        debug!(
            raw_offset_us = raw,
            offset_us = estimate.offset_us,
            drift_us = estimate.drift_us,
            variance = estimate.variance,
            rtt_us = rtt,
            "Clock sync update"
        );

        Ok(estimate)
    }

    /// Drop all state; used on reconnect
    pub fn reset(&mut self) {
        self.kalman.reset();
        self.baseline_us = None;
        self.pending.clear();
        *self.shared.write() = self.kalman.estimate().clone();
    }

    fn expire(&mut self, now_us: i64) {
        let ttl = self.request_ttl_us;
        let before = self.pending.len();
        self.pending.retain(|&sent| now_us - sent <= ttl);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(dropped, "Discarded stale time requests");
        }
    }
}
