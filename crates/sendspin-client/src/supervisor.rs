//! Reconnection after abnormal closes
//!
//! Attempts are counted before each retry and the delay grows linearly with
//! the attempt number, capped at three times the base delay. A caller
//! initiated disconnect saturates the counter so no retry follows.

use crate::config::ReconnectConfig;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Delay multiplier cap
const MAX_DELAY_FACTOR: u32 = 3;

/// Reconnection policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectionPolicy {
    /// Maximum number of automatic reconnect attempts (default: 5)
    pub max_attempts: u32,
    /// Base delay (default: 2000ms)
    pub base_delay: Duration,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectionPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

impl ReconnectionPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.clamp(1, MAX_DELAY_FACTOR)
    }
}

/// What to do after a close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Sleep `delay`, then run the connect sequence again
    Retry {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Backoff before the attempt
        delay: Duration,
    },
    /// Attempts exhausted
    GiveUp {
        /// Attempts made
        attempts: u32,
    },
    /// Caller disconnected; stay down
    Suppressed,
}

/// Tracks reconnect attempts for one client
#[derive(Debug)]
pub struct ReconnectionSupervisor {
    policy: ReconnectionPolicy,
    attempts: AtomicU32,
    suppressed: AtomicBool,
}

impl ReconnectionSupervisor {
    /// Create a supervisor
    pub fn new(policy: ReconnectionPolicy) -> Self {
        Self {
            policy,
            attempts: AtomicU32::new(0),
            suppressed: AtomicBool::new(false),
        }
    }

    /// Policy in use
    pub fn policy(&self) -> ReconnectionPolicy {
        self.policy
    }

    /// Attempts made since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// True after a caller-initiated disconnect
    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    /// Decide how to react to an abnormal close or a failed reconnect
    pub fn on_abnormal_close(&self) -> ReconnectDecision {
        if self.is_suppressed() {
            return ReconnectDecision::Suppressed;
        }

        let previous = self.attempts.load(Ordering::SeqCst);
        if previous >= self.policy.max_attempts {
            warn!(attempts = previous, "Reconnect attempts exhausted");
            return ReconnectDecision::GiveUp { attempts: previous };
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.policy.delay_for_attempt(attempt);
        info!(
            attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        ReconnectDecision::Retry { attempt, delay }
    }

    /// A (re)connect succeeded
    pub fn record_success(&self) {
        let previous = self.attempts.swap(0, Ordering::SeqCst);
        if previous > 0 {
            info!(attempts = previous, "Reconnected");
        }
    }

    /// Caller disconnected: no automatic reconnect
    pub fn suppress(&self) {
        self.suppressed.store(true, Ordering::SeqCst);
        self.attempts.store(self.policy.max_attempts, Ordering::SeqCst);
    }

    /// Fresh start for a caller-initiated connect
    pub fn reset(&self) {
        self.suppressed.store(false, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);
    }
}
