//! Local monotonic time base

use std::time::{Duration, Instant};

/// Monotonic microsecond clock anchored at construction
///
/// All local timestamps in the client (sync requests, scheduled start times)
/// are expressed on this time base. Clones share the same anchor.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    base: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at the current instant
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }

    /// Microseconds elapsed since the anchor
    pub fn now_us(&self) -> i64 {
        self.base.elapsed().as_micros() as i64
    }

    /// Convert a local microsecond timestamp back into an `Instant`
    ///
    /// Negative timestamps saturate to the anchor.
    pub fn instant_at(&self, local_us: i64) -> Instant {
        self.base + Duration::from_micros(local_us.max(0) as u64)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now_us();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now_us();
        assert!(b > a);
    }

    #[test]
    fn test_clones_share_anchor() {
        let clock = MonotonicClock::new();
        let copy = clock;
        assert_eq!(clock.instant_at(1_000), copy.instant_at(1_000));
    }

    #[test]
    fn test_instant_at_saturates_negative() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.instant_at(-50), clock.instant_at(0));
    }
}
