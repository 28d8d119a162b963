//! Clock source for audit timestamps.

use crate::model::entity::Timestamp;
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies "now" for audit stamping.
pub trait Clock {
    /// Current time in Unix epoch milliseconds.
    fn now_ms(&self) -> Timestamp;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Timestamp {
        // A clock before the epoch is a host misconfiguration; clamp to zero.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
            })
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now_ms(&self) -> Timestamp {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, FixedClock, SystemClock};

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn fixed_clock_returns_pinned_instant() {
        assert_eq!(FixedClock(1_700_000_000_000).now_ms(), 1_700_000_000_000);
    }
}
