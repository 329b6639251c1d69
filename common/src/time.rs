//! Time utilities and timing defaults.

use chrono::{DateTime, Utc};

/// Timing defaults shared by the coordinator and its collaborators.
pub mod constants {
    use std::time::Duration;

    /// Chain settlement call timeout (60 seconds).
    pub const CHAIN_CALL_TIMEOUT: Duration = Duration::from_secs(60);

    /// How long a timed-out chain call may still resolve (10 minutes).
    pub const LATE_OUTCOME_GRACE: Duration = Duration::from_secs(600);

    /// Drain window for in-flight withdrawals on shutdown (30 seconds).
    pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

    /// Store attempts before escalating to an unavailable error.
    pub const STORE_RETRY_ATTEMPTS: u32 = 3;

    /// Pause between store attempts (50 milliseconds).
    pub const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

    /// Reconnect attempts for the chain endpoint.
    pub const CHAIN_RECONNECT_ATTEMPTS: u32 = 5;

    /// Initial reconnect delay for the chain endpoint (5 seconds).
    pub const CHAIN_RECONNECT_DELAY: Duration = Duration::from_secs(5);
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Exponential backoff delay for the given zero-based attempt, capped at `max`.
pub fn backoff_delay(
    base: std::time::Duration,
    attempt: u32,
    max: std::time::Duration,
) -> std::time::Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        assert_eq!(backoff_delay(base, 0, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1, max), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3, max), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, 5, max), max);
        assert_eq!(backoff_delay(base, 40, max), max);
    }

    #[test]
    fn test_now_is_monotonic_enough() {
        let first = now();
        let second = now();
        assert!(second >= first);
    }
}
