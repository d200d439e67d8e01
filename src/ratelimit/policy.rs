//! Rate policy and admission decision types.

use std::time::Duration;

/// Shortest expiry handed to the store. A zero TTL would make Redis drop the
/// record as soon as it is written.
const MIN_EXPIRY: Duration = Duration::from_millis(1);

/// An immutable `(max_calls, window)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RatePolicy {
    max_calls: u64,
    window: Duration,
}

impl RatePolicy {
    /// Create a policy allowing `max_calls` attempts per trailing `window`.
    pub fn new(max_calls: u64, window: Duration) -> Self {
        Self { max_calls, window }
    }

    /// Maximum attempts admitted per window.
    pub fn max_calls(&self) -> u64 {
        self.max_calls
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in the clock's unit, saturating at `i64::MAX`.
    pub fn window_nanos(&self) -> i64 {
        i64::try_from(self.window.as_nanos()).unwrap_or(i64::MAX)
    }

    /// Window length in seconds.
    pub fn window_seconds(&self) -> f64 {
        self.window.as_secs_f64()
    }

    /// Time-to-live applied to an attempt record after every call.
    pub fn expiry(&self) -> Duration {
        self.window.max(MIN_EXPIRY)
    }

    /// Turn the number of attempts already inside the window (not counting
    /// the current one) into a decision.
    ///
    /// `remaining` is what is left once the current attempt is counted, so a
    /// burst of `max_calls` reports `max_calls - 1` down to `0` and the first
    /// call after a reset reports `max_calls - 1`.
    pub fn evaluate(&self, in_window: u64) -> Admission {
        Admission {
            allowed: in_window < self.max_calls,
            remaining: self.max_calls.saturating_sub(in_window.saturating_add(1)),
        }
    }
}

/// Outcome of a single admission check.
///
/// A denial is a normal result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the attempt fits in the budget.
    pub allowed: bool,
    /// Slots left in the current window once this attempt is counted.
    pub remaining: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_units() {
        let policy = RatePolicy::new(2, Duration::from_millis(1500));
        assert_eq!(policy.window_nanos(), 1_500_000_000);
        assert_eq!(policy.window_seconds(), 1.5);
    }

    #[test]
    fn test_window_nanos_saturates() {
        let policy = RatePolicy::new(1, Duration::MAX);
        assert_eq!(policy.window_nanos(), i64::MAX);
    }

    #[test]
    fn test_expiry_never_zero() {
        let policy = RatePolicy::new(1, Duration::ZERO);
        assert_eq!(policy.expiry(), Duration::from_millis(1));

        let policy = RatePolicy::new(1, Duration::from_secs(3));
        assert_eq!(policy.expiry(), Duration::from_secs(3));
    }

    #[test]
    fn test_evaluate_counts_down_to_denial() {
        let policy = RatePolicy::new(3, Duration::from_secs(1));

        assert_eq!(policy.evaluate(0), Admission { allowed: true, remaining: 2 });
        assert_eq!(policy.evaluate(1), Admission { allowed: true, remaining: 1 });
        assert_eq!(policy.evaluate(2), Admission { allowed: true, remaining: 0 });
        assert_eq!(policy.evaluate(3), Admission { allowed: false, remaining: 0 });
        assert_eq!(policy.evaluate(50), Admission { allowed: false, remaining: 0 });
    }

    #[test]
    fn test_zero_max_calls_denies_everything() {
        let policy = RatePolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.evaluate(0), Admission { allowed: false, remaining: 0 });
    }
}
