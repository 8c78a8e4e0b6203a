//! Retry backoff policy.

use std::time::Duration;

/// Exponential backoff: `base * 2^(attempts-1)`.
///
/// With the default one-minute base the delays are 1m, 2m, 4m, 8m, ...
/// There is deliberately no cap and no jitter: `max_attempts` bounds the
/// largest delay a task can ever be assigned, and worker cadence (not
/// thundering herds) drives claim timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    /// Delay before the next retry, given the attempts made so far
    /// (1-indexed; 0 means no attempt happened and yields no delay).
    ///
    /// Saturates instead of overflowing for absurd attempt counts.
    pub fn delay(&self, attempts: i32) -> Duration {
        if attempts <= 0 {
            return Duration::ZERO;
        }
        let exp = u32::try_from(attempts - 1).unwrap_or(u32::MAX).min(31);
        let factor = 1u32 << exp;
        self.base.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn doubles_per_attempt_from_one_minute() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay(1), Duration::from_secs(60));
        assert_eq!(policy.delay(2), Duration::from_secs(120));
        assert_eq!(policy.delay(3), Duration::from_secs(240));
        assert_eq!(policy.delay(4), Duration::from_secs(480));
    }

    #[test]
    fn zero_attempts_means_no_delay() {
        assert_eq!(BackoffPolicy::default().delay(0), Duration::ZERO);
        assert_eq!(BackoffPolicy::default().delay(-1), Duration::ZERO);
    }

    #[test]
    fn keeps_sub_second_precision() {
        let policy = BackoffPolicy::new(Duration::from_millis(50));

        assert_eq!(policy.delay(1), Duration::from_millis(50));
        assert_eq!(policy.delay(2), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(200));
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let policy = BackoffPolicy::default();
        assert!(policy.delay(500) >= policy.delay(100));
    }

    proptest! {
        #[test]
        fn strictly_increasing_and_exact(attempts in 1i32..32) {
            let policy = BackoffPolicy::new(Duration::from_secs(60));
            let expected = 60u64 * (1u64 << (attempts - 1) as u32);
            prop_assert_eq!(policy.delay(attempts), Duration::from_secs(expected));
            prop_assert!(policy.delay(attempts + 1) > policy.delay(attempts));
        }
    }
}
