//! Retry policy: decides how often a step may be attempted and the backoff
//! between attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for a failing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed (the first attempt included).
    /// `0` and `1` both mean "never retry".
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Growth factor between consecutive retries (>= 1.0).
    pub backoff_multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that fails straight through to the fallback check.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before the retry that follows the `attempts`-th failure
    /// (1-indexed).
    ///
    /// `delay = min(max_delay, base_delay * multiplier^(attempts - 1))`
    ///
    /// With base_delay=1s, multiplier=2.0, max_delay=30s:
    /// 1s, 2s, 4s, 8s, 16s, 30s, 30s, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.backoff_multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        if !delay_secs.is_finite() || delay_secs >= max_secs {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Check the numeric invariants. Returns a human readable reason on
    /// violation.
    pub fn validate(&self) -> Result<(), String> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be >= 1.0 (got {})",
                self.backoff_multiplier
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(format!(
                "max_delay ({:?}) is smaller than base_delay ({:?})",
                self.max_delay, self.base_delay
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=8).map(|n| policy.next_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn multiplier_of_one_gives_constant_delay() {
        let policy = RetryPolicy {
            backoff_multiplier: 1.0,
            base_delay: Duration::from_millis(250),
            ..RetryPolicy::default()
        };
        for n in 1..6 {
            assert_eq!(policy.next_delay(n), Duration::from_millis(250));
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn zero_attempts_never_retry() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.allows_retry(0));
        assert!(!policy.allows_retry(1));

        let two = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        assert!(two.allows_retry(1));
        assert!(!two.allows_retry(2));
    }

    #[test]
    fn validate_rejects_shrinking_multiplier() {
        let policy = RetryPolicy {
            backoff_multiplier: 0.5,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }
}
