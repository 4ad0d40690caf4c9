//! Exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;

/// Backoff policy for the SQL agent's refiner loop.
///
/// The delay before attempt `n` (0-based) is drawn uniformly from
/// `[0, min(max_delay, base_delay * 2^n)]`, plus a uniform draw from
/// `[0, jitter]`. Full jitter keeps retry storms from synchronizing when
/// many sub-queries fail together.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Whether attempt `attempt` (0-based) is allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff before retry `attempt` (0-based retry counter).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.max_delay);
        let mut rng = rand::thread_rng();
        let backoff = if exp.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_nanos(rng.gen_range(0..=exp.as_nanos() as u64))
        };
        let extra = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_nanos(rng.gen_range(0..=self.jitter.as_nanos() as u64))
        };
        backoff + extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_bounded_by_cap_plus_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            jitter: Duration::from_millis(50),
        };
        for attempt in 0..10 {
            for _ in 0..50 {
                let d = policy.delay_for(attempt);
                assert!(d <= Duration::from_millis(450), "attempt {attempt}: {d:?}");
            }
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy { max_attempts: 2, ..Default::default() };
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }

    #[test]
    fn zero_delays_are_fine() {
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
    }
}
