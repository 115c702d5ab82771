//! Backoff policy for upstream retries.

use std::time::Duration;

/// Exponential backoff with proportional jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound of the random extra delay, as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    pub fn upstream_default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter_ratio: 0.3,
        }
    }

    /// Delay before retry number `retry` (1-indexed), without jitter.
    ///
    /// base=500ms, multiplier=2.0:
    /// - retry 1: 500ms
    /// - retry 2: 1s
    /// - retry 3: 2s
    pub fn base_for(&self, retry: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        Duration::from_secs_f64(base_secs * self.multiplier.powi(exponent))
    }

    /// `base_for(retry)` plus `[0, jitter_ratio)` of itself.
    pub fn next_delay(&self, retry: u32) -> Duration {
        let base = self.base_for(retry);
        let jitter = base.as_secs_f64() * self.jitter_ratio * rand::random::<f64>();
        base + Duration::from_secs_f64(jitter)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::upstream_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::first(1, 500)]
    #[case::second(2, 1000)]
    #[case::third(3, 2000)]
    #[case::zero_is_first(0, 500)]
    fn exponential_base(#[case] retry: u32, #[case] millis: u64) {
        let policy = BackoffPolicy::upstream_default();
        assert_eq!(policy.base_for(retry), Duration::from_millis(millis));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let policy = BackoffPolicy::upstream_default();
        for retry in 1..=3 {
            let base = policy.base_for(retry);
            let upper = base.mul_f64(1.3);
            for _ in 0..50 {
                let d = policy.next_delay(retry);
                assert!(d >= base && d <= upper, "{d:?} outside [{base:?}, {upper:?}]");
            }
        }
    }
}
