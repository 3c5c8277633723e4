//! Exponential backoff shared by the endpoint manager and every feed adapter.
//!
//! [`BackoffPolicy`] is the pure delay formula; [`Backoff`] pairs it with an
//! attempt counter. Each component owns its own [`Backoff`], so counters are
//! never shared.
//!
//! ```text
//! delay(n) = min(base * 2^n, max)
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Delay parameters for one retrying component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self { base, max, max_attempts }
    }

    /// Delay for attempt `n` (0-based). Saturates at `max` instead of
    /// overflowing for large `n`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max, |d| d.min(self.max))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), max: Duration::from_secs(30), max_attempts: Some(5) }
    }
}

/// Serde form of a [`BackoffPolicy`], in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `0` retries forever.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base_delay_ms: 1_000, max_delay_ms: 30_000, max_attempts: 5 }
    }
}

impl BackoffConfig {
    /// `0 < base_delay_ms <= max_delay_ms`.
    pub fn is_valid(&self) -> bool {
        self.base_delay_ms > 0 && self.max_delay_ms >= self.base_delay_ms
    }
}

impl From<BackoffConfig> for BackoffPolicy {
    fn from(cfg: BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(cfg.base_delay_ms),
            max: Duration::from_millis(cfg.max_delay_ms),
            max_attempts: (cfg.max_attempts > 0).then_some(cfg.max_attempts),
        }
    }
}

/// A policy plus the attempt counter of one retrying component.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next retry, advancing the counter. Returns `None`
    /// once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Back to attempt 0. Call only after a verified successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Retries scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.policy.max_attempts.is_some_and(|max| self.attempt >= max)
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: Option<u32>) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(10), max_attempts)
    }

    #[test]
    fn delay_doubles_then_caps() {
        let p = policy(None);
        let expected = [500, 1_000, 2_000, 4_000, 8_000, 10_000, 10_000];
        for (n, ms) in expected.iter().enumerate() {
            assert_eq!(p.delay_for(n as u32), Duration::from_millis(*ms), "attempt {n}");
        }
    }

    #[test]
    fn delay_matches_formula_for_all_small_attempts() {
        let p = policy(None);
        for n in 0..40u32 {
            let raw = 500u128 * (1u128 << n);
            let want = raw.min(10_000) as u64;
            assert_eq!(p.delay_for(n), Duration::from_millis(want));
        }
    }

    #[test]
    fn huge_attempt_saturates() {
        let p = policy(None);
        assert_eq!(p.delay_for(200), Duration::from_secs(10));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn counter_exhausts_and_resets() {
        let mut b = Backoff::new(policy(Some(3)));
        assert_eq!(b.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(b.next_delay(), Some(Duration::from_millis(1_000)));
        assert_eq!(b.next_delay(), Some(Duration::from_millis(2_000)));
        assert!(b.is_exhausted());
        assert_eq!(b.next_delay(), None);
        assert_eq!(b.attempt(), 3);

        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn unbounded_never_exhausts() {
        let mut b = Backoff::new(policy(None));
        for _ in 0..100 {
            assert!(b.next_delay().is_some());
        }
    }

    #[test]
    fn config_zero_attempts_means_unbounded() {
        let cfg = BackoffConfig { base_delay_ms: 250, max_delay_ms: 4_000, max_attempts: 0 };
        let p: BackoffPolicy = cfg.into();
        assert_eq!(p.max_attempts, None);
        assert_eq!(p.base, Duration::from_millis(250));
    }
}
