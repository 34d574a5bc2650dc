//! Retry policy and backoff for the resilient transport.
//!
//! Delays use exponential backoff with full jitter:
//! `min(max_delay, base_delay * 2^attempt) * uniform(0, 1)`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

/// Default maximum number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff base unit in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default cap on a single backoff delay in seconds.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 60;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Backoff base unit.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given retry bound and default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the backoff base unit.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the cap on a single delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// The upper bound of the jittered delay before retry number `attempt`
    /// (0-based).
    pub fn delay_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// A full-jitter delay for retry number `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.delay_ceiling(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        ceiling.mul_f64(jitter).min(self.max_delay)
    }
}

/// Retry bookkeeping for one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    max_delay: Duration,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_retries,
            max_delay: policy.max_delay,
        }
    }

    /// Retries performed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Consume one retry and return the delay to wait before it.
    pub fn next_delay(&mut self, policy: &RetryPolicy) -> Duration {
        let delay = policy.backoff_delay(self.attempt).min(self.max_delay);
        self.attempt = (self.attempt + 1).min(self.max_attempts);
        delay
    }
}

/// Suspends the current task between retries.
#[async_trait]
pub trait Sleeper: Send + Sync + fmt::Debug {
    async fn sleep(&self, delay: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_ceiling_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_ceiling(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_ceiling(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_ceiling(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_delay_ceiling_is_capped() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.delay_ceiling(3), Duration::from_secs(5));
        assert_eq!(policy.delay_ceiling(40), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_ceiling_non_decreasing() {
        let policy = RetryPolicy::default();
        let ceilings: Vec<_> = (0..12).map(|a| policy.delay_ceiling(a)).collect();
        assert!(ceilings.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_backoff_never_exceeds_cap() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(700));
        for attempt in 0..10 {
            for _ in 0..50 {
                let delay = policy.backoff_delay(attempt);
                assert!(delay <= policy.delay_ceiling(attempt));
                assert!(delay <= Duration::from_millis(700));
            }
        }
    }

    #[test]
    fn test_zero_base_delay_never_sleeps() {
        let policy = RetryPolicy::new(3).with_base_delay(Duration::ZERO);
        assert_eq!(policy.backoff_delay(5), Duration::ZERO);
    }

    #[test]
    fn test_retry_state_bounds() {
        let policy = RetryPolicy::new(2).with_base_delay(Duration::ZERO);
        let mut state = RetryState::new(&policy);
        assert!(state.can_retry());
        state.next_delay(&policy);
        assert!(state.can_retry());
        state.next_delay(&policy);
        assert!(!state.can_retry());
        state.next_delay(&policy);
        assert_eq!(state.attempt(), 2);
        assert_eq!(state.max_attempts(), 2);
    }
}
