//! Backoff for broker requests that failed in transit.
//!
//! Only transport failures (connection refused, timeouts, 5xx responses) are
//! retried. A retried send may reach the broker twice, so delivery stays
//! at-least-once.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with optional jitter.
///
/// ```rust
/// use queue_sdk::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(4, Duration::from_millis(100), Duration::from_secs(1), 2.0)
///     .without_jitter();
///
/// assert_eq!(policy.delay_for(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(400));
/// assert_eq!(policy.delay_for(9), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random, 0.0 to 1.0
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(5), 2.0)
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            multiplier,
            jitter: 0.25,
        }
    }

    /// Fail on the first error
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 1.0).without_jitter()
    }

    pub fn without_jitter(self) -> Self {
        self.with_jitter(0.0)
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Delay before the retry numbered `retry` (0-based).
    ///
    /// Jitter is applied after capping, so a jittered delay may exceed
    /// `max_delay` by at most the jitter fraction. A multiplier that drives
    /// the delay negative yields no delay at all.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = (self.base_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64())
            .max(0.0);

        let spread = secs * self.jitter;
        if spread <= 0.0 {
            return self.clamp_secs(secs);
        }

        let offset = rand::thread_rng().gen_range(-spread..=spread);
        self.clamp_secs((secs + offset).max(0.0))
    }

    fn clamp_secs(&self, secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }
}

/// Progress through a [`RetryPolicy`] for one request
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    retries: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts made so far, counting the one that just failed
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Consume one retry, returning how long to wait before it.
    ///
    /// `None` once the policy's retries are used up.
    pub fn next_delay(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        if self.retries >= policy.max_retries {
            return None;
        }

        let delay = policy.delay_for(self.retries);
        self.retries += 1;
        Some(delay)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
