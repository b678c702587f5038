//! Retry budget and backoff calculation.

use std::time::Duration;

use crate::errors::NexusError;

/// Retry configuration for one (provider, model) pair.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum invocations of a single (provider, model) pair.
    pub max_retries: u32,
    /// Initial delay after a transient failure.
    pub initial_delay: Duration,
    /// Maximum delay after a transient failure.
    pub max_delay: Duration,
    /// Delay multiplier for exponential backoff.
    pub multiplier: f64,
    /// Whether to add jitter to transient delays.
    pub jitter: bool,
    /// Base unit of the `base * 2^attempt` wait after HTTP 429.
    pub rate_limit_base: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
            rate_limit_base: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of invocations per pair.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the initial transient delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum transient delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    pub fn multiplier(mut self, mult: f64) -> Self {
        self.multiplier = mult;
        self
    }

    /// Sets whether to use jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the rate-limit backoff base.
    pub fn rate_limit_base(mut self, base: Duration) -> Self {
        self.rate_limit_base = base;
        self
    }
}

/// Exponential backoff between attempts on the same (provider, model) pair.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: RetryConfig,
}

impl BackoffPolicy {
    /// Creates a new backoff policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns true once `attempt` (1-based) has used the whole budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.config.max_retries
    }

    /// Calculates the wait after the 1-based `attempt` failed with `error`.
    pub fn delay_for(&self, attempt: u32, error: &NexusError) -> Duration {
        if let NexusError::RateLimited { retry_after, .. } = error {
            return retry_after.unwrap_or_else(|| self.rate_limit_delay(attempt));
        }
        self.transient_delay(attempt)
    }

    /// `rate_limit_base * 2^attempt`.
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        self.config
            .rate_limit_base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    fn transient_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay =
            self.config.initial_delay.as_millis() as f64 * self.config.multiplier.powi(exponent);

        let delay_ms = base_delay.min(self.config.max_delay.as_millis() as f64);

        // 0-25% random variation
        let delay_ms = if self.config.jitter {
            let jitter = rand::random::<f64>() * 0.25;
            delay_ms * (1.0 + jitter)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
