//! Retry budget for overloaded portals
//!
//! The platform answers 503 when a portal is over its request quota. Those
//! calls are retried with a linearly growing pause; everything else is
//! returned to the caller untouched.

use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after a 503
    pub retries_on_503: u32,
    /// Pause before the first retry
    pub initial_delay: Duration,
    /// Added to the pause on every further retry
    pub delay_step: Duration,
    /// Cross-host redirects followed per call
    pub max_redirects: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries_on_503: 20,
            initial_delay: Duration::from_millis(500),
            delay_step: Duration::from_millis(250),
            max_redirects: 5,
        }
    }
}

impl RetryConfig {
    /// Conservative config for production
    pub fn conservative() -> Self {
        Self {
            retries_on_503: 5,
            initial_delay: Duration::from_secs(1),
            delay_step: Duration::from_millis(500),
            max_redirects: 2,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            retries_on_503: 0,
            initial_delay: Duration::ZERO,
            delay_step: Duration::ZERO,
            max_redirects: 5,
        }
    }
}

/// Linear backoff schedule for 503 responses
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether another attempt is allowed after `retry_number` retries
    pub fn allows(&self, retry_number: u32) -> bool {
        retry_number < self.config.retries_on_503
    }

    /// Pause before retry `retry_number` (zero based)
    pub fn delay(&self, retry_number: u32) -> Duration {
        self.config.initial_delay + self.config.delay_step * retry_number
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
