//! Per-key retry delays for the work queue

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_SECS};

/// Backoff bounds for failed work items
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

/// Decides how long a failed key waits before it is re-added
pub trait RateLimiter: Send + Sync {
    /// Delay for the next retry of `key`; records one more failure
    fn when(&self, key: &str) -> Duration;

    /// Clear the failure history of `key`
    fn forget(&self, key: &str);

    /// Number of times `key` has been requeued since it was last forgotten
    fn num_requeues(&self, key: &str) -> u32;
}

/// `base * 2^failures`, capped at `max`, tracked per key
pub struct ExponentialFailureRateLimiter {
    config: BackoffConfig,
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialFailureRateLimiter {
    /// Create a limiter with the given bounds
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn delay_for(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.config.base_delay.checked_mul(factor))
            .map_or(self.config.max_delay, |d| d.min(self.config.max_delay))
    }
}

impl Default for ExponentialFailureRateLimiter {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl RateLimiter for ExponentialFailureRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.to_string()).or_insert(0);
        let delay = self.delay_for(*count);
        *count = count.saturating_add(1);
        delay
    }

    fn forget(&self, key: &str) {
        self.failures.lock().remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}
