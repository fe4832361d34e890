//! Retry decisions for failed fetches.
//!
//! # Rules
//! - Client errors (status 400-499) are never retried
//! - Everything else (network, timeout, 5xx) is retried while
//!   `failure_count < max_retries`
//!
//! `failure_count` is the number of failures seen before the one being judged,
//! so the first failure is judged with 0 and the default ceiling of 3 allows
//! up to 4 attempts in total.

use std::sync::Arc;
use std::time::Duration;

use crate::config::QueryConfig;
use crate::query::error::{ErrorClass, FetchError};
use crate::resilience::backoff::retry_delay;

/// Default retry ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Caller-supplied retry decision: `(failure_count, error) -> retry?`.
pub type RetryPredicate = Arc<dyn Fn(u32, &FetchError) -> bool + Send + Sync>;

/// Retry decision with the default ceiling.
pub fn should_retry(failure_count: u32, error: &FetchError) -> bool {
    if error.class() == ErrorClass::Client {
        return false;
    }
    failure_count < DEFAULT_MAX_RETRIES
}

/// Retry ceiling and backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }

    pub fn should_retry(&self, failure_count: u32, error: &FetchError) -> bool {
        if error.class() == ErrorClass::Client {
            return false;
        }
        failure_count < self.max_retries
    }

    /// Delay before the retry that follows failure number `failure_count` (0-based).
    pub fn delay_for(&self, failure_count: u32) -> Duration {
        retry_delay(failure_count, self.base_delay_ms, self.max_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}
