//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay before the next attempt after `failure_count` prior failures (0-based).
///
/// `base * 2^failure_count`, capped at `max_ms`, plus up to 10% jitter.
pub fn retry_delay(failure_count: u32, base_ms: u64, max_ms: u64) -> Duration {
    let factor = 2u64.saturating_pow(failure_count);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}
