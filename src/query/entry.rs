//! Cached query results and their freshness.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::query::clock::millis;
use crate::query::key::QueryKey;

/// Payload stored in the cache. Shared, never copied on read.
pub type QueryData = Arc<serde_json::Value>;

/// Default freshness window.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_millis(300_000);
/// Default retention window.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_millis(600_000);

/// Where an entry sits relative to its freshness and retention windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Inside the freshness window: served as is.
    Fresh,
    /// Past freshness, inside retention: served while a refresh runs.
    Stale,
    /// Past retention: purged, never served.
    Expired,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Expired => "expired",
        }
    }
}

/// Classify an entry fetched at `fetched_at_ms` as seen at `now_ms`.
///
/// A clock that moved backwards counts as zero elapsed time.
pub fn classify_entry(
    fetched_at_ms: u64,
    now_ms: u64,
    stale_time: Duration,
    cache_time: Duration,
) -> Freshness {
    let elapsed = now_ms.saturating_sub(fetched_at_ms);
    if elapsed > millis(cache_time) {
        Freshness::Expired
    } else if elapsed > millis(stale_time) {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// A value in the cache table.
#[derive(Debug, Clone)]
pub struct CachedQueryResult {
    pub key: QueryKey,
    pub value: QueryData,
    pub fetched_at_ms: u64,
    /// Set by explicit invalidation; forces at least `Stale`.
    pub invalidated: bool,
}

impl CachedQueryResult {
    pub fn new(key: QueryKey, value: QueryData, fetched_at_ms: u64) -> Self {
        Self {
            key,
            value,
            fetched_at_ms,
            invalidated: false,
        }
    }

    pub fn freshness(&self, now_ms: u64, stale_time: Duration, cache_time: Duration) -> Freshness {
        match classify_entry(self.fetched_at_ms, now_ms, stale_time, cache_time) {
            Freshness::Fresh if self.invalidated => Freshness::Stale,
            other => other,
        }
    }

    pub fn is_stale(&self, now_ms: u64, stale_time: Duration, cache_time: Duration) -> bool {
        self.freshness(now_ms, stale_time, cache_time) != Freshness::Fresh
    }

    pub fn is_expired(&self, now_ms: u64, cache_time: Duration) -> bool {
        now_ms.saturating_sub(self.fetched_at_ms) > millis(cache_time)
    }
}
