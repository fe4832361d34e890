//! Per-key consecutive failure tracking.
//!
//! # Lifecycle
//! ```text
//! first failure      → record created (count = 1)
//! further failures   → count incremented, last_error replaced
//! success            → record cleared
//! new fetch cycle    → record from the previous cycle is discarded
//! older than cache   → record dropped by garbage collection
//! ```

use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;

use crate::query::clock::millis;
use crate::query::error::FetchError;
use crate::query::key::QueryKey;

/// Consecutive failures of one query key within its current fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub count: u32,
    #[serde(serialize_with = "serialize_error")]
    pub last_error: FetchError,
    /// Fetch cycle the failures belong to.
    pub fetch_id: u64,
    pub failed_at_ms: u64,
}

impl FailureRecord {
    pub fn last_status(&self) -> Option<u16> {
        self.last_error.status()
    }
}

fn serialize_error<S: serde::Serializer>(error: &FetchError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

#[derive(Debug, Default)]
pub struct FailureTracker {
    records: DashMap<QueryKey, FailureRecord>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the new consecutive count.
    ///
    /// A record left behind by an earlier fetch cycle does not count.
    pub fn record_failure(
        &self,
        key: &QueryKey,
        fetch_id: u64,
        error: FetchError,
        now_ms: u64,
    ) -> u32 {
        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| FailureRecord {
                count: 0,
                last_error: error.clone(),
                fetch_id,
                failed_at_ms: now_ms,
            });

        if record.fetch_id != fetch_id {
            record.count = 0;
            record.fetch_id = fetch_id;
        }
        record.count += 1;
        record.last_error = error;
        record.failed_at_ms = now_ms;
        record.count
    }

    pub fn clear(&self, key: &QueryKey) {
        self.records.remove(key);
    }

    /// Drop the record only if it belongs to `fetch_id`.
    pub fn clear_cycle(&self, key: &QueryKey, fetch_id: u64) {
        self.records.remove_if(key, |_, record| record.fetch_id == fetch_id);
    }

    pub fn get(&self, key: &QueryKey) -> Option<FailureRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Drop records whose last failure is older than `max_age`.
    pub fn purge_older_than(&self, now_ms: u64, max_age: Duration) -> usize {
        let max_age = millis(max_age);
        let before = self.records.len();
        self.records
            .retain(|_, record| now_ms.saturating_sub(record.failed_at_ms) <= max_age);
        before.saturating_sub(self.records.len())
    }

    /// Number of keys with at least one recorded failure.
    pub fn failing_count(&self) -> usize {
        self.records.len()
    }
}
