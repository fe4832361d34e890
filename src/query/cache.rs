//! The query cache table.
//!
//! Entries and per-key generations live in separate concurrent maps. Lock
//! order is always generations before entries; nothing holds an entry
//! guard while touching the generations map.
//!
//! Generations come from one counter shared by all keys and start at 1. A
//! missing slot reads as 0, so a slot can be dropped without any earlier
//! fetch ever matching it again.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::query::entry::{CachedQueryResult, QueryData};
use crate::query::key::QueryKey;

/// On-disk form of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    key: QueryKey,
    value: serde_json::Value,
    fetched_at_ms: u64,
}

#[derive(Debug, Default)]
pub struct QueryCache {
    entries: DashMap<QueryKey, CachedQueryResult>,
    /// Replaced whenever in-flight results for a key must be discarded.
    generations: DashMap<QueryKey, u64>,
    last_generation: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &QueryKey) -> Option<CachedQueryResult> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    fn next_generation(&self) -> u64 {
        self.last_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current generation of `key`, or 0 if it has no slot.
    pub fn generation(&self, key: &QueryKey) -> u64 {
        self.generations.get(key).map(|g| *g).unwrap_or(0)
    }

    /// Generation a new fetch of `key` runs under. Creates the slot if needed.
    pub fn begin_generation(&self, key: &QueryKey) -> u64 {
        *self
            .generations
            .entry(key.clone())
            .or_insert_with(|| self.next_generation())
    }

    /// Invalidate every fetch started under the current generation.
    pub fn supersede(&self, key: &QueryKey) {
        if let Some(mut generation) = self.generations.get_mut(key) {
            *generation = self.next_generation();
        }
    }

    /// Drop the generation slot of `key` unless it still has an entry.
    pub fn prune_generation(&self, key: &QueryKey) -> bool {
        self.generations
            .remove_if(key, |_, _| !self.entries.contains_key(key))
            .is_some()
    }

    pub fn generation_keys(&self) -> Vec<QueryKey> {
        self.generations.iter().map(|r| r.key().clone()).collect()
    }

    pub fn generation_count(&self) -> usize {
        self.generations.len()
    }

    /// Unconditional write.
    pub fn store(&self, key: &QueryKey, value: QueryData, now_ms: u64) {
        self.entries
            .insert(key.clone(), CachedQueryResult::new(key.clone(), value, now_ms));
    }

    /// Write only if no supersede happened since `generation` was read.
    pub fn store_if_current(
        &self,
        key: &QueryKey,
        generation: u64,
        value: QueryData,
        now_ms: u64,
    ) -> bool {
        // Holding the generation guard blocks a concurrent supersede until the write lands.
        let Some(current) = self.generations.get(key) else {
            return false;
        };
        if *current != generation {
            return false;
        }
        self.store(key, value, now_ms);
        drop(current);
        true
    }

    pub fn mark_invalidated(&self, key: &QueryKey) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.invalidated = true;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &QueryKey) -> Option<CachedQueryResult> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Remove the entry if it has outlived `cache_time`.
    pub fn purge_if_expired(&self, key: &QueryKey, now_ms: u64, cache_time: Duration) -> bool {
        self.entries
            .remove_if(key, |_, entry| entry.is_expired(now_ms, cache_time))
            .is_some()
    }

    /// Remove every expired entry, returning the purged keys.
    pub fn purge_expired(&self, now_ms: u64, cache_time: Duration) -> Vec<QueryKey> {
        let mut purged = Vec::new();
        self.entries.retain(|key, entry| {
            let expired = entry.is_expired(now_ms, cache_time);
            if expired {
                purged.push(key.clone());
            }
            !expired
        });
        purged
    }

    pub fn matching_keys(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<CachedQueryResult> {
        self.entries.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write all entries to `path` as JSON.
    pub fn save_to_file(&self, path: &Path) -> std::io::Result<usize> {
        let persisted: Vec<PersistedEntry> = self
            .entries
            .iter()
            .map(|r| PersistedEntry {
                key: r.key().clone(),
                value: r.value().value.as_ref().clone(),
                fetched_at_ms: r.value().fetched_at_ms,
            })
            .collect();

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &persisted)?;
        tracing::info!(path = ?path, entries = persisted.len(), "Saved query cache");
        Ok(persisted.len())
    }

    /// Merge entries from a file written by [`save_to_file`](Self::save_to_file).
    ///
    /// A missing file is not an error. Existing entries that are newer win.
    pub fn load_from_file(&self, path: &Path) -> std::io::Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let reader = BufReader::new(File::open(path)?);
        let persisted: Vec<PersistedEntry> = serde_json::from_reader(reader)?;

        let mut loaded = 0;
        for item in persisted {
            let newer_present = self
                .entries
                .get(&item.key)
                .is_some_and(|existing| existing.fetched_at_ms >= item.fetched_at_ms);
            if newer_present {
                continue;
            }
            self.store(&item.key, Arc::new(item.value), item.fetched_at_ms);
            loaded += 1;
        }
        tracing::info!(path = ?path, entries = loaded, "Loaded query cache");
        Ok(loaded)
    }
}
