//! The query client: cache lookups, deduplicated fetches, retries and revalidation.
//!
//! # Fetch Flow
//! ```text
//! fetch_query(key)
//!     → cache hit, fresh    → return cached value
//!     → cache hit, stale    → return cached value + background refresh
//!     → cache hit, expired  → purge, then fetch
//!     → miss                → fetch
//!
//! fetch (one per key at a time):
//!     attempt → deadline → ok?  → store if generation unchanged
//!                        → err? → retry predicate → backoff → attempt
//! ```

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::QueryConfig;
use crate::observability::metrics;
use crate::query::cache::QueryCache;
use crate::query::clock::{Clock, SystemClock};
use crate::query::entry::{Freshness, QueryData};
use crate::query::error::{FetchError, QueryError, QueryResult};
use crate::query::failure::{FailureRecord, FailureTracker};
use crate::query::fetcher::Fetcher;
use crate::query::key::QueryKey;
use crate::resilience::{with_deadline, RetryPolicy, RetryPredicate};

type SharedFetch = Shared<BoxFuture<'static, Result<QueryData, FetchError>>>;

struct InFlight {
    generation: u64,
    fetch_id: u64,
    future: SharedFetch,
}

/// Cache windows and retry settings in effect. Swapped atomically on reload.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientPolicy {
    pub stale_time: Duration,
    pub cache_time: Duration,
    pub refetch_on_window_focus: bool,
    pub retry: RetryPolicy,
    pub fetch_timeout: Duration,
}

impl ClientPolicy {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            stale_time: config.stale_time(),
            cache_time: config.cache_time(),
            refetch_on_window_focus: config.refetch_on_window_focus,
            retry: RetryPolicy::from_config(config),
            fetch_timeout: config.fetch_timeout(),
        }
    }
}

/// Inspection view of one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryState {
    pub key: String,
    pub freshness: Option<Freshness>,
    pub fetched_at_ms: Option<u64>,
    pub invalidated: bool,
    pub is_fetching: bool,
    pub failure: Option<FailureRecord>,
}

/// Aggregate view of the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub entries: usize,
    pub fresh: usize,
    pub stale: usize,
    pub expired: usize,
    pub in_flight: usize,
    pub failing: usize,
}

struct ClientInner {
    cache: QueryCache,
    failures: FailureTracker,
    in_flight: DashMap<QueryKey, InFlight>,
    fetchers: DashMap<QueryKey, Arc<dyn Fetcher>>,
    policy: ArcSwap<ClientPolicy>,
    retry_predicate: Option<RetryPredicate>,
    clock: Arc<dyn Clock>,
    next_fetch_id: AtomicU64,
}

/// Process-wide query service. Cloning is cheap and shares the same cache.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

pub struct QueryClientBuilder {
    config: QueryConfig,
    clock: Arc<dyn Clock>,
    retry_predicate: Option<RetryPredicate>,
}

impl QueryClientBuilder {
    pub fn config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default status/ceiling rule with a custom decision.
    pub fn retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(u32, &FetchError) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn build(self) -> QueryClient {
        QueryClient {
            inner: Arc::new(ClientInner {
                cache: QueryCache::new(),
                failures: FailureTracker::new(),
                in_flight: DashMap::new(),
                fetchers: DashMap::new(),
                policy: ArcSwap::from_pointee(ClientPolicy::from_config(&self.config)),
                retry_predicate: self.retry_predicate,
                clock: self.clock,
                next_fetch_id: AtomicU64::new(1),
            }),
        }
    }
}

impl QueryClient {
    pub fn new(config: &QueryConfig) -> Self {
        Self::builder().config(config.clone()).build()
    }

    pub fn builder() -> QueryClientBuilder {
        QueryClientBuilder {
            config: QueryConfig::default(),
            clock: Arc::new(SystemClock),
            retry_predicate: None,
        }
    }

    pub fn policy(&self) -> Arc<ClientPolicy> {
        self.inner.policy.load_full()
    }

    /// Apply reloaded settings. Cached entries are reclassified on next access.
    pub fn update_policy(&self, config: &QueryConfig) {
        let next = ClientPolicy::from_config(config);
        if *self.inner.policy.load_full() != next {
            tracing::info!(
                stale_time_ms = config.stale_time_ms,
                cache_time_ms = config.cache_time_ms,
                max_retries = config.max_retries,
                "Query policy updated"
            );
            self.inner.policy.store(Arc::new(next));
        }
    }

    /// Return the value for `key`, fetching it if nothing servable is cached.
    ///
    /// The fetcher is remembered for background refreshes of this key.
    pub async fn fetch_query(
        &self,
        key: &QueryKey,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<QueryData, FetchError> {
        self.inner.fetchers.insert(key.clone(), fetcher.clone());
        let policy = self.inner.policy.load_full();
        let now = self.inner.clock.now_ms();

        if let Some(entry) = self.inner.cache.get(key) {
            match entry.freshness(now, policy.stale_time, policy.cache_time) {
                Freshness::Fresh => {
                    metrics::record_cache_lookup("fresh");
                    return Ok(entry.value);
                }
                Freshness::Stale => {
                    metrics::record_cache_lookup("stale");
                    tracing::debug!(key = %key, "Serving stale entry, revalidating");
                    self.spawn_refresh(key, fetcher);
                    return Ok(entry.value);
                }
                Freshness::Expired => {
                    metrics::record_cache_lookup("expired");
                    tracing::debug!(key = %key, "Entry expired, fetching");
                    self.inner.cache.purge_if_expired(key, now, policy.cache_time);
                }
            }
        } else {
            metrics::record_cache_lookup("miss");
        }

        self.start_fetch(key, fetcher).await
    }

    /// Typed variant of [`fetch_query`](Self::fetch_query).
    pub async fn fetch_query_as<T: DeserializeOwned>(
        &self,
        key: &QueryKey,
        fetcher: Arc<dyn Fetcher>,
    ) -> QueryResult<T> {
        let data = self.fetch_query(key, fetcher).await?;
        T::deserialize(data.as_ref()).map_err(|e| QueryError::Deserialize(e.to_string()))
    }

    /// Warm the cache for `key`. Failures are logged, not returned.
    pub async fn prefetch_query(&self, key: &QueryKey, fetcher: Arc<dyn Fetcher>) {
        if let Err(e) = self.fetch_query(key, fetcher).await {
            tracing::debug!(key = %key, error = %e, "Prefetch failed");
        }
    }

    /// Cached value for `key` unless it has expired.
    pub fn get_query_data(&self, key: &QueryKey) -> Option<QueryData> {
        let policy = self.inner.policy.load_full();
        let now = self.inner.clock.now_ms();
        let entry = self.inner.cache.get(key)?;
        if entry.is_expired(now, policy.cache_time) {
            self.inner.cache.purge_if_expired(key, now, policy.cache_time);
            return None;
        }
        Some(entry.value)
    }

    /// Write a fresh value, discarding any in-flight fetch for the key.
    pub fn set_query_data(&self, key: &QueryKey, value: serde_json::Value) -> QueryData {
        let data = Arc::new(value);
        self.inner.cache.supersede(key);
        self.inner.in_flight.remove(key);
        self.inner
            .cache
            .store(key, data.clone(), self.inner.clock.now_ms());
        self.inner.failures.clear(key);
        metrics::record_cache_size(self.inner.cache.len());
        data
    }

    /// Mark every query under `prefix` stale and refetch those with a known fetcher.
    pub fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
        let keys = self.keys_under(prefix);
        for key in &keys {
            self.inner.cache.supersede(key);
            self.inner.cache.mark_invalidated(key);
        }
        tracing::info!(prefix = %prefix, count = keys.len(), "Invalidated queries");

        for key in &keys {
            let fetcher = self.inner.fetchers.get(key).map(|f| f.value().clone());
            if let Some(fetcher) = fetcher {
                self.spawn_refresh(key, fetcher);
            }
        }
        keys.len()
    }

    /// Drop every query under `prefix`, including fetchers and failure state.
    pub fn remove_queries(&self, prefix: &QueryKey) -> usize {
        let mut keys = self.keys_under(prefix);
        for r in self.inner.fetchers.iter() {
            if r.key().starts_with(prefix) && !keys.contains(r.key()) {
                keys.push(r.key().clone());
            }
        }

        let mut removed = 0;
        for key in &keys {
            self.inner.cache.supersede(key);
            self.inner.in_flight.remove(key);
            self.inner.fetchers.remove(key);
            self.inner.failures.clear(key);
            if self.inner.cache.remove(key).is_some() {
                removed += 1;
            }
            self.inner.cache.prune_generation(key);
        }
        metrics::record_cache_size(self.inner.cache.len());
        tracing::info!(prefix = %prefix, removed, "Removed queries");
        removed
    }

    /// Host regained focus. Refetches stale queries only when enabled.
    pub fn on_window_focus(&self) -> usize {
        let policy = self.inner.policy.load_full();
        if !policy.refetch_on_window_focus {
            tracing::debug!("Window focus refetch disabled");
            return 0;
        }

        let now = self.inner.clock.now_ms();
        let mut refetched = 0;
        for entry in self.inner.cache.snapshot() {
            if entry.freshness(now, policy.stale_time, policy.cache_time) != Freshness::Stale {
                continue;
            }
            let fetcher = self.inner.fetchers.get(&entry.key).map(|f| f.value().clone());
            if let Some(fetcher) = fetcher {
                self.spawn_refresh(&entry.key, fetcher);
                refetched += 1;
            }
        }
        tracing::debug!(refetched, "Window focus refetch");
        refetched
    }

    /// Purge expired entries. Returns how many were removed.
    ///
    /// Failure records older than the retention window go too, and keys left
    /// with no entry, no failure and no fetch in flight lose their fetcher and
    /// generation slot.
    pub fn garbage_collect(&self) -> usize {
        let policy = self.inner.policy.load_full();
        let now = self.inner.clock.now_ms();
        let purged = self.inner.cache.purge_expired(now, policy.cache_time);
        let failures = self.inner.failures.purge_older_than(now, policy.cache_time);

        let mut candidates: Vec<QueryKey> = self.inner.fetchers.iter().map(|r| r.key().clone()).collect();
        candidates.extend(self.inner.cache.generation_keys());
        candidates.sort();
        candidates.dedup();
        let released = candidates
            .iter()
            .filter(|key| self.release_if_idle(key))
            .count();

        metrics::record_cache_size(self.inner.cache.len());
        tracing::debug!(purged = purged.len(), failures, released, "Garbage collected");
        purged.len()
    }

    pub fn query_state(&self, key: &QueryKey) -> Option<QueryState> {
        let policy = self.inner.policy.load_full();
        let now = self.inner.clock.now_ms();
        let entry = self.inner.cache.get(key);
        let is_fetching = self.inner.in_flight.contains_key(key);
        let failure = self.inner.failures.get(key);

        if entry.is_none() && !is_fetching && failure.is_none() {
            return None;
        }

        Some(QueryState {
            key: key.to_string(),
            freshness: entry
                .as_ref()
                .map(|e| e.freshness(now, policy.stale_time, policy.cache_time)),
            fetched_at_ms: entry.as_ref().map(|e| e.fetched_at_ms),
            invalidated: entry.as_ref().is_some_and(|e| e.invalidated),
            is_fetching,
            failure,
        })
    }

    pub fn summary(&self) -> CacheSummary {
        let policy = self.inner.policy.load_full();
        let now = self.inner.clock.now_ms();
        let mut summary = CacheSummary {
            in_flight: self.inner.in_flight.len(),
            failing: self.inner.failures.failing_count(),
            ..CacheSummary::default()
        };
        for entry in self.inner.cache.snapshot() {
            summary.entries += 1;
            match entry.freshness(now, policy.stale_time, policy.cache_time) {
                Freshness::Fresh => summary.fresh += 1,
                Freshness::Stale => summary.stale += 1,
                Freshness::Expired => summary.expired += 1,
            }
        }
        summary
    }

    pub fn save_to_file(&self, path: &Path) -> std::io::Result<usize> {
        self.inner.cache.save_to_file(path)
    }

    pub fn load_from_file(&self, path: &Path) -> std::io::Result<usize> {
        let loaded = self.inner.cache.load_from_file(path)?;
        metrics::record_cache_size(self.inner.cache.len());
        Ok(loaded)
    }

    /// Forget the bookkeeping of a key nothing refers to any more.
    fn release_if_idle(&self, key: &QueryKey) -> bool {
        // The vacant slot keeps a fetch of this key from starting until we are done.
        let Entry::Vacant(_slot) = self.inner.in_flight.entry(key.clone()) else {
            return false;
        };
        if self.inner.cache.get(key).is_some() || self.inner.failures.get(key).is_some() {
            return false;
        }
        self.inner.fetchers.remove(key);
        self.inner.cache.prune_generation(key);
        true
    }

    fn keys_under(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let mut keys = self.inner.cache.matching_keys(prefix);
        for r in self.inner.in_flight.iter() {
            if r.key().starts_with(prefix) && !keys.contains(r.key()) {
                keys.push(r.key().clone());
            }
        }
        keys
    }

    fn spawn_refresh(&self, key: &QueryKey, fetcher: Arc<dyn Fetcher>) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::debug!(key = %key, "No runtime, skipping background refresh");
            return;
        }
        let fetch = self.start_fetch(key, fetcher);
        let key = key.clone();
        tokio::spawn(async move {
            if let Err(e) = fetch.await {
                tracing::warn!(key = %key, error = %e, "Background refresh failed");
            }
        });
    }

    /// Join the in-flight fetch for `key`, or start one.
    fn start_fetch(&self, key: &QueryKey, fetcher: Arc<dyn Fetcher>) -> SharedFetch {
        let slot = self.inner.in_flight.entry(key.clone());
        let generation = self.inner.cache.begin_generation(key);
        match slot {
            Entry::Occupied(mut occupied) => {
                if occupied.get().generation == generation {
                    return occupied.get().future.clone();
                }
                // The running fetch was superseded; it finishes on its own but won't be joined.
                let flight = self.new_flight(key, generation, fetcher);
                let future = flight.future.clone();
                occupied.insert(flight);
                future
            }
            Entry::Vacant(vacant) => {
                let flight = self.new_flight(key, generation, fetcher);
                let future = flight.future.clone();
                vacant.insert(flight);
                future
            }
        }
    }

    fn new_flight(&self, key: &QueryKey, generation: u64, fetcher: Arc<dyn Fetcher>) -> InFlight {
        let fetch_id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let key = key.clone();
        let future = async move { inner.run_fetch(key, generation, fetch_id, fetcher).await }
            .boxed()
            .shared();
        InFlight {
            generation,
            fetch_id,
            future,
        }
    }
}

impl ClientInner {
    async fn run_fetch(
        &self,
        key: QueryKey,
        generation: u64,
        fetch_id: u64,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<QueryData, FetchError> {
        let started = Instant::now();
        let result = self
            .fetch_with_retries(&key, generation, fetch_id, fetcher.as_ref())
            .await;
        self.in_flight
            .remove_if(&key, |_, flight| flight.fetch_id == fetch_id);

        let outcome = match &result {
            Ok(_) => "success",
            Err(FetchError::Superseded) => "superseded",
            Err(_) => "error",
        };
        metrics::record_fetch(outcome, started);
        result
    }

    async fn fetch_with_retries(
        &self,
        key: &QueryKey,
        generation: u64,
        fetch_id: u64,
        fetcher: &dyn Fetcher,
    ) -> Result<QueryData, FetchError> {
        loop {
            let policy = self.policy.load_full();
            let attempt = with_deadline(policy.fetch_timeout, fetcher.fetch(key))
                .await
                .unwrap_or_else(|e| Err(FetchError::Timeout(e.after_ms)));

            // Superseded attempts neither touch the cache nor count as failures.
            if self.cache.generation(key) != generation {
                tracing::debug!(key = %key, "Fetch superseded, discarding result");
                return match attempt {
                    Ok(value) => Ok(Arc::new(value)),
                    Err(_) => Err(FetchError::Superseded),
                };
            }

            match attempt {
                Ok(value) => {
                    let data = Arc::new(value);
                    let now = self.clock.now_ms();
                    if self.cache.store_if_current(key, generation, data.clone(), now) {
                        self.failures.clear_cycle(key, fetch_id);
                        metrics::record_cache_size(self.cache.len());
                        tracing::debug!(key = %key, "Query fetched");
                    }
                    return Ok(data);
                }
                Err(error) => {
                    let failure_count = self
                        .failures
                        .record_failure(key, fetch_id, error.clone(), self.clock.now_ms())
                        - 1;
                    let retry = match &self.retry_predicate {
                        Some(predicate) => predicate(failure_count, &error),
                        None => policy.retry.should_retry(failure_count, &error),
                    };
                    if !retry {
                        tracing::warn!(
                            key = %key,
                            attempts = failure_count + 1,
                            error = %error,
                            "Query failed"
                        );
                        return Err(error);
                    }

                    let delay = policy.retry.delay_for(failure_count);
                    tracing::info!(
                        key = %key,
                        attempt = failure_count + 1,
                        delay = ?delay,
                        error = %error,
                        "Retrying query"
                    );
                    metrics::record_retry();
                    tokio::time::sleep(delay).await;

                    if self.cache.generation(key) != generation {
                        tracing::debug!(key = %key, "Fetch superseded during backoff");
                        return Err(FetchError::Superseded);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::clock::ManualClock;
    use crate::query::fetcher::from_fn;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn fast_config() -> QueryConfig {
        QueryConfig {
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 2,
            ..QueryConfig::default()
        }
    }

    fn client_with_clock(clock: Arc<ManualClock>) -> QueryClient {
        QueryClient::builder()
            .config(fast_config())
            .clock(clock)
            .build()
    }

    /// Counts calls and answers with the call number.
    fn counting_fetcher(calls: Arc<AtomicU32>) -> Arc<dyn Fetcher> {
        from_fn(move |_key| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, FetchError>(json!(n))
            }
        })
    }

    fn failing_fetcher(calls: Arc<AtomicU32>, status: u16) -> Arc<dyn Fetcher> {
        from_fn(move |_key| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<serde_json::Value, _>(FetchError::Status {
                    status,
                    message: "failure".into(),
                })
            }
        })
    }

    #[tokio::test]
    async fn test_fresh_hit_does_not_refetch() {
        let clock = Arc::new(ManualClock::new(0));
        let client = client_with_clock(clock.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let key = QueryKey::from("todos");

        let first = client.fetch_query(&key, counting_fetcher(calls.clone())).await.unwrap();
        clock.advance(Duration::from_secs(60));
        let second = client.fetch_query(&key, counting_fetcher(calls.clone())).await.unwrap();

        assert_eq!(*first, json!(1));
        assert_eq!(*second, json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_served_then_revalidated() {
        let clock = Arc::new(ManualClock::new(0));
        let client = client_with_clock(clock.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let key = QueryKey::from("todos");

        client.fetch_query(&key, counting_fetcher(calls.clone())).await.unwrap();
        clock.set(301_000);

        let served = client.fetch_query(&key, counting_fetcher(calls.clone())).await.unwrap();
        assert_eq!(*served, json!(1), "stale value served immediately");

        for _ in 0..50 {
            if client.get_query_data(&key).is_some_and(|v| *v == json!(2)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*client.get_query_data(&key).unwrap(), json!(2));
        assert_eq!(client.query_state(&key).unwrap().freshness, Some(Freshness::Fresh));
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let clock = Arc::new(ManualClock::new(0));
        let client = client_with_clock(clock.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let key = QueryKey::from("todos");

        client.fetch_query(&key, counting_fetcher(calls.clone())).await.unwrap();
        clock.set(601_000);
        assert!(client.get_query_data(&key).is_none());

        let value = client.fetch_query(&key, counting_fetcher(calls.clone())).await.unwrap();
        assert_eq!(*value, json!(2));
    }

    #[tokio::test]
    async fn test_transient_failures_retried_four_attempts() {
        let client = client_with_clock(Arc::new(ManualClock::new(0)));
        let calls = Arc::new(AtomicU32::new(0));
        let key = QueryKey::from("flaky");

        let err = client
            .fetch_query(&key, failing_fetcher(calls.clone(), 503))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let state = client.query_state(&key).unwrap();
        assert_eq!(state.failure.unwrap().count, 4);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let client = client_with_clock(Arc::new(ManualClock::new(0)));
        let calls = Arc::new(AtomicU32::new(0));

        let err = client
            .fetch_query(&QueryKey::from("missing"), failing_fetcher(calls.clone(), 404))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_record_cleared_on_success() {
        let client = client_with_clock(Arc::new(ManualClock::new(0)));
        let calls = Arc::new(AtomicU32::new(0));
        let key = QueryKey::from("recovering");

        let c = calls.clone();
        let fetcher = from_fn(move |_key| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::Network("connection reset".into()))
                } else {
                    Ok::<_, FetchError>(json!("ok"))
                }
            }
        });

        let value = client.fetch_query(&key, fetcher).await.unwrap();
        assert_eq!(*value, json!("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(client.query_state(&key).unwrap().failure.is_none());
    }

    #[tokio::test]
    async fn test_custom_retry_predicate() {
        let client = QueryClient::builder()
            .config(fast_config())
            .retry_predicate(|failure_count, _error| failure_count < 1)
            .build();
        let calls = Arc::new(AtomicU32::new(0));

        client
            .fetch_query(&QueryKey::from("x"), failing_fetcher(calls.clone(), 500))
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_deduplicated() {
        let client = client_with_clock(Arc::new(ManualClock::new(0)));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let fetcher = from_fn(move |_key| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, FetchError>(json!("shared"))
            }
        });
        let key = QueryKey::from("dedup");

        let (a, b, c2) = tokio::join!(
            client.fetch_query(&key, fetcher.clone()),
            client.fetch_query(&key, fetcher.clone()),
            client.fetch_query(&key, fetcher.clone()),
        );
        assert_eq!(*a.unwrap(), json!("shared"));
        assert_eq!(*b.unwrap(), json!("shared"));
        assert_eq!(*c2.unwrap(), json!("shared"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.summary().in_flight, 0);
    }

    #[tokio::test]
    async fn test_superseded_response_does_not_resurrect_entry() {
        let client = client_with_clock(Arc::new(ManualClock::new(0)));
        let fetcher = from_fn(|_key| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, FetchError>(json!("late"))
        });
        let key = QueryKey::from("slow");

        let pending = {
            let client = client.clone();
            let key = key.clone();
            tokio::spawn(async move { client.fetch_query(&key, fetcher).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        client.remove_queries(&key);

        let late = pending.await.unwrap().unwrap();
        assert_eq!(*late, json!("late"));
        assert!(client.get_query_data(&key).is_none());
    }

    #[tokio::test]
    async fn test_set_query_data_wins_over_in_flight() {
        let client = client_with_clock(Arc::new(ManualClock::new(0)));
        let fetcher = from_fn(|_key| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, FetchError>(json!("fetched"))
        });
        let key = QueryKey::from("todo");

        let pending = {
            let client = client.clone();
            let key = key.clone();
            tokio::spawn(async move { client.fetch_query(&key, fetcher).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        client.set_query_data(&key, json!("manual"));

        pending.await.unwrap().unwrap();
        assert_eq!(*client.get_query_data(&key).unwrap(), json!("manual"));
    }

    #[tokio::test]
    async fn test_invalidate_marks_stale_and_refetches() {
        let client = client_with_clock(Arc::new(ManualClock::new(0)));
        let calls = Arc::new(AtomicU32::new(0));
        let todos = QueryKey::from("todos/1");
        let users = QueryKey::from("users/1");

        client.fetch_query(&todos, counting_fetcher(calls.clone())).await.unwrap();
        client.set_query_data(&users, json!("u"));

        assert_eq!(client.invalidate_queries(&QueryKey::from("todos")), 1);

        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) == 2 && client.summary().in_flight == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*client.get_query_data(&todos).unwrap(), json!(2));
        assert!(!client.query_state(&todos).unwrap().invalidated);
        assert_eq!(client.query_state(&users).unwrap().freshness, Some(Freshness::Fresh));
    }

    #[tokio::test]
    async fn test_window_focus_disabled_by_default() {
        let clock = Arc::new(ManualClock::new(0));
        let client = client_with_clock(clock.clone());
        let calls = Arc::new(AtomicU32::new(0));

        client
            .fetch_query(&QueryKey::from("a"), counting_fetcher(calls.clone()))
            .await
            .unwrap();
        clock.set(400_000);

        assert_eq!(client.on_window_focus(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        client.update_policy(&QueryConfig {
            refetch_on_window_focus: true,
            ..fast_config()
        });
        assert_eq!(client.on_window_focus(), 1);
    }

    #[tokio::test]
    async fn test_garbage_collect_and_summary() {
        let clock = Arc::new(ManualClock::new(0));
        let client = client_with_clock(clock.clone());

        client.set_query_data(&QueryKey::from("old"), json!(1));
        clock.set(350_000);
        client.set_query_data(&QueryKey::from("mid"), json!(2));
        clock.set(700_000);
        client.set_query_data(&QueryKey::from("new"), json!(3));

        let summary = client.summary();
        assert_eq!(summary.entries, 3);
        assert_eq!(summary.fresh, 1);
        assert_eq!(summary.stale, 1);
        assert_eq!(summary.expired, 1);

        assert_eq!(client.garbage_collect(), 1);
        assert_eq!(client.summary().entries, 2);
    }

    #[tokio::test]
    async fn test_fetch_query_as_typed() {
        #[derive(serde::Deserialize)]
        struct Todo {
            id: u32,
            done: bool,
        }

        let client = client_with_clock(Arc::new(ManualClock::new(0)));
        let fetcher = from_fn(|_key| async { Ok::<_, FetchError>(json!({"id": 7, "done": true})) });
        let todo: Todo = client
            .fetch_query_as(&QueryKey::from("todos/7"), fetcher)
            .await
            .unwrap();
        assert_eq!(todo.id, 7);
        assert!(todo.done);

        let wrong: QueryResult<Vec<String>> = client
            .fetch_query_as(&QueryKey::from("todos/8"), from_fn(|_key| async { Ok::<_, FetchError>(json!(null)) }))
            .await;
        assert!(matches!(wrong, Err(QueryError::Deserialize(_))));
    }

    #[tokio::test]
    async fn test_attempt_deadline() {
        let client = QueryClient::builder()
            .config(QueryConfig {
                fetch_timeout_ms: 10,
                max_retries: 0,
                ..fast_config()
            })
            .build();
        let fetcher = from_fn(|_key| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, FetchError>(json!(null))
        });

        let err = client
            .fetch_query(&QueryKey::from("hang"), fetcher)
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout(10));
    }

    #[tokio::test]
    async fn test_garbage_collect_releases_idle_keys() {
        let clock = Arc::new(ManualClock::new(0));
        let client = client_with_clock(clock.clone());
        let calls = Arc::new(AtomicU32::new(0));

        for i in 0..100 {
            let key = QueryKey::new(["items".to_string(), i.to_string()]);
            let fetcher = if i % 2 == 0 {
                counting_fetcher(calls.clone())
            } else {
                failing_fetcher(calls.clone(), 404)
            };
            let _ = client.fetch_query(&key, fetcher).await;
        }
        assert_eq!(client.summary().entries, 50);
        assert_eq!(client.summary().failing, 50);
        assert_eq!(client.inner.fetchers.len(), 100);

        clock.set(10_000_000);
        assert_eq!(client.garbage_collect(), 50);

        assert_eq!(client.summary(), CacheSummary::default());
        assert_eq!(client.inner.fetchers.len(), 0);
        assert_eq!(client.inner.cache.generation_count(), 0);
    }

    #[tokio::test]
    async fn test_garbage_collect_keeps_live_keys() {
        let clock = Arc::new(ManualClock::new(0));
        let client = client_with_clock(clock.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let key = QueryKey::from("live");

        client.fetch_query(&key, counting_fetcher(calls.clone())).await.unwrap();
        clock.set(100_000);
        assert_eq!(client.garbage_collect(), 0);

        assert_eq!(client.inner.fetchers.len(), 1);
        assert_eq!(client.inner.cache.generation_count(), 1);
        assert!(client.get_query_data(&key).is_some());
    }

    #[tokio::test]
    async fn test_removed_during_backoff_is_superseded() {
        let client = QueryClient::builder()
            .config(QueryConfig {
                retry_base_delay_ms: 200,
                retry_max_delay_ms: 200,
                ..fast_config()
            })
            .clock(Arc::new(ManualClock::new(0)))
            .build();
        let calls = Arc::new(AtomicU32::new(0));
        let key = QueryKey::from("flaky");

        let pending = {
            let client = client.clone();
            let key = key.clone();
            let fetcher = failing_fetcher(calls.clone(), 503);
            tokio::spawn(async move { client.fetch_query(&key, fetcher).await })
        };
        for _ in 0..40 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        client.remove_queries(&key);

        let result = pending.await.unwrap();
        assert_eq!(result.unwrap_err(), FetchError::Superseded);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no attempt after the supersede");
        assert!(client.query_state(&key).is_none());
    }
}
