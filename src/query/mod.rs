//! Query caching subsystem.
//!
//! # Data Flow
//! ```text
//! caller
//!     → client.rs (lookup, dedup, revalidation)
//!         → cache.rs (entries + generations)
//!         → entry.rs (fresh / stale / expired)
//!         → fetcher.rs (one attempt against the data source)
//!         → failure.rs (consecutive failures per key)
//!         → resilience (retry decision, backoff, deadline)
//!
//! gc.rs sweeps expired entries on an interval.
//! ```
//!
//! # Design Decisions
//! - Values are `Arc<serde_json::Value>`; readers never copy payloads
//! - One in-flight fetch per key; late callers join it
//! - Generations stop superseded fetches from writing into the cache

pub mod cache;
pub mod client;
pub mod clock;
pub mod entry;
pub mod error;
pub mod failure;
pub mod fetcher;
pub mod gc;
pub mod key;

pub use client::{CacheSummary, ClientPolicy, QueryClient, QueryClientBuilder, QueryState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{classify_entry, CachedQueryResult, Freshness, QueryData};
pub use error::{ErrorClass, FetchError, QueryError, QueryResult};
pub use failure::FailureRecord;
pub use fetcher::{from_fn, Fetcher, HttpFetcher};
pub use gc::CacheCollector;
pub use key::QueryKey;
