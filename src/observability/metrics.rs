//! Metrics collection and exposition.
//!
//! # Metrics
//! - `query_cache_lookups_total` (counter): lookups by result (fresh, stale, expired, miss)
//! - `query_fetches_total` (counter): completed fetches by outcome
//! - `query_fetch_duration_seconds` (histogram): fetch latency including retries
//! - `query_retries_total` (counter): retry attempts scheduled
//! - `query_cache_entries` (gauge): entries currently cached
//! - `engine_status` (gauge): 0=loading, 1=ready, 2=error
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_lookup(result: &'static str) {
    counter!("query_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_fetch(outcome: &'static str, started: Instant) {
    counter!("query_fetches_total", "outcome" => outcome).increment(1);
    histogram!("query_fetch_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_retry() {
    counter!("query_retries_total").increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("query_cache_entries").set(entries as f64);
}

pub fn record_engine_status(code: u8) {
    gauge!("engine_status").set(f64::from(code));
}
