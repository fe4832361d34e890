//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the query service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Cache windows and retry policy.
    pub query: QueryConfig,

    /// DataPrism engine provider settings.
    pub engine: EngineConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Query cache and retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Freshness window in milliseconds.
    pub stale_time_ms: u64,

    /// Retention window in milliseconds. Must be >= `stale_time_ms`.
    pub cache_time_ms: u64,

    /// Refetch stale queries when the host regains focus.
    pub refetch_on_window_focus: bool,

    /// Maximum number of retries after the first failure.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Per-attempt fetch deadline in milliseconds.
    pub fetch_timeout_ms: u64,

    /// Interval between expired-entry sweeps in milliseconds.
    pub gc_interval_ms: u64,

    /// Snapshot file restored at startup and written at shutdown.
    pub persistence_path: Option<String>,
}

impl QueryConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn cache_time(&self) -> Duration {
        Duration::from_millis(self.cache_time_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 300_000,
            cache_time_ms: 600_000,
            refetch_on_window_focus: false,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            fetch_timeout_ms: 30_000,
            gc_interval_ms: 60_000,
            persistence_path: None,
        }
    }
}

/// DataPrism engine provider configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Load the engine at startup.
    pub enabled: bool,

    /// Base URL the core bundle and its manifest are served from.
    pub core_base_url: String,

    /// Base URL plugin bundles are resolved against.
    pub plugins_base_url: String,

    /// Per-attempt load timeout in milliseconds.
    pub timeout_ms: u64,

    /// Retries after the first failed load attempt.
    pub retries: u32,
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            core_base_url: "http://localhost:3000/dataprism/core/".to_string(),
            plugins_base_url: "http://localhost:3000/dataprism/plugins/".to_string(),
            timeout_ms: 30_000,
            retries: 3,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
