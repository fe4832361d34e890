//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field rules.
//! All errors are collected, not just the first.

use std::fmt;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::AppConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let query = &config.query;

    // Serving stale data while revalidating needs the entry to outlive its freshness.
    if query.cache_time_ms < query.stale_time_ms {
        errors.push(ValidationError::new(
            "query.cache_time_ms",
            format!(
                "must be >= stale_time_ms ({} < {})",
                query.cache_time_ms, query.stale_time_ms
            ),
        ));
    }
    if query.retry_max_delay_ms < query.retry_base_delay_ms {
        errors.push(ValidationError::new(
            "query.retry_max_delay_ms",
            "must be >= retry_base_delay_ms",
        ));
    }
    if query.fetch_timeout_ms == 0 {
        errors.push(ValidationError::new("query.fetch_timeout_ms", "must be > 0"));
    }
    if query.gc_interval_ms == 0 {
        errors.push(ValidationError::new("query.gc_interval_ms", "must be > 0"));
    }

    let engine = &config.engine;
    if engine.enabled {
        if let Err(e) = Url::parse(&engine.core_base_url) {
            errors.push(ValidationError::new("engine.core_base_url", e.to_string()));
        }
        if let Err(e) = Url::parse(&engine.plugins_base_url) {
            errors.push(ValidationError::new("engine.plugins_base_url", e.to_string()));
        }
        if engine.timeout_ms == 0 {
            errors.push(ValidationError::new("engine.timeout_ms", "must be > 0"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a valid socket address",
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                "not a valid socket address",
            ));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
