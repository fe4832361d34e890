//! Engine handle, status and error definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::schema::EngineConfig;

/// Errors that can occur while loading the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Engine load timed out after {0} ms")]
    Timeout(u64),

    #[error("Engine asset request failed with status {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(String),

    /// The core manifest could not be parsed.
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Engine not available: {0}")]
    NotAvailable(String),
}

impl EngineError {
    /// Bad URLs, bad manifests and 4xx responses will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Timeout(_) | EngineError::Network(_) => true,
            EngineError::Status(status) => !(400..500).contains(status),
            _ => false,
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Manifest published next to the core bundle.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoreManifest {
    pub version: String,
    #[serde(default)]
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub url: String,
}

/// A loaded engine, as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineHandle {
    pub version: String,
    pub core_url: String,
    pub plugins: Vec<PluginDescriptor>,
}

/// Load status exposed through the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "lowercase")]
pub enum EngineStatus {
    Loading,
    Ready,
    Error(String),
}

impl EngineStatus {
    /// Gauge value: 0=loading, 1=ready, 2=error.
    pub fn code(&self) -> u8 {
        match self {
            EngineStatus::Loading => 0,
            EngineStatus::Ready => 1,
            EngineStatus::Error(_) => 2,
        }
    }
}
