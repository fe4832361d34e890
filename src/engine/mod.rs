//! DataPrism engine integration.
//!
//! The engine itself is an external collaborator. This module only loads it
//! and exposes its handle and load status to the rest of the process.
//!
//! # Data Flow
//! ```text
//! EngineConfig
//!     → provider.rs (status: loading → ready | error)
//!         → loader.rs (one load attempt: manifest + plugin resolution)
//!         → resilience (deadline per attempt, backoff between attempts)
//!     → consumers: engine() / subscribe() / wait_ready()
//! ```
//!
//! # Design Decisions
//! - A failed load is reported through status, not by aborting startup
//! - Loading is behind a trait so tests and embedders can supply their own loader

pub mod loader;
pub mod provider;
pub mod types;

pub use loader::{EngineLoader, HttpEngineLoader};
pub use provider::DataPrismProvider;
pub use types::{EngineError, EngineHandle, EngineResult, EngineStatus, PluginDescriptor};
