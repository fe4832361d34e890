//! Stale-while-revalidate query cache with DataPrism engine loading.

pub mod admin;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod observability;
pub mod query;
pub mod resilience;

pub use config::AppConfig;
pub use lifecycle::{App, Shutdown};
pub use query::{QueryClient, QueryKey};
