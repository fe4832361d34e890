//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Fetch attempt:
//!     → timeouts.rs (every attempt has a deadline)
//!     → On failure: retries.rs (client error? ceiling reached?)
//!     → backoff.rs (how long to wait before the next attempt)
//! ```
//!
//! # Design Decisions
//! - 4xx responses are terminal
//! - Backoff carries up to 10% jitter
//! - The same primitives drive query fetches and engine loading

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::{should_retry, RetryPolicy, RetryPredicate};
pub use timeouts::{with_deadline, DeadlineExceeded};
