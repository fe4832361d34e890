//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Metrics → Engine load (background) → Query client
//!     → Restore cache → Collector → Config watcher → Admin listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast stop → Join tasks → Persist cache
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{App, StartupError};
