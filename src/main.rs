//! prism-query daemon.
//!
//! ```text
//!                ┌──────────────────────────────────────────────┐
//!                │                 PRISM-QUERY                  │
//!                │                                              │
//!   config.toml ─┼─▶ config ──▶ lifecycle::App                  │
//!                │                 │                            │
//!                │      ┌──────────┼───────────────┐            │
//!                │      ▼          ▼               ▼            │
//!                │   engine     query client     admin API ◀────┼── query-cli
//!                │  (CDN load)  (cache, retry,   (axum)         │
//!                │               dedup, gc)                     │
//!                │                                              │
//!                │   observability: tracing + Prometheus        │
//!                └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use prism_query::config::{load_config, AppConfig};
use prism_query::lifecycle::{wait_for_signal, App};
use prism_query::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "prism-query")]
#[command(about = "Stale-while-revalidate query cache daemon", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the query policy when the config file changes.
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "prism-query starting");

    let watch_path = if args.watch { args.config.as_deref() } else { None };
    let app = App::start(config, watch_path).await?;

    wait_for_signal().await;
    app.shutdown().await;
    Ok(())
}
