//! DataPrism provider: owns the engine handle and publishes its load status.

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tokio::sync::watch;

use crate::engine::loader::EngineLoader;
use crate::engine::types::{EngineConfig, EngineError, EngineHandle, EngineResult, EngineStatus};
use crate::observability::metrics;
use crate::resilience::backoff::retry_delay;
use crate::resilience::with_deadline;

const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 5_000;

pub struct DataPrismProvider {
    config: EngineConfig,
    status: watch::Sender<EngineStatus>,
    engine: ArcSwapOption<EngineHandle>,
}

impl DataPrismProvider {
    pub fn new(config: EngineConfig) -> Self {
        let (status, _) = watch::channel(EngineStatus::Loading);
        Self {
            config,
            status,
            engine: ArcSwapOption::empty(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// The loaded engine, once status is `Ready`.
    pub fn engine(&self) -> Option<Arc<EngineHandle>> {
        self.engine.load_full()
    }

    /// Load the engine, retrying transient failures.
    ///
    /// Runs at most `retries + 1` attempts, each bounded by the configured timeout.
    pub async fn initialize(&self, loader: &dyn EngineLoader) -> EngineResult<Arc<EngineHandle>> {
        self.set_status(EngineStatus::Loading);
        tracing::info!(
            core_base_url = %self.config.core_base_url,
            retries = self.config.retries,
            "Loading engine"
        );

        let mut attempt = 0;
        let error = loop {
            let result = with_deadline(self.config.timeout(), loader.load(&self.config))
                .await
                .unwrap_or_else(|e| Err(EngineError::Timeout(e.after_ms)));

            match result {
                Ok(handle) => {
                    let handle = Arc::new(handle);
                    self.engine.store(Some(handle.clone()));
                    self.set_status(EngineStatus::Ready);
                    tracing::info!(
                        version = %handle.version,
                        plugins = handle.plugins.len(),
                        "Engine ready"
                    );
                    return Ok(handle);
                }
                Err(e) if attempt < self.config.retries && e.is_retryable() => {
                    let delay = retry_delay(attempt, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS);
                    tracing::warn!(attempt = attempt + 1, delay = ?delay, error = %e, "Engine load failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        tracing::error!(error = %error, attempts = attempt + 1, "Engine failed to load");
        self.set_status(EngineStatus::Error(error.to_string()));
        Err(error)
    }

    /// Settle the status for a provider that will never load.
    pub fn mark_disabled(&self) {
        tracing::info!("Engine loading disabled");
        self.set_status(EngineStatus::Error("disabled by configuration".into()));
    }

    /// Wait until the engine is ready or has failed.
    pub async fn wait_ready(&self) -> EngineResult<Arc<EngineHandle>> {
        let mut rx = self.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                EngineStatus::Ready => {
                    return self
                        .engine()
                        .ok_or_else(|| EngineError::NotAvailable("handle missing".into()))
                }
                EngineStatus::Error(message) => return Err(EngineError::NotAvailable(message)),
                EngineStatus::Loading => {}
            }
            rx.changed()
                .await
                .map_err(|_| EngineError::NotAvailable("provider dropped".into()))?;
        }
    }

    fn set_status(&self, status: EngineStatus) {
        metrics::record_engine_status(status.code());
        self.status.send_replace(status);
    }
}
