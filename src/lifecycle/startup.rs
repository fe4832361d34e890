//! Startup orchestration.
//!
//! Subsystems start in dependency order: metrics, engine load, query
//! client, background collector, config reload, admin listener. The admin
//! listener binds last so it only answers once the client exists.

use notify::RecommendedWatcher;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{admin_router, AdminState};
use crate::config::validation::validate_config;
use crate::config::watcher::ConfigWatcher;
use crate::config::{AppConfig, ConfigError};
use crate::engine::{DataPrismProvider, EngineLoader, HttpEngineLoader};
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::query::{CacheCollector, QueryClient};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),
}

/// A running instance: the query client plus its background tasks.
pub struct App {
    client: QueryClient,
    engine: Arc<DataPrismProvider>,
    shutdown: Arc<Shutdown>,
    tasks: Vec<JoinHandle<()>>,
    engine_task: Option<JoinHandle<()>>,
    admin_addr: Option<SocketAddr>,
    persistence_path: Option<PathBuf>,
    _watcher: Option<RecommendedWatcher>,
}

impl App {
    pub async fn start(config: AppConfig, config_path: Option<&Path>) -> Result<Self, StartupError> {
        Self::start_with_loader(config, config_path, Arc::new(HttpEngineLoader::new())).await
    }

    pub async fn start_with_loader(
        config: AppConfig,
        config_path: Option<&Path>,
        loader: Arc<dyn EngineLoader>,
    ) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse::<SocketAddr>() {
                Ok(addr) => metrics::init_metrics(addr),
                Err(e) => tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    error = %e,
                    "Failed to parse metrics address"
                ),
            }
        }

        let shutdown = Arc::new(Shutdown::new());
        let mut tasks = Vec::new();

        // Engine load failures only surface through the provider's status.
        let engine = Arc::new(DataPrismProvider::new(config.engine.clone()));
        let engine_task = if config.engine.enabled {
            let engine = engine.clone();
            Some(tokio::spawn(async move {
                let _ = engine.initialize(loader.as_ref()).await;
            }))
        } else {
            engine.mark_disabled();
            None
        };

        let client = QueryClient::new(&config.query);
        let persistence_path = config.query.persistence_path.as_ref().map(PathBuf::from);
        if let Some(path) = &persistence_path {
            match client.load_from_file(path) {
                Ok(restored) => tracing::info!(path = %path.display(), restored, "Restored query cache"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to restore query cache"),
            }
        }

        let collector = CacheCollector::new(client.clone(), config.query.gc_interval());
        tasks.push(tokio::spawn(collector.run(shutdown.subscribe())));

        let watcher = match config_path {
            Some(path) => {
                let (watcher, mut updates) = ConfigWatcher::new(path, config.query.clone());
                let watcher = watcher.run()?;
                let client = client.clone();
                let mut stop = shutdown.subscribe();
                tasks.push(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            changed = updates.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                                let query = updates.borrow_and_update().clone();
                                client.update_policy(&query);
                            }
                            _ = stop.recv() => break,
                        }
                    }
                }));
                Some(watcher)
            }
            None => None,
        };

        let admin_addr = if config.admin.enabled {
            let address = config.admin.bind_address.clone();
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|source| StartupError::Bind {
                    address: address.clone(),
                    source,
                })?;
            let local_addr = listener.local_addr().map_err(|source| StartupError::Bind {
                address,
                source,
            })?;

            let router = admin_router(AdminState::new(
                client.clone(),
                engine.clone(),
                &config.admin.api_key,
            ));
            let mut stop = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "Admin server failed");
                }
                tracing::info!("Admin server stopped");
            }));
            tracing::info!(address = %local_addr, "Admin API listening");
            Some(local_addr)
        } else {
            None
        };

        tracing::info!(
            stale_time_ms = config.query.stale_time_ms,
            cache_time_ms = config.query.cache_time_ms,
            engine_enabled = config.engine.enabled,
            "prism-query started"
        );

        Ok(Self {
            client,
            engine,
            shutdown,
            tasks,
            engine_task,
            admin_addr,
            persistence_path,
            _watcher: watcher,
        })
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    pub fn engine(&self) -> &Arc<DataPrismProvider> {
        &self.engine
    }

    /// Bound admin address, if the admin API is enabled.
    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Stop background tasks, then persist the cache if configured.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        self.shutdown.trigger();

        if let Some(task) = self.engine_task {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }

        if let Some(path) = &self.persistence_path {
            match self.client.save_to_file(path) {
                Ok(saved) => tracing::info!(path = %path.display(), saved, "Persisted query cache"),
                Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to persist query cache"),
            }
        }
        tracing::info!("Shutdown complete");
    }
}
