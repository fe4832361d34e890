//! Periodic sweep of expired cache entries.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::query::client::QueryClient;

pub struct CacheCollector {
    client: QueryClient,
    interval: Duration,
}

impl CacheCollector {
    pub fn new(client: QueryClient, interval: Duration) -> Self {
        Self { client, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?self.interval, "Cache collector starting");

        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately; nothing can be expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = self.client.garbage_collect();
                    if purged > 0 {
                        tracing::debug!(purged, "Purged expired queries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache collector received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
