//! Hot reload of the query policy.
//!
//! The parent directory is watched rather than the file, so editors that
//! save by rename are still seen. Each change re-reads and re-validates the
//! whole file, but only a changed `[query]` section is published.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

use crate::config::loader::load_config;
use crate::config::schema::QueryConfig;

pub struct ConfigWatcher {
    path: PathBuf,
    query_tx: watch::Sender<QueryConfig>,
}

impl ConfigWatcher {
    /// `current` is the query section already in effect.
    pub fn new(path: &Path, current: QueryConfig) -> (Self, watch::Receiver<QueryConfig>) {
        let (query_tx, query_rx) = watch::channel(current);
        (
            Self {
                path: path.to_path_buf(),
                query_tx,
            },
            query_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name: Option<OsString> = self.path.file_name().map(ToOwned::to_owned);
        let path = self.path;
        let query_tx = self.query_tx;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Config watch error");
                    return;
                }
            };
            if !(event.kind.is_modify() || event.kind.is_create()) {
                return;
            }
            if event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
                reload_query_config(&path, &query_tx);
            }
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %dir.display(), "Watching config directory");
        Ok(watcher)
    }
}

/// Re-read `path` and publish its query section if it differs.
///
/// Returns whether a new policy was published. Invalid files are logged and
/// leave the current policy in place.
pub fn reload_query_config(path: &Path, query_tx: &watch::Sender<QueryConfig>) -> bool {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Config reload rejected");
            return false;
        }
    };

    let changed = query_tx.send_if_modified(|current| {
        if *current == config.query {
            return false;
        }
        *current = config.query.clone();
        true
    });
    if changed {
        tracing::info!(path = %path.display(), "Query policy reloaded from config");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_publishes_only_query_changes() {
        let path = std::env::temp_dir().join("prism_query_watcher_reload.toml");
        std::fs::write(&path, "[query]\nstale_time_ms = 1000\ncache_time_ms = 5000\n").unwrap();

        let (tx, mut rx) = watch::channel(QueryConfig::default());
        assert!(reload_query_config(&path, &tx));
        assert_eq!(rx.borrow_and_update().stale_time_ms, 1000);

        // Same query section, different engine section.
        std::fs::write(
            &path,
            "[query]\nstale_time_ms = 1000\ncache_time_ms = 5000\n[engine]\nretries = 7\n",
        )
        .unwrap();
        assert!(!reload_query_config(&path, &tx));
        assert!(!rx.has_changed().unwrap());

        // Fails validation: cache window shorter than stale window.
        std::fs::write(&path, "[query]\nstale_time_ms = 9000\ncache_time_ms = 5000\n").unwrap();
        assert!(!reload_query_config(&path, &tx));
        assert_eq!(rx.borrow().stale_time_ms, 1000);

        std::fs::remove_file(&path).unwrap_or_default();
    }
}
