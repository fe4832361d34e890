//! Engine loaders.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use url::Url;

use crate::engine::types::{
    CoreManifest, EngineConfig, EngineError, EngineHandle, EngineResult, PluginDescriptor,
};

/// Produces an engine handle from its configuration. One call is one attempt.
pub trait EngineLoader: Send + Sync {
    fn load<'a>(&'a self, config: &'a EngineConfig) -> BoxFuture<'a, EngineResult<EngineHandle>>;
}

/// Parse a base URL, making sure relative joins keep its last segment.
pub fn base_url(raw: &str) -> EngineResult<Url> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|e| EngineError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Reads `manifest.json` from the core base URL and resolves plugins.
#[derive(Debug, Clone, Default)]
pub struct HttpEngineLoader {
    client: reqwest::Client,
}

impl HttpEngineLoader {
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch_manifest(&self, core: &Url) -> EngineResult<CoreManifest> {
        let url = core.join("manifest.json").map_err(|e| EngineError::InvalidUrl {
            url: core.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Status(response.status().as_u16()));
        }

        response
            .json::<CoreManifest>()
            .await
            .map_err(|e| EngineError::Manifest(e.to_string()))
    }
}

impl EngineLoader for HttpEngineLoader {
    fn load<'a>(&'a self, config: &'a EngineConfig) -> BoxFuture<'a, EngineResult<EngineHandle>> {
        async move {
            let core = base_url(&config.core_base_url)?;
            let plugins_base = base_url(&config.plugins_base_url)?;

            let manifest = self.fetch_manifest(&core).await?;

            let plugins = manifest
                .plugins
                .iter()
                .map(|name| {
                    plugins_base
                        .join(name)
                        .map(|url| PluginDescriptor {
                            name: name.clone(),
                            url: url.to_string(),
                        })
                        .map_err(|e| EngineError::Manifest(format!("plugin '{name}': {e}")))
                })
                .collect::<EngineResult<Vec<_>>>()?;

            Ok(EngineHandle {
                version: manifest.version,
                core_url: core.to_string(),
                plugins,
            })
        }
        .boxed()
    }
}
