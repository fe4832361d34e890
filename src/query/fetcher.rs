//! Data sources for queries.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;
use url::Url;

use crate::query::error::FetchError;
use crate::query::key::QueryKey;

/// Produces the value for a query key. One call is one attempt.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, Result<serde_json::Value, FetchError>>;
}

/// Adapts an async closure into a [`Fetcher`].
pub struct FnFetcher<F>(F);

impl<F, Fut> Fetcher for FnFetcher<F>
where
    F: Fn(QueryKey) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, FetchError>> + Send + 'static,
{
    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, Result<serde_json::Value, FetchError>> {
        (self.0)(key.clone()).boxed()
    }
}

pub fn from_fn<F, Fut>(f: F) -> Arc<dyn Fetcher>
where
    F: Fn(QueryKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, FetchError>> + Send + 'static,
{
    Arc::new(FnFetcher(f))
}

/// GETs `<base_url>/<key path>` and decodes the body as JSON.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpFetcher {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, url::ParseError> {
        // Url::join drops the last segment unless the base ends with '/'.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };
        Ok(Self { client, base_url })
    }

    pub fn url_for(&self, key: &QueryKey) -> Result<Url, url::ParseError> {
        self.base_url.join(&key.to_path())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, Result<serde_json::Value, FetchError>> {
        let client = self.client.clone();
        let url = self.url_for(key);

        async move {
            let url = url.map_err(|e| FetchError::Other(format!("invalid query url: {e}")))?;
            let response = client.get(url).send().await.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(0)
                } else {
                    FetchError::Network(e.to_string())
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                let message = status.canonical_reason().unwrap_or_default().to_string();
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    message,
                });
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| FetchError::Decode(e.to_string()))
        }
        .boxed()
    }
}
