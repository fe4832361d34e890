//! Authenticated admin API for inspecting and steering the query cache.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::engine::DataPrismProvider;
use crate::query::QueryClient;

/// Services the admin handlers read from.
#[derive(Clone)]
pub struct AdminState {
    pub client: QueryClient,
    pub engine: Arc<DataPrismProvider>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(client: QueryClient, engine: Arc<DataPrismProvider>, api_key: &str) -> Self {
        Self {
            client,
            engine,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/cache", get(get_cache))
        .route("/admin/engine", get(get_engine))
        .route("/admin/queries/{*key}", get(get_query))
        .route("/admin/invalidate", post(invalidate_all))
        .route("/admin/invalidate/{*key}", post(invalidate_prefix))
        .route("/admin/gc", post(run_gc))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, QueryConfig};
    use crate::engine::{EngineHandle, EngineLoader, EngineResult};
    use crate::query::QueryKey;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use tower::ServiceExt;

    struct ReadyLoader;

    impl EngineLoader for ReadyLoader {
        fn load<'a>(&'a self, _config: &'a EngineConfig) -> BoxFuture<'a, EngineResult<EngineHandle>> {
            async {
                Ok(EngineHandle {
                    version: "3.0.0".into(),
                    core_url: "http://cdn.test/core/".into(),
                    plugins: Vec::new(),
                })
            }
            .boxed()
        }
    }

    fn state() -> AdminState {
        AdminState::new(
            QueryClient::new(&QueryConfig::default()),
            Arc::new(DataPrismProvider::new(EngineConfig::default())),
            "secret",
        )
    }

    fn request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_token() {
        let app = admin_router(state());

        let res = app
            .clone()
            .oneshot(request(Method::GET, "/admin/status", None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .oneshot(request(Method::GET, "/admin/status", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_and_cache() {
        let state = state();
        state
            .client
            .set_query_data(&QueryKey::from("todos/1"), serde_json::json!({"id": 1}));
        let app = admin_router(state);

        let res = app
            .clone()
            .oneshot(request(Method::GET, "/admin/status", Some("secret")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["engine"]["state"], "loading");
        assert_eq!(body["cache_entries"], 1);

        let res = app
            .oneshot(request(Method::GET, "/admin/cache", Some("secret")))
            .await
            .unwrap();
        let body = json_body(res).await;
        assert_eq!(body["entries"], 1);
        assert_eq!(body["fresh"], 1);
    }

    #[tokio::test]
    async fn test_query_lookup_and_invalidate() {
        let state = state();
        state
            .client
            .set_query_data(&QueryKey::from("todos/1"), serde_json::json!(1));
        let app = admin_router(state.clone());

        let res = app
            .clone()
            .oneshot(request(Method::GET, "/admin/queries/todos/1", Some("secret")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["freshness"], "fresh");

        let res = app
            .clone()
            .oneshot(request(Method::GET, "/admin/queries/nope", Some("secret")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .oneshot(request(Method::POST, "/admin/invalidate/todos", Some("secret")))
            .await
            .unwrap();
        assert_eq!(json_body(res).await["count"], 1);
        assert!(state.client.query_state(&QueryKey::from("todos/1")).unwrap().invalidated);
    }

    #[tokio::test]
    async fn test_engine_view_includes_loaded_handle() {
        let state = state();
        let app = admin_router(state.clone());

        let res = app
            .clone()
            .oneshot(request(Method::GET, "/admin/engine", Some("secret")))
            .await
            .unwrap();
        let body = json_body(res).await;
        assert_eq!(body["status"]["state"], "loading");
        assert!(body["engine"].is_null());

        state.engine.initialize(&ReadyLoader).await.unwrap();
        let res = app
            .oneshot(request(Method::GET, "/admin/engine", Some("secret")))
            .await
            .unwrap();
        let body = json_body(res).await;
        assert_eq!(body["status"]["state"], "ready");
        assert_eq!(body["engine"]["version"], "3.0.0");
    }
}
