use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::admin::AdminState;
use crate::engine::{EngineHandle, EngineStatus};
use crate::query::{CacheSummary, QueryKey, QueryState};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub engine: EngineStatus,
    pub cache_entries: usize,
}

#[derive(Serialize)]
pub struct EngineView {
    pub status: EngineStatus,
    pub engine: Option<Arc<EngineHandle>>,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        engine: state.engine.status(),
        cache_entries: state.client.summary().entries,
    })
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheSummary> {
    Json(state.client.summary())
}

pub async fn get_engine(State(state): State<AdminState>) -> Json<EngineView> {
    Json(EngineView {
        status: state.engine.status(),
        engine: state.engine.engine(),
    })
}

pub async fn get_query(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Result<Json<QueryState>, StatusCode> {
    state
        .client
        .query_state(&QueryKey::from(key.as_str()))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn invalidate_prefix(
    State(state): State<AdminState>,
    Path(prefix): Path<String>,
) -> Json<CountResponse> {
    let count = state.client.invalidate_queries(&QueryKey::from(prefix.as_str()));
    Json(CountResponse { count })
}

pub async fn invalidate_all(State(state): State<AdminState>) -> Json<CountResponse> {
    let count = state.client.invalidate_queries(&QueryKey::new(Vec::<String>::new()));
    Json(CountResponse { count })
}

pub async fn run_gc(State(state): State<AdminState>) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.client.garbage_collect(),
    })
}
