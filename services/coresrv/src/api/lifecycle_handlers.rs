//! Lifecycle and alarm endpoints

use super::{ok, ApiResult};
use crate::app::AppState;
use axum::extract::{Json, Path, Query, State};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use voltage_lifecycle::{HistoryEntry, StateRecord};
use voltage_model::{AlarmPayload, Entity};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub entity_key: String,
    pub entity_type: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    /// Expected current state
    pub from: String,
    pub event: String,
    #[serde(default)]
    pub context: Option<Value>,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<StateRecord> {
    ok(state.lifecycle.register(&req.entity_key, &req.entity_type)?)
}

pub async fn unregister(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<bool> {
    ok(state.lifecycle.unregister(&key)?)
}

pub async fn current_state(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<StateRecord> {
    ok(state.lifecycle.current_state(&key)?)
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<HistoryEntry>> {
    let limit = query.limit.unwrap_or(state.config.store.history_limit);
    ok(state.lifecycle.history(&key, limit)?)
}

pub async fn available_events(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Vec<String>> {
    ok(state.lifecycle.available_events(&key)?)
}

/// Apply an event; answers with the new state
pub async fn transition(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> ApiResult<String> {
    ok(state
        .lifecycle
        .transition(&key, &req.from, &req.event, req.context)?)
}

pub async fn raise_alarm(
    State(state): State<Arc<AppState>>,
    Json(alarm): Json<AlarmPayload>,
) -> ApiResult<Entity> {
    ok(state.lifecycle.raise_alarm(alarm)?)
}
