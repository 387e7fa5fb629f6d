//! Sync rule configuration and execution endpoints

use super::{ok, ApiResult};
use crate::app::AppState;
use axum::extract::{Json, Path, Query, State};
use errors::VoltageError;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use voltage_sync::{
    BatchOutcome, MatchedRule, PatternOutcome, ReverseEntry, SyncOutcome, SyncRule, SyncStats,
};

const DEFAULT_PATTERN_COUNT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ExecuteOneRequest {
    pub source_key: String,
    pub target_key: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub pairs: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct PatternRequest {
    #[serde(default)]
    pub cursor: u64,
    #[serde(default = "default_pattern_count")]
    pub count: usize,
}

fn default_pattern_count() -> usize {
    DEFAULT_PATTERN_COUNT
}

#[derive(Debug, Deserialize)]
pub struct SweepQuery {
    pub page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ReverseQuery {
    pub target_key: String,
    pub field: String,
}

#[derive(Debug, Deserialize)]
pub struct ReverseWriteRequest {
    pub target_key: String,
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub source_key: String,
}

// ========== Configuration ==========

pub async fn list_sync_rules(State(state): State<Arc<AppState>>) -> ApiResult<Vec<SyncRule>> {
    ok(state.sync.config_list()?)
}

pub async fn get_sync_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
) -> ApiResult<SyncRule> {
    ok(state.sync.config_get(&rule_id)?)
}

pub async fn put_sync_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
    Json(rule): Json<SyncRule>,
) -> ApiResult<SyncRule> {
    ok(state.sync.config_set(&rule_id, rule)?)
}

pub async fn delete_sync_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
) -> ApiResult<String> {
    state.sync.config_delete(&rule_id)?;
    ok(rule_id)
}

pub async fn sync_stats(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
) -> ApiResult<SyncStats> {
    ok(state.sync.stats(&rule_id)?)
}

// ========== Execution ==========

pub async fn execute_one(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
    Json(req): Json<ExecuteOneRequest>,
) -> ApiResult<SyncOutcome> {
    ok(state
        .sync
        .execute_one(&rule_id, &req.source_key, &req.target_key)?)
}

pub async fn execute_batch(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<BatchOutcome> {
    ok(state.sync.execute_batch(&rule_id, &req.pairs)?)
}

pub async fn execute_pattern(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
    Json(req): Json<PatternRequest>,
) -> ApiResult<PatternOutcome> {
    if req.count == 0 {
        return Err(VoltageError::InvalidParameter {
            param: "count".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    ok(state.sync.execute_pattern(&rule_id, req.cursor, req.count)?)
}

/// Full pattern walk, page by page
pub async fn sweep(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
    Query(query): Query<SweepQuery>,
) -> ApiResult<BatchOutcome> {
    let page = query.page.unwrap_or(state.config.store.scan_batch).max(1);
    ok(state.sync.sweep(&rule_id, page)?)
}

pub async fn trigger(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TriggerRequest>,
) -> ApiResult<Vec<MatchedRule>> {
    ok(state.sync.execute_matching(&req.source_key)?)
}

// ========== Reverse mapping ==========

pub async fn reverse_lookup(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
    Query(query): Query<ReverseQuery>,
) -> ApiResult<ReverseEntry> {
    let entry = state
        .sync
        .reverse_lookup(&rule_id, &query.target_key, &query.field)?
        .ok_or_else(|| {
            VoltageError::not_found(format!("reverse mapping {}:{}", query.target_key, query.field))
        })?;
    ok(entry)
}

pub async fn reverse_write(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<String>,
    Json(req): Json<ReverseWriteRequest>,
) -> ApiResult<ReverseEntry> {
    ok(state
        .sync
        .reverse_write(&rule_id, &req.target_key, &req.field, &req.value)?)
}
