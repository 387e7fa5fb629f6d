//! HTTP API for the orchestration core
//!
//! Every handler answers `{"success": true, "data": ...}`; failures are
//! rendered from `VoltageError` as `ErrorInfo` with the mapped status code.

mod data_handlers;
mod entity_handlers;
mod lifecycle_handlers;
mod rule_handlers;
mod sync_handlers;

use crate::app::AppState;
use axum::{
    extract::State,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use errors::VoltageError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use voltage_rtdb::Rtdb;

/// Standard success envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Handler result
pub type ApiResult<T> = Result<Json<SuccessResponse<T>>, VoltageError>;

pub(crate) fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(SuccessResponse::new(data)))
}

/// Create all API routes with state
pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Entities and indexes
        .route("/api/entities", get(entity_handlers::scan_entities))
        .route("/api/entities/scan", post(entity_handlers::scan_entities_filtered))
        .route(
            "/api/entities/{key}",
            get(entity_handlers::get_entity)
                .put(entity_handlers::put_entity)
                .delete(entity_handlers::delete_entity),
        )
        .route("/api/types", get(entity_handlers::list_types))
        .route(
            "/api/schemas/{entity_type}",
            get(entity_handlers::get_schema).put(entity_handlers::register_schema),
        )
        .route(
            "/api/indexes/{entity_type}/query",
            post(entity_handlers::query_indexes),
        )
        .route(
            "/api/indexes/{entity_type}/composite",
            post(entity_handlers::query_composite),
        )
        .route(
            "/api/indexes/{entity_type}/range",
            get(entity_handlers::query_range),
        )
        .route(
            "/api/indexes/{entity_type}/stale",
            get(entity_handlers::find_stale).delete(entity_handlers::repair_stale),
        )
        .route(
            "/api/indexes/{entity_type}/{field}/{value}",
            get(entity_handlers::query_index),
        )
        .route("/api/conditions/evaluate", post(entity_handlers::evaluate_condition))
        // Sync engine
        .route("/api/sync/rules", get(sync_handlers::list_sync_rules))
        .route(
            "/api/sync/rules/{rule_id}",
            get(sync_handlers::get_sync_rule)
                .put(sync_handlers::put_sync_rule)
                .delete(sync_handlers::delete_sync_rule),
        )
        .route("/api/sync/rules/{rule_id}/stats", get(sync_handlers::sync_stats))
        .route("/api/sync/rules/{rule_id}/execute", post(sync_handlers::execute_one))
        .route("/api/sync/rules/{rule_id}/batch", post(sync_handlers::execute_batch))
        .route("/api/sync/rules/{rule_id}/pattern", post(sync_handlers::execute_pattern))
        .route("/api/sync/rules/{rule_id}/sweep", post(sync_handlers::sweep))
        .route(
            "/api/sync/rules/{rule_id}/reverse",
            get(sync_handlers::reverse_lookup).post(sync_handlers::reverse_write),
        )
        .route("/api/sync/trigger", post(sync_handlers::trigger))
        // Rules
        .route(
            "/api/rules",
            get(rule_handlers::list_rules).post(rule_handlers::create_rule),
        )
        .route(
            "/api/rules/{id}",
            get(rule_handlers::get_rule)
                .put(rule_handlers::update_rule)
                .delete(rule_handlers::delete_rule),
        )
        .route("/api/rules/{id}/enable", post(rule_handlers::enable_rule))
        .route("/api/rules/{id}/disable", post(rule_handlers::disable_rule))
        .route("/api/rules/{id}/execute", post(rule_handlers::execute_rule_now))
        .route("/api/rules/{id}/executions", get(rule_handlers::rule_executions))
        .route("/api/rules/{id}/state", get(rule_handlers::rule_state))
        .route("/api/rules/{id}/transition", post(rule_handlers::transition_rule))
        .route("/api/dag/execute", post(rule_handlers::execute_dag))
        .route("/api/scheduler/status", get(rule_handlers::scheduler_status))
        .route("/api/scheduler/tick", post(rule_handlers::scheduler_tick))
        // Lifecycle
        .route("/api/lifecycle/register", post(lifecycle_handlers::register))
        .route("/api/lifecycle/{key}", delete(lifecycle_handlers::unregister))
        .route("/api/lifecycle/{key}/state", get(lifecycle_handlers::current_state))
        .route("/api/lifecycle/{key}/history", get(lifecycle_handlers::history))
        .route("/api/lifecycle/{key}/events", get(lifecycle_handlers::available_events))
        .route("/api/lifecycle/{key}/transition", post(lifecycle_handlers::transition))
        .route("/api/alarms", post(lifecycle_handlers::raise_alarm))
        // Collector data
        .route("/api/points", post(data_handlers::ingest))
        .route("/api/history/{key}", get(data_handlers::history))
        .route("/api/keys/{key}", put(data_handlers::write_hash).get(data_handlers::read_hash))
        // Apply HTTP request logging middleware
        .layer(axum::middleware::from_fn(crate::logging::http_request_logger))
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let stats = state.rtdb.stats();
    ok(json!({
        "status": "healthy",
        "service": state.config.service.name,
        "keys": stats.total_keys(),
        "scheduler": state.scheduler.status(),
        "uptime_ms": state.rtdb.now_millis() - state.started_at,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
