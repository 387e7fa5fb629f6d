//! Rule repository, execution and scheduler endpoints

use super::{ok, ApiResult};
use crate::app::AppState;
use axum::extract::{Json, Path, Query, State};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;
use voltage_lifecycle::StateRecord;
use voltage_rules::{
    DagDefinition, DagOutcome, RuleDefinition, RuleExecution, SchedulerStatus, TickReport,
};

const DEFAULT_EXECUTION_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Only rules with this enabled flag
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub from: String,
    pub event: String,
}

#[derive(Debug, Deserialize)]
pub struct DagRequest {
    pub dag: DagDefinition,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

// ========== Repository ==========

pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<RuleDefinition>> {
    let mut rules = state.rules.repository().list_rules()?;
    if let Some(enabled) = query.enabled {
        rules.retain(|r| r.enabled == enabled);
    }
    ok(rules)
}

/// Store a new rule; the id comes from the body or is generated
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<RuleDefinition>,
) -> ApiResult<RuleDefinition> {
    let rule_id = if rule.id.is_empty() {
        format!("rule_{}", uuid::Uuid::new_v4().simple())
    } else {
        rule.id.clone()
    };
    let stored = state.rules.repository().upsert_rule(&rule_id, rule)?;
    ok(stored)
}

pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<RuleDefinition> {
    ok(state.rules.repository().get_rule(&id)?)
}

pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(rule): Json<RuleDefinition>,
) -> ApiResult<RuleDefinition> {
    let repository = state.rules.repository();
    // Existence check: update never creates
    repository.get_rule(&id)?;
    let stored = repository.upsert_rule(&id, rule)?;
    ok(stored)
}

pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<String> {
    state.rules.repository().delete_rule(&id)?;
    ok(id)
}

pub async fn enable_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<RuleDefinition> {
    ok(state.rules.repository().set_rule_enabled(&id, true)?)
}

pub async fn disable_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<RuleDefinition> {
    ok(state.rules.repository().set_rule_enabled(&id, false)?)
}

pub async fn rule_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Option<StateRecord>> {
    ok(state.rules.repository().rule_state(&id)?)
}

pub async fn transition_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> ApiResult<String> {
    ok(state
        .rules
        .repository()
        .transition_rule(&id, &req.from, &req.event)?)
}

// ========== Execution ==========

pub async fn execute_rule_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<RuleExecution> {
    let execution = state.rules.execute_rule(&id)?;
    if execution.outcome.status() == "disabled" {
        warn!("Rule {} not executed: inactive", id);
    }
    ok(execution)
}

pub async fn rule_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ExecutionsQuery>,
) -> ApiResult<Vec<RuleExecution>> {
    let limit = query.limit.unwrap_or(DEFAULT_EXECUTION_LIMIT);
    ok(state.rules.recent_executions(&id, limit)?)
}

pub async fn execute_dag(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DagRequest>,
) -> ApiResult<DagOutcome> {
    ok(state.rules.execute_dag(&req.dag, req.variables)?)
}

// ========== Scheduler ==========

pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> ApiResult<SchedulerStatus> {
    ok(state.scheduler.status())
}

/// Run one scheduler tick now
pub async fn scheduler_tick(State(state): State<Arc<AppState>>) -> ApiResult<TickReport> {
    ok(state.scheduler.tick())
}
