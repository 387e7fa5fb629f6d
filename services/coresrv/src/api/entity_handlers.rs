//! Entity store, index and condition endpoints

use super::{ok, ApiResult};
use crate::app::AppState;
use axum::extract::{Json, Path, Query, State};
use errors::VoltageError;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use voltage_calc::{explain, Condition, ConditionTrace};
use voltage_entity::{EntityPage, StaleIndexEntry};
use voltage_model::{Entity, IndexSpec};

const DEFAULT_PAGE_LIMIT: usize = 100;

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

fn default_type_pattern() -> String {
    "*".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PutEntityRequest {
    pub entity_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    #[serde(default = "default_type_pattern", rename = "type")]
    pub type_pattern: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default = "default_type_pattern")]
    pub type_pattern: String,
    #[serde(default)]
    pub filter: Option<Condition>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Intersect,
    Union,
}

#[derive(Debug, Deserialize)]
pub struct IndexQueryRequest {
    #[serde(default)]
    pub mode: QueryMode,
    pub filters: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CompositeQueryRequest {
    pub fields: Vec<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub field: String,
    #[serde(default = "f64_min")]
    pub min: f64,
    #[serde(default = "f64_max")]
    pub max: f64,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn f64_min() -> f64 {
    f64::NEG_INFINITY
}

fn f64_max() -> f64 {
    f64::INFINITY
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub condition: Condition,
    #[serde(default)]
    pub data: Map<String, Value>,
}

// ========== Entities ==========

pub async fn put_entity(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<PutEntityRequest>,
) -> ApiResult<Entity> {
    let entity = match req.ttl_secs {
        Some(ttl) => state
            .entities
            .put_with_ttl(&key, &req.entity_type, req.payload, &req.indexes, ttl)?,
        None => state
            .entities
            .put(&key, &req.entity_type, req.payload, &req.indexes)?,
    };
    ok(entity)
}

pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Entity> {
    ok(state.entities.get(&key)?)
}

pub async fn delete_entity(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Entity> {
    ok(state.entities.delete(&key)?)
}

pub async fn scan_entities(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScanQuery>,
) -> ApiResult<EntityPage> {
    ok(state
        .entities
        .scan(&query.type_pattern, None, query.limit, query.offset)?)
}

pub async fn scan_entities_filtered(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanRequest>,
) -> ApiResult<EntityPage> {
    if let Some(filter) = &req.filter {
        filter.validate()?;
    }
    ok(state
        .entities
        .scan(&req.type_pattern, req.filter.as_ref(), req.limit, req.offset)?)
}

pub async fn list_types(State(state): State<Arc<AppState>>) -> ApiResult<Vec<String>> {
    ok(state.entities.types()?)
}

pub async fn register_schema(
    State(state): State<Arc<AppState>>,
    Path(entity_type): Path<String>,
    Json(specs): Json<Vec<IndexSpec>>,
) -> ApiResult<Vec<IndexSpec>> {
    state.entities.register_schema(&entity_type, &specs)?;
    ok(specs)
}

pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    Path(entity_type): Path<String>,
) -> ApiResult<Vec<IndexSpec>> {
    ok(state.entities.schema(&entity_type)?)
}

// ========== Indexes ==========

pub async fn query_index(
    State(state): State<Arc<AppState>>,
    Path((entity_type, field, value)): Path<(String, String, String)>,
) -> ApiResult<Vec<String>> {
    ok(state
        .entities
        .indexes()
        .query_index(&entity_type, &field, &value)?)
}

pub async fn query_indexes(
    State(state): State<Arc<AppState>>,
    Path(entity_type): Path<String>,
    Json(req): Json<IndexQueryRequest>,
) -> ApiResult<Vec<String>> {
    if req.filters.is_empty() {
        return Err(VoltageError::InvalidParameter {
            param: "filters".to_string(),
            reason: "at least one filter is required".to_string(),
        });
    }
    let indexes = state.entities.indexes();
    let keys = match req.mode {
        QueryMode::Intersect => indexes.query_intersect(&entity_type, &req.filters)?,
        QueryMode::Union => indexes.query_union(&entity_type, &req.filters)?,
    };
    debug!("Index query on {} returned {} key(s)", entity_type, keys.len());
    ok(keys)
}

pub async fn query_composite(
    State(state): State<Arc<AppState>>,
    Path(entity_type): Path<String>,
    Json(req): Json<CompositeQueryRequest>,
) -> ApiResult<Vec<String>> {
    ok(state
        .entities
        .indexes()
        .query_composite(&entity_type, &req.fields, &req.values)?)
}

pub async fn query_range(
    State(state): State<Arc<AppState>>,
    Path(entity_type): Path<String>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Value> {
    let hits = state.entities.indexes().query_range(
        &entity_type,
        &query.field,
        query.min,
        query.max,
        query.offset,
        query.limit,
    )?;
    let items: Vec<Value> = hits
        .into_iter()
        .map(|(key, score)| json!({"key": key, "score": score}))
        .collect();
    ok(Value::Array(items))
}

pub async fn find_stale(
    State(state): State<Arc<AppState>>,
    Path(entity_type): Path<String>,
) -> ApiResult<Vec<StaleIndexEntry>> {
    ok(state.entities.indexes().find_stale(&entity_type)?)
}

/// Remove stale entries; answers with what was removed
pub async fn repair_stale(
    State(state): State<Arc<AppState>>,
    Path(entity_type): Path<String>,
) -> ApiResult<Vec<StaleIndexEntry>> {
    ok(state.entities.indexes().repair_stale(&entity_type)?)
}

// ========== Conditions ==========

pub async fn evaluate_condition(Json(req): Json<EvaluateRequest>) -> ApiResult<ConditionTrace> {
    req.condition.validate()?;
    ok(explain(&req.condition, &req.data))
}
