//! Collector data endpoints: point ingest, raw hashes and history rows

use super::{ok, ApiResult, SuccessResponse};
use crate::app::AppState;
use crate::ingest::{history_point, ingest_points, IngestReport};
use axum::extract::{Json, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use errors::VoltageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use voltage_model::PointUpdate;
use voltage_rtdb::Rtdb;
use voltage_sync::MatchedRule;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryFormat {
    #[default]
    Json,
    /// InfluxDB line protocol, `text/plain`
    Line,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub format: HistoryFormat,
}

#[derive(Debug, Serialize)]
pub struct HashWrite {
    pub key: String,
    pub fields: usize,
    pub sync: Vec<MatchedRule>,
}

pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(updates): Json<Vec<PointUpdate>>,
) -> ApiResult<IngestReport> {
    let report = ingest_points(state.rtdb.as_ref(), &state.keyspace, &state.sync, updates)?;
    let errors = report.sync_errors();
    Ok(Json(
        SuccessResponse::new(report).with_metadata("sync_errors", Value::from(errors)),
    ))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, VoltageError> {
    let point = history_point(state.rtdb.as_ref(), &key)?;
    Ok(match query.format {
        HistoryFormat::Json => Json(SuccessResponse::new(point)).into_response(),
        HistoryFormat::Line => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            point.to_line_protocol(),
        )
            .into_response(),
    })
}

/// Write hash fields, then offer the key to the sync engine
pub async fn write_hash(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(fields): Json<BTreeMap<String, Value>>,
) -> ApiResult<HashWrite> {
    if fields.is_empty() {
        return Err(VoltageError::InvalidParameter {
            param: "fields".to_string(),
            reason: "at least one field is required".to_string(),
        });
    }
    let count = fields.len();
    {
        let mut tx = state.rtdb.begin();
        tx.hmset(
            &key,
            fields.into_iter().map(|(field, value)| match value {
                Value::String(s) => (field, s),
                other => (field, other.to_string()),
            }),
        )?;
    }
    let sync = state.sync.execute_matching(&key)?;
    ok(HashWrite {
        key,
        fields: count,
        sync,
    })
}

pub async fn read_hash(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<BTreeMap<String, String>> {
    let hash = state.rtdb.begin().hgetall_strings(&key)?;
    if hash.is_empty() {
        return Err(VoltageError::not_found(key));
    }
    ok(hash)
}
