//! Point ingest and history flattening
//!
//! Protocol drivers report [`PointUpdate`]s. Updates are grouped per
//! collector hash `comsrv:{channel}:{type}`, each hash is written in one
//! transaction (`{point}` and `{point}:ts` fields) and every written key is
//! then offered to the sync engine.

use errors::{Result, VoltageError};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use voltage_model::{flatten, HistoryPoint, KeySpaceConfig, PointType, PointUpdate};
use voltage_rtdb::Rtdb;
use voltage_sync::{MatchedRule, SyncEngine};

/// What one ingest call did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub points_written: usize,
    /// Collector keys written, sorted
    pub keys: Vec<String>,
    /// Sync rules fired by the written keys
    pub sync: Vec<MatchedRule>,
}

impl IngestReport {
    pub fn sync_errors(&self) -> usize {
        self.sync.iter().filter(|m| m.error.is_some()).count()
    }
}

/// Write point updates and trigger matching sync rules
pub fn ingest_points<R: Rtdb>(
    rtdb: &R,
    keyspace: &KeySpaceConfig,
    sync: &SyncEngine<R>,
    updates: Vec<PointUpdate>,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    if updates.is_empty() {
        return Ok(report);
    }

    let mut grouped: FxHashMap<(u32, PointType), Vec<PointUpdate>> = FxHashMap::default();
    for update in updates {
        if !update.value.is_finite() {
            return Err(VoltageError::InvalidParameter {
                param: "value".to_string(),
                reason: format!(
                    "point {}:{}:{} is not a finite number",
                    update.channel_id, update.telemetry_type, update.point_id
                ),
            });
        }
        grouped
            .entry((update.channel_id, update.telemetry_type))
            .or_default()
            .push(update);
    }

    for ((channel_id, point_type), points) in grouped {
        let key = keyspace.channel_key(channel_id, point_type);
        let mut tx = rtdb.begin();
        let now = tx.now_millis();
        let mut fields = Vec::with_capacity(points.len() * 2);
        for point in &points {
            fields.push((point.value_field(), point.value.to_string()));
            fields.push((point.ts_field(), point.timestamp.unwrap_or(now).to_string()));
        }
        tx.hmset(&key, fields)?;
        report.points_written += points.len();
        report.keys.push(key);
    }
    report.keys.sort();

    // Each sync run takes its own transaction
    for key in &report.keys {
        report.sync.extend(sync.execute_matching(key)?);
    }
    debug!(
        "Ingested {} point(s) into {} key(s), {} sync rule run(s)",
        report.points_written,
        report.keys.len(),
        report.sync.len()
    );
    Ok(report)
}

/// Flatten the hash at `key` for the history sink
pub fn history_point<R: Rtdb>(rtdb: &R, key: &str) -> Result<HistoryPoint> {
    let mut tx = rtdb.begin();
    let now = tx.now_millis();
    let hash = tx.hgetall_strings(key)?;
    if hash.is_empty() {
        return Err(VoltageError::not_found(key));
    }
    flatten(key, &hash, now)
        .ok_or_else(|| VoltageError::Validation(format!("{} has no numeric fields", key)))
}
