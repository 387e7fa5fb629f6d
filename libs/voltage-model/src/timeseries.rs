//! History flattening
//!
//! Turns a collector hash (`comsrv:{channel}:{type}` with `{point}` and
//! `{point}:ts` fields) into a [`HistoryPoint`] for the time-series sink.
//! Transport to the database is the sink's job.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One measurement row ready for the history sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

impl HistoryPoint {
    /// Render as InfluxDB line protocol with millisecond precision
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);
        for (k, v) in &self.tags {
            line.push(',');
            line.push_str(&escape_tag(k));
            line.push('=');
            line.push_str(&escape_tag(v));
        }
        line.push(' ');
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", escape_tag(k), v))
            .collect();
        line.push_str(&fields.join(","));
        line.push(' ');
        line.push_str(&self.timestamp.to_string());
        line
    }

    /// Timestamp as RFC 3339, for logs and JSON sinks
    pub fn timestamp_rfc3339(&self) -> Option<String> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .map(|dt| dt.to_rfc3339())
    }
}

/// Flatten a hash into a history point
///
/// The key is split on `:`; the first segment becomes the measurement and the
/// remaining segments become `tag0`, `tag1`... (for collector keys the names
/// are `channel` and `type`). Numeric fields become fields; `{point}:ts`
/// fields drive the timestamp (the newest one wins) and are not emitted.
/// Non-numeric values are dropped. Returns `None` when no numeric field is
/// left.
pub fn flatten(key: &str, hash: &BTreeMap<String, String>, now_ms: i64) -> Option<HistoryPoint> {
    let mut segments = key.split(':');
    let measurement = segments.next()?.to_string();
    let rest: Vec<&str> = segments.collect();

    let mut tags = BTreeMap::new();
    if measurement == "comsrv" && rest.len() == 2 {
        tags.insert("channel".to_string(), rest[0].to_string());
        tags.insert("type".to_string(), rest[1].to_string());
    } else {
        for (i, seg) in rest.iter().enumerate() {
            tags.insert(format!("tag{}", i), seg.to_string());
        }
    }

    let mut fields = BTreeMap::new();
    let mut newest_ts: Option<i64> = None;
    for (field, raw) in hash {
        if field.ends_with(":ts") {
            if let Ok(ts) = raw.trim().parse::<i64>() {
                newest_ts = Some(newest_ts.map_or(ts, |cur| cur.max(ts)));
            }
            continue;
        }
        if let Ok(v) = raw.trim().parse::<f64>() {
            if v.is_finite() {
                fields.insert(field.clone(), v);
            }
        }
    }

    if fields.is_empty() {
        return None;
    }

    Some(HistoryPoint {
        measurement,
        tags,
        fields,
        timestamp: newest_ts.unwrap_or(now_ms),
    })
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
