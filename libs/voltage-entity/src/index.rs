//! Index manager
//!
//! Index buckets live under `idx:{type}:` and list entity keys:
//!
//! | Kind | Key | Store type |
//! |------|-----|------------|
//! | single | `idx:{type}:{field}:{value}` | set |
//! | composite | `idx:{type}:{f1+f2}:{v1\|v2}` | set |
//! | sorted | `idx:{type}:{field}:sorted` | zset scored by the field |
//!
//! Buckets may carry their own TTL, independent of the entities they list.
//! When an entity expires while its bucket lives on, the bucket holds a stale
//! member; [`IndexManager::find_stale`] reports those and
//! [`IndexManager::repair_stale`] strips them.

use crate::DEFAULT_SCAN_BATCH;
use errors::{validation_error, Result, VoltageError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use voltage_model::{lookup_path, IndexSpec, KeySpaceConfig};
use voltage_rtdb::{secs_to_millis, Rtdb, Txn};

/// Render a payload value as an index bucket value
///
/// Strings are used as-is, numbers and booleans by their JSON text. Null,
/// arrays and objects are not indexable.
pub fn render_index_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Score for a sorted index: numbers and numeric strings only
fn sortable_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Index member whose entity no longer exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleIndexEntry {
    pub index_key: String,
    pub entity_key: String,
}

/// Bucket an entity lands in for one spec
enum Bucket {
    Member(String),
    Scored(String, f64),
}

impl Bucket {
    fn key(&self) -> &str {
        match self {
            Bucket::Member(key) | Bucket::Scored(key, _) => key,
        }
    }
}

fn bucket_for(
    keyspace: &KeySpaceConfig,
    entity_type: &str,
    payload: &Map<String, Value>,
    spec: &IndexSpec,
) -> Option<Bucket> {
    match spec {
        IndexSpec::Single { field, .. } => {
            let value = render_index_value(lookup_path(payload, field)?)?;
            Some(Bucket::Member(keyspace.index_key(entity_type, field, &value)))
        },
        IndexSpec::Composite { fields, .. } => {
            let values = fields
                .iter()
                .map(|f| lookup_path(payload, f).and_then(render_index_value))
                .collect::<Option<Vec<_>>>()?;
            Some(Bucket::Member(
                keyspace.composite_index_key(entity_type, fields, &values),
            ))
        },
        IndexSpec::Sorted { field, .. } => {
            let score = sortable_score(lookup_path(payload, field)?)?;
            Some(Bucket::Scored(
                keyspace.sorted_index_key(entity_type, field),
                score,
            ))
        },
    }
}

// ============================================================================
// Transaction-level operations (composable inside one Txn)
// ============================================================================

/// Reject a write whose buckets already exist with the wrong store type
///
/// Runs before any write so that a rejected put leaves nothing behind.
pub(crate) fn check_buckets_in(
    tx: &mut Txn<'_>,
    keyspace: &KeySpaceConfig,
    entity_type: &str,
    payload: &Map<String, Value>,
    specs: &[IndexSpec],
) -> Result<()> {
    for spec in specs {
        let Some(bucket) = bucket_for(keyspace, entity_type, payload, spec) else {
            continue;
        };
        let expected = match bucket {
            Bucket::Member(_) => "set",
            Bucket::Scored(..) => "zset",
        };
        match tx.type_of(bucket.key()) {
            Some(found) if found != expected => {
                return Err(validation_error!(
                    "index bucket {} holds a {}, expected a {}",
                    bucket.key(),
                    found,
                    expected
                ));
            },
            _ => {},
        }
    }
    Ok(())
}

/// Add `entity_key` to every bucket its payload maps to; returns buckets touched
pub(crate) fn add_in(
    tx: &mut Txn<'_>,
    keyspace: &KeySpaceConfig,
    entity_type: &str,
    entity_key: &str,
    payload: &Map<String, Value>,
    specs: &[IndexSpec],
) -> Result<usize> {
    let mut touched = 0;
    for spec in specs {
        let Some(bucket) = bucket_for(keyspace, entity_type, payload, spec) else {
            trace!("{} not indexed by {:?}: no indexable value", entity_key, spec);
            continue;
        };
        match &bucket {
            Bucket::Member(key) => {
                tx.sadd(key, entity_key)?;
            },
            Bucket::Scored(key, score) => {
                tx.zadd(key, *score, entity_key)?;
            },
        }
        if let Some(ttl) = spec.ttl_secs() {
            tx.expire(bucket.key(), secs_to_millis(ttl))?;
        }
        touched += 1;
    }
    Ok(touched)
}

/// Remove `entity_key` from the buckets derived from a known payload
pub(crate) fn remove_derived_in(
    tx: &mut Txn<'_>,
    keyspace: &KeySpaceConfig,
    entity_type: &str,
    entity_key: &str,
    payload: &Map<String, Value>,
    specs: &[IndexSpec],
) -> Result<usize> {
    let mut removed = 0;
    for spec in specs {
        let Some(bucket) = bucket_for(keyspace, entity_type, payload, spec) else {
            continue;
        };
        removed += usize::from(strip_member(tx, bucket.key(), entity_key)?);
    }
    Ok(removed)
}

fn strip_member(tx: &mut Txn<'_>, bucket: &str, member: &str) -> Result<bool> {
    Ok(match tx.type_of(bucket) {
        Some("set") => tx.srem(bucket, member)?,
        Some("zset") => tx.zrem(bucket, member)?,
        _ => false,
    })
}

fn bucket_members(tx: &mut Txn<'_>, bucket: &str) -> Result<Vec<String>> {
    Ok(match tx.type_of(bucket) {
        Some("set") => tx.smembers(bucket)?,
        Some("zset") => tx
            .zrangebyscore(bucket, f64::NEG_INFINITY, f64::INFINITY, 0, None)?
            .into_iter()
            .map(|(member, _)| member)
            .collect(),
        _ => Vec::new(),
    })
}

/// Walk every `idx:{type}:*` bucket in SCAN pages of `batch` keys
fn for_each_bucket<F>(
    tx: &mut Txn<'_>,
    keyspace: &KeySpaceConfig,
    entity_type: &str,
    batch: usize,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(&mut Txn<'_>, &str) -> Result<()>,
{
    let pattern = keyspace.index_pattern(entity_type);
    let mut cursor = 0;
    loop {
        let (next, keys) = tx.scan(cursor, Some(pattern.as_str()), batch.max(1))?;
        for bucket in &keys {
            visit(tx, bucket)?;
        }
        if next == 0 {
            return Ok(());
        }
        cursor = next;
    }
}

/// Strip `entity_key` from every bucket of the type, whatever derived it
pub(crate) fn remove_all_in(
    tx: &mut Txn<'_>,
    keyspace: &KeySpaceConfig,
    entity_type: &str,
    entity_key: &str,
    batch: usize,
) -> Result<usize> {
    let mut removed = 0;
    for_each_bucket(tx, keyspace, entity_type, batch, |tx, bucket| {
        if strip_member(tx, bucket, entity_key)? {
            removed += 1;
        }
        Ok(())
    })?;
    Ok(removed)
}

pub(crate) fn find_stale_in(
    tx: &mut Txn<'_>,
    keyspace: &KeySpaceConfig,
    entity_type: &str,
    batch: usize,
) -> Result<Vec<StaleIndexEntry>> {
    let mut stale = Vec::new();
    for_each_bucket(tx, keyspace, entity_type, batch, |tx, bucket| {
        for member in bucket_members(tx, bucket)? {
            if !tx.exists(&member)? {
                stale.push(StaleIndexEntry {
                    index_key: bucket.to_string(),
                    entity_key: member,
                });
            }
        }
        Ok(())
    })?;
    Ok(stale)
}

pub(crate) fn validate_type(entity_type: &str) -> Result<()> {
    if entity_type.is_empty() {
        return Err(VoltageError::Validation("entity_type is empty".to_string()));
    }
    if entity_type.contains([':', '*', '?']) || entity_type.contains(char::is_whitespace) {
        return Err(validation_error!(
            "entity_type '{}' contains whitespace, ':' or glob characters",
            entity_type
        ));
    }
    Ok(())
}

pub(crate) fn validate_specs(specs: &[IndexSpec]) -> Result<()> {
    for spec in specs {
        spec.validate()?;
    }
    Ok(())
}

// ============================================================================
// IndexManager
// ============================================================================

/// Query and maintenance handle for secondary indexes
///
/// Each method runs in its own store transaction.
pub struct IndexManager<R: Rtdb> {
    rtdb: Arc<R>,
    keyspace: KeySpaceConfig,
    scan_batch: usize,
}

impl<R: Rtdb> Clone for IndexManager<R> {
    fn clone(&self) -> Self {
        Self {
            rtdb: Arc::clone(&self.rtdb),
            keyspace: self.keyspace.clone(),
            scan_batch: self.scan_batch,
        }
    }
}

impl<R: Rtdb> IndexManager<R> {
    pub fn new(rtdb: Arc<R>, keyspace: KeySpaceConfig) -> Self {
        Self {
            rtdb,
            keyspace,
            scan_batch: DEFAULT_SCAN_BATCH,
        }
    }

    /// Set the SCAN page size used by maintenance walks
    pub fn with_scan_batch(mut self, scan_batch: usize) -> Self {
        self.scan_batch = scan_batch.max(1);
        self
    }

    pub fn keyspace(&self) -> &KeySpaceConfig {
        &self.keyspace
    }

    /// Index `entity_key` under each spec; values that cannot be indexed are skipped
    pub fn index_add(
        &self,
        entity_type: &str,
        entity_key: &str,
        field_values: &Map<String, Value>,
        specs: &[IndexSpec],
    ) -> Result<usize> {
        validate_type(entity_type)?;
        validate_specs(specs)?;
        let mut tx = self.rtdb.begin();
        let touched = add_in(
            &mut tx,
            &self.keyspace,
            entity_type,
            entity_key,
            field_values,
            specs,
        )?;
        debug!("Indexed {} in {} bucket(s)", entity_key, touched);
        Ok(touched)
    }

    /// Remove `entity_key` from every index bucket of the type
    pub fn index_remove(&self, entity_type: &str, entity_key: &str) -> Result<usize> {
        validate_type(entity_type)?;
        let mut tx = self.rtdb.begin();
        let removed = remove_all_in(
            &mut tx,
            &self.keyspace,
            entity_type,
            entity_key,
            self.scan_batch,
        )?;
        debug!("Removed {} from {} bucket(s)", entity_key, removed);
        Ok(removed)
    }

    /// Entity keys whose `field` equals `value` (single-value index)
    pub fn query_index(&self, entity_type: &str, field: &str, value: &str) -> Result<Vec<String>> {
        let key = self.keyspace.index_key(entity_type, field, value);
        Ok(self.rtdb.begin().smembers(&key)?)
    }

    /// Entity keys whose composite fields equal `values`, in field order
    pub fn query_composite(
        &self,
        entity_type: &str,
        fields: &[String],
        values: &[String],
    ) -> Result<Vec<String>> {
        if fields.len() != values.len() {
            return Err(validation_error!(
                "composite query has {} fields but {} values",
                fields.len(),
                values.len()
            ));
        }
        let key = self.keyspace.composite_index_key(entity_type, fields, values);
        Ok(self.rtdb.begin().smembers(&key)?)
    }

    /// Entity keys scored within `[min, max]` on a sorted index, ascending
    pub fn query_range(
        &self,
        entity_type: &str,
        field: &str,
        min: f64,
        max: f64,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>> {
        let key = self.keyspace.sorted_index_key(entity_type, field);
        Ok(self
            .rtdb
            .begin()
            .zrangebyscore(&key, min, max, offset, limit)?)
    }

    /// Keys matching every `field = value` pair; no filters matches nothing
    pub fn query_intersect(
        &self,
        entity_type: &str,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let keys = self.filter_keys(entity_type, filters);
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        Ok(self.rtdb.begin().sinter(&refs)?)
    }

    /// Keys matching any `field = value` pair
    pub fn query_union(
        &self,
        entity_type: &str,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let keys = self.filter_keys(entity_type, filters);
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        Ok(self.rtdb.begin().sunion(&refs)?)
    }

    fn filter_keys(&self, entity_type: &str, filters: &BTreeMap<String, String>) -> Vec<String> {
        filters
            .iter()
            .map(|(field, value)| self.keyspace.index_key(entity_type, field, value))
            .collect()
    }

    /// Index members of the type whose entity key no longer exists
    pub fn find_stale(&self, entity_type: &str) -> Result<Vec<StaleIndexEntry>> {
        validate_type(entity_type)?;
        let mut tx = self.rtdb.begin();
        let stale = find_stale_in(&mut tx, &self.keyspace, entity_type, self.scan_batch)?;
        if !stale.is_empty() {
            warn!(
                "Found {} stale index entries for type '{}'",
                stale.len(),
                entity_type
            );
        }
        Ok(stale)
    }

    /// Strip stale members; returns what was removed
    pub fn repair_stale(&self, entity_type: &str) -> Result<Vec<StaleIndexEntry>> {
        validate_type(entity_type)?;
        let mut tx = self.rtdb.begin();
        let stale = find_stale_in(&mut tx, &self.keyspace, entity_type, self.scan_batch)?;
        for entry in &stale {
            strip_member(&mut tx, &entry.index_key, &entry.entity_key)?;
        }
        if !stale.is_empty() {
            info!(
                "Repaired {} stale index entries for type '{}'",
                stale.len(),
                entity_type
            );
        }
        Ok(stale)
    }
}
