//! Sync engine
//!
//! Copies values from source keys to target keys as described by
//! [`SyncRule`]s stored at `sync:config:{rule_id}`. Every public operation
//! runs in one store transaction; the per-item work inside batch and pattern
//! runs is best-effort and reported in the outcome.

use crate::config::{validate_rule_id, DataKind, SyncRule, SyncStats};
use crate::transform::TransformRegistry;
use errors::{Result, VoltageError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use voltage_model::{render, KeyPattern, KeySpaceConfig};
use voltage_rtdb::{Rtdb, Txn};

/// Field name used when a whole value is synced
pub const SCALAR_FIELD: &str = "value";

/// Result of syncing one source/target pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced {
        source_key: String,
        target_key: String,
        fields_synced: usize,
        fields_failed: usize,
    },
    Skipped {
        reason: String,
    },
}

/// Per-item failure inside a batch or pattern run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub source_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_key: Option<String>,
    pub error: String,
}

/// Totals of a multi-item run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Rule was disabled; nothing ran
    #[serde(default)]
    pub disabled: bool,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub fields_synced: usize,
    pub fields_failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemError>,
}

impl BatchOutcome {
    fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: BatchOutcome) {
        self.disabled |= other.disabled;
        self.synced += other.synced;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.fields_synced += other.fields_synced;
        self.fields_failed += other.fields_failed;
        self.errors.extend(other.errors);
    }
}

/// One SCAN page of a pattern run; `next_cursor == 0` when the walk is done
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternOutcome {
    pub next_cursor: u64,
    pub scanned: usize,
    #[serde(flatten)]
    pub totals: BatchOutcome,
}

/// Source side of a synced target field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseEntry {
    pub source_key: String,
    pub source_field: String,
}

/// A rule fired by [`SyncEngine::execute_matching`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SyncOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Value read from a source key
enum SourceValue {
    Fields(Map<String, Value>),
    Scalar(Value),
}

impl SourceValue {
    fn into_value(self) -> Value {
        match self {
            SourceValue::Fields(map) => Value::Object(map),
            SourceValue::Scalar(value) => value,
        }
    }
}

struct PairResult {
    fields_synced: usize,
    fields_failed: usize,
}

/// Text stored for a value: strings verbatim, everything else as JSON
fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn read_value(tx: &mut Txn<'_>, key: &str, kind: DataKind) -> Result<Option<SourceValue>> {
    match kind {
        DataKind::Hash => {
            let fields = tx.hgetall_strings(key)?;
            if fields.is_empty() {
                return Ok(None);
            }
            Ok(Some(SourceValue::Fields(
                fields
                    .into_iter()
                    .map(|(f, v)| (f, Value::String(v)))
                    .collect(),
            )))
        },
        DataKind::Json => match tx.get_string(key)? {
            Some(text) => match serde_json::from_str::<Value>(&text)? {
                Value::Object(map) => Ok(Some(SourceValue::Fields(map))),
                _ => Err(VoltageError::Validation(format!(
                    "{} does not hold a JSON object",
                    key
                ))),
            },
            None => Ok(None),
        },
        DataKind::String => Ok(tx.get_string(key)?.map(|s| SourceValue::Scalar(Value::String(s)))),
    }
}

/// Write named fields into a map-shaped key
fn write_fields(tx: &mut Txn<'_>, key: &str, kind: DataKind, fields: &[(String, Value)]) -> Result<()> {
    match kind {
        DataKind::Hash => {
            tx.hmset(key, fields.iter().map(|(f, v)| (f.as_str(), field_text(v))))?;
        },
        DataKind::Json => {
            let mut object = match tx.get_string(key)? {
                Some(text) => match serde_json::from_str::<Value>(&text)? {
                    Value::Object(map) => map,
                    _ => {
                        return Err(VoltageError::Validation(format!(
                            "{} does not hold a JSON object",
                            key
                        )))
                    },
                },
                None => Map::new(),
            };
            for (field, value) in fields {
                object.insert(field.clone(), value.clone());
            }
            tx.set(key, Value::Object(object).to_string())?;
        },
        DataKind::String => {
            if let Some((_, value)) = fields.last() {
                tx.set(key, field_text(value))?;
            }
        },
    }
    Ok(())
}

/// Pattern-driven sync between keys
pub struct SyncEngine<R: Rtdb> {
    rtdb: Arc<R>,
    keyspace: KeySpaceConfig,
    transforms: Arc<TransformRegistry>,
}

impl<R: Rtdb> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            rtdb: Arc::clone(&self.rtdb),
            keyspace: self.keyspace.clone(),
            transforms: Arc::clone(&self.transforms),
        }
    }
}

impl<R: Rtdb> SyncEngine<R> {
    /// Engine with the built-in transforms
    pub fn new(rtdb: Arc<R>, keyspace: KeySpaceConfig) -> Self {
        Self::with_transforms(rtdb, keyspace, TransformRegistry::with_builtins())
    }

    pub fn with_transforms(rtdb: Arc<R>, keyspace: KeySpaceConfig, transforms: TransformRegistry) -> Self {
        Self {
            rtdb,
            keyspace,
            transforms: Arc::new(transforms),
        }
    }

    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    // ========== Configuration ==========

    /// Validate and store a rule under `rule_id`
    pub fn config_set(&self, rule_id: &str, mut rule: SyncRule) -> Result<SyncRule> {
        rule.rule_id = rule_id.to_string();
        rule.validate(&self.transforms)?;
        let json = serde_json::to_string(&rule)?;
        let mut tx = self.rtdb.begin();
        tx.set(&self.keyspace.sync_config_key(rule_id), json)?;
        info!(
            "Sync rule {} saved: {} -> {}",
            rule_id,
            rule.source.pattern,
            rule.target.pattern.as_deref().unwrap_or("<reverse mapping>")
        );
        Ok(rule)
    }

    pub fn config_get(&self, rule_id: &str) -> Result<SyncRule> {
        let mut tx = self.rtdb.begin();
        self.load_rule(&mut tx, rule_id)
    }

    /// Every stored rule, by rule id
    pub fn config_list(&self) -> Result<Vec<SyncRule>> {
        let mut tx = self.rtdb.begin();
        self.list_in(&mut tx)
    }

    /// Remove a rule with its stats and reverse-mapping records
    pub fn config_delete(&self, rule_id: &str) -> Result<()> {
        validate_rule_id(rule_id)?;
        let mut tx = self.rtdb.begin();
        if !tx.del(&self.keyspace.sync_config_key(rule_id))? {
            return Err(VoltageError::ConfigNotFound(rule_id.to_string()));
        }
        tx.del(&self.keyspace.sync_stats_key(rule_id))?;

        let pattern = self.keyspace.sync_reverse_pattern(rule_id);
        let mut cursor = 0;
        let mut removed = 0usize;
        loop {
            let (next, keys) = tx.scan(cursor, Some(pattern.as_str()), 256)?;
            for key in keys {
                removed += usize::from(tx.del(&key)?);
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        info!("Sync rule {} deleted ({} reverse record(s))", rule_id, removed);
        Ok(())
    }

    pub fn stats(&self, rule_id: &str) -> Result<SyncStats> {
        let mut tx = self.rtdb.begin();
        self.load_rule(&mut tx, rule_id)?;
        let fields = tx.hgetall_strings(&self.keyspace.sync_stats_key(rule_id))?;
        let num = |name: &str| fields.get(name).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
        Ok(SyncStats {
            sync_count: num("sync_count") as u64,
            last_sync: num("last_sync"),
            fields_synced: num("fields_synced") as u64,
            error_count: num("error_count") as u64,
        })
    }

    // ========== Execution ==========

    /// Sync one explicit source/target pair
    pub fn execute_one(&self, rule_id: &str, source_key: &str, target_key: &str) -> Result<SyncOutcome> {
        let mut tx = self.rtdb.begin();
        self.execute_one_in(&mut tx, rule_id, source_key, target_key)
    }

    /// [`SyncEngine::execute_one`] inside a caller-owned transaction
    pub fn execute_one_in(
        &self,
        tx: &mut Txn<'_>,
        rule_id: &str,
        source_key: &str,
        target_key: &str,
    ) -> Result<SyncOutcome> {
        let rule = self.load_rule(tx, rule_id)?;
        if !rule.enabled {
            debug!("Sync rule {} disabled, skipping {}", rule_id, source_key);
            return Ok(SyncOutcome::Skipped {
                reason: "rule disabled".to_string(),
            });
        }
        let outcome = self.run_pair(tx, &rule, source_key, target_key)?;
        if let SyncOutcome::Synced {
            fields_synced,
            fields_failed,
            ..
        } = &outcome
        {
            self.record_stats(tx, rule_id, 1, *fields_synced, *fields_failed)?;
        }
        Ok(outcome)
    }

    /// Sync explicit pairs; a failing pair does not stop the rest
    pub fn execute_batch(&self, rule_id: &str, pairs: &[(String, String)]) -> Result<BatchOutcome> {
        let mut tx = self.rtdb.begin();
        let rule = self.load_rule(&mut tx, rule_id)?;
        if !rule.enabled {
            return Ok(BatchOutcome::disabled());
        }
        let mut totals = BatchOutcome::default();
        for (source_key, target_key) in pairs {
            self.run_item(&mut tx, &rule, source_key, Some(target_key.clone()), &mut totals);
        }
        self.record_totals(&mut tx, rule_id, &totals)?;
        Ok(totals)
    }

    /// Sync one SCAN page of keys matching the source pattern
    pub fn execute_pattern(&self, rule_id: &str, cursor: u64, count: usize) -> Result<PatternOutcome> {
        let mut tx = self.rtdb.begin();
        let rule = self.load_rule(&mut tx, rule_id)?;
        if !rule.enabled {
            return Ok(PatternOutcome {
                next_cursor: 0,
                scanned: 0,
                totals: BatchOutcome::disabled(),
            });
        }
        let (next_cursor, keys) = tx.scan(cursor, Some(rule.source.pattern.as_str()), count)?;
        let mut totals = BatchOutcome::default();
        for source_key in &keys {
            match self.resolve_target(&mut tx, &rule, source_key) {
                Ok(Some(target_key)) => {
                    self.run_item(&mut tx, &rule, source_key, Some(target_key), &mut totals)
                },
                Ok(None) => {
                    debug!("Sync rule {}: no target for {}", rule_id, source_key);
                    totals.skipped += 1;
                },
                Err(e) => {
                    totals.failed += 1;
                    totals.errors.push(ItemError {
                        source_key: source_key.clone(),
                        target_key: None,
                        error: e.to_string(),
                    });
                },
            }
        }
        self.record_totals(&mut tx, rule_id, &totals)?;
        debug!(
            "Sync rule {} page: {} key(s), {} synced, next cursor {}",
            rule_id,
            keys.len(),
            totals.synced,
            next_cursor
        );
        Ok(PatternOutcome {
            next_cursor,
            scanned: keys.len(),
            totals,
        })
    }

    /// Full pattern walk, one transaction per page
    pub fn sweep(&self, rule_id: &str, page_size: usize) -> Result<BatchOutcome> {
        let mut totals = BatchOutcome::default();
        let mut cursor = 0;
        loop {
            let page = self.execute_pattern(rule_id, cursor, page_size)?;
            totals.absorb(page.totals);
            if page.next_cursor == 0 {
                return Ok(totals);
            }
            cursor = page.next_cursor;
        }
    }

    /// Run every enabled rule whose source pattern matches a freshly written key
    pub fn execute_matching(&self, source_key: &str) -> Result<Vec<MatchedRule>> {
        let mut tx = self.rtdb.begin();
        let rules = self.list_in(&mut tx)?;
        let mut fired = Vec::new();
        for rule in rules.iter().filter(|r| r.enabled) {
            let Ok(pattern) = KeyPattern::new(&rule.source.pattern) else {
                continue;
            };
            if !pattern.is_match(source_key) {
                continue;
            }
            let result = self.fire_rule(&mut tx, rule, source_key);
            fired.push(match result {
                Ok(outcome) => MatchedRule {
                    rule_id: rule.rule_id.clone(),
                    outcome: Some(outcome),
                    error: None,
                },
                Err(e) => {
                    warn!("Sync rule {} failed on {}: {}", rule.rule_id, source_key, e);
                    MatchedRule {
                        rule_id: rule.rule_id.clone(),
                        outcome: None,
                        error: Some(e.to_string()),
                    }
                },
            });
        }
        Ok(fired)
    }

    // ========== Reverse mapping ==========

    /// Source of a synced target field, O(1) through the reverse index
    pub fn reverse_lookup(
        &self,
        rule_id: &str,
        target_key: &str,
        target_field: &str,
    ) -> Result<Option<ReverseEntry>> {
        let mut tx = self.rtdb.begin();
        self.load_rule(&mut tx, rule_id)?;
        self.reverse_lookup_in(&mut tx, rule_id, target_key, target_field)
    }

    /// Route a downstream write back to the source field it was synced from
    ///
    /// The value is passed through the inverse of the rule's transform.
    pub fn reverse_write(
        &self,
        rule_id: &str,
        target_key: &str,
        target_field: &str,
        value: &Value,
    ) -> Result<ReverseEntry> {
        let mut tx = self.rtdb.begin();
        let rule = self.load_rule(&mut tx, rule_id)?;
        let entry = self
            .reverse_lookup_in(&mut tx, rule_id, target_key, target_field)?
            .ok_or_else(|| {
                VoltageError::not_found(format!(
                    "reverse mapping {}:{} in rule {}",
                    target_key, target_field, rule_id
                ))
            })?;
        let source_value = self.transforms.invert(&rule.transform, value)?;

        if rule.source.kind.is_map() {
            write_fields(
                &mut tx,
                &entry.source_key,
                rule.source.kind,
                &[(entry.source_field.clone(), source_value)],
            )?;
        } else {
            tx.set(&entry.source_key, field_text(&source_value))?;
        }
        info!(
            "Reverse write {}:{} -> {}:{}",
            target_key, target_field, entry.source_key, entry.source_field
        );
        Ok(entry)
    }

    fn reverse_lookup_in(
        &self,
        tx: &mut Txn<'_>,
        rule_id: &str,
        target_key: &str,
        target_field: &str,
    ) -> Result<Option<ReverseEntry>> {
        let index_field = format!("{}:{}", target_key, target_field);
        match tx.hget_string(&self.keyspace.sync_reverse_index_key(rule_id), &index_field)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    // ========== Internals ==========

    fn load_rule(&self, tx: &mut Txn<'_>, rule_id: &str) -> Result<SyncRule> {
        let json = tx
            .get_string(&self.keyspace.sync_config_key(rule_id))?
            .ok_or_else(|| VoltageError::ConfigNotFound(rule_id.to_string()))?;
        let mut rule: SyncRule = serde_json::from_str(&json)?;
        rule.rule_id = rule_id.to_string();
        Ok(rule)
    }

    fn list_in(&self, tx: &mut Txn<'_>) -> Result<Vec<SyncRule>> {
        let mut rules = Vec::new();
        for key in tx.keys(&self.keyspace.sync_config_pattern())? {
            let Some(rule_id) = self.keyspace.sync_rule_id(&key) else {
                continue;
            };
            match self.load_rule(tx, rule_id) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!("Skipping unreadable sync config {}: {}", key, e),
            }
        }
        Ok(rules)
    }

    fn resolve_target(&self, tx: &mut Txn<'_>, rule: &SyncRule, source_key: &str) -> Result<Option<String>> {
        let pattern = KeyPattern::new(&rule.source.pattern)?;
        let Some(captures) = pattern.captures(source_key) else {
            return Ok(None);
        };
        if rule.target.use_reverse_mapping {
            let template = rule.reverse_mapping.pattern.as_deref().ok_or_else(|| {
                VoltageError::Validation(format!("rule {} has no reverse_mapping.pattern", rule.rule_id))
            })?;
            let route_key = render(template, &captures)?;
            Ok(tx.get_string(&route_key)?)
        } else {
            let template = rule.target.pattern.as_deref().ok_or_else(|| {
                VoltageError::Validation(format!("rule {} has no target.pattern", rule.rule_id))
            })?;
            Ok(Some(render(template, &captures)?))
        }
    }

    fn fire_rule(&self, tx: &mut Txn<'_>, rule: &SyncRule, source_key: &str) -> Result<SyncOutcome> {
        let Some(target_key) = self.resolve_target(tx, rule, source_key)? else {
            return Ok(SyncOutcome::Skipped {
                reason: "no target resolved".to_string(),
            });
        };
        let outcome = self.run_pair(tx, rule, source_key, &target_key)?;
        if let SyncOutcome::Synced {
            fields_synced,
            fields_failed,
            ..
        } = &outcome
        {
            self.record_stats(tx, &rule.rule_id, 1, *fields_synced, *fields_failed)?;
        }
        Ok(outcome)
    }

    fn run_item(
        &self,
        tx: &mut Txn<'_>,
        rule: &SyncRule,
        source_key: &str,
        target_key: Option<String>,
        totals: &mut BatchOutcome,
    ) {
        let Some(target_key) = target_key else {
            totals.skipped += 1;
            return;
        };
        match self.run_pair(tx, rule, source_key, &target_key) {
            Ok(SyncOutcome::Synced {
                fields_synced,
                fields_failed,
                ..
            }) => {
                totals.synced += 1;
                totals.fields_synced += fields_synced;
                totals.fields_failed += fields_failed;
            },
            Ok(SyncOutcome::Skipped { reason }) => {
                debug!("Sync rule {} skipped {}: {}", rule.rule_id, source_key, reason);
                totals.skipped += 1;
            },
            Err(e) => {
                warn!(
                    "Sync rule {} failed {} -> {}: {}",
                    rule.rule_id, source_key, target_key, e
                );
                totals.failed += 1;
                totals.errors.push(ItemError {
                    source_key: source_key.to_string(),
                    target_key: Some(target_key),
                    error: e.to_string(),
                });
            },
        }
    }

    fn run_pair(
        &self,
        tx: &mut Txn<'_>,
        rule: &SyncRule,
        source_key: &str,
        target_key: &str,
    ) -> Result<SyncOutcome> {
        match self.sync_pair(tx, rule, source_key, target_key)? {
            Some(result) => Ok(SyncOutcome::Synced {
                source_key: source_key.to_string(),
                target_key: target_key.to_string(),
                fields_synced: result.fields_synced,
                fields_failed: result.fields_failed,
            }),
            None => Ok(SyncOutcome::Skipped {
                reason: format!("source {} not found", source_key),
            }),
        }
    }

    /// Copy one source value to one target; `None` when the source is absent
    fn sync_pair(
        &self,
        tx: &mut Txn<'_>,
        rule: &SyncRule,
        source_key: &str,
        target_key: &str,
    ) -> Result<Option<PairResult>> {
        let Some(source) = read_value(tx, source_key, rule.source.kind)? else {
            return Ok(None);
        };

        // (source field, target field, value)
        let mut writes: Vec<(String, String, Value)> = Vec::new();
        let mut failed = 0usize;
        let map_to_map = rule.target.kind.is_map() && matches!(source, SourceValue::Fields(_));

        if map_to_map {
            if let SourceValue::Fields(fields) = source {
                for (field, value) in fields {
                    match self.transforms.apply(&rule.transform, &value) {
                        Ok(out) => {
                            let target_field = rule.target_field(&field).to_string();
                            writes.push((field, target_field, out));
                        },
                        Err(e) => {
                            debug!("{}.{}: {}", source_key, field, e);
                            failed += 1;
                        },
                    }
                }
            }
        } else {
            match self.transforms.apply(&rule.transform, &source.into_value()) {
                Ok(out) => writes.push((SCALAR_FIELD.to_string(), SCALAR_FIELD.to_string(), out)),
                Err(e) => {
                    debug!("{}: {}", source_key, e);
                    failed += 1;
                },
            }
        }

        if !writes.is_empty() {
            if rule.target.kind.is_map() {
                let fields: Vec<(String, Value)> = writes
                    .iter()
                    .map(|(_, target_field, value)| (target_field.clone(), value.clone()))
                    .collect();
                write_fields(tx, target_key, rule.target.kind, &fields)?;
            } else if let Some((_, _, value)) = writes.last() {
                tx.set(target_key, field_text(value))?;
            }
        }

        if rule.reverse_mapping.enabled {
            let index_key = self.keyspace.sync_reverse_index_key(&rule.rule_id);
            for (source_field, target_field, _) in &writes {
                let target_ref = format!("{}:{}", target_key, target_field);
                tx.set(
                    &self.keyspace.sync_reverse_key(&rule.rule_id, source_key, source_field),
                    &target_ref,
                )?;
                tx.hset(
                    &index_key,
                    &target_ref,
                    json!({"source_key": source_key, "source_field": source_field}).to_string(),
                )?;
            }
        }

        debug!(
            "Synced {} -> {} ({} field(s), {} failed)",
            source_key,
            target_key,
            writes.len(),
            failed
        );
        Ok(Some(PairResult {
            fields_synced: writes.len(),
            fields_failed: failed,
        }))
    }

    fn record_totals(&self, tx: &mut Txn<'_>, rule_id: &str, totals: &BatchOutcome) -> Result<()> {
        if totals.synced + totals.failed == 0 {
            return Ok(());
        }
        self.record_stats(
            tx,
            rule_id,
            totals.synced,
            totals.fields_synced,
            totals.fields_failed + totals.failed,
        )
    }

    fn record_stats(
        &self,
        tx: &mut Txn<'_>,
        rule_id: &str,
        syncs: usize,
        fields_synced: usize,
        errors: usize,
    ) -> Result<()> {
        let key = self.keyspace.sync_stats_key(rule_id);
        tx.hincrby(&key, "sync_count", syncs as i64)?;
        tx.hincrby(&key, "fields_synced", fields_synced as i64)?;
        tx.hincrby(&key, "error_count", errors as i64)?;
        let now = tx.now_millis().to_string();
        tx.hset(&key, "last_sync", now)?;
        Ok(())
    }
}
