//! Lifecycle engine
//!
//! State record `{entity_key}:state` (hash):
//! - `state`: current state
//! - `entity_type`: selects the transition table
//! - `last_transition`: event that produced the current state
//! - `transition_time`: store clock (ms) of that event
//!
//! History `{entity_key}:history` (list, newest first, capped) holds one JSON
//! [`HistoryEntry`] per transition.

use crate::schema::StateMachineSchema;
use errors::{Result, VoltageError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use voltage_entity::EntityStore;
use voltage_model::{AlarmPayload, CoreEvent, Entity, IndexSpec, KeySpaceConfig, TypedPayload};
use voltage_rtdb::{Rtdb, Txn};

/// Default number of history entries kept per entity
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Event source name on published envelopes
const EVENT_SOURCE: &str = "lifecycle";

/// Last event recorded by `register`
const REGISTER_EVENT: &str = "register";

/// Alarm event fired when an acknowledged or resolved alarm is raised again
const REACTIVATE_EVENT: &str = "reactivate";

/// Current lifecycle state of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: String,
    pub entity_type: String,
    pub last_transition: String,
    pub transition_time: i64,
}

/// One applied transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub from: String,
    pub to: String,
    pub event: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// State machine engine for lifecycle objects
pub struct LifecycleEngine<R: Rtdb> {
    rtdb: Arc<R>,
    keyspace: KeySpaceConfig,
    schemas: Arc<HashMap<String, StateMachineSchema>>,
    history_limit: usize,
    entities: EntityStore<R>,
}

impl<R: Rtdb> Clone for LifecycleEngine<R> {
    fn clone(&self) -> Self {
        Self {
            rtdb: Arc::clone(&self.rtdb),
            keyspace: self.keyspace.clone(),
            schemas: Arc::clone(&self.schemas),
            history_limit: self.history_limit,
            entities: self.entities.clone(),
        }
    }
}

impl<R: Rtdb> LifecycleEngine<R> {
    /// Engine with the built-in alarm and rule schemas
    pub fn new(rtdb: Arc<R>, keyspace: KeySpaceConfig) -> Self {
        let entities = EntityStore::new(Arc::clone(&rtdb), keyspace.clone());
        let schemas = [StateMachineSchema::alarm(), StateMachineSchema::rule()]
            .into_iter()
            .map(|s| (s.entity_type.clone(), s))
            .collect();
        Self {
            rtdb,
            keyspace,
            schemas: Arc::new(schemas),
            history_limit: DEFAULT_HISTORY_LIMIT,
            entities,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Add or replace the schema for `schema.entity_type`
    pub fn with_schema(mut self, schema: StateMachineSchema) -> Self {
        let mut schemas = (*self.schemas).clone();
        schemas.insert(schema.entity_type.clone(), schema);
        self.schemas = Arc::new(schemas);
        self
    }

    pub fn schema(&self, entity_type: &str) -> Option<&StateMachineSchema> {
        self.schemas.get(entity_type)
    }

    fn schema_or_err(&self, entity_type: &str) -> Result<&StateMachineSchema> {
        self.schema(entity_type).ok_or_else(|| {
            VoltageError::Validation(format!("no state machine for type '{}'", entity_type))
        })
    }

    // ========== Public operations ==========

    /// Put `entity_key` in its type's initial state; an existing record is kept
    pub fn register(&self, entity_key: &str, entity_type: &str) -> Result<StateRecord> {
        let mut tx = self.rtdb.begin();
        self.register_in(&mut tx, entity_key, entity_type)
    }

    /// Apply `event` if the stored state still equals `expected_state`
    pub fn transition(
        &self,
        entity_key: &str,
        expected_state: &str,
        event: &str,
        context: Option<Value>,
    ) -> Result<String> {
        let mut tx = self.rtdb.begin();
        self.transition_in(&mut tx, entity_key, expected_state, event, context)
    }

    pub fn current_state(&self, entity_key: &str) -> Result<StateRecord> {
        let mut tx = self.rtdb.begin();
        self.state_in(&mut tx, entity_key)?
            .ok_or_else(|| VoltageError::not_found(format!("lifecycle state of {}", entity_key)))
    }

    /// Newest-first history, at most `limit` entries
    pub fn history(&self, entity_key: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // The list never holds more than history_limit entries
        let stop = last_index(limit.min(self.history_limit));
        let mut tx = self.rtdb.begin();
        let raw = tx.lrange_strings(&self.keyspace.history_key(entity_key), 0, stop)?;
        let mut entries = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str(&item) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping malformed history entry of {}: {}", entity_key, e),
            }
        }
        Ok(entries)
    }

    /// Events accepted from the entity's current state
    pub fn available_events(&self, entity_key: &str) -> Result<Vec<String>> {
        let record = self.current_state(entity_key)?;
        let schema = self.schema_or_err(&record.entity_type)?;
        Ok(schema
            .events_from(&record.state)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Drop state record and history
    pub fn unregister(&self, entity_key: &str) -> Result<bool> {
        let mut tx = self.rtdb.begin();
        self.unregister_in(&mut tx, entity_key)
    }

    /// Store an alarm entity and put it in the `active` state atomically
    ///
    /// The alarm lands at `entity:alarm:{id}`, indexed by `level` and
    /// `source`. Raising an alarm that was acknowledged or resolved
    /// reactivates it; a closed alarm id cannot be raised again.
    pub fn raise_alarm(&self, alarm: AlarmPayload) -> Result<Entity> {
        let key = self
            .keyspace
            .entity_key(TypedPayload::ALARM_TYPE, &alarm.id);
        let payload = TypedPayload::Alarm(alarm).into_map()?;

        let schema = self.schema_or_err(TypedPayload::ALARM_TYPE)?;
        let mut tx = self.rtdb.begin();
        let existing = self.state_in(&mut tx, &key)?;
        if let Some(record) = &existing {
            let raisable = record.state == schema.initial_state
                || schema.next_state(&record.state, REACTIVATE_EVENT).is_some();
            if !raisable {
                return Err(VoltageError::InvalidTransition {
                    entity_type: TypedPayload::ALARM_TYPE.to_string(),
                    state: record.state.clone(),
                    event: "raise".to_string(),
                });
            }
        }

        let entity = self.entities.put_in(
            &mut tx,
            &key,
            TypedPayload::ALARM_TYPE,
            payload,
            &[IndexSpec::single("level"), IndexSpec::single("source")],
            None,
        )?;

        match existing {
            Some(record) if record.state != schema.initial_state => {
                self.transition_in(&mut tx, &key, &record.state, REACTIVATE_EVENT, None)?;
            },
            Some(_) => {},
            None => {
                self.register_in(&mut tx, &key, TypedPayload::ALARM_TYPE)?;
            },
        }

        let event = CoreEvent::new(
            "alarm_raised",
            json!({"entity_key": key, "alarm": entity.payload}),
            tx.now_millis(),
            EVENT_SOURCE,
        );
        tx.publish(&self.keyspace.lifecycle_channel(), serde_json::to_string(&event)?);
        info!("Alarm raised: {}", key);
        Ok(entity)
    }

    // ========== Transaction-level operations ==========

    pub fn state_in(&self, tx: &mut Txn<'_>, entity_key: &str) -> Result<Option<StateRecord>> {
        let fields = tx.hgetall_strings(&self.keyspace.state_key(entity_key))?;
        let Some(state) = fields.get("state") else {
            return Ok(None);
        };
        Ok(Some(StateRecord {
            state: state.clone(),
            entity_type: fields.get("entity_type").cloned().unwrap_or_default(),
            last_transition: fields.get("last_transition").cloned().unwrap_or_default(),
            transition_time: fields
                .get("transition_time")
                .and_then(|t| t.parse().ok())
                .unwrap_or(0),
        }))
    }

    pub fn register_in(
        &self,
        tx: &mut Txn<'_>,
        entity_key: &str,
        entity_type: &str,
    ) -> Result<StateRecord> {
        if entity_key.is_empty() {
            return Err(VoltageError::Validation("entity key is empty".to_string()));
        }
        let schema = self.schema_or_err(entity_type)?;
        if let Some(existing) = self.state_in(tx, entity_key)? {
            debug!("{} already registered in state {}", entity_key, existing.state);
            return Ok(existing);
        }
        let record = StateRecord {
            state: schema.initial_state.clone(),
            entity_type: entity_type.to_string(),
            last_transition: REGISTER_EVENT.to_string(),
            transition_time: tx.now_millis(),
        };
        self.write_record(tx, entity_key, &record)?;
        debug!("Registered {} ({}) in state {}", entity_key, entity_type, record.state);
        Ok(record)
    }

    pub fn transition_in(
        &self,
        tx: &mut Txn<'_>,
        entity_key: &str,
        expected_state: &str,
        event: &str,
        context: Option<Value>,
    ) -> Result<String> {
        let record = self
            .state_in(tx, entity_key)?
            .ok_or_else(|| VoltageError::not_found(format!("lifecycle state of {}", entity_key)))?;

        if record.state != expected_state {
            return Err(VoltageError::StateMismatch {
                key: entity_key.to_string(),
                expected: expected_state.to_string(),
                actual: record.state,
            });
        }

        let schema = self.schema_or_err(&record.entity_type)?;
        let Some(next) = schema.next_state(&record.state, event) else {
            return Err(VoltageError::InvalidTransition {
                entity_type: record.entity_type,
                state: record.state,
                event: event.to_string(),
            });
        };
        let next = next.to_string();
        let now = tx.now_millis();

        self.write_record(
            tx,
            entity_key,
            &StateRecord {
                state: next.clone(),
                entity_type: record.entity_type.clone(),
                last_transition: event.to_string(),
                transition_time: now,
            },
        )?;

        let entry = HistoryEntry {
            from: record.state.clone(),
            to: next.clone(),
            event: event.to_string(),
            timestamp: now,
            context: context.clone(),
        };
        let history_key = self.keyspace.history_key(entity_key);
        tx.lpush(&history_key, serde_json::to_string(&entry)?)?;
        tx.ltrim(&history_key, 0, last_index(self.history_limit))?;

        let event_envelope = CoreEvent::new(
            "state_transition",
            json!({
                "entity_key": entity_key,
                "entity_type": record.entity_type,
                "from": record.state,
                "to": next,
                "event": event,
                "context": context,
            }),
            now,
            EVENT_SOURCE,
        );
        tx.publish(
            &self.keyspace.lifecycle_channel(),
            serde_json::to_string(&event_envelope)?,
        );

        info!(
            "{}: {} --{}--> {}",
            entity_key, entry.from, entry.event, entry.to
        );
        Ok(next)
    }

    pub fn unregister_in(&self, tx: &mut Txn<'_>, entity_key: &str) -> Result<bool> {
        let removed = tx.del(&self.keyspace.state_key(entity_key))?;
        tx.del(&self.keyspace.history_key(entity_key))?;
        Ok(removed)
    }

    fn write_record(&self, tx: &mut Txn<'_>, entity_key: &str, record: &StateRecord) -> Result<()> {
        let transition_time = record.transition_time.to_string();
        tx.hmset(
            &self.keyspace.state_key(entity_key),
            [
                ("state", record.state.as_str()),
                ("entity_type", record.entity_type.as_str()),
                ("last_transition", record.last_transition.as_str()),
                ("transition_time", transition_time.as_str()),
            ],
        )?;
        Ok(())
    }
}

/// List index of the last of `count` (at least one) entries
fn last_index(count: usize) -> isize {
    isize::try_from(count).unwrap_or(isize::MAX) - 1
}
