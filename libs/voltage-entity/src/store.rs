//! Entity store
//!
//! Entities are kept as JSON at their key. Type membership sets
//! (`meta:entity:{type}`, `meta:entity_types`) drive type-pattern scans, and
//! index specs registered for a type (`meta:schema:{type}`) apply to every
//! write of that type.

use crate::index::{self, validate_specs, validate_type, IndexManager};
use crate::DEFAULT_SCAN_BATCH;
use errors::{validation_error, Result, VoltageError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use voltage_calc::{evaluate, Condition};
use voltage_model::{Entity, IndexSpec, KeyPattern, KeySpaceConfig, TypedPayload};
use voltage_rtdb::{secs_to_millis, Rtdb, Txn};

/// One page of a type scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPage {
    pub items: Vec<Entity>,
    pub offset: usize,
    pub limit: usize,
    /// More matches exist past this page
    pub has_more: bool,
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(VoltageError::Validation("entity key is empty".to_string()));
    }
    if key.contains(char::is_whitespace) {
        return Err(validation_error!(
            "entity key '{}' contains whitespace",
            key
        ));
    }
    Ok(())
}

/// Entity CRUD with mandatory index maintenance
pub struct EntityStore<R: Rtdb> {
    rtdb: Arc<R>,
    keyspace: KeySpaceConfig,
    indexes: IndexManager<R>,
}

impl<R: Rtdb> Clone for EntityStore<R> {
    fn clone(&self) -> Self {
        Self {
            rtdb: Arc::clone(&self.rtdb),
            keyspace: self.keyspace.clone(),
            indexes: self.indexes.clone(),
        }
    }
}

impl<R: Rtdb> EntityStore<R> {
    pub fn new(rtdb: Arc<R>, keyspace: KeySpaceConfig) -> Self {
        let indexes = IndexManager::new(Arc::clone(&rtdb), keyspace.clone());
        Self {
            rtdb,
            keyspace,
            indexes,
        }
    }

    /// Set the SCAN page size used by index maintenance walks
    pub fn with_scan_batch(mut self, scan_batch: usize) -> Self {
        self.indexes = self.indexes.with_scan_batch(scan_batch);
        self
    }

    pub fn indexes(&self) -> &IndexManager<R> {
        &self.indexes
    }

    pub fn keyspace(&self) -> &KeySpaceConfig {
        &self.keyspace
    }

    pub fn rtdb(&self) -> &Arc<R> {
        &self.rtdb
    }

    // ========== Public operations (one transaction each) ==========

    /// Create or replace an entity
    ///
    /// `specs` are applied on top of the specs registered for the type.
    pub fn put(
        &self,
        key: &str,
        entity_type: &str,
        payload: Map<String, Value>,
        specs: &[IndexSpec],
    ) -> Result<Entity> {
        let mut tx = self.rtdb.begin();
        self.put_in(&mut tx, key, entity_type, payload, specs, None)
    }

    /// Like [`EntityStore::put`], expiring the entity after `ttl_secs`
    ///
    /// Index buckets are not expired with it; see [`IndexManager::find_stale`].
    pub fn put_with_ttl(
        &self,
        key: &str,
        entity_type: &str,
        payload: Map<String, Value>,
        specs: &[IndexSpec],
        ttl_secs: u64,
    ) -> Result<Entity> {
        if ttl_secs == 0 {
            return Err(VoltageError::Validation("ttl_secs must be positive".to_string()));
        }
        let mut tx = self.rtdb.begin();
        self.put_in(
            &mut tx,
            key,
            entity_type,
            payload,
            specs,
            Some(secs_to_millis(ttl_secs)),
        )
    }

    pub fn get(&self, key: &str) -> Result<Entity> {
        let mut tx = self.rtdb.begin();
        self.get_in(&mut tx, key)
    }

    /// Delete an entity and its index entries; returns the removed entity
    pub fn delete(&self, key: &str) -> Result<Entity> {
        let mut tx = self.rtdb.begin();
        self.delete_in(&mut tx, key)
    }

    /// Entities whose type matches `type_pattern` (glob) and whose payload
    /// satisfies `filter`, in type then key order
    pub fn scan(
        &self,
        type_pattern: &str,
        filter: Option<&Condition>,
        limit: usize,
        offset: usize,
    ) -> Result<EntityPage> {
        let matcher = KeyPattern::new(type_pattern)?;
        let mut tx = self.rtdb.begin();

        let types: Vec<String> = tx
            .smembers(&self.keyspace.entity_types_key())?
            .into_iter()
            .filter(|t| matcher.is_match(t))
            .collect();

        let mut items = Vec::new();
        let mut seen = 0usize;
        let mut has_more = false;

        'types: for entity_type in &types {
            let members = tx.smembers(&self.keyspace.entity_members_key(entity_type))?;
            for key in members {
                let entity = match read_entity(&mut tx, &key) {
                    Ok(Some(entity)) => entity,
                    // Expired or removed behind the membership set
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Skipping unreadable entity {}: {}", key, e);
                        continue;
                    },
                };
                if &entity.entity_type != entity_type {
                    continue;
                }
                if let Some(condition) = filter {
                    if !evaluate(condition, &entity.payload) {
                        continue;
                    }
                }
                if seen >= offset + limit {
                    has_more = true;
                    break 'types;
                }
                if seen >= offset {
                    items.push(entity);
                }
                seen += 1;
            }
        }

        debug!(
            "Scan '{}' returned {} item(s), has_more={}",
            type_pattern,
            items.len(),
            has_more
        );
        Ok(EntityPage {
            items,
            offset,
            limit,
            has_more,
        })
    }

    /// Register index specs applied to every later write of `entity_type`
    pub fn register_schema(&self, entity_type: &str, specs: &[IndexSpec]) -> Result<()> {
        validate_type(entity_type)?;
        validate_specs(specs)?;
        let json = serde_json::to_string(specs)?;
        let mut tx = self.rtdb.begin();
        tx.set(&self.keyspace.schema_key(entity_type), json)?;
        info!(
            "Registered {} index spec(s) for type '{}'",
            specs.len(),
            entity_type
        );
        Ok(())
    }

    /// Index specs registered for a type (empty when none)
    pub fn schema(&self, entity_type: &str) -> Result<Vec<IndexSpec>> {
        let mut tx = self.rtdb.begin();
        self.schema_in(&mut tx, entity_type)
    }

    /// Every entity type ever written, sorted
    pub fn types(&self) -> Result<Vec<String>> {
        Ok(self
            .rtdb
            .begin()
            .smembers(&self.keyspace.entity_types_key())?)
    }

    // ========== Transaction-level operations ==========

    /// [`EntityStore::put`] inside a caller-owned transaction
    ///
    /// Every check runs before the first write, so a rejected put leaves the
    /// store untouched.
    pub fn put_in(
        &self,
        tx: &mut Txn<'_>,
        key: &str,
        entity_type: &str,
        payload: Map<String, Value>,
        specs: &[IndexSpec],
        ttl_ms: Option<i64>,
    ) -> Result<Entity> {
        validate_key(key)?;
        validate_type(entity_type)?;
        validate_specs(specs)?;
        let payload = TypedPayload::parse(entity_type, &payload)?.into_map()?;

        let mut applied = self.schema_in(tx, entity_type)?;
        for spec in specs {
            if !applied.contains(spec) {
                applied.push(spec.clone());
            }
        }

        let previous = read_entity(tx, key)?;
        let entity = Entity {
            key: key.to_string(),
            entity_type: entity_type.to_string(),
            payload,
            updated_at: tx.now_millis(),
            indexes: applied,
        };
        let json = serde_json::to_string(&entity)?;
        index::check_buckets_in(
            tx,
            &self.keyspace,
            entity_type,
            &entity.payload,
            &entity.indexes,
        )?;
        for meta in [
            self.keyspace.entity_members_key(entity_type),
            self.keyspace.entity_types_key(),
        ] {
            if let Some(found) = tx.type_of(&meta).filter(|t| *t != "set") {
                return Err(validation_error!(
                    "{} holds a {}, expected a set",
                    meta, found
                ));
            }
        }

        if let Some(prev) = &previous {
            index::remove_derived_in(
                tx,
                &self.keyspace,
                &prev.entity_type,
                key,
                &prev.payload,
                &prev.indexes,
            )?;
            if prev.entity_type != entity.entity_type {
                self.drop_membership(tx, &prev.entity_type, key)?;
            }
        }

        match ttl_ms {
            Some(ms) => tx.set_with_ttl(key, json, ms)?,
            None => tx.set(key, json)?,
        }
        let buckets = index::add_in(
            tx,
            &self.keyspace,
            entity_type,
            key,
            &entity.payload,
            &entity.indexes,
        )?;
        tx.sadd(&self.keyspace.entity_members_key(entity_type), key)?;
        tx.sadd(&self.keyspace.entity_types_key(), entity_type)?;

        debug!(
            "{} entity {} ({}), {} index bucket(s)",
            if previous.is_some() { "Updated" } else { "Created" },
            key,
            entity_type,
            buckets
        );
        Ok(entity)
    }

    pub fn get_in(&self, tx: &mut Txn<'_>, key: &str) -> Result<Entity> {
        read_entity(tx, key)?.ok_or_else(|| VoltageError::not_found(format!("entity {}", key)))
    }

    pub fn delete_in(&self, tx: &mut Txn<'_>, key: &str) -> Result<Entity> {
        let entity = self.get_in(tx, key)?;
        index::remove_derived_in(
            tx,
            &self.keyspace,
            &entity.entity_type,
            key,
            &entity.payload,
            &entity.indexes,
        )?;
        self.drop_membership(tx, &entity.entity_type, key)?;
        tx.del(key)?;
        debug!("Deleted entity {} ({})", key, entity.entity_type);
        Ok(entity)
    }

    fn schema_in(&self, tx: &mut Txn<'_>, entity_type: &str) -> Result<Vec<IndexSpec>> {
        match tx.get_string(&self.keyspace.schema_key(entity_type))? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn drop_membership(&self, tx: &mut Txn<'_>, entity_type: &str, key: &str) -> Result<()> {
        let members_key = self.keyspace.entity_members_key(entity_type);
        tx.srem(&members_key, key)?;
        if tx.scard(&members_key)? == 0 {
            tx.srem(&self.keyspace.entity_types_key(), entity_type)?;
        }
        Ok(())
    }
}

/// Decode the entity at `key`; `None` when absent
fn read_entity(tx: &mut Txn<'_>, key: &str) -> Result<Option<Entity>> {
    let Some(json) = tx.get_string(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| VoltageError::Serialization(format!("{} is not an entity: {}", key, e)))
}
