//! Rules Repository - rule definitions kept in the shared store
//!
//! Each rule is stored as JSON at `rule:{id}`; the id set lives at
//! `meta:rules`. Rules take part in the `rule` lifecycle: a new rule starts
//! in `draft` and only executes once `active`.

use crate::types::{validate_rule_id, RuleDefinition};
use errors::{Result, VoltageError};
use std::sync::Arc;
use tracing::{info, warn};
use voltage_lifecycle::{LifecycleEngine, StateRecord};
use voltage_model::KeySpaceConfig;
use voltage_rtdb::{Rtdb, Txn};

/// Lifecycle entity type of rules
pub const RULE_ENTITY_TYPE: &str = "rule";

/// Lifecycle state in which rules execute
pub const ACTIVE_STATE: &str = "active";

pub struct RuleRepository<R: Rtdb> {
    rtdb: Arc<R>,
    keyspace: KeySpaceConfig,
    lifecycle: LifecycleEngine<R>,
}

impl<R: Rtdb> Clone for RuleRepository<R> {
    fn clone(&self) -> Self {
        Self {
            rtdb: Arc::clone(&self.rtdb),
            keyspace: self.keyspace.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<R: Rtdb> RuleRepository<R> {
    pub fn new(rtdb: Arc<R>, keyspace: KeySpaceConfig) -> Self {
        let lifecycle = LifecycleEngine::new(Arc::clone(&rtdb), keyspace.clone());
        Self {
            rtdb,
            keyspace,
            lifecycle,
        }
    }

    /// Use a shared lifecycle engine (custom history limit or schemas)
    pub fn with_lifecycle(mut self, lifecycle: LifecycleEngine<R>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn lifecycle(&self) -> &LifecycleEngine<R> {
        &self.lifecycle
    }

    pub fn keyspace(&self) -> &KeySpaceConfig {
        &self.keyspace
    }

    /// Lifecycle entity key of a rule (`rule:{id}`)
    pub fn rule_entity_key(&self, rule_id: &str) -> String {
        self.keyspace.rule_key(rule_id)
    }

    // ========== CRUD ==========

    /// Validate and store a rule; a new rule is registered in `draft`
    pub fn upsert_rule(&self, rule_id: &str, mut rule: RuleDefinition) -> Result<RuleDefinition> {
        rule.id = rule_id.to_string();
        if rule.name.is_empty() {
            rule.name = rule_id.to_string();
        }
        rule.validate()?;

        let mut tx = self.rtdb.begin();
        let created = !tx.exists(&self.keyspace.rule_key(rule_id))?;
        tx.set(&self.keyspace.rule_key(rule_id), serde_json::to_string(&rule)?)?;
        tx.sadd(&self.keyspace.rule_ids_key(), rule_id)?;
        let record =
            self.lifecycle
                .register_in(&mut tx, &self.rule_entity_key(rule_id), RULE_ENTITY_TYPE)?;
        info!(
            "Rule {} {} ({}, state {})",
            rule_id,
            if created { "created" } else { "updated" },
            rule.body.kind(),
            record.state
        );
        Ok(rule)
    }

    pub fn get_rule(&self, rule_id: &str) -> Result<RuleDefinition> {
        let mut tx = self.rtdb.begin();
        self.get_rule_in(&mut tx, rule_id)
    }

    pub fn get_rule_in(&self, tx: &mut Txn<'_>, rule_id: &str) -> Result<RuleDefinition> {
        validate_rule_id(rule_id)?;
        let json = tx
            .get_string(&self.keyspace.rule_key(rule_id))?
            .ok_or_else(|| VoltageError::RuleNotFound(rule_id.to_string()))?;
        let mut rule: RuleDefinition = serde_json::from_str(&json)?;
        rule.id = rule_id.to_string();
        Ok(rule)
    }

    /// All rules, highest priority first, then by id
    pub fn list_rules(&self) -> Result<Vec<RuleDefinition>> {
        let mut tx = self.rtdb.begin();
        self.list_rules_in(&mut tx)
    }

    pub fn list_rules_in(&self, tx: &mut Txn<'_>) -> Result<Vec<RuleDefinition>> {
        let mut ids = tx.smembers(&self.keyspace.rule_ids_key())?;
        ids.sort();
        let mut rules = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_rule_in(tx, &id) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!("Skipping unreadable rule {}: {}", id, e),
            }
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(rules)
    }

    pub fn load_enabled_rules(&self) -> Result<Vec<RuleDefinition>> {
        Ok(self
            .list_rules()?
            .into_iter()
            .filter(|r| r.enabled)
            .collect())
    }

    /// Remove a rule with its trigger time, execution log and lifecycle record
    pub fn delete_rule(&self, rule_id: &str) -> Result<()> {
        validate_rule_id(rule_id)?;
        let mut tx = self.rtdb.begin();
        if !tx.del(&self.keyspace.rule_key(rule_id))? {
            return Err(VoltageError::RuleNotFound(rule_id.to_string()));
        }
        tx.srem(&self.keyspace.rule_ids_key(), rule_id)?;
        tx.del(&self.keyspace.rule_last_trigger_key(rule_id))?;
        tx.del(&self.keyspace.rule_executions_key(rule_id))?;
        self.lifecycle
            .unregister_in(&mut tx, &self.rule_entity_key(rule_id))?;
        info!("Rule {} deleted", rule_id);
        Ok(())
    }

    /// Enable or disable a rule
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<RuleDefinition> {
        let mut tx = self.rtdb.begin();
        let mut rule = self.get_rule_in(&mut tx, rule_id)?;
        rule.enabled = enabled;
        tx.set(&self.keyspace.rule_key(rule_id), serde_json::to_string(&rule)?)?;
        info!(
            "Rule {} {}",
            rule_id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(rule)
    }

    // ========== Lifecycle ==========

    /// Current lifecycle record of a rule, if registered
    pub fn rule_state(&self, rule_id: &str) -> Result<Option<StateRecord>> {
        let mut tx = self.rtdb.begin();
        self.get_rule_in(&mut tx, rule_id)?;
        self.lifecycle
            .state_in(&mut tx, &self.rule_entity_key(rule_id))
    }

    /// Apply a lifecycle event (`activate`, `pause`, ...) to a rule
    pub fn transition_rule(&self, rule_id: &str, expected_state: &str, event: &str) -> Result<String> {
        let mut tx = self.rtdb.begin();
        self.get_rule_in(&mut tx, rule_id)?;
        self.lifecycle.transition_in(
            &mut tx,
            &self.rule_entity_key(rule_id),
            expected_state,
            event,
            None,
        )
    }

    /// Why a rule may not run right now, `None` when it may
    pub fn blocked_reason(&self, tx: &mut Txn<'_>, rule: &RuleDefinition) -> Result<Option<String>> {
        if !rule.enabled {
            return Ok(Some("rule disabled".to_string()));
        }
        match self.lifecycle.state_in(tx, &self.rule_entity_key(&rule.id))? {
            Some(record) if record.state != ACTIVE_STATE => {
                Ok(Some(format!("lifecycle state is '{}'", record.state)))
            },
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;
    use voltage_rtdb::helpers::create_test_rtdb;
    use voltage_rtdb::MemoryRtdb;

    fn repo() -> RuleRepository<MemoryRtdb> {
        RuleRepository::new(create_test_rtdb(), KeySpaceConfig::test())
    }

    fn rule(priority: u32) -> RuleDefinition {
        serde_json::from_value(json!({
            "kind": "dag",
            "priority": priority,
            "nodes": [{"id": "a", "type": "action",
                       "config": {"action": "set_variable", "name": "x", "value": 1}}]
        }))
        .unwrap()
    }

    #[test]
    fn test_upsert_registers_draft_once() {
        let repo = repo();
        let stored = repo.upsert_rule("r1", rule(1)).unwrap();
        assert_eq!(stored.id, "r1");
        assert_eq!(stored.name, "r1");
        assert_eq!(repo.rule_state("r1").unwrap().unwrap().state, "draft");

        repo.transition_rule("r1", "draft", "activate").unwrap();
        repo.upsert_rule("r1", rule(2)).unwrap();
        // Updating keeps the lifecycle state
        assert_eq!(repo.rule_state("r1").unwrap().unwrap().state, "active");
        assert_eq!(repo.get_rule("r1").unwrap().priority, 2);
    }

    #[test]
    fn test_list_orders_by_priority() {
        let repo = repo();
        repo.upsert_rule("b", rule(1)).unwrap();
        repo.upsert_rule("a", rule(1)).unwrap();
        repo.upsert_rule("c", rule(9)).unwrap();
        let ids: Vec<String> = repo.list_rules().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_invalid_rule_rejected_before_write() {
        let repo = repo();
        let cyclic: RuleDefinition = serde_json::from_value(json!({
            "kind": "dag",
            "nodes": [
                {"id": "a", "type": "condition", "config": {"field": "x", "operator": "exists"}},
                {"id": "b", "type": "condition", "config": {"field": "x", "operator": "exists"}}
            ],
            "edges": [{"from": "a", "to": "b"}, {"from": "b", "to": "a"}]
        }))
        .unwrap();
        assert!(matches!(
            repo.upsert_rule("loop", cyclic),
            Err(VoltageError::Validation(_))
        ));
        assert!(matches!(
            repo.get_rule("loop"),
            Err(VoltageError::RuleNotFound(_))
        ));
        assert!(repo.rule_state("loop").is_err());
    }

    #[test]
    fn test_blocked_reason() {
        let repo = repo();
        let stored = repo.upsert_rule("r1", rule(0)).unwrap();

        let mut tx = repo.rtdb.begin();
        assert_eq!(
            repo.blocked_reason(&mut tx, &stored).unwrap().as_deref(),
            Some("lifecycle state is 'draft'")
        );
        drop(tx);

        repo.transition_rule("r1", "draft", "activate").unwrap();
        let disabled = repo.set_rule_enabled("r1", false).unwrap();
        let mut tx = repo.rtdb.begin();
        assert_eq!(repo.blocked_reason(&mut tx, &stored).unwrap(), None);
        assert_eq!(
            repo.blocked_reason(&mut tx, &disabled).unwrap().as_deref(),
            Some("rule disabled")
        );
    }
}
