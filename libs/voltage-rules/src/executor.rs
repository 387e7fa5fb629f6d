//! Rule Executor - DAG traversal and simple rules
//!
//! A DAG runs by Kahn's traversal from every node without incoming edges:
//! 1. Evaluate the dequeued node against the shared `variables`
//! 2. Follow each outgoing edge whose gate admits the node's boolean result
//! 3. Enqueue a child once every one of its incoming edges was followed
//!
//! A whole rule execution, nested `execute_rule` calls included, runs in one
//! store transaction.

use crate::context::{ExecutionContext, DEFAULT_MAX_DEPTH};
use crate::logger::{RuleLogger, DEFAULT_EXECUTION_LOG_LIMIT};
use crate::repository::RuleRepository;
use crate::types::{Action, DagDefinition, DagEdge, DagNode, NodeKind, RuleBody, SimpleRule, SourceRef};
use errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, enabled, info, warn, Level};
use voltage_calc::{evaluate, explain, number_value, Condition};
use voltage_entity::EntityStore;
use voltage_lifecycle::LifecycleEngine;
use voltage_model::{lookup_path, CoreEvent, Entity, KeySpaceConfig};
use voltage_rtdb::{secs_to_millis, Rtdb, Txn};
use voltage_sync::SyncEngine;

/// Source name on events published by rules
pub const EVENT_SOURCE: &str = "rules";

/// Record of an executed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one DAG node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_type: String,
    /// Boolean used for edge gating
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one DAG run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagOutcome {
    /// Every declared node produced a result
    pub completed: bool,
    /// Node ids in execution order
    pub executed: Vec<String>,
    pub node_results: BTreeMap<String, NodeResult>,
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub failed_actions: usize,
}

/// What a rule execution did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RuleOutcome {
    /// DAG rule ran
    Executed(DagOutcome),
    /// Simple rule condition held and the action ran
    Triggered {
        action: ActionResult,
        variables: Map<String, Value>,
    },
    /// Simple rule condition did not hold
    NotTriggered { variables: Map<String, Value> },
    /// Simple rule condition held inside the cooldown window
    CoolingDown {
        remaining_ms: i64,
        variables: Map<String, Value>,
    },
    /// Rule disabled or not in its active lifecycle state
    Disabled { reason: String },
}

impl RuleOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            RuleOutcome::Executed(_) => "executed",
            RuleOutcome::Triggered { .. } => "triggered",
            RuleOutcome::NotTriggered { .. } => "not_triggered",
            RuleOutcome::CoolingDown { .. } => "cooling_down",
            RuleOutcome::Disabled { .. } => "disabled",
        }
    }

    pub fn variables(&self) -> Option<&Map<String, Value>> {
        match self {
            RuleOutcome::Executed(dag) => Some(&dag.variables),
            RuleOutcome::Triggered { variables, .. }
            | RuleOutcome::NotTriggered { variables }
            | RuleOutcome::CoolingDown { variables, .. } => Some(variables),
            RuleOutcome::Disabled { .. } => None,
        }
    }
}

/// Result of executing a stored rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleExecution {
    pub rule_id: String,
    pub timestamp: i64,
    /// Nesting depth, 1 for a top-level execution
    pub depth: usize,
    #[serde(flatten)]
    pub outcome: RuleOutcome,
}

/// Executes stored rules and ad hoc DAGs
pub struct RuleExecutor<R: Rtdb> {
    rtdb: Arc<R>,
    keyspace: KeySpaceConfig,
    repository: RuleRepository<R>,
    entities: EntityStore<R>,
    sync: SyncEngine<R>,
    logger: RuleLogger,
    max_depth: usize,
}

impl<R: Rtdb> Clone for RuleExecutor<R> {
    fn clone(&self) -> Self {
        Self {
            rtdb: Arc::clone(&self.rtdb),
            keyspace: self.keyspace.clone(),
            repository: self.repository.clone(),
            entities: self.entities.clone(),
            sync: self.sync.clone(),
            logger: self.logger.clone(),
            max_depth: self.max_depth,
        }
    }
}

impl<R: Rtdb> RuleExecutor<R> {
    /// Executor with default entity store, sync engine and lifecycle engine
    pub fn new(rtdb: Arc<R>, keyspace: KeySpaceConfig) -> Self {
        Self {
            repository: RuleRepository::new(Arc::clone(&rtdb), keyspace.clone()),
            entities: EntityStore::new(Arc::clone(&rtdb), keyspace.clone()),
            sync: SyncEngine::new(Arc::clone(&rtdb), keyspace.clone()),
            logger: RuleLogger::new(keyspace.clone(), DEFAULT_EXECUTION_LOG_LIMIT),
            rtdb,
            keyspace,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_entity_store(mut self, entities: EntityStore<R>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_sync_engine(mut self, sync: SyncEngine<R>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: LifecycleEngine<R>) -> Self {
        self.repository = self.repository.with_lifecycle(lifecycle);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn with_execution_log_limit(mut self, limit: usize) -> Self {
        self.logger = RuleLogger::new(self.keyspace.clone(), limit);
        self
    }

    pub fn repository(&self) -> &RuleRepository<R> {
        &self.repository
    }

    pub fn logger(&self) -> &RuleLogger {
        &self.logger
    }

    pub fn rtdb(&self) -> &Arc<R> {
        &self.rtdb
    }

    // ========== Public operations ==========

    /// Execute a stored rule
    pub fn execute_rule(&self, rule_id: &str) -> Result<RuleExecution> {
        let mut tx = self.rtdb.begin();
        self.execute_rule_in(&mut tx, rule_id, &ExecutionContext::new(self.max_depth))
    }

    /// Execute a stored rule on top of `ctx`
    ///
    /// Fails with `RecursionLimit` or `CircularDependency` when `rule_id`
    /// cannot be entered from `ctx`.
    pub fn execute_rule_in(
        &self,
        tx: &mut Txn<'_>,
        rule_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<RuleExecution> {
        let ctx = ctx.enter(rule_id)?;
        let rule = self.repository.get_rule_in(tx, rule_id)?;
        rule.validate()?;
        let timestamp = tx.now_millis();

        let outcome = match self.repository.blocked_reason(tx, &rule)? {
            Some(reason) => {
                debug!("Rule {} not executed: {}", rule_id, reason);
                RuleOutcome::Disabled { reason }
            },
            None => match &rule.body {
                RuleBody::Dag(dag) => {
                    RuleOutcome::Executed(self.run_dag(tx, dag, Map::new(), Some(rule_id), &ctx))
                },
                RuleBody::Simple(simple) => self.run_simple(tx, rule_id, simple, &ctx)?,
            },
        };

        let execution = RuleExecution {
            rule_id: rule_id.to_string(),
            timestamp,
            depth: ctx.depth(),
            outcome,
        };
        self.logger.record_in(tx, &execution)?;
        Ok(execution)
    }

    /// Validate and run an ad hoc DAG with initial variables
    pub fn execute_dag(&self, dag: &DagDefinition, variables: Map<String, Value>) -> Result<DagOutcome> {
        dag.validate()?;
        let mut tx = self.rtdb.begin();
        Ok(self.execute_dag_in(&mut tx, dag, variables, &ExecutionContext::new(self.max_depth)))
    }

    /// Run an already validated DAG inside a caller-owned transaction
    pub fn execute_dag_in(
        &self,
        tx: &mut Txn<'_>,
        dag: &DagDefinition,
        variables: Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> DagOutcome {
        self.run_dag(tx, dag, variables, ctx.current(), ctx)
    }

    /// Logged executions of a rule, newest first
    pub fn recent_executions(&self, rule_id: &str, limit: usize) -> Result<Vec<RuleExecution>> {
        let mut tx = self.rtdb.begin();
        self.repository.get_rule_in(&mut tx, rule_id)?;
        self.logger.recent_in(&mut tx, rule_id, limit)
    }

    // ========== DAG ==========

    fn run_dag(
        &self,
        tx: &mut Txn<'_>,
        dag: &DagDefinition,
        mut variables: Map<String, Value>,
        rule_id: Option<&str>,
        ctx: &ExecutionContext,
    ) -> DagOutcome {
        let nodes: HashMap<&str, &DagNode> = dag.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        let mut outgoing: HashMap<&str, Vec<&DagEdge>> = HashMap::new();
        for edge in &dag.edges {
            *in_degree.entry(edge.to.as_str()).or_default() += 1;
            outgoing.entry(edge.from.as_str()).or_default().push(edge);
        }

        let mut queue: VecDeque<&str> = dag
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !in_degree.contains_key(id))
            .collect();
        let mut followed: HashMap<&str, usize> = HashMap::new();
        let mut outcome = DagOutcome::default();

        while let Some(id) = queue.pop_front() {
            let Some(node) = nodes.get(id) else {
                continue;
            };
            let result = self.run_node(tx, node, &mut variables, rule_id, ctx);
            let passed = result.result;
            if result.error.is_some() {
                outcome.failed_actions += 1;
            }
            outcome.executed.push(id.to_string());
            outcome.node_results.insert(id.to_string(), result);

            for edge in outgoing.get(id).into_iter().flatten() {
                if !edge.condition.admits(passed) {
                    debug!("Edge {} -> {} pruned ({})", edge.from, edge.to, passed);
                    continue;
                }
                let to = edge.to.as_str();
                let count = followed.entry(to).or_default();
                *count += 1;
                if Some(&*count) == in_degree.get(to) {
                    queue.push_back(to);
                }
            }
        }

        outcome.completed = outcome.node_results.len() == dag.nodes.len();
        outcome.variables = variables;
        debug!(
            "DAG {} ran {}/{} node(s), completed={}",
            rule_id.unwrap_or("<adhoc>"),
            outcome.executed.len(),
            dag.nodes.len(),
            outcome.completed
        );
        outcome
    }

    fn run_node(
        &self,
        tx: &mut Txn<'_>,
        node: &DagNode,
        variables: &mut Map<String, Value>,
        rule_id: Option<&str>,
        ctx: &ExecutionContext,
    ) -> NodeResult {
        let node_type = node.kind.type_name().to_string();
        match &node.kind {
            NodeKind::Condition(condition) => {
                let result = check_condition(&node.id, condition, variables);
                debug!("Node {}: condition {}", node.id, result);
                NodeResult {
                    node_type,
                    result,
                    output: Some(Value::Bool(result)),
                    error: None,
                }
            },
            NodeKind::Transform(transform) => {
                let left = transform.left.resolve(variables);
                let right = transform.right.resolve(variables);
                let value = number_value(transform.op.apply(left, right));
                debug!(
                    "Node {}: {} = {} {} {} -> {}",
                    node.id, transform.output, left, transform.op, right, value
                );
                variables.insert(transform.output.clone(), value.clone());
                NodeResult {
                    node_type,
                    result: true,
                    output: Some(value),
                    error: None,
                }
            },
            NodeKind::Action(action) => {
                let result = self.run_action(tx, action, variables, rule_id, ctx);
                NodeResult {
                    node_type,
                    result: result.success,
                    output: result.output,
                    error: result.error,
                }
            },
        }
    }

    // ========== Actions ==========

    /// Run an action; failures are recorded in the result
    fn run_action(
        &self,
        tx: &mut Txn<'_>,
        action: &Action,
        variables: &mut Map<String, Value>,
        rule_id: Option<&str>,
        ctx: &ExecutionContext,
    ) -> ActionResult {
        match self.dispatch_action(tx, action, variables, rule_id, ctx) {
            Ok(output) => ActionResult {
                action: action.name().to_string(),
                success: true,
                output,
                error: None,
            },
            Err(e) => {
                warn!(
                    "Rule {} action {} failed: {}",
                    rule_id.unwrap_or("<adhoc>"),
                    action.name(),
                    e
                );
                ActionResult {
                    action: action.name().to_string(),
                    success: false,
                    output: None,
                    error: Some(e.to_string()),
                }
            },
        }
    }

    fn dispatch_action(
        &self,
        tx: &mut Txn<'_>,
        action: &Action,
        variables: &mut Map<String, Value>,
        rule_id: Option<&str>,
        ctx: &ExecutionContext,
    ) -> Result<Option<Value>> {
        match action {
            Action::SetVariable { name, value } => {
                let value = resolve_value(value, variables);
                variables.insert(name.clone(), value.clone());
                Ok(Some(value))
            },
            Action::Publish {
                channel,
                event,
                data,
            } => {
                let channel = channel
                    .clone()
                    .unwrap_or_else(|| self.keyspace.rule_channel());
                let data = match data {
                    Some(data) => resolve_value(data, variables),
                    None => json!({"rule_id": rule_id, "variables": variables}),
                };
                let envelope = CoreEvent::new(event.clone(), data, tx.now_millis(), EVENT_SOURCE);
                let receivers = tx.publish(&channel, serde_json::to_string(&envelope)?);
                debug!("Published {} on {} ({} receiver(s))", event, channel, receivers);
                Ok(Some(json!({"channel": channel, "receivers": receivers})))
            },
            Action::Store {
                key,
                entity_type,
                payload,
                indexes,
                ttl_secs,
            } => {
                let key = resolve_text(key, variables);
                let payload = payload
                    .iter()
                    .map(|(field, value)| (field.clone(), resolve_value(value, variables)))
                    .collect();
                let ttl_ms = ttl_secs.map(secs_to_millis);
                let entity = self
                    .entities
                    .put_in(tx, &key, entity_type, payload, indexes, ttl_ms)?;
                Ok(Some(json!({"key": entity.key, "updated_at": entity.updated_at})))
            },
            Action::Sync {
                rule_id: sync_rule,
                source_key,
                target_key,
            } => {
                let source_key = resolve_text(source_key, variables);
                let target_key = resolve_text(target_key, variables);
                let outcome = self
                    .sync
                    .execute_one_in(tx, sync_rule, &source_key, &target_key)?;
                Ok(Some(serde_json::to_value(outcome)?))
            },
            Action::Transition {
                entity_key,
                from,
                event,
                context,
            } => {
                let entity_key = resolve_text(entity_key, variables);
                let context = context.as_ref().map(|c| resolve_value(c, variables));
                let state = self.repository.lifecycle().transition_in(
                    tx,
                    &entity_key,
                    from,
                    event,
                    context,
                )?;
                Ok(Some(json!({"entity_key": entity_key, "state": state})))
            },
            Action::ExecuteRule { rule_id: nested } => {
                let execution = self.execute_rule_in(tx, nested, ctx)?;
                Ok(Some(json!({
                    "rule_id": execution.rule_id,
                    "status": execution.outcome.status(),
                    "depth": execution.depth,
                })))
            },
        }
    }

    // ========== Simple rules ==========

    fn run_simple(
        &self,
        tx: &mut Txn<'_>,
        rule_id: &str,
        rule: &SimpleRule,
        ctx: &ExecutionContext,
    ) -> Result<RuleOutcome> {
        let mut variables = Map::new();
        for (name, source) in &rule.sources {
            match read_source(tx, source)? {
                Some(value) => {
                    variables.insert(name.clone(), value);
                },
                None => debug!("Rule {}: source {} has no value", rule_id, source.key),
            }
        }

        if !check_condition(rule_id, &rule.condition, &variables) {
            return Ok(RuleOutcome::NotTriggered { variables });
        }

        let now = tx.now_millis();
        let trigger_key = self.keyspace.rule_last_trigger_key(rule_id);
        if rule.cooldown_secs > 0 {
            let last = tx
                .get_string(&trigger_key)?
                .and_then(|s| s.parse::<i64>().ok());
            if let Some(last) = last {
                let cooldown_ms = secs_to_millis(rule.cooldown_secs);
                let elapsed = now.saturating_sub(last);
                if elapsed < cooldown_ms {
                    let remaining_ms = cooldown_ms.saturating_sub(elapsed);
                    debug!("Rule {} cooling down, {}ms left", rule_id, remaining_ms);
                    return Ok(RuleOutcome::CoolingDown {
                        remaining_ms,
                        variables,
                    });
                }
            }
        }

        let action = self.run_action(tx, &rule.action, &mut variables, Some(rule_id), ctx);
        // Cooldown starts only from a successful trigger
        if action.success {
            tx.set(&trigger_key, now.to_string())?;
            info!("Rule {} triggered {}", rule_id, action.action);
        }
        Ok(RuleOutcome::Triggered { action, variables })
    }
}

/// Read a simple rule variable: hash field, entity payload field or string
fn read_source(tx: &mut Txn<'_>, source: &SourceRef) -> Result<Option<Value>> {
    let key = source.key.as_str();
    match (tx.type_of(key), source.field.as_deref()) {
        (Some("hash"), Some(field)) => Ok(tx.hget_string(key, field)?.map(Value::String)),
        (Some("hash"), None) => Ok(Some(Value::Object(
            tx.hgetall_strings(key)?
                .into_iter()
                .map(|(f, v)| (f, Value::String(v)))
                .collect(),
        ))),
        (Some("string"), Some(field)) => {
            let Some(text) = tx.get_string(key)? else {
                return Ok(None);
            };
            if let Ok(entity) = serde_json::from_str::<Entity>(&text) {
                return Ok(entity.field(field).cloned());
            }
            match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => Ok(lookup_path(&map, field).cloned()),
                _ => Ok(None),
            }
        },
        (Some("string"), None) => Ok(tx.get_string(key)?.map(Value::String)),
        _ => Ok(None),
    }
}

/// Replace `$name` strings (recursively) by variable values
fn resolve_value(value: &Value, variables: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => match s.strip_prefix('$').and_then(|name| variables.get(name)) {
            Some(v) => v.clone(),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, variables)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Key-like text: `$name` becomes the variable's text
fn resolve_text(text: &str, variables: &Map<String, Value>) -> String {
    match text.strip_prefix('$').and_then(|name| variables.get(name)) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => text.to_string(),
    }
}

/// Evaluate a condition, logging the per-leaf trace at debug level
fn check_condition(owner: &str, condition: &Condition, variables: &Map<String, Value>) -> bool {
    let result = evaluate(condition, variables);
    if enabled!(Level::DEBUG) {
        for leaf in explain(condition, variables).leaves {
            debug!(
                "{}: {} {:?} {} (actual {}) -> {}",
                owner,
                leaf.field,
                leaf.operator,
                leaf.expected,
                leaf.actual.map_or_else(|| "none".to_string(), |v| v.to_string()),
                leaf.result
            );
        }
    }
    result
}
