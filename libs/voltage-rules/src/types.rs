//! Rule type definitions
//!
//! A stored rule is either a DAG of condition/transform/action nodes or a
//! simple single-condition/single-action rule with a cooldown:
//!
//! ```json
//! {
//!   "id": "overheat",
//!   "name": "Overheat shutdown",
//!   "kind": "dag",
//!   "nodes": [
//!     {"id": "hot", "type": "condition",
//!      "config": {"field": "temp", "operator": "gt", "value": 80}},
//!     {"id": "stop", "type": "action",
//!      "config": {"action": "publish", "event": "shutdown"}}
//!   ],
//!   "edges": [{"from": "hot", "to": "stop", "condition": "true"}]
//! }
//! ```

use crate::error::RuleError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use voltage_calc::{ArithmeticOp, Condition, Operand};
use voltage_model::IndexSpec;

// ============================================================================
// Rule definition
// ============================================================================

/// Stored rule: metadata plus its body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Filled from the repository key when stored
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Execution priority (higher = earlier)
    #[serde(default)]
    pub priority: u32,

    /// Scheduler period; `None` runs only on demand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,

    #[serde(flatten)]
    pub body: RuleBody,
}

fn default_enabled() -> bool {
    true
}

/// Rule body, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleBody {
    Dag(DagDefinition),
    Simple(SimpleRule),
}

impl RuleBody {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleBody::Dag(_) => "dag",
            RuleBody::Simple(_) => "simple",
        }
    }
}

impl RuleDefinition {
    /// Structural checks run before a rule is stored or executed
    pub fn validate(&self) -> Result<(), RuleError> {
        validate_rule_id(&self.id)?;
        if self.interval_ms == Some(0) {
            return Err(RuleError::InvalidFormat(
                "interval_ms must be positive".to_string(),
            ));
        }
        match &self.body {
            RuleBody::Dag(dag) => dag.validate(),
            RuleBody::Simple(simple) => simple.validate(),
        }
    }
}

/// Rule ids are embedded in keys (`rule:{id}:...`)
pub fn validate_rule_id(rule_id: &str) -> Result<(), RuleError> {
    if rule_id.is_empty()
        || rule_id.contains([':', '*', '?'])
        || rule_id.contains(char::is_whitespace)
    {
        return Err(RuleError::InvalidId(rule_id.to_string()));
    }
    Ok(())
}

// ============================================================================
// DAG
// ============================================================================

/// Graph of nodes connected by gated edges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagDefinition {
    pub nodes: Vec<DagNode>,
    #[serde(default)]
    pub edges: Vec<DagEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Node variants, as `{"type": ..., "config": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum NodeKind {
    /// Condition tree evaluated against the variables
    Condition(Condition),
    /// `output = left op right`
    Transform(TransformNode),
    /// Side effect
    Action(Action),
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Condition(_) => "condition",
            NodeKind::Transform(_) => "transform",
            NodeKind::Action(_) => "action",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformNode {
    pub left: Operand,
    #[serde(alias = "operation", alias = "operator")]
    pub op: ArithmeticOp,
    pub right: Operand,
    pub output: String,
}

/// Edge from one node to another, optionally gated on the source's result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagEdge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub condition: EdgeCondition,
}

/// Gate of an edge: `"none"`, `"true"`, `"false"` (booleans and null accepted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "GateRepr")]
pub enum EdgeCondition {
    #[default]
    None,
    True,
    False,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GateRepr {
    Flag(bool),
    Text(String),
    Missing(()),
}

impl TryFrom<GateRepr> for EdgeCondition {
    type Error = String;

    fn try_from(repr: GateRepr) -> Result<Self, Self::Error> {
        match repr {
            GateRepr::Flag(true) => Ok(EdgeCondition::True),
            GateRepr::Flag(false) => Ok(EdgeCondition::False),
            GateRepr::Missing(()) => Ok(EdgeCondition::None),
            GateRepr::Text(text) => match text.to_ascii_lowercase().as_str() {
                "" | "none" => Ok(EdgeCondition::None),
                "true" => Ok(EdgeCondition::True),
                "false" => Ok(EdgeCondition::False),
                other => Err(format!(
                    "edge condition must be none, true or false, got '{}'",
                    other
                )),
            },
        }
    }
}

impl EdgeCondition {
    /// Whether an edge with this gate is followed after a node produced `result`
    pub fn admits(self, result: bool) -> bool {
        match self {
            EdgeCondition::None => true,
            EdgeCondition::True => result,
            EdgeCondition::False => !result,
        }
    }
}

impl DagDefinition {
    /// Unique node ids, known edge endpoints, no cycles
    pub fn validate(&self) -> Result<(), RuleError> {
        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(self.nodes.len());
        for (position, node) in self.nodes.iter().enumerate() {
            if node.id.is_empty() {
                return Err(RuleError::InvalidNode {
                    node: format!("#{}", position),
                    reason: "node id is empty".to_string(),
                });
            }
            if seen.insert(node.id.as_str(), position).is_some() {
                return Err(RuleError::DuplicateNode(node.id.clone()));
            }
            node.validate()?;
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !seen.contains_key(endpoint.as_str()) {
                    return Err(RuleError::UnknownNode {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }

        // Kahn over the ungated graph; leftovers sit on a cycle
        let order = self.topological_order();
        if order.len() < self.nodes.len() {
            let stuck: Vec<&str> = self
                .nodes
                .iter()
                .map(|n| n.id.as_str())
                .filter(|id| !order.contains(id))
                .collect();
            return Err(RuleError::Cycle(stuck.join(", ")));
        }
        Ok(())
    }

    /// Topological order ignoring gates; nodes on cycles are left out
    pub fn topological_order(&self) -> Vec<&str> {
        let mut in_degree: BTreeMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                *d += 1;
            }
        }
        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for edge in self.edges.iter().filter(|e| e.from == id) {
                if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(edge.to.as_str());
                    }
                }
            }
        }
        order
    }

    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

impl DagNode {
    fn validate(&self) -> Result<(), RuleError> {
        let invalid = |reason: String| RuleError::InvalidNode {
            node: self.id.clone(),
            reason,
        };
        match &self.kind {
            NodeKind::Condition(condition) => {
                condition.validate().map_err(|e| invalid(e.to_string()))
            },
            NodeKind::Transform(transform) => {
                if transform.output.trim().is_empty() {
                    return Err(invalid("transform output is empty".to_string()));
                }
                Ok(())
            },
            NodeKind::Action(action) => action.validate().map_err(invalid),
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Side effect run by an action node or a simple rule
///
/// String values of the form `$name` are replaced by the variable `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    SetVariable {
        name: String,
        value: Value,
    },
    /// Emit a `{type, data, timestamp, source}` event
    Publish {
        /// Defaults to the rules channel
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default = "default_event")]
        event: String,
        /// Defaults to the rule id and current variables
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// Upsert an entity through the entity store
    Store {
        key: String,
        entity_type: String,
        #[serde(default)]
        payload: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        indexes: Vec<IndexSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_secs: Option<u64>,
    },
    /// Run one sync rule for an explicit pair
    Sync {
        rule_id: String,
        source_key: String,
        target_key: String,
    },
    /// Lifecycle transition
    Transition {
        entity_key: String,
        from: String,
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    /// Execute another stored rule
    ExecuteRule { rule_id: String },
}

fn default_event() -> String {
    "rule_action".to_string()
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::SetVariable { .. } => "set_variable",
            Action::Publish { .. } => "publish",
            Action::Store { .. } => "store",
            Action::Sync { .. } => "sync",
            Action::Transition { .. } => "transition",
            Action::ExecuteRule { .. } => "execute_rule",
        }
    }

    fn validate(&self) -> Result<(), String> {
        let required = |what: &str, value: &str| {
            if value.trim().is_empty() {
                Err(format!("{} action needs a non-empty {}", self.name(), what))
            } else {
                Ok(())
            }
        };
        match self {
            Action::SetVariable { name, .. } => required("name", name),
            Action::Publish { event, .. } => required("event", event),
            Action::Store {
                key,
                entity_type,
                indexes,
                ttl_secs,
                ..
            } => {
                required("key", key)?;
                required("entity_type", entity_type)?;
                if *ttl_secs == Some(0) {
                    return Err("store action ttl_secs must be positive".to_string());
                }
                indexes
                    .iter()
                    .try_for_each(|spec| spec.validate().map_err(|e| e.to_string()))
            },
            Action::Sync {
                rule_id,
                source_key,
                target_key,
            } => {
                required("rule_id", rule_id)?;
                required("source_key", source_key)?;
                required("target_key", target_key)
            },
            Action::Transition {
                entity_key,
                from,
                event,
                ..
            } => {
                required("entity_key", entity_key)?;
                required("from", from)?;
                required("event", event)
            },
            Action::ExecuteRule { rule_id } => {
                validate_rule_id(rule_id).map_err(|e| e.to_string())
            },
        }
    }
}

// ============================================================================
// Simple rule
// ============================================================================

/// One condition, one action, a cooldown between triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleRule {
    pub condition: Condition,
    /// Variable name -> where to read it
    #[serde(default)]
    pub sources: BTreeMap<String, SourceRef>,
    pub action: Action,
    #[serde(default)]
    pub cooldown_secs: u64,
}

/// Store location of a simple rule variable
///
/// With `field`: a hash field, or a payload field of an entity (dotted paths
/// allowed). Without: the whole string value of `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl SimpleRule {
    fn validate(&self) -> Result<(), RuleError> {
        self.condition
            .validate()
            .map_err(|e| RuleError::InvalidFormat(e.to_string()))?;
        for (name, source) in &self.sources {
            if name.is_empty() || source.key.is_empty() {
                return Err(RuleError::InvalidFormat(
                    "simple rule sources need a variable name and a key".to_string(),
                ));
            }
        }
        self.action.validate().map_err(RuleError::InvalidFormat)
    }
}
