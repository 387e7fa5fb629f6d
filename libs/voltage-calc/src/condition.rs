//! Condition Evaluator
//!
//! Boolean condition trees evaluated against a JSON object context. A tree is
//! either a leaf `{field, operator, value}` or a group
//! `{logic: AND|OR, conditions: [...]}`.
//!
//! Evaluation is total: any lookup or coercion failure makes the leaf
//! `false`, nothing is ever returned as an error. Groups evaluate every child
//! (no short-circuit) so traces always cover the whole tree.

use crate::error::{CalcError, Result};
use crate::ops::to_number;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};
use voltage_model::{glob_match, lookup_path};

// ============================================================================
// Condition tree
// ============================================================================

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "eq", alias = "==", alias = "equal")]
    Eq,
    #[serde(rename = "ne", alias = "!=", alias = "not_equal")]
    Ne,
    #[serde(rename = "gt", alias = ">")]
    Gt,
    #[serde(rename = "gte", alias = ">=")]
    Gte,
    #[serde(rename = "lt", alias = "<")]
    Lt,
    #[serde(rename = "lte", alias = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "matches")]
    Matches,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "not_exists")]
    NotExists,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Contains => "contains",
            Self::Matches => "matches",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
        }
    }
}

/// Logical operators for groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[serde(rename = "AND", alias = "and", alias = "&&")]
    And,
    #[serde(rename = "OR", alias = "or", alias = "||")]
    Or,
}

/// Leaf comparison against one context field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionLeaf {
    /// Context key; dotted paths reach into nested objects
    pub field: String,
    pub operator: ComparisonOperator,
    #[serde(default)]
    pub value: Value,
}

/// Group of child conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub logic: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Group(ConditionGroup),
    Leaf(ConditionLeaf),
}

impl Condition {
    /// Shorthand for a leaf
    pub fn leaf(field: impl Into<String>, operator: ComparisonOperator, value: Value) -> Self {
        Condition::Leaf(ConditionLeaf {
            field: field.into(),
            operator,
            value,
        })
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::Group(ConditionGroup {
            logic: LogicalOperator::And,
            conditions,
        })
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Group(ConditionGroup {
            logic: LogicalOperator::Or,
            conditions,
        })
    }

    /// Decode a condition tree from JSON
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| CalcError::condition(e.to_string()))
    }

    /// Structural checks: non-empty field names
    pub fn validate(&self) -> Result<()> {
        match self {
            Condition::Leaf(leaf) if leaf.field.trim().is_empty() => {
                Err(CalcError::condition("leaf field must not be empty"))
            },
            Condition::Leaf(_) => Ok(()),
            Condition::Group(group) => group.conditions.iter().try_for_each(Condition::validate),
        }
    }

    /// Field names referenced anywhere in the tree
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Leaf(leaf) => out.push(leaf.field.as_str()),
            Condition::Group(group) => {
                for child in &group.conditions {
                    child.collect_fields(out);
                }
            },
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate a condition tree against a context
pub fn evaluate(condition: &Condition, context: &Map<String, Value>) -> bool {
    match condition {
        Condition::Leaf(leaf) => evaluate_leaf(leaf, context),
        Condition::Group(group) => {
            // Collect first: every child runs regardless of earlier results
            let results: Vec<bool> = group
                .conditions
                .iter()
                .map(|c| evaluate(c, context))
                .collect();
            combine(group.logic, &results)
        },
    }
}

fn combine(logic: LogicalOperator, results: &[bool]) -> bool {
    match logic {
        LogicalOperator::And => results.iter().all(|r| *r),
        LogicalOperator::Or => results.iter().any(|r| *r),
    }
}

fn evaluate_leaf(leaf: &ConditionLeaf, context: &Map<String, Value>) -> bool {
    let actual = lookup_path(context, &leaf.field);
    let result = compare(actual, leaf.operator, &leaf.value);
    trace!(
        "Condition evaluation: {} {} {} = {}",
        leaf.field,
        leaf.operator.as_str(),
        leaf.value,
        result
    );
    result
}

/// Apply one operator; `actual` is `None` when the field is absent
pub fn compare(actual: Option<&Value>, operator: ComparisonOperator, expected: &Value) -> bool {
    use ComparisonOperator::*;

    let present = actual.filter(|v| !v.is_null());
    match operator {
        Exists => present.is_some(),
        NotExists => present.is_none(),
        _ => {
            let Some(actual) = present else {
                return false;
            };
            match operator {
                Eq => values_equal(actual, expected),
                Ne => !values_equal(actual, expected),
                Gt => compare_numeric(actual, expected, |a, b| a > b),
                Gte => compare_numeric(actual, expected, |a, b| a >= b),
                Lt => compare_numeric(actual, expected, |a, b| a < b),
                Lte => compare_numeric(actual, expected, |a, b| a <= b),
                In => match expected {
                    Value::Array(items) => items.iter().any(|i| values_equal(actual, i)),
                    _ => false,
                },
                NotIn => match expected {
                    Value::Array(items) => !items.iter().any(|i| values_equal(actual, i)),
                    _ => false,
                },
                Contains => contains(actual, expected),
                Matches => matches_pattern(actual, expected),
                Exists | NotExists => false,
            }
        },
    }
}

/// Both sides coerced to numbers; coercion failure is `false`
fn compare_numeric<F>(left: &Value, right: &Value, op: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (to_number(left), to_number(right)) {
        (Some(l), Some(r)) => op(l, r),
        _ => false,
    }
}

/// Numeric when both coerce, otherwise JSON equality, otherwise string form
pub fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (to_number(left), to_number(right)) {
        return l == r;
    }
    if left == right {
        return true;
    }
    match (scalar_text(left), scalar_text(right)) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

/// String form of scalars; arrays and objects have none
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(haystack) => {
            scalar_text(expected).is_some_and(|needle| haystack.contains(needle.as_str()))
        },
        Value::Array(items) => items.iter().any(|i| values_equal(i, expected)),
        _ => false,
    }
}

/// Glob when the pattern has `*` or `?`, plain substring otherwise
fn matches_pattern(actual: &Value, expected: &Value) -> bool {
    let (Some(text), Some(pattern)) = (scalar_text(actual), scalar_text(expected)) else {
        return false;
    };
    if pattern.contains('*') || pattern.contains('?') {
        glob_match(&pattern, &text)
    } else {
        text.contains(pattern.as_str())
    }
}

// ============================================================================
// Explain
// ============================================================================

/// Result of one leaf inside a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafTrace {
    pub field: String,
    pub operator: ComparisonOperator,
    pub expected: Value,
    /// Value found in the context; `None` when absent
    pub actual: Option<Value>,
    pub result: bool,
}

/// Per-leaf diagnostics for one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionTrace {
    pub result: bool,
    pub leaves: Vec<LeafTrace>,
}

/// Evaluate and record every leaf, in tree order
pub fn explain(condition: &Condition, context: &Map<String, Value>) -> ConditionTrace {
    let mut leaves = Vec::new();
    let result = explain_into(condition, context, &mut leaves);
    debug!(
        "Condition explained: {} ({} of {} leaves true)",
        result,
        leaves.iter().filter(|l| l.result).count(),
        leaves.len()
    );
    ConditionTrace { result, leaves }
}

fn explain_into(condition: &Condition, context: &Map<String, Value>, leaves: &mut Vec<LeafTrace>) -> bool {
    match condition {
        Condition::Leaf(leaf) => {
            let actual = lookup_path(context, &leaf.field);
            let result = compare(actual, leaf.operator, &leaf.value);
            leaves.push(LeafTrace {
                field: leaf.field.clone(),
                operator: leaf.operator,
                expected: leaf.value.clone(),
                actual: actual.cloned(),
                result,
            });
            result
        },
        Condition::Group(group) => {
            let results: Vec<bool> = group
                .conditions
                .iter()
                .map(|c| explain_into(c, context, leaves))
                .collect();
            combine(group.logic, &results)
        },
    }
}
