//! Rule Engine Error Types

use errors::VoltageError;
use thiserror::Error;

/// Rule definition problems found before anything executes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("Invalid rule id '{0}': must be non-empty without whitespace, ':' or glob characters")]
    InvalidId(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge {from} -> {to} references unknown node {missing}")]
    UnknownNode {
        from: String,
        to: String,
        missing: String,
    },

    #[error("Graph contains a cycle through: {0}")]
    Cycle(String),

    #[error("Invalid node {node}: {reason}")]
    InvalidNode { node: String, reason: String },

    #[error("Invalid rule format: {0}")]
    InvalidFormat(String),
}

impl From<RuleError> for VoltageError {
    fn from(err: RuleError) -> Self {
        VoltageError::Validation(err.to_string())
    }
}
