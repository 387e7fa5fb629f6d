//! Call stack for nested rule execution
//!
//! A rule may execute another rule through an `execute_rule` action. The
//! chain of rules currently running is carried explicitly and extended by
//! value, so the depth bound and cycle detection do not depend on how the
//! executor recurses.

use errors::{Result, VoltageError};

/// Default bound on nested `execute_rule` depth
pub const DEFAULT_MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    stack: Vec<String>,
    max_depth: usize,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ExecutionContext {
    /// Empty stack; at most `max_depth` rules may be active at once
    pub fn new(max_depth: usize) -> Self {
        Self {
            stack: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Context for running `rule_id` on top of the current stack
    pub fn enter(&self, rule_id: &str) -> Result<ExecutionContext> {
        if self.stack.iter().any(|r| r == rule_id) {
            let mut chain = self.stack.clone();
            chain.push(rule_id.to_string());
            return Err(VoltageError::CircularDependency(chain.join(" -> ")));
        }
        if self.stack.len() >= self.max_depth {
            return Err(VoltageError::RecursionLimit {
                depth: self.stack.len() + 1,
                max: self.max_depth,
            });
        }
        let mut stack = self.stack.clone();
        stack.push(rule_id.to_string());
        Ok(ExecutionContext {
            stack,
            max_depth: self.max_depth,
        })
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Rule currently executing
    pub fn current(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    /// Active rules, outermost first
    pub fn stack(&self) -> &[String] {
        &self.stack
    }
}
