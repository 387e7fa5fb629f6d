//! Voltage Rules - Rule Engine Library
//!
//! Rules live in the shared store and come in two kinds:
//! - DAG rules: condition, transform and action nodes joined by gated edges
//! - Simple rules: one condition over named sources, one action, a cooldown
//!
//! Actions publish events, store entities, run sync rules, drive lifecycle
//! transitions and execute other rules (depth bounded, cycles rejected).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │  Scheduler  │────▶│   Executor   │────▶│    RTDB     │
//! │  (100ms)    │     │  (DAG/simple)│     │ (one txn)   │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌──────────────┐
//! │ SyncEngine  │     │ Repository + │
//! │  (sweeps)   │     │  Lifecycle   │
//! └─────────────┘     └──────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use voltage_rules::{RuleExecutor, RuleOutcome};
//! use voltage_model::KeySpaceConfig;
//! use voltage_rtdb::helpers::create_test_rtdb;
//! use serde_json::json;
//!
//! let executor = RuleExecutor::new(create_test_rtdb(), KeySpaceConfig::test());
//! let rule = serde_json::from_value(json!({
//!     "kind": "dag",
//!     "nodes": [{"id": "set", "type": "action",
//!                "config": {"action": "set_variable", "name": "mode", "value": "auto"}}]
//! })).unwrap();
//! executor.repository().upsert_rule("init", rule).unwrap();
//! executor.repository().transition_rule("init", "draft", "activate").unwrap();
//!
//! let execution = executor.execute_rule("init").unwrap();
//! assert_eq!(execution.outcome.status(), "executed");
//! if let RuleOutcome::Executed(dag) = execution.outcome {
//!     assert_eq!(dag.variables["mode"], "auto");
//! }
//! ```

pub mod context;
mod error;
mod executor;
pub mod logger;
mod repository;
mod scheduler;
pub mod types;

// Re-export public API
pub use context::{ExecutionContext, DEFAULT_MAX_DEPTH};
pub use error::RuleError;
pub use executor::{
    ActionResult, DagOutcome, NodeResult, RuleExecution, RuleExecutor, RuleOutcome, EVENT_SOURCE,
};
pub use logger::{RuleLogger, DEFAULT_EXECUTION_LOG_LIMIT};
pub use repository::{RuleRepository, ACTIVE_STATE, RULE_ENTITY_TYPE};
pub use scheduler::{
    RuleScheduler, SchedulerStatus, TickReport, DEFAULT_SWEEP_PAGE, DEFAULT_TICK_MS,
};

// Re-export rule types for convenience
pub use types::{
    Action, DagDefinition, DagEdge, DagNode, EdgeCondition, NodeKind, RuleBody, RuleDefinition,
    SimpleRule, SourceRef, TransformNode,
};
