//! voltage-lifecycle - State machines for lifecycle objects
//!
//! Alarms and rules move through fixed transition tables. Every transition
//! is guarded by the caller's expected current state, recorded in a capped
//! history list and published on `events:lifecycle`.

pub mod engine;
pub mod schema;

pub use engine::{HistoryEntry, LifecycleEngine, StateRecord, DEFAULT_HISTORY_LIMIT};
pub use schema::{StateMachineSchema, Transition};
