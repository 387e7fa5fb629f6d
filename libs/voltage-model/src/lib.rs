//! Voltage Model Library
//!
//! Shared, storage-agnostic types for the VoltageEMS orchestration core.
//! This library provides pure data definitions without service dependencies.
//!
//! # Modules
//!
//! - `keyspace`: Key naming conventions (single source of truth for keys)
//! - `pattern`: Glob key patterns with wildcard captures and template rendering
//! - `entity`: Entity envelope, typed payloads (alarms) and event envelopes
//! - `types`: Point types and point updates coming from protocol drivers
//! - `timeseries`: Flattening of hash records into history points
//!
//! # Example
//!
//! ```
//! use voltage_model::{render, KeyPattern};
//!
//! let pattern = KeyPattern::new("comsrv:*:T").unwrap();
//! let captures = pattern.captures("comsrv:1001:T").unwrap();
//! assert_eq!(render("inst:*:M", &captures).unwrap(), "inst:1001:M");
//! ```

pub mod entity;
pub mod error;
pub mod keyspace;
pub mod pattern;
pub mod timeseries;
pub mod types;

// Re-exports for convenience
pub use entity::{
    lookup_path, AlarmLevel, AlarmPayload, CoreEvent, Entity, IndexSpec, TypedPayload,
};
pub use error::{ModelError, Result};
pub use keyspace::KeySpaceConfig;
pub use pattern::{glob_match, render, KeyPattern};
pub use timeseries::{flatten, HistoryPoint};
pub use types::{PointType, PointUpdate};
