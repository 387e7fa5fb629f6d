//! voltage-sync - Pattern-driven bidirectional sync
//!
//! A sync rule maps every key matching a source glob onto a target key built
//! from the glob's captures, transforming values on the way. Optional reverse
//! mapping records let downstream writes (operator commands) find their way
//! back to the source point.
//!
//! # Example
//!
//! ```
//! use voltage_sync::{SyncEngine, SyncRule};
//! use voltage_model::KeySpaceConfig;
//! use voltage_rtdb::helpers::create_test_rtdb;
//! use voltage_rtdb::Rtdb;
//! use serde_json::json;
//!
//! let rtdb = create_test_rtdb();
//! let engine = SyncEngine::new(rtdb.clone(), KeySpaceConfig::test());
//! let rule: SyncRule = serde_json::from_value(json!({
//!     "source": {"pattern": "comsrv:*:T"},
//!     "target": {"pattern": "inst:*:M"}
//! })).unwrap();
//! engine.config_set("telemetry", rule).unwrap();
//!
//! rtdb.begin().hset("comsrv:1001:T", "1", "230.5").unwrap();
//! engine.execute_matching("comsrv:1001:T").unwrap();
//! assert_eq!(
//!     rtdb.begin().hget_string("inst:1001:M", "1").unwrap().as_deref(),
//!     Some("230.5")
//! );
//! ```

pub mod config;
pub mod engine;
pub mod transform;

pub use config::{DataKind, ReverseMappingSpec, SourceSpec, SyncRule, SyncStats, TargetSpec};
pub use engine::{
    BatchOutcome, ItemError, MatchedRule, PatternOutcome, ReverseEntry, SyncEngine, SyncOutcome,
    SCALAR_FIELD,
};
pub use transform::{
    DirectTransform, JsonExtractTransform, NumericTransform, TransformError, TransformRegistry,
    TransformSpec, ValueTransform,
};
