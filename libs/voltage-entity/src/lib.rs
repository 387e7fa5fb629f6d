//! voltage-entity - Entity store and secondary indexes
//!
//! Entities are JSON documents stored at caller-chosen keys, typed by an
//! `entity_type` string. Secondary indexes are derived data: every write
//! through [`EntityStore`] removes the index entries of the previous version
//! and adds the new ones inside the same store transaction.
//!
//! # Example
//!
//! ```
//! use voltage_entity::EntityStore;
//! use voltage_model::{IndexSpec, KeySpaceConfig};
//! use voltage_rtdb::helpers::create_test_rtdb;
//! use serde_json::json;
//!
//! let store = EntityStore::new(create_test_rtdb(), KeySpaceConfig::test());
//! let payload = json!({"site": "north", "power": 120.5});
//! store
//!     .put("entity:device:1", "device", payload.as_object().unwrap().clone(), &[IndexSpec::single("site")])
//!     .unwrap();
//!
//! let keys = store.indexes().query_index("device", "site", "north").unwrap();
//! assert_eq!(keys, vec!["entity:device:1".to_string()]);
//! ```

pub mod index;
pub mod store;

pub use index::{render_index_value, IndexManager, StaleIndexEntry};
pub use store::{EntityPage, EntityStore};

/// Default SCAN page size for index maintenance walks
pub const DEFAULT_SCAN_BATCH: usize = 100;
