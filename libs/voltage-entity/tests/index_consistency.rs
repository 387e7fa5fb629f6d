//! Index consistency across the entity write API
//!
//! Every put/delete must leave the index buckets describing exactly the
//! stored entities, and entries that outlive their entity must be detectable.

#![allow(clippy::disallowed_methods)] // Integration test - unwrap is acceptable

use serde_json::{json, Map, Value};
use voltage_entity::{EntityStore, StaleIndexEntry};
use voltage_model::{IndexSpec, KeySpaceConfig};
use voltage_rtdb::helpers::{create_test_rtdb, create_test_rtdb_with_clock};
use voltage_rtdb::Rtdb;

fn obj(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn specs() -> Vec<IndexSpec> {
    vec![
        IndexSpec::single("site"),
        IndexSpec::composite(["site", "kind"]),
        IndexSpec::sorted("power"),
    ]
}

#[test]
fn test_index_symmetry_after_put_update_delete() {
    let store = EntityStore::new(create_test_rtdb(), KeySpaceConfig::test());
    let idx = store.indexes();

    store
        .put(
            "entity:device:1",
            "device",
            obj(json!({"site": "north", "kind": "pcs", "power": 50})),
            &specs(),
        )
        .unwrap();
    store
        .put(
            "entity:device:2",
            "device",
            obj(json!({"site": "north", "kind": "bms", "power": 10})),
            &specs(),
        )
        .unwrap();

    assert_eq!(
        idx.query_index("device", "site", "north").unwrap(),
        vec!["entity:device:1", "entity:device:2"]
    );

    // Update every indexed field of device 1
    store
        .put(
            "entity:device:1",
            "device",
            obj(json!({"site": "south", "kind": "pcs", "power": 5})),
            &specs(),
        )
        .unwrap();

    assert_eq!(
        idx.query_index("device", "site", "north").unwrap(),
        vec!["entity:device:2"]
    );
    assert_eq!(
        idx.query_index("device", "site", "south").unwrap(),
        vec!["entity:device:1"]
    );
    let fields = vec!["site".to_string(), "kind".to_string()];
    assert!(idx
        .query_composite("device", &fields, &["north".into(), "pcs".into()])
        .unwrap()
        .is_empty());
    assert_eq!(
        idx.query_composite("device", &fields, &["south".into(), "pcs".into()])
            .unwrap(),
        vec!["entity:device:1"]
    );
    let ranked: Vec<String> = idx
        .query_range("device", "power", f64::NEG_INFINITY, f64::INFINITY, 0, None)
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(ranked, vec!["entity:device:1", "entity:device:2"]);

    store.delete("entity:device:1").unwrap();
    store.delete("entity:device:2").unwrap();

    // No bucket survives once every entity is gone
    let keyspace = KeySpaceConfig::test();
    let leftover = store
        .rtdb()
        .begin()
        .keys(&keyspace.index_pattern("device"))
        .unwrap();
    assert!(leftover.is_empty(), "leftover buckets: {:?}", leftover);
    assert!(idx.find_stale("device").unwrap().is_empty());
}

#[test]
fn test_unindexable_values_are_skipped() {
    let store = EntityStore::new(create_test_rtdb(), KeySpaceConfig::test());
    store
        .put(
            "d1",
            "device",
            obj(json!({"site": null, "power": "n/a", "kind": ["x"]})),
            &specs(),
        )
        .unwrap();

    let keys = store
        .rtdb()
        .begin()
        .keys(&KeySpaceConfig::test().index_pattern("device"))
        .unwrap();
    assert!(keys.is_empty());
}

#[test]
fn test_stale_entry_when_bucket_outlives_entity() {
    let (rtdb, clock) = create_test_rtdb_with_clock(0);
    let store = EntityStore::new(rtdb, KeySpaceConfig::test());
    let idx = store.indexes();

    // Entity lives 10s, its bucket 60s
    store
        .put_with_ttl(
            "entity:alarm-src:1",
            "sensor",
            obj(json!({"zone": "a"})),
            &[IndexSpec::single("zone").with_ttl(60)],
            10,
        )
        .unwrap();
    store
        .put(
            "entity:alarm-src:2",
            "sensor",
            obj(json!({"zone": "a"})),
            &[IndexSpec::single("zone").with_ttl(60)],
        )
        .unwrap();
    assert!(idx.find_stale("sensor").unwrap().is_empty());

    clock.advance_secs(20);

    let stale = idx.find_stale("sensor").unwrap();
    let bucket = KeySpaceConfig::test().index_key("sensor", "zone", "a");
    assert_eq!(
        stale,
        vec![StaleIndexEntry {
            index_key: bucket.clone(),
            entity_key: "entity:alarm-src:1".to_string(),
        }]
    );

    let repaired = idx.repair_stale("sensor").unwrap();
    assert_eq!(repaired.len(), 1);
    assert!(idx.find_stale("sensor").unwrap().is_empty());
    assert_eq!(
        idx.query_index("sensor", "zone", "a").unwrap(),
        vec!["entity:alarm-src:2"]
    );

    // Bucket TTL runs out independently of the surviving entity
    clock.advance_secs(60);
    assert!(idx.query_index("sensor", "zone", "a").unwrap().is_empty());
    assert!(store.get("entity:alarm-src:2").is_ok());
}

#[test]
fn test_single_and_sorted_index_on_one_field() {
    let store = EntityStore::new(create_test_rtdb(), KeySpaceConfig::test());
    let specs = vec![IndexSpec::single("rank"), IndexSpec::sorted("rank")];

    store
        .put("task:a", "task", obj(json!({"rank": "sorted"})), &specs)
        .unwrap();
    store
        .put("task:b", "task", obj(json!({"rank": 5})), &specs)
        .unwrap();

    let idx = store.indexes();
    assert_eq!(idx.query_index("task", "rank", "sorted").unwrap(), vec!["task:a"]);
    assert_eq!(idx.query_index("task", "rank", "5").unwrap(), vec!["task:b"]);
    assert_eq!(
        idx.query_range("task", "rank", 0.0, 10.0, 0, None).unwrap(),
        vec![("task:b".to_string(), 5.0)]
    );
    let keys: Vec<String> = store
        .scan("task", None, 10, 0)
        .unwrap()
        .items
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(keys, vec!["task:a", "task:b"]);
}

#[test]
fn test_rejected_put_leaves_nothing_behind() {
    let rtdb = create_test_rtdb();
    let keyspace = KeySpaceConfig::test();
    let store = EntityStore::new(rtdb.clone(), keyspace.clone());
    let specs = vec![IndexSpec::single("zone"), IndexSpec::sorted("load")];

    store
        .put("meter:1", "meter", obj(json!({"zone": "a", "load": 1})), &specs)
        .unwrap();

    // Something foreign occupies the sorted bucket
    let bucket = keyspace.sorted_index_key("meter", "load");
    {
        let mut tx = rtdb.begin();
        tx.del(&bucket).unwrap();
        tx.hset(&bucket, "owner", "other").unwrap();
    }

    let err = store
        .put("meter:2", "meter", obj(json!({"zone": "b", "load": 2})), &specs)
        .unwrap_err();
    assert!(matches!(err, errors::VoltageError::Validation(_)));
    assert!(store.get("meter:2").is_err());
    assert!(store.indexes().query_index("meter", "zone", "b").unwrap().is_empty());

    // A rejected update keeps the previous version and its index entries
    assert!(store
        .put("meter:1", "meter", obj(json!({"zone": "c", "load": 3})), &specs)
        .is_err());
    assert_eq!(store.get("meter:1").unwrap().payload["zone"], "a");
    assert_eq!(
        store.indexes().query_index("meter", "zone", "a").unwrap(),
        vec!["meter:1"]
    );
    assert!(store.indexes().query_index("meter", "zone", "c").unwrap().is_empty());
    assert_eq!(store.scan("meter", None, 10, 0).unwrap().items.len(), 1);
}
