//! Sync engine behavior against the in-memory store

#![allow(clippy::disallowed_methods)] // Integration test - unwrap is acceptable

use errors::VoltageError;
use serde_json::json;
use std::sync::Arc;
use tracing_test::traced_test;
use voltage_model::KeySpaceConfig;
use voltage_rtdb::helpers::{create_test_rtdb, create_test_rtdb_with_clock};
use voltage_rtdb::{MemoryRtdb, Rtdb};
use voltage_sync::{ReverseEntry, SyncEngine, SyncOutcome, SyncRule};

fn setup() -> (Arc<MemoryRtdb>, SyncEngine<MemoryRtdb>) {
    let rtdb = create_test_rtdb();
    let engine = SyncEngine::new(rtdb.clone(), KeySpaceConfig::test());
    (rtdb, engine)
}

fn rule(value: serde_json::Value) -> SyncRule {
    serde_json::from_value(value).unwrap()
}

fn telemetry_rule() -> SyncRule {
    rule(json!({
        "source": {"pattern": "comsrv:*:T", "kind": "hash"},
        "target": {"pattern": "inst:*:M", "kind": "hash"},
        "reverse_mapping": {"enabled": true},
        "transform": {"type": "numeric", "params": {"scale": 10}},
        "field_mapping": {"1": "voltage"}
    }))
}

fn write_points(rtdb: &MemoryRtdb, channel: u32, points: &[(&str, &str)]) {
    let mut tx = rtdb.begin();
    for (field, value) in points {
        tx.hset(&format!("comsrv:{}:T", channel), field, value).unwrap();
    }
}

#[test]
fn test_pattern_sync_is_idempotent() {
    let (rtdb, engine) = setup();
    engine.config_set("telemetry", telemetry_rule()).unwrap();
    write_points(&rtdb, 1001, &[("1", "23"), ("2", "5")]);
    write_points(&rtdb, 1002, &[("1", "7")]);

    let first = engine.sweep("telemetry", 10).unwrap();
    assert_eq!(first.synced, 2);
    assert_eq!(first.fields_synced, 3);
    let snapshot = rtdb.begin().hgetall_strings("inst:1001:M").unwrap();

    let second = engine.sweep("telemetry", 10).unwrap();
    assert_eq!(second.synced, 2);
    assert_eq!(rtdb.begin().hgetall_strings("inst:1001:M").unwrap(), snapshot);
    assert_eq!(snapshot.get("voltage").map(String::as_str), Some("230.0"));
    assert_eq!(snapshot.get("2").map(String::as_str), Some("50.0"));

    let stats = engine.stats("telemetry").unwrap();
    assert_eq!(stats.sync_count, 4);
    assert_eq!(stats.fields_synced, 6);
    assert_eq!(stats.error_count, 0);
}

#[test]
fn test_execute_pattern_pages_until_cursor_zero() {
    let (rtdb, engine) = setup();
    engine.config_set("telemetry", telemetry_rule()).unwrap();
    for channel in 0..7 {
        write_points(&rtdb, channel, &[("1", "1")]);
    }

    let mut cursor = 0;
    let mut pages = 0;
    let mut synced = 0;
    loop {
        let page = engine.execute_pattern("telemetry", cursor, 3).unwrap();
        synced += page.totals.synced;
        pages += 1;
        if page.next_cursor == 0 {
            break;
        }
        cursor = page.next_cursor;
    }
    assert!(pages > 1);
    assert_eq!(synced, 7);
    for channel in 0..7 {
        assert!(rtdb.begin().exists(&format!("inst:{}:M", channel)).unwrap());
    }
}

#[test]
fn test_reverse_mapping_round_trip() {
    let (rtdb, engine) = setup();
    engine.config_set("telemetry", telemetry_rule()).unwrap();
    write_points(&rtdb, 1001, &[("1", "23")]);

    let outcome = engine
        .execute_one("telemetry", "comsrv:1001:T", "inst:1001:M")
        .unwrap();
    assert!(matches!(outcome, SyncOutcome::Synced { fields_synced: 1, .. }));

    let entry = engine
        .reverse_lookup("telemetry", "inst:1001:M", "voltage")
        .unwrap()
        .unwrap();
    assert_eq!(
        entry,
        ReverseEntry {
            source_key: "comsrv:1001:T".to_string(),
            source_field: "1".to_string(),
        }
    );

    let keyspace = KeySpaceConfig::test();
    assert_eq!(
        rtdb.begin()
            .get_string(&keyspace.sync_reverse_key("telemetry", "comsrv:1001:T", "1"))
            .unwrap()
            .as_deref(),
        Some("inst:1001:M:voltage")
    );

    // Downstream write flows back through the inverse transform
    engine
        .reverse_write("telemetry", "inst:1001:M", "voltage", &json!(250))
        .unwrap();
    assert_eq!(
        rtdb.begin().hget_string("comsrv:1001:T", "1").unwrap().as_deref(),
        Some("25.0")
    );

    assert!(engine
        .reverse_lookup("telemetry", "inst:1001:M", "unknown")
        .unwrap()
        .is_none());
    assert!(matches!(
        engine.reverse_write("telemetry", "inst:1001:M", "unknown", &json!(1)),
        Err(VoltageError::NotFound { .. })
    ));
}

#[test]
fn test_disabled_and_unknown_rules() {
    let (rtdb, engine) = setup();
    let mut disabled = telemetry_rule();
    disabled.enabled = false;
    engine.config_set("off", disabled).unwrap();
    write_points(&rtdb, 1, &[("1", "1")]);

    assert!(matches!(
        engine.execute_one("off", "comsrv:1:T", "inst:1:M").unwrap(),
        SyncOutcome::Skipped { .. }
    ));
    assert!(engine.execute_pattern("off", 0, 10).unwrap().totals.disabled);
    assert!(!rtdb.begin().exists("inst:1:M").unwrap());

    assert!(matches!(
        engine.execute_one("ghost", "comsrv:1:T", "inst:1:M"),
        Err(VoltageError::ConfigNotFound(_))
    ));
    assert!(matches!(
        engine.stats("ghost"),
        Err(VoltageError::ConfigNotFound(_))
    ));
}

#[test]
fn test_missing_source_is_skipped() {
    let (_rtdb, engine) = setup();
    engine.config_set("telemetry", telemetry_rule()).unwrap();
    assert!(matches!(
        engine.execute_one("telemetry", "comsrv:9:T", "inst:9:M").unwrap(),
        SyncOutcome::Skipped { .. }
    ));
}

#[test]
fn test_failed_field_is_counted_not_fatal() {
    let (rtdb, engine) = setup();
    engine.config_set("telemetry", telemetry_rule()).unwrap();
    write_points(&rtdb, 1, &[("1", "2"), ("2", "offline")]);

    let outcome = engine.execute_one("telemetry", "comsrv:1:T", "inst:1:M").unwrap();
    assert!(matches!(
        outcome,
        SyncOutcome::Synced {
            fields_synced: 1,
            fields_failed: 1,
            ..
        }
    ));
    assert_eq!(engine.stats("telemetry").unwrap().error_count, 1);
    assert!(rtdb.begin().hget_string("inst:1:M", "2").unwrap().is_none());
}

#[test]
#[traced_test]
fn test_batch_reports_per_item_errors() {
    let (rtdb, engine) = setup();
    engine.config_set("telemetry", telemetry_rule()).unwrap();
    write_points(&rtdb, 1, &[("1", "1")]);
    // Wrong type at the target key
    rtdb.begin().set("inst:bad:M", "plain").unwrap();

    let pairs = vec![
        ("comsrv:1:T".to_string(), "inst:1:M".to_string()),
        ("comsrv:1:T".to_string(), "inst:bad:M".to_string()),
        ("comsrv:2:T".to_string(), "inst:2:M".to_string()),
    ];
    let outcome = engine.execute_batch("telemetry", &pairs).unwrap();
    assert_eq!(outcome.synced, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.errors[0].target_key.as_deref(), Some("inst:bad:M"));
    assert!(logs_contain("Sync rule telemetry failed comsrv:1:T -> inst:bad:M"));
}

#[test]
fn test_reverse_mapping_target_resolution() {
    let (rtdb, engine) = setup();
    engine
        .config_set(
            "commands",
            rule(json!({
                "source": {"pattern": "comsrv:*:C"},
                "target": {"use_reverse_mapping": true},
                "reverse_mapping": {"pattern": "route:{1}"}
            })),
        )
        .unwrap();
    {
        let mut tx = rtdb.begin();
        tx.set("route:1001", "inst:9:A").unwrap();
        tx.hset("comsrv:1001:C", "4", "1").unwrap();
        tx.hset("comsrv:1002:C", "4", "0").unwrap();
    }

    let fired = engine.execute_matching("comsrv:1001:C").unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(
        rtdb.begin().hget_string("inst:9:A", "4").unwrap().as_deref(),
        Some("1")
    );

    // No route stored: skipped, nothing written
    let fired = engine.execute_matching("comsrv:1002:C").unwrap();
    assert!(matches!(fired[0].outcome, Some(SyncOutcome::Skipped { .. })));
}

#[test]
fn test_scalar_and_json_shapes() {
    let (rtdb, engine) = setup();
    engine
        .config_set(
            "scalar",
            rule(json!({
                "source": {"pattern": "raw:*", "kind": "string"},
                "target": {"pattern": "view:*", "kind": "hash"}
            })),
        )
        .unwrap();
    engine
        .config_set(
            "extract",
            rule(json!({
                "source": {"pattern": "doc:*", "kind": "string"},
                "target": {"pattern": "unit:*", "kind": "string"},
                "transform": {"type": "json_extract", "params": {"key": "meta.unit"}}
            })),
        )
        .unwrap();
    {
        let mut tx = rtdb.begin();
        tx.set("raw:a", "42").unwrap();
        tx.set("doc:a", r#"{"meta":{"unit":"kW"}}"#).unwrap();
    }

    engine.execute_matching("raw:a").unwrap();
    engine.execute_matching("doc:a").unwrap();

    assert_eq!(
        rtdb.begin().hget_string("view:a", "value").unwrap().as_deref(),
        Some("42")
    );
    assert_eq!(
        rtdb.begin().get_string("unit:a").unwrap().as_deref(),
        Some("kW")
    );
}

#[test]
fn test_json_target_merges_fields() {
    let (rtdb, engine) = setup();
    engine
        .config_set(
            "to_json",
            rule(json!({
                "source": {"pattern": "comsrv:*:T"},
                "target": {"pattern": "snapshot:*", "kind": "json"}
            })),
        )
        .unwrap();
    rtdb.begin()
        .set("snapshot:5", r#"{"kept": true}"#)
        .unwrap();
    write_points(&rtdb, 5, &[("1", "3.5")]);

    engine.execute_matching("comsrv:5:T").unwrap();
    let text = rtdb.begin().get_string("snapshot:5").unwrap().unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(doc, json!({"kept": true, "1": "3.5"}));
}

#[test]
fn test_config_validation_and_delete() {
    let (rtdb, engine) = setup();
    assert!(matches!(
        engine.config_set("bad", rule(json!({"source": {"pattern": "a:*"}}))),
        Err(VoltageError::Validation(_))
    ));
    assert!(matches!(
        engine.config_set("has:colon", telemetry_rule()),
        Err(VoltageError::Validation(_))
    ));

    engine.config_set("telemetry", telemetry_rule()).unwrap();
    assert_eq!(engine.config_get("telemetry").unwrap().rule_id, "telemetry");
    assert_eq!(engine.config_list().unwrap().len(), 1);

    write_points(&rtdb, 1, &[("1", "1")]);
    engine.sweep("telemetry", 10).unwrap();

    engine.config_delete("telemetry").unwrap();
    let keyspace = KeySpaceConfig::test();
    let leftovers = rtdb
        .begin()
        .keys(&keyspace.sync_reverse_pattern("telemetry"))
        .unwrap();
    assert!(leftovers.is_empty());
    assert!(matches!(
        engine.config_delete("telemetry"),
        Err(VoltageError::ConfigNotFound(_))
    ));
}

#[test]
fn test_stats_record_last_sync_time() {
    let (rtdb, clock) = create_test_rtdb_with_clock(5_000);
    let engine = SyncEngine::new(rtdb.clone(), KeySpaceConfig::test());
    engine.config_set("telemetry", telemetry_rule()).unwrap();
    write_points(&rtdb, 1, &[("1", "1")]);

    clock.advance_ms(250);
    engine.execute_matching("comsrv:1:T").unwrap();
    assert_eq!(engine.stats("telemetry").unwrap().last_sync, 5_250);
}
