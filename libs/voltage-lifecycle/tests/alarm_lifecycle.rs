//! Alarm lifecycle end to end: raise, acknowledge, resolve, close

#![allow(clippy::disallowed_methods)] // Integration test - unwrap is acceptable

use errors::VoltageError;
use serde_json::{json, Map, Value};
use voltage_lifecycle::LifecycleEngine;
use voltage_model::{AlarmLevel, AlarmPayload, CoreEvent, KeySpaceConfig};
use voltage_rtdb::helpers::create_test_rtdb_with_clock;
use voltage_rtdb::Rtdb;

fn alarm(id: &str, level: AlarmLevel) -> AlarmPayload {
    AlarmPayload {
        id: id.to_string(),
        source: "comsrv:1001:T:3".to_string(),
        level,
        message: "over temperature".to_string(),
        value: Some(95.0),
        threshold: Some(80.0),
        rule_id: None,
        extra: Map::new(),
    }
}

#[tokio::test]
async fn test_alarm_walks_its_state_machine() {
    let (rtdb, clock) = create_test_rtdb_with_clock(10_000);
    let keyspace = KeySpaceConfig::test();
    let engine = LifecycleEngine::new(rtdb.clone(), keyspace.clone());
    let mut events = rtdb.subscribe();

    let entity = engine.raise_alarm(alarm("a1", AlarmLevel::Critical)).unwrap();
    let key = entity.key.clone();
    assert_eq!(key, keyspace.entity_key("alarm", "a1"));
    assert_eq!(engine.current_state(&key).unwrap().state, "active");

    let raised = events.recv().await.unwrap();
    assert_eq!(raised.channel, keyspace.lifecycle_channel());
    let envelope: CoreEvent = serde_json::from_str(&raised.payload).unwrap();
    assert_eq!(envelope.event_type, "alarm_raised");
    assert_eq!(envelope.timestamp, 10_000);

    clock.advance_secs(5);
    engine
        .transition(&key, "active", "acknowledge", Some(json!({"operator": "alice"})))
        .unwrap();
    let ack = events.recv().await.unwrap();
    let envelope: CoreEvent = serde_json::from_str(&ack.payload).unwrap();
    assert_eq!(envelope.event_type, "state_transition");
    assert_eq!(envelope.data["from"], "active");
    assert_eq!(envelope.data["to"], "acknowledged");
    assert_eq!(envelope.data["context"]["operator"], "alice");
    assert_eq!(envelope.source, "lifecycle");

    // Illegal: acknowledged cannot be closed directly
    let err = engine
        .transition(&key, "acknowledged", "close", None)
        .unwrap_err();
    assert!(matches!(err, VoltageError::InvalidTransition { .. }));
    assert_eq!(err.status_code(), 422);

    engine.transition(&key, "acknowledged", "resolve", None).unwrap();

    // A resolved alarm cannot be acknowledged again
    let err = engine
        .transition(&key, "resolved", "acknowledge", None)
        .unwrap_err();
    assert!(matches!(err, VoltageError::InvalidTransition { .. }));
    assert_eq!(engine.current_state(&key).unwrap().state, "resolved");

    engine.transition(&key, "resolved", "close", None).unwrap();

    let history = engine.history(&key, 10).unwrap();
    let events_seen: Vec<&str> = history.iter().map(|h| h.event.as_str()).collect();
    assert_eq!(events_seen, vec!["close", "resolve", "acknowledge"]);
    assert!(engine.available_events(&key).unwrap().is_empty());

    // A closed alarm id is final
    assert!(matches!(
        engine.raise_alarm(alarm("a1", AlarmLevel::Major)),
        Err(VoltageError::InvalidTransition { .. })
    ));
}

#[test]
fn test_raise_alarm_indexes_level_and_source() {
    let (rtdb, _clock) = create_test_rtdb_with_clock(0);
    let keyspace = KeySpaceConfig::test();
    let engine = LifecycleEngine::new(rtdb.clone(), keyspace.clone());
    engine.raise_alarm(alarm("a1", AlarmLevel::Critical)).unwrap();
    engine.raise_alarm(alarm("a2", AlarmLevel::Minor)).unwrap();

    let store = voltage_entity::EntityStore::new(rtdb, keyspace.clone());
    let critical = store.indexes().query_index("alarm", "level", "critical").unwrap();
    assert_eq!(critical, vec![keyspace.entity_key("alarm", "a1")]);
    let by_source = store
        .indexes()
        .query_index("alarm", "source", "comsrv:1001:T:3")
        .unwrap();
    assert_eq!(by_source.len(), 2);

    let stored = store.get(&keyspace.entity_key("alarm", "a2")).unwrap();
    let payload: &Map<String, Value> = &stored.payload;
    assert_eq!(payload["level"], "minor");
    assert_eq!(payload["threshold"], 80.0);
}

#[test]
fn test_raising_resolved_alarm_reactivates_it() {
    let (rtdb, _clock) = create_test_rtdb_with_clock(0);
    let engine = LifecycleEngine::new(rtdb, KeySpaceConfig::test());
    let key = engine.raise_alarm(alarm("a1", AlarmLevel::Warning)).unwrap().key;
    engine.transition(&key, "active", "resolve", None).unwrap();

    engine.raise_alarm(alarm("a1", AlarmLevel::Major)).unwrap();
    let record = engine.current_state(&key).unwrap();
    assert_eq!(record.state, "active");
    assert_eq!(record.last_transition, "reactivate");

    // Re-raising an active alarm only refreshes the payload
    engine.raise_alarm(alarm("a1", AlarmLevel::Critical)).unwrap();
    assert_eq!(engine.history(&key, 10).unwrap().len(), 2);
}
