//! Entity envelope, typed payloads and event envelope

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Stored entity
///
/// Serialized as one JSON document at `key`. `updated_at` is stamped by the
/// store clock on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: String,
    pub entity_type: String,
    pub payload: Map<String, Value>,
    pub updated_at: i64,
    /// Index specs applied by the last write; drives index cleanup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSpec>,
}

impl Entity {
    /// Look up a payload field, following dotted paths into nested objects
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.payload, path)
    }

    /// Decode the payload into its typed form
    pub fn typed(&self) -> Result<TypedPayload> {
        TypedPayload::parse(&self.entity_type, &self.payload)
    }
}

/// Follow a dotted path (`a.b.c`) through nested JSON objects
pub fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(direct) = root.get(path) {
        return Some(direct);
    }
    let mut parts = path.split('.');
    let mut current = root.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

// ============================================================================
// Index specs
// ============================================================================

/// How one index bucket family is derived from a payload
///
/// - `single`: set `idx:{type}:{field}:{value}`
/// - `composite`: set `idx:{type}:{f1+f2}:{v1|v2}`
/// - `sorted`: zset `idx:{type}:{field}:sorted`, scored by a numeric field
///
/// `ttl_secs` expires the bucket independently of the entities it lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexSpec {
    Single {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_secs: Option<u64>,
    },
    Composite {
        fields: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_secs: Option<u64>,
    },
    Sorted {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_secs: Option<u64>,
    },
}

impl IndexSpec {
    pub fn single(field: impl Into<String>) -> Self {
        IndexSpec::Single {
            field: field.into(),
            ttl_secs: None,
        }
    }

    pub fn composite<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        IndexSpec::Composite {
            fields: fields.into_iter().map(Into::into).collect(),
            ttl_secs: None,
        }
    }

    pub fn sorted(field: impl Into<String>) -> Self {
        IndexSpec::Sorted {
            field: field.into(),
            ttl_secs: None,
        }
    }

    /// Same spec with a bucket TTL
    pub fn with_ttl(mut self, secs: u64) -> Self {
        match &mut self {
            IndexSpec::Single { ttl_secs, .. }
            | IndexSpec::Composite { ttl_secs, .. }
            | IndexSpec::Sorted { ttl_secs, .. } => *ttl_secs = Some(secs),
        }
        self
    }

    pub fn ttl_secs(&self) -> Option<u64> {
        match self {
            IndexSpec::Single { ttl_secs, .. }
            | IndexSpec::Composite { ttl_secs, .. }
            | IndexSpec::Sorted { ttl_secs, .. } => *ttl_secs,
        }
    }

    /// Field names must be non-empty and free of key separators
    pub fn validate(&self) -> Result<()> {
        let fields: Vec<&String> = match self {
            IndexSpec::Single { field, .. } | IndexSpec::Sorted { field, .. } => vec![field],
            IndexSpec::Composite { fields, .. } => {
                if fields.len() < 2 {
                    return Err(ModelError::InvalidIndexSpec(
                        "composite index needs at least two fields".to_string(),
                    ));
                }
                fields.iter().collect()
            },
        };
        for field in fields {
            if field.is_empty()
                || field.contains([':', '+', '|', '*', '?'])
                || field.contains(char::is_whitespace)
            {
                return Err(ModelError::InvalidIndexSpec(format!(
                    "invalid index field '{}'",
                    field
                )));
            }
        }
        if self.ttl_secs() == Some(0) {
            return Err(ModelError::InvalidIndexSpec("ttl_secs must be positive".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Typed payloads
// ============================================================================

/// Payload of a known entity kind
///
/// Known kinds carry typed fields; every other type is generic passthrough
/// data kept as a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedPayload {
    Alarm(AlarmPayload),
    Generic(Map<String, Value>),
}

impl TypedPayload {
    /// Entity type handled by [`TypedPayload::Alarm`]
    pub const ALARM_TYPE: &'static str = "alarm";

    /// Decode a payload according to its entity type
    pub fn parse(entity_type: &str, payload: &Map<String, Value>) -> Result<Self> {
        match entity_type {
            Self::ALARM_TYPE => serde_json::from_value(Value::Object(payload.clone()))
                .map(TypedPayload::Alarm)
                .map_err(|e| ModelError::InvalidPayload {
                    entity_type: entity_type.to_string(),
                    reason: e.to_string(),
                }),
            _ => Ok(TypedPayload::Generic(payload.clone())),
        }
    }

    /// Encode back into the stored JSON object
    pub fn into_map(self) -> Result<Map<String, Value>> {
        match self {
            TypedPayload::Alarm(alarm) => match serde_json::to_value(alarm) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(ModelError::InvalidPayload {
                    entity_type: Self::ALARM_TYPE.to_string(),
                    reason: "alarm did not encode to an object".to_string(),
                }),
                Err(e) => Err(ModelError::InvalidPayload {
                    entity_type: Self::ALARM_TYPE.to_string(),
                    reason: e.to_string(),
                }),
            },
            TypedPayload::Generic(map) => Ok(map),
        }
    }
}

/// Alarm severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmLevel {
    Critical,
    Major,
    Minor,
    Warning,
    Info,
}

impl AlarmLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmLevel::Critical => "critical",
            AlarmLevel::Major => "major",
            AlarmLevel::Minor => "minor",
            AlarmLevel::Warning => "warning",
            AlarmLevel::Info => "info",
        }
    }
}

impl fmt::Display for AlarmLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alarm payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub id: String,
    /// Originating point or device, e.g. `comsrv:1001:T:3`
    pub source: String,
    pub level: AlarmLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Passthrough fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Event envelope
// ============================================================================

/// Event published on a store channel: `{type, data, timestamp, source}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub timestamp: i64,
    pub source: String,
}

impl CoreEvent {
    pub fn new(
        event_type: impl Into<String>,
        data: Value,
        timestamp: i64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp,
            source: source.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_lookup_dotted_path() {
        let payload = object(json!({"a": {"b": {"c": 5}}, "x.y": 1}));
        assert_eq!(lookup_path(&payload, "a.b.c"), Some(&json!(5)));
        assert_eq!(lookup_path(&payload, "x.y"), Some(&json!(1)));
        assert_eq!(lookup_path(&payload, "a.z"), None);
        assert_eq!(lookup_path(&payload, "a.b.c.d"), None);
    }

    #[test]
    fn test_alarm_payload_is_typed() {
        let payload = object(json!({
            "id": "a1",
            "source": "comsrv:1:T:3",
            "level": "critical",
            "message": "over temperature",
            "value": 95.0,
            "site": "north"
        }));
        match TypedPayload::parse("alarm", &payload).unwrap() {
            TypedPayload::Alarm(alarm) => {
                assert_eq!(alarm.level, AlarmLevel::Critical);
                assert_eq!(alarm.value, Some(95.0));
                assert_eq!(alarm.extra.get("site"), Some(&json!("north")));
            },
            other => panic!("expected alarm, got {:?}", other),
        }
    }

    #[test]
    fn test_alarm_payload_rejects_missing_level() {
        let payload = object(json!({"id": "a1", "source": "s", "message": "m"}));
        assert!(matches!(
            TypedPayload::parse("alarm", &payload),
            Err(ModelError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_generic_payload_passthrough() {
        let payload = object(json!({"anything": [1, 2, 3]}));
        let typed = TypedPayload::parse("device", &payload).unwrap();
        assert_eq!(typed.into_map().unwrap(), payload);
    }

    #[test]
    fn test_index_spec_serde() {
        let spec: IndexSpec =
            serde_json::from_value(json!({"kind": "single", "field": "level"})).unwrap();
        assert_eq!(spec, IndexSpec::single("level"));

        let spec: IndexSpec = serde_json::from_value(
            json!({"kind": "composite", "fields": ["site", "kind"], "ttl_secs": 60}),
        )
        .unwrap();
        assert_eq!(spec.ttl_secs(), Some(60));
        assert_eq!(spec, IndexSpec::composite(["site", "kind"]).with_ttl(60));
    }

    #[test]
    fn test_index_spec_validation() {
        assert!(IndexSpec::single("level").validate().is_ok());
        assert!(IndexSpec::single("a:b").validate().is_err());
        assert!(IndexSpec::single("").validate().is_err());
        assert!(IndexSpec::composite(["only"]).validate().is_err());
        assert!(IndexSpec::sorted("power").with_ttl(0).validate().is_err());
    }

    #[test]
    fn test_event_envelope_shape() {
        let event = CoreEvent::new("transition", json!({"to": "active"}), 1000, "lifecycle");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "transition");
        assert_eq!(value["source"], "lifecycle");
        assert_eq!(value["timestamp"], 1000);
    }
}
