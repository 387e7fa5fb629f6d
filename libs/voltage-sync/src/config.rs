//! Sync rule configuration
//!
//! ```json
//! {
//!   "rule_id": "telemetry_to_instance",
//!   "enabled": true,
//!   "source": {"pattern": "comsrv:*:T", "kind": "hash"},
//!   "target": {"pattern": "inst:*:M", "kind": "hash"},
//!   "reverse_mapping": {"enabled": true},
//!   "transform": {"type": "numeric", "params": {"scale": 0.1}},
//!   "field_mapping": {"1": "voltage"}
//! }
//! ```

use crate::transform::{TransformRegistry, TransformSpec};
use errors::{Result, VoltageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use voltage_model::{render, KeyPattern};

/// Shape of the value stored at a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Hash of string fields
    #[default]
    Hash,
    /// Plain string value
    String,
    /// JSON object stored as a string
    Json,
}

impl DataKind {
    /// Hash and json values carry named fields
    pub fn is_map(self) -> bool {
        matches!(self, DataKind::Hash | DataKind::Json)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub pattern: String,
    #[serde(default)]
    pub kind: DataKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Resolve the target through the key named by `reverse_mapping.pattern`
    #[serde(default)]
    pub use_reverse_mapping: bool,
    #[serde(default)]
    pub kind: DataKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReverseMappingSpec {
    /// Record `sync:reverse:*` entries for every synced field
    #[serde(default)]
    pub enabled: bool,
    /// Template of the key holding the concrete target key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// One sync rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRule {
    /// Filled from the config key when stored
    #[serde(default)]
    pub rule_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: SourceSpec,
    #[serde(default)]
    pub target: TargetSpec,
    #[serde(default)]
    pub reverse_mapping: ReverseMappingSpec,
    #[serde(default)]
    pub transform: TransformSpec,
    /// Source field -> target field; unmapped fields keep their name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_mapping: BTreeMap<String, String>,
    /// Full pattern sweep period; `None` syncs only on trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

impl SyncRule {
    /// Target name of a source field
    pub fn target_field<'a>(&'a self, source_field: &'a str) -> &'a str {
        self.field_mapping
            .get(source_field)
            .map(String::as_str)
            .unwrap_or(source_field)
    }

    /// Check the rule is executable with the given transforms
    pub fn validate(&self, transforms: &TransformRegistry) -> Result<()> {
        validate_rule_id(&self.rule_id)?;
        if self.source.pattern.trim().is_empty() {
            return Err(VoltageError::Validation(
                "source.pattern must not be empty".to_string(),
            ));
        }
        let source = KeyPattern::new(&self.source.pattern)?;
        // Templates may only reference captures the source pattern produces
        let sample: Vec<String> = (1..=source.capture_count()).map(|i| format!("c{}", i)).collect();

        if self.target.use_reverse_mapping {
            let template = self
                .reverse_mapping
                .pattern
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| {
                    VoltageError::Validation(
                        "target.use_reverse_mapping requires reverse_mapping.pattern".to_string(),
                    )
                })?;
            render(template, &sample)?;
        } else {
            let template = self
                .target
                .pattern
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| {
                    VoltageError::Validation(
                        "target.pattern is required unless target.use_reverse_mapping".to_string(),
                    )
                })?;
            render(template, &sample)?;
        }

        for (from, to) in &self.field_mapping {
            if from.is_empty() || to.is_empty() {
                return Err(VoltageError::Validation(
                    "field_mapping entries must be non-empty".to_string(),
                ));
            }
        }
        if self.interval_ms == Some(0) {
            return Err(VoltageError::Validation(
                "interval_ms must be positive".to_string(),
            ));
        }
        transforms.validate(&self.transform)?;
        Ok(())
    }
}

/// Rule ids are embedded in keys (`sync:reverse:{id}:...`)
pub fn validate_rule_id(rule_id: &str) -> Result<()> {
    if rule_id.is_empty() {
        return Err(VoltageError::Validation("rule_id is empty".to_string()));
    }
    if rule_id.contains([':', '*', '?']) || rule_id.contains(char::is_whitespace) {
        return Err(VoltageError::Validation(format!(
            "rule_id '{}' contains whitespace, ':' or glob characters",
            rule_id
        )));
    }
    Ok(())
}

/// Counters kept at `sync:stats:{rule_id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub sync_count: u64,
    pub last_sync: i64,
    pub fields_synced: u64,
    pub error_count: u64,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(value: serde_json::Value) -> SyncRule {
        let mut rule: SyncRule = serde_json::from_value(value).unwrap();
        rule.rule_id = "r1".to_string();
        rule
    }

    #[test]
    fn test_defaults() {
        let r = rule(json!({"source": {"pattern": "a:*"}, "target": {"pattern": "b:*"}}));
        assert!(r.enabled);
        assert_eq!(r.source.kind, DataKind::Hash);
        assert_eq!(r.transform.transform_type, "direct");
        assert!(!r.reverse_mapping.enabled);
        assert!(r.validate(&TransformRegistry::with_builtins()).is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let reg = TransformRegistry::with_builtins();
        let cases = [
            json!({"source": {"pattern": ""}, "target": {"pattern": "b"}}),
            json!({"source": {"pattern": "a:*"}}),
            json!({"source": {"pattern": "a:*"}, "target": {"use_reverse_mapping": true}}),
            json!({"source": {"pattern": "a:*"}, "target": {"pattern": "b:{2}"}}),
            json!({"source": {"pattern": "a:*"}, "target": {"pattern": "b:*"},
                   "transform": {"type": "nope"}}),
            json!({"source": {"pattern": "a:*"}, "target": {"pattern": "b:*"},
                   "transform": {"type": "json_extract", "params": {}}}),
        ];
        for case in cases {
            let r = rule(case.clone());
            assert!(
                matches!(r.validate(&reg), Err(VoltageError::Validation(_))),
                "accepted {}",
                case
            );
        }
    }

    #[test]
    fn test_reverse_target_needs_pattern_only() {
        let r = rule(json!({
            "source": {"pattern": "comsrv:*:C"},
            "target": {"use_reverse_mapping": true},
            "reverse_mapping": {"pattern": "route:*"}
        }));
        assert!(r.validate(&TransformRegistry::with_builtins()).is_ok());
    }

    #[test]
    fn test_rule_id_validation() {
        assert!(validate_rule_id("telemetry_sync").is_ok());
        assert!(validate_rule_id("a:b").is_err());
        assert!(validate_rule_id("a b").is_err());
        assert!(validate_rule_id("").is_err());
    }

    #[test]
    fn test_field_mapping() {
        let r = rule(json!({
            "source": {"pattern": "a:*"},
            "target": {"pattern": "b:*"},
            "field_mapping": {"1": "voltage"}
        }));
        assert_eq!(r.target_field("1"), "voltage");
        assert_eq!(r.target_field("2"), "2");
    }
}
