//! KeySpace Configuration
//!
//! This module provides the `KeySpaceConfig` struct for generating store keys
//! in a consistent and type-safe manner across the orchestration core.

use crate::PointType;
use serde::{Deserialize, Serialize};

/// Last segment of a sorted index bucket key
const SORTED_SUFFIX: &str = "sorted";

/// Keyspace configuration for store operations
///
/// **Design Principles:**
/// - Configuration as Data
/// - Test isolation (dedicated keyspace through `prefix`)
/// - Single Source of Truth for key naming
///
/// The prefix applies to every key and channel the engines own (indexes, sync
/// configs, rules, events). Entity keys are chosen by callers and are used
/// verbatim, except when built through [`KeySpaceConfig::entity_key`].
///
/// **Usage Example:**
/// ```
/// use voltage_model::{KeySpaceConfig, PointType};
///
/// let prod = KeySpaceConfig::production();
/// assert_eq!(prod.index_key("alarm", "level", "critical"), "idx:alarm:level:critical");
/// assert_eq!(prod.channel_key(1001, PointType::Telemetry), "comsrv:1001:T");
///
/// let test = KeySpaceConfig::test();
/// assert_eq!(test.sync_config_key("r1"), "test:sync:config:r1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeySpaceConfig {
    /// Prefix prepended to every engine-owned key (e.g., "" or "test:")
    #[serde(default)]
    pub prefix: String,

    /// Collector data key prefix (e.g., "comsrv")
    #[serde(default = "default_data_prefix")]
    pub data_prefix: String,
}

fn default_data_prefix() -> String {
    "comsrv".to_string()
}

impl Default for KeySpaceConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl KeySpaceConfig {
    /// Production environment configuration (no prefix)
    pub fn production() -> Self {
        Self {
            prefix: String::new(),
            data_prefix: default_data_prefix(),
        }
    }

    /// Test environment configuration (fully isolated keyspace)
    pub fn test() -> Self {
        Self::with_prefix("test:")
    }

    /// Configuration with an arbitrary prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            data_prefix: default_data_prefix(),
        }
    }

    fn scoped(&self, key: std::fmt::Arguments<'_>) -> String {
        format!("{}{}", self.prefix, key)
    }

    // ============================================================
    // Entity keys
    // ============================================================

    /// Build entity key: entity:{type}:{id}
    pub fn entity_key(&self, entity_type: &str, id: &str) -> String {
        self.scoped(format_args!("entity:{}:{}", entity_type, id))
    }

    /// Set of every entity key of one type: meta:entity:{type}
    pub fn entity_members_key(&self, entity_type: &str) -> String {
        self.scoped(format_args!("meta:entity:{}", entity_type))
    }

    /// Set of every known entity type
    pub fn entity_types_key(&self) -> String {
        self.scoped(format_args!("meta:entity_types"))
    }

    /// Registered index specs of one type: meta:schema:{type}
    pub fn schema_key(&self, entity_type: &str) -> String {
        self.scoped(format_args!("meta:schema:{}", entity_type))
    }

    // ============================================================
    // Index keys
    // ============================================================

    /// Build single-value index key: idx:{type}:{field}:{value}
    ///
    /// The value `sorted` names the sorted bucket of the same field, so it is
    /// escaped to `%sorted`, and values already starting with `%` gain one more.
    pub fn index_key(&self, entity_type: &str, field: &str, value: &str) -> String {
        let escape = if value == SORTED_SUFFIX || value.starts_with('%') {
            "%"
        } else {
            ""
        };
        self.scoped(format_args!(
            "idx:{}:{}:{}{}",
            entity_type, field, escape, value
        ))
    }

    /// Build composite index key: idx:{type}:{f1+f2}:{v1|v2}
    pub fn composite_index_key(&self, entity_type: &str, fields: &[String], values: &[String]) -> String {
        self.scoped(format_args!(
            "idx:{}:{}:{}",
            entity_type,
            fields.join("+"),
            values.join("|")
        ))
    }

    /// Build sorted index key: idx:{type}:{field}:sorted
    pub fn sorted_index_key(&self, entity_type: &str, field: &str) -> String {
        self.scoped(format_args!("idx:{}:{}:{}", entity_type, field, SORTED_SUFFIX))
    }

    /// Glob over every index bucket of a type: idx:{type}:*
    pub fn index_pattern(&self, entity_type: &str) -> String {
        self.scoped(format_args!("idx:{}:*", entity_type))
    }

    // ============================================================
    // Sync keys
    // ============================================================

    /// Build sync config key: sync:config:{rule_id}
    pub fn sync_config_key(&self, rule_id: &str) -> String {
        self.scoped(format_args!("sync:config:{}", rule_id))
    }

    /// Glob over every sync config
    pub fn sync_config_pattern(&self) -> String {
        self.scoped(format_args!("sync:config:*"))
    }

    /// Extract the rule id from a sync config key
    pub fn sync_rule_id<'a>(&self, config_key: &'a str) -> Option<&'a str> {
        config_key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix("sync:config:")
    }

    /// Build sync stats key: sync:stats:{rule_id}
    pub fn sync_stats_key(&self, rule_id: &str) -> String {
        self.scoped(format_args!("sync:stats:{}", rule_id))
    }

    /// Build reverse mapping key: sync:reverse:{rule_id}:{source_key}:{field}
    pub fn sync_reverse_key(&self, rule_id: &str, source_key: &str, field: &str) -> String {
        self.scoped(format_args!(
            "sync:reverse:{}:{}:{}",
            rule_id, source_key, field
        ))
    }

    /// Build reverse lookup index key: sync:reverse:{rule_id}:index
    pub fn sync_reverse_index_key(&self, rule_id: &str) -> String {
        self.scoped(format_args!("sync:reverse:{}:index", rule_id))
    }

    /// Glob over every reverse mapping record of a rule (index included)
    pub fn sync_reverse_pattern(&self, rule_id: &str) -> String {
        self.scoped(format_args!("sync:reverse:{}:*", rule_id))
    }

    // ============================================================
    // Rule keys
    // ============================================================

    /// Build rule key: rule:{rule_id}
    pub fn rule_key(&self, rule_id: &str) -> String {
        self.scoped(format_args!("rule:{}", rule_id))
    }

    /// Set of every rule id
    pub fn rule_ids_key(&self) -> String {
        self.scoped(format_args!("meta:rules"))
    }

    /// Build rule last trigger key: rule:{rule_id}:last_trigger
    pub fn rule_last_trigger_key(&self, rule_id: &str) -> String {
        self.scoped(format_args!("rule:{}:last_trigger", rule_id))
    }

    /// Build rule execution log key: rule:{rule_id}:executions
    pub fn rule_executions_key(&self, rule_id: &str) -> String {
        self.scoped(format_args!("rule:{}:executions", rule_id))
    }

    // ============================================================
    // Lifecycle keys
    // ============================================================

    /// Build lifecycle state key: {entity_key}:state
    pub fn state_key(&self, entity_key: &str) -> String {
        format!("{}:state", entity_key)
    }

    /// Build lifecycle history key: {entity_key}:history
    pub fn history_key(&self, entity_key: &str) -> String {
        format!("{}:history", entity_key)
    }

    // ============================================================
    // Collector data keys
    // ============================================================

    /// Build channel data key: comsrv:{channel_id}:{type}
    pub fn channel_key(&self, channel_id: u32, point_type: PointType) -> String {
        self.scoped(format_args!(
            "{}:{}:{}",
            self.data_prefix,
            channel_id,
            point_type.as_str()
        ))
    }

    // ============================================================
    // Event channels
    // ============================================================

    /// Channel carrying lifecycle transition events
    pub fn lifecycle_channel(&self) -> String {
        self.scoped(format_args!("events:lifecycle"))
    }

    /// Default channel for rule `publish` actions
    pub fn rule_channel(&self) -> String {
        self.scoped(format_args!("events:rules"))
    }
}
