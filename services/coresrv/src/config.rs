//! coresrv configuration
//!
//! Layering (later wins): built-in defaults, YAML file, `CORESRV_` environment
//! variables. Nested keys use a double underscore in variable names, e.g.
//! `CORESRV_SERVICE__PORT=7000` or `CORESRV_STORE__KEY_PREFIX=dev:`.

use errors::{config_error, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use voltage_model::KeySpaceConfig;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 6010;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CORESRV_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "coresrv".to_string(),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Prefix for every engine-owned key
    pub key_prefix: String,
    /// Lifecycle history entries kept per entity
    pub history_limit: usize,
    /// SCAN page size for index maintenance and sync sweeps
    pub scan_batch: usize,
    /// Executions kept per rule
    pub execution_log_limit: usize,
    /// Bound on nested `execute_rule` depth
    pub max_rule_depth: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            history_limit: voltage_lifecycle::DEFAULT_HISTORY_LIMIT,
            scan_batch: 100,
            execution_log_limit: voltage_rules::DEFAULT_EXECUTION_LOG_LIMIT,
            max_rule_depth: voltage_rules::DEFAULT_MAX_DEPTH,
        }
    }
}

impl StoreSection {
    pub fn keyspace(&self) -> KeySpaceConfig {
        KeySpaceConfig::with_prefix(self.key_prefix.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub enabled: bool,
    pub tick_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_ms: voltage_rules::DEFAULT_TICK_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// Emit JSON lines instead of the human format
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoresrvConfig {
    pub service: ServiceSection,
    pub store: StoreSection,
    pub scheduler: SchedulerSection,
    pub logging: LoggingSection,
}

impl CoresrvConfig {
    /// Load defaults, then `path` (must exist when given), then `CORESRV_*`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, ENV_PREFIX)
    }

    fn load_with_env(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(CoresrvConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(config_error!("config file not found: {}", path.display()));
            }
            figment = figment.merge(Yaml::file(path));
        }
        let config: CoresrvConfig = figment
            .merge(Env::prefixed(env_prefix).split("__"))
            .extract()
            .map_err(|e| config_error!("Failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.port == 0 {
            return Err(config_error!("service.port cannot be 0"));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(config_error!("scheduler.tick_ms must be positive"));
        }
        if self.store.scan_batch == 0 {
            return Err(config_error!("store.scan_batch must be positive"));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(config_error!("logging.level '{}' is not a log level", self.logging.level));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.host, self.service.port)
    }
}
