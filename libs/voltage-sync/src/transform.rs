//! Value transforms applied while syncing
//!
//! Transforms are looked up by name in a [`TransformRegistry`]. Built-ins:
//!
//! | Name | Params | Effect |
//! |------|--------|--------|
//! | `direct` | none | copy unchanged |
//! | `numeric` | `scale` (1), `offset` (0), `precision` | `value * scale + offset`, rounded |
//! | `json_extract` | `key` | dotted-path lookup into a JSON object |
//!
//! Custom transforms implement [`ValueTransform`] and are registered at
//! engine construction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use voltage_calc::{number_value, to_number};
use voltage_model::lookup_path;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Unknown transform: {0}")]
    Unknown(String),

    #[error("Invalid params for '{transform}': {reason}")]
    InvalidParams { transform: String, reason: String },

    #[error("Transform '{transform}' failed: {reason}")]
    Failed { transform: String, reason: String },

    #[error("Transform '{0}' cannot be inverted")]
    NotInvertible(String),
}

impl From<TransformError> for errors::VoltageError {
    fn from(err: TransformError) -> Self {
        errors::VoltageError::Validation(err.to_string())
    }
}

/// Transform reference in a sync rule: `{"type": "...", "params": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    #[serde(rename = "type", default = "default_transform")]
    pub transform_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

fn default_transform() -> String {
    DirectTransform::NAME.to_string()
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self {
            transform_type: default_transform(),
            params: Value::Null,
        }
    }
}

impl TransformSpec {
    pub fn new(transform_type: impl Into<String>, params: Value) -> Self {
        Self {
            transform_type: transform_type.into(),
            params,
        }
    }
}

/// A named value transform
pub trait ValueTransform: Send + Sync {
    fn name(&self) -> &str;

    /// Reject unusable params at config time
    fn validate(&self, params: &Value) -> Result<(), TransformError>;

    fn apply(&self, value: &Value, params: &Value) -> Result<Value, TransformError>;

    /// Map a target-side value back to the source side (reverse writes)
    fn invert(&self, _value: &Value, _params: &Value) -> Result<Value, TransformError> {
        Err(TransformError::NotInvertible(self.name().to_string()))
    }
}

fn params_object<'a>(
    transform: &str,
    params: &'a Value,
) -> Result<Option<&'a Map<String, Value>>, TransformError> {
    match params {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(TransformError::InvalidParams {
            transform: transform.to_string(),
            reason: format!("params must be an object, got {}", other),
        }),
    }
}

// ============================================================================
// Built-in transforms
// ============================================================================

/// Copy unchanged
pub struct DirectTransform;

impl DirectTransform {
    pub const NAME: &'static str = "direct";
}

impl ValueTransform for DirectTransform {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, _params: &Value) -> Result<(), TransformError> {
        Ok(())
    }

    fn apply(&self, value: &Value, _params: &Value) -> Result<Value, TransformError> {
        Ok(value.clone())
    }

    fn invert(&self, value: &Value, _params: &Value) -> Result<Value, TransformError> {
        Ok(value.clone())
    }
}

/// Linear scaling: `value * scale + offset`, optionally rounded
pub struct NumericTransform;

#[derive(Debug, Clone, Copy, PartialEq)]
struct NumericParams {
    scale: f64,
    offset: f64,
    precision: Option<u32>,
}

impl NumericTransform {
    pub const NAME: &'static str = "numeric";

    fn params(params: &Value) -> Result<NumericParams, TransformError> {
        let invalid = |reason: String| TransformError::InvalidParams {
            transform: Self::NAME.to_string(),
            reason,
        };
        let mut parsed = NumericParams {
            scale: 1.0,
            offset: 0.0,
            precision: None,
        };
        let Some(map) = params_object(Self::NAME, params)? else {
            return Ok(parsed);
        };
        if let Some(scale) = map.get("scale") {
            parsed.scale = to_number(scale).ok_or_else(|| invalid(format!("scale {} is not numeric", scale)))?;
        }
        if let Some(offset) = map.get("offset") {
            parsed.offset =
                to_number(offset).ok_or_else(|| invalid(format!("offset {} is not numeric", offset)))?;
        }
        if let Some(precision) = map.get("precision") {
            let digits = precision
                .as_u64()
                .filter(|d| *d <= 15)
                .ok_or_else(|| invalid(format!("precision {} must be an integer 0..=15", precision)))?;
            parsed.precision = Some(digits as u32);
        }
        if !parsed.scale.is_finite() || !parsed.offset.is_finite() {
            return Err(invalid("scale and offset must be finite".to_string()));
        }
        Ok(parsed)
    }

    fn round(value: f64, precision: Option<u32>) -> f64 {
        match precision {
            Some(digits) => {
                let factor = 10f64.powi(digits as i32);
                (value * factor).round() / factor
            },
            None => value,
        }
    }
}

impl ValueTransform for NumericTransform {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, params: &Value) -> Result<(), TransformError> {
        Self::params(params).map(|_| ())
    }

    fn apply(&self, value: &Value, params: &Value) -> Result<Value, TransformError> {
        let p = Self::params(params)?;
        let n = to_number(value).ok_or_else(|| TransformError::Failed {
            transform: Self::NAME.to_string(),
            reason: format!("{} is not numeric", value),
        })?;
        Ok(number_value(Self::round(n * p.scale + p.offset, p.precision)))
    }

    fn invert(&self, value: &Value, params: &Value) -> Result<Value, TransformError> {
        let p = Self::params(params)?;
        if p.scale == 0.0 {
            return Err(TransformError::NotInvertible(Self::NAME.to_string()));
        }
        let n = to_number(value).ok_or_else(|| TransformError::Failed {
            transform: Self::NAME.to_string(),
            reason: format!("{} is not numeric", value),
        })?;
        Ok(number_value((n - p.offset) / p.scale))
    }
}

/// Pull one field out of a JSON object (or JSON text)
pub struct JsonExtractTransform;

impl JsonExtractTransform {
    pub const NAME: &'static str = "json_extract";

    fn key(params: &Value) -> Result<&str, TransformError> {
        params_object(Self::NAME, params)?
            .and_then(|m| m.get("key"))
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| TransformError::InvalidParams {
                transform: Self::NAME.to_string(),
                reason: "missing string param 'key'".to_string(),
            })
    }
}

impl ValueTransform for JsonExtractTransform {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, params: &Value) -> Result<(), TransformError> {
        Self::key(params).map(|_| ())
    }

    fn apply(&self, value: &Value, params: &Value) -> Result<Value, TransformError> {
        let key = Self::key(params)?;
        let failed = |reason: String| TransformError::Failed {
            transform: Self::NAME.to_string(),
            reason,
        };
        let parsed;
        let object = match value {
            Value::Object(map) => map,
            Value::String(text) => {
                parsed = serde_json::from_str::<Value>(text)
                    .map_err(|e| failed(format!("not JSON: {}", e)))?;
                parsed
                    .as_object()
                    .ok_or_else(|| failed("JSON text is not an object".to_string()))?
            },
            other => return Err(failed(format!("cannot extract from {}", other))),
        };
        lookup_path(object, key)
            .cloned()
            .ok_or_else(|| failed(format!("key '{}' not present", key)))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Transforms available to sync rules, by name
#[derive(Clone)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn ValueTransform>>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TransformRegistry {
    pub fn empty() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Registry holding `direct`, `numeric` and `json_extract`
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DirectTransform));
        registry.register(Arc::new(NumericTransform));
        registry.register(Arc::new(JsonExtractTransform));
        registry
    }

    /// Add a transform; replaces one registered under the same name
    pub fn register(&mut self, transform: Arc<dyn ValueTransform>) {
        self.transforms
            .insert(transform.name().to_string(), transform);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ValueTransform>> {
        self.transforms.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn lookup(&self, spec: &TransformSpec) -> Result<&Arc<dyn ValueTransform>, TransformError> {
        self.get(&spec.transform_type)
            .ok_or_else(|| TransformError::Unknown(spec.transform_type.clone()))
    }

    pub fn validate(&self, spec: &TransformSpec) -> Result<(), TransformError> {
        self.lookup(spec)?.validate(&spec.params)
    }

    pub fn apply(&self, spec: &TransformSpec, value: &Value) -> Result<Value, TransformError> {
        self.lookup(spec)?.apply(value, &spec.params)
    }

    pub fn invert(&self, spec: &TransformSpec, value: &Value) -> Result<Value, TransformError> {
        self.lookup(spec)?.invert(value, &spec.params)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> TransformRegistry {
        TransformRegistry::with_builtins()
    }

    #[test]
    fn test_spec_defaults_to_direct() {
        let spec: TransformSpec = serde_json::from_value(json!({})).unwrap();
        assert_eq!(spec, TransformSpec::default());
        assert_eq!(registry().apply(&spec, &json!("x")).unwrap(), json!("x"));
    }

    #[test]
    fn test_numeric_scale_offset_precision() {
        let spec = TransformSpec::new("numeric", json!({"scale": 0.1, "offset": -2, "precision": 2}));
        assert_eq!(registry().apply(&spec, &json!("1234")).unwrap(), json!(121.4));
        assert_eq!(registry().apply(&spec, &json!(1)).unwrap(), json!(-1.9));

        let err = registry().apply(&spec, &json!("abc")).unwrap_err();
        assert!(matches!(err, TransformError::Failed { .. }));
    }

    #[test]
    fn test_numeric_invert() {
        let spec = TransformSpec::new("numeric", json!({"scale": 10, "offset": 5}));
        let forward = registry().apply(&spec, &json!(2)).unwrap();
        assert_eq!(forward, json!(25.0));
        assert_eq!(registry().invert(&spec, &forward).unwrap(), json!(2.0));

        let flat = TransformSpec::new("numeric", json!({"scale": 0}));
        assert!(matches!(
            registry().invert(&flat, &json!(1)),
            Err(TransformError::NotInvertible(_))
        ));
    }

    #[test]
    fn test_numeric_param_validation() {
        let reg = registry();
        assert!(reg.validate(&TransformSpec::new("numeric", json!({"scale": "x"}))).is_err());
        assert!(reg.validate(&TransformSpec::new("numeric", json!({"precision": -1}))).is_err());
        assert!(reg.validate(&TransformSpec::new("numeric", json!([1]))).is_err());
        assert!(reg.validate(&TransformSpec::new("numeric", Value::Null)).is_ok());
    }

    #[test]
    fn test_json_extract() {
        let reg = registry();
        let spec = TransformSpec::new("json_extract", json!({"key": "meta.unit"}));
        let value = json!({"meta": {"unit": "kW"}});
        assert_eq!(reg.apply(&spec, &value).unwrap(), json!("kW"));
        assert_eq!(
            reg.apply(&spec, &json!(r#"{"meta":{"unit":"V"}}"#)).unwrap(),
            json!("V")
        );
        assert!(reg.apply(&spec, &json!({"meta": {}})).is_err());
        assert!(reg.apply(&spec, &json!(3)).is_err());
        assert!(reg
            .validate(&TransformSpec::new("json_extract", json!({})))
            .is_err());
        assert!(matches!(
            reg.invert(&spec, &json!("kW")),
            Err(TransformError::NotInvertible(_))
        ));
    }

    struct Upper;

    impl ValueTransform for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn validate(&self, _params: &Value) -> Result<(), TransformError> {
            Ok(())
        }

        fn apply(&self, value: &Value, _params: &Value) -> Result<Value, TransformError> {
            Ok(json!(value.as_str().unwrap_or_default().to_uppercase()))
        }
    }

    #[test]
    fn test_custom_transform_registration() {
        let mut reg = registry();
        assert!(matches!(
            reg.validate(&TransformSpec::new("upper", Value::Null)),
            Err(TransformError::Unknown(_))
        ));
        reg.register(Arc::new(Upper));
        assert_eq!(
            reg.apply(&TransformSpec::new("upper", Value::Null), &json!("on"))
                .unwrap(),
            json!("ON")
        );
        assert_eq!(reg.names(), vec!["direct", "json_extract", "numeric", "upper"]);
    }
}
