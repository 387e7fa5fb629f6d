//! Arithmetic operators and operands
//!
//! Used by DAG transform nodes: `output = left op right`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

/// Coerce a JSON value to a number
///
/// Numbers as-is, numeric strings parsed, booleans as 0/1. Everything else
/// (including NaN text) has no numeric form.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| !v.is_nan()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    #[serde(rename = "+", alias = "add")]
    Add,
    #[serde(rename = "-", alias = "sub", alias = "subtract")]
    Sub,
    #[serde(rename = "*", alias = "mul", alias = "multiply")]
    Mul,
    #[serde(rename = "/", alias = "div", alias = "divide")]
    Div,
}

impl ArithmeticOp {
    /// Apply the operator; division by zero yields 0
    pub fn apply(self, left: f64, right: f64) -> f64 {
        match self {
            ArithmeticOp::Add => left + right,
            ArithmeticOp::Sub => left - right,
            ArithmeticOp::Mul => left * right,
            ArithmeticOp::Div => {
                if right == 0.0 {
                    0.0
                } else {
                    left / right
                }
            },
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Transform operand: a literal number or a variable name (`$name` or `name`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Number(f64),
    Var(String),
}

impl Operand {
    /// Variable name without the optional `$` sigil
    pub fn var_name(&self) -> Option<&str> {
        match self {
            Operand::Var(name) => Some(name.strip_prefix('$').unwrap_or(name)),
            Operand::Number(_) => None,
        }
    }

    /// Resolve against the variable context
    ///
    /// A numeric string literal counts as a number. Missing or non-numeric
    /// variables resolve to 0.
    pub fn resolve(&self, variables: &Map<String, Value>) -> f64 {
        match self {
            Operand::Number(n) => *n,
            Operand::Var(raw) => {
                if let Ok(n) = raw.trim().parse::<f64>() {
                    return n;
                }
                let name = raw.strip_prefix('$').unwrap_or(raw);
                match variables.get(name).and_then(to_number) {
                    Some(n) => n,
                    None => {
                        debug!("Operand '{}' has no numeric value, using 0", name);
                        0.0
                    },
                }
            },
        }
    }
}

/// JSON number for a computed result; non-finite results become 0
pub fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(0))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_number_coercion() {
        assert_eq!(to_number(&json!(3.5)), Some(3.5));
        assert_eq!(to_number(&json!(" 42 ")), Some(42.0));
        assert_eq!(to_number(&json!(true)), Some(1.0));
        assert_eq!(to_number(&json!("abc")), None);
        assert_eq!(to_number(&json!("NaN")), None);
        assert_eq!(to_number(&json!(null)), None);
        assert_eq!(to_number(&json!([1])), None);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(ArithmeticOp::Add.apply(2.0, 3.0), 5.0);
        assert_eq!(ArithmeticOp::Sub.apply(2.0, 3.0), -1.0);
        assert_eq!(ArithmeticOp::Mul.apply(2.0, 3.0), 6.0);
        assert_eq!(ArithmeticOp::Div.apply(6.0, 3.0), 2.0);
        assert_eq!(ArithmeticOp::Div.apply(6.0, 0.0), 0.0);
    }

    #[test]
    fn test_operator_serde() {
        let op: ArithmeticOp = serde_json::from_value(json!("*")).unwrap();
        assert_eq!(op, ArithmeticOp::Mul);
        let op: ArithmeticOp = serde_json::from_value(json!("divide")).unwrap();
        assert_eq!(op, ArithmeticOp::Div);
        assert!(serde_json::from_value::<ArithmeticOp>(json!("%")).is_err());
    }

    #[test]
    fn test_operand_resolution() {
        let vars = json!({"power": 1000, "eff": "0.95", "label": "x"});
        let vars = vars.as_object().unwrap();

        let a: Operand = serde_json::from_value(json!("$power")).unwrap();
        let b: Operand = serde_json::from_value(json!("eff")).unwrap();
        let c: Operand = serde_json::from_value(json!(2)).unwrap();
        let d: Operand = serde_json::from_value(json!("label")).unwrap();
        let e: Operand = serde_json::from_value(json!("1.5")).unwrap();

        assert_eq!(a.resolve(vars), 1000.0);
        assert_eq!(a.var_name(), Some("power"));
        assert_eq!(b.resolve(vars), 0.95);
        assert_eq!(c.resolve(vars), 2.0);
        assert_eq!(d.resolve(vars), 0.0);
        assert_eq!(e.resolve(vars), 1.5);
        assert_eq!(Operand::Var("missing".into()).resolve(vars), 0.0);
    }

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(1.5), json!(1.5));
        assert_eq!(number_value(f64::INFINITY), json!(0));
    }
}
