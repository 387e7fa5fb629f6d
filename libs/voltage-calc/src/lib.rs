//! voltage-calc - Condition evaluation for VoltageEMS
//!
//! # Features
//!
//! - **Condition trees**: leaf comparisons combined with AND/OR groups
//! - **Fail-closed evaluation**: every lookup or coercion failure is `false`
//! - **Arithmetic**: `+ - * /` over literal and variable operands
//!
//! # Example
//!
//! ```rust
//! use voltage_calc::{evaluate, Condition};
//! use serde_json::json;
//!
//! let condition = Condition::from_value(json!({
//!     "logic": "AND",
//!     "conditions": [
//!         {"field": "temperature", "operator": "gt", "value": 80},
//!         {"field": "status", "operator": "eq", "value": "running"}
//!     ]
//! })).unwrap();
//!
//! let context = json!({"temperature": "85.5", "status": "running"});
//! assert!(evaluate(&condition, context.as_object().unwrap()));
//! ```
//!
//! # Operators
//!
//! | Operator | Aliases | Semantics |
//! |----------|---------|-----------|
//! | `eq` / `ne` | `==` / `!=` | numeric when both sides coerce, else JSON or string equality |
//! | `gt` `gte` `lt` `lte` | `>` `>=` `<` `<=` | numeric only, fail closed |
//! | `in` / `not_in` | | value must be an array |
//! | `contains` | | substring of a string, member of an array |
//! | `matches` | | glob (`*`, `?`), substring when no wildcard |
//! | `exists` / `not_exists` | | field present and not null |

pub mod condition;
pub mod error;
pub mod ops;

// Re-exports for convenience
pub use condition::{
    compare, evaluate, explain, values_equal, ComparisonOperator, Condition, ConditionGroup,
    ConditionLeaf, ConditionTrace, LeafTrace, LogicalOperator,
};
pub use error::{CalcError, Result};
pub use ops::{number_value, to_number, ArithmeticOp, Operand};
