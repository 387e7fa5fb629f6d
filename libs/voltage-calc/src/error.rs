//! Error types for voltage-calc
//!
//! Evaluation itself never fails; these errors come from decoding condition
//! trees and operands out of JSON.

use errors::VoltageError;
use thiserror::Error;

/// Calculation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalcError {
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Invalid operand: {0}")]
    InvalidOperand(String),
}

impl CalcError {
    pub fn condition(msg: impl Into<String>) -> Self {
        Self::InvalidCondition(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CalcError>;

impl From<CalcError> for VoltageError {
    fn from(err: CalcError) -> Self {
        VoltageError::Validation(err.to_string())
    }
}
