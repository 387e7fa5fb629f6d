//! Error types for voltage-rtdb

use errors::VoltageError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RtdbError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid data type: expected {expected}, got {got}")]
    InvalidDataType { expected: String, got: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, RtdbError>;

impl RtdbError {
    pub(crate) fn wrong_type(expected: &str, got: &str) -> Self {
        Self::InvalidDataType {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

impl From<voltage_model::ModelError> for RtdbError {
    fn from(err: voltage_model::ModelError) -> Self {
        Self::InvalidPattern(err.to_string())
    }
}

impl From<RtdbError> for VoltageError {
    fn from(err: RtdbError) -> Self {
        match err {
            RtdbError::InvalidPattern(msg) | RtdbError::InvalidArgument(msg) => {
                VoltageError::Validation(msg)
            },
            RtdbError::SerializationError(msg) => VoltageError::Serialization(msg),
            other => VoltageError::Storage(other.to_string()),
        }
    }
}
