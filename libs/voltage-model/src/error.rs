//! Error types for voltage-model

use errors::VoltageError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Template '{template}' references capture {index} but only {available} captured")]
    MissingCapture {
        template: String,
        index: usize,
        available: usize,
    },

    #[error("Invalid payload for '{entity_type}': {reason}")]
    InvalidPayload { entity_type: String, reason: String },

    #[error("Invalid index spec: {0}")]
    InvalidIndexSpec(String),

    #[error("Invalid point type: {0}")]
    InvalidPointType(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;

impl From<ModelError> for VoltageError {
    fn from(err: ModelError) -> Self {
        VoltageError::Validation(err.to_string())
    }
}
