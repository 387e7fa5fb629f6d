//! Unified error handling for the VoltageEMS orchestration core
//!
//! Every engine crate (entity store, sync, rules, lifecycle) reports failures
//! through [`VoltageError`]. Failures are values handed back to the caller;
//! nothing in the core is fatal to the hosting process and the engine never
//! retries on its own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ErrorInfo - API error response type
// ============================================================================

/// Standard error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (HTTP status)
    pub code: u16,
    /// Stable machine-readable error kind
    pub kind: String,
    /// Error message
    pub message: String,
    /// Detailed error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Field-specific errors for validation
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_errors: HashMap<String, Vec<String>>,
}

impl ErrorInfo {
    /// Create a new ErrorInfo with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            kind: "internal".to_string(),
            message: message.into(),
            details: None,
            field_errors: HashMap::new(),
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Set the error kind
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Add details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Add a field error
    pub fn add_field_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(error.into());
        self
    }
}

// ============================================================================
// VoltageError - Main error type
// ============================================================================

/// Main error type for the orchestration core
#[derive(Debug, Error)]
pub enum VoltageError {
    // ======================================
    // Input Errors
    // ======================================
    /// Malformed payload or configuration, rejected before any write
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid parameter: {param}: {reason}")]
    InvalidParameter { param: String, reason: String },

    // ======================================
    // Lookup Errors
    // ======================================
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Sync config not found: {0}")]
    ConfigNotFound(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    // ======================================
    // Lifecycle Errors
    // ======================================
    /// Optimistic-concurrency guard: stored state differs from the expected one
    #[error("State mismatch on {key}: expected '{expected}', found '{actual}'")]
    StateMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid transition for {entity_type}: no '{event}' event from state '{state}'")]
    InvalidTransition {
        entity_type: String,
        state: String,
        event: String,
    },

    // ======================================
    // Execution Errors
    // ======================================
    #[error("Recursion limit reached: depth {depth} exceeds {max}")]
    RecursionLimit { depth: usize, max: usize },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    // ======================================
    // Infrastructure Errors
    // ======================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using VoltageError
pub type Result<T> = std::result::Result<T, VoltageError>;

impl VoltageError {
    /// Convenience constructor for [`VoltageError::NotFound`]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Stable kind string used in API responses and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidParameter { .. } => "validation",
            Self::NotFound { .. } | Self::RuleNotFound(_) => "not_found",
            Self::ConfigNotFound(_) => "config_not_found",
            Self::StateMismatch { .. } => "state_mismatch",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::RecursionLimit { .. } => "recursion_limit",
            Self::CircularDependency(_) => "circular_dependency",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Configuration(_) => "configuration",
            Self::Internal(_) => "internal",
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::Validation(_) | Self::InvalidParameter { .. } => 400,

            // 404 Not Found
            Self::NotFound { .. } | Self::ConfigNotFound(_) | Self::RuleNotFound(_) => 404,

            // 409 Conflict
            Self::StateMismatch { .. } | Self::CircularDependency(_) => 409,

            // 422 Unprocessable Entity
            Self::InvalidTransition { .. } | Self::RecursionLimit { .. } => 422,

            // 500 Internal Server Error
            Self::Storage(_)
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Whether the caller should report this as a client-side problem
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Convert to API ErrorInfo for HTTP responses
    pub fn to_error_info(&self) -> ErrorInfo {
        let mut error_info = ErrorInfo::new(self.to_string())
            .with_code(self.status_code())
            .with_kind(self.kind());

        match self {
            Self::InvalidParameter { param, reason } => {
                error_info = error_info.add_field_error(param, reason);
            },
            Self::Validation(msg) => {
                error_info = error_info.with_details(msg.clone());
            },
            Self::StateMismatch { actual, .. } => {
                error_info = error_info.with_details(format!("current state: {}", actual));
            },
            _ => {},
        }

        error_info
    }

    /// Get log level
    pub fn log_level(&self) -> tracing::Level {
        if self.is_client_error() {
            tracing::Level::INFO
        } else {
            tracing::Level::ERROR
        }
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for VoltageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for VoltageError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(feature = "axum-support")]
impl axum::response::IntoResponse for VoltageError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.log_level() == tracing::Level::ERROR {
            tracing::error!("Request failed ({}): {}", status.as_u16(), self);
        } else {
            tracing::info!("Request rejected ({}): {}", status.as_u16(), self);
        }
        (status, axum::Json(self.to_error_info())).into_response()
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::VoltageError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::VoltageError::Validation(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::VoltageError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::VoltageError::Configuration(format!($fmt, $($arg)*))
    };
}
