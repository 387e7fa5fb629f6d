//! Logging setup and HTTP access logging
//!
//! `RUST_LOG` overrides the configured level. Request logs use the
//! `api_access` target so they can be filtered separately from engine logs.

use crate::config::LoggingSection;
use axum::body::Body;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use errors::{Result, VoltageError};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, level_enabled, warn, Level};
use tracing_subscriber::EnvFilter;

/// Target of HTTP access log events
pub const API_ACCESS_TARGET: &str = "api_access";

const MAX_BODY_LENGTH: usize = 500;
const SENSITIVE_FIELDS: [&str; 5] = ["password", "token", "api_key", "secret", "authorization"];

/// Filter directive for `level`, honoring `RUST_LOG` when present
pub fn filter_directive(level: &str, rust_log: Option<&str>) -> String {
    match rust_log {
        Some(env) if env.contains(API_ACCESS_TARGET) => env.to_string(),
        Some(env) => format!("{},{}=info", env, API_ACCESS_TARGET),
        None => format!("{},{}=info", level, API_ACCESS_TARGET),
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingSection) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = filter_directive(&config.level, rust_log.as_deref());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| VoltageError::Configuration(format!("Invalid log filter '{}': {}", directive, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| VoltageError::Configuration(format!("Failed to initialize logging: {}", e)))
}

/// HTTP request logger middleware
///
/// - INFO: modifying requests (POST/PUT/PATCH/DELETE) without body
/// - DEBUG: every request; JSON bodies of modifying requests are included,
///   redacted and truncated
pub async fn http_request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let modifying = matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE");
    let is_json = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    let start = Instant::now();

    let (req, body_str) = if modifying && is_json && level_enabled!(Level::DEBUG) {
        let (parts, body) = req.into_parts();
        match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => {
                let body_str = match std::str::from_utf8(&bytes) {
                    Ok(s) => truncate_body(&redact_sensitive_fields(s), MAX_BODY_LENGTH),
                    Err(_) => "<binary data>".to_string(),
                };
                (Request::from_parts(parts, Body::from(bytes)), body_str)
            },
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                return next.run(Request::from_parts(parts, Body::empty())).await;
            },
        }
    } else {
        (req, "-".to_string())
    };

    let response = next.run(req).await;
    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis();

    if modifying {
        info!(
            target: "api_access",
            method = %method,
            path = %path,
            status = status,
            duration_ms = %duration_ms,
            "HTTP request"
        );
    }
    debug!(
        target: "api_access",
        method = %method,
        path = %path,
        status = status,
        duration_ms = %duration_ms,
        request_body = %body_str,
        "HTTP request (detailed)"
    );
    response
}

/// Replace values of sensitive JSON fields (at any depth)
pub fn redact_sensitive_fields(json_str: &str) -> String {
    match serde_json::from_str::<Value>(json_str) {
        Ok(mut value) => {
            redact(&mut value);
            value.to_string()
        },
        Err(_) => json_str.to_string(),
    }
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                let lower = key.to_lowercase();
                if SENSITIVE_FIELDS.iter().any(|s| lower.contains(s)) {
                    *v = Value::String("***REDACTED***".to_string());
                } else {
                    redact(v);
                }
            }
        },
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {},
    }
}

/// Cut `body` to `max_length` bytes on a char boundary
pub fn truncate_body(body: &str, max_length: usize) -> String {
    if body.len() <= max_length {
        return body.to_string();
    }
    let mut end = max_length;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}[truncated {} bytes]", &body[..end], body.len() - end)
}
