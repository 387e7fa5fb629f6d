//! Orchestration core service
//!
//! Hosts the entity store, sync engine, rule engine and lifecycle engine over
//! one in-memory store and exposes them through an axum HTTP API.

pub mod api;
pub mod app;
pub mod config;
pub mod ingest;
pub mod logging;

pub use api::{create_routes, ApiResult, SuccessResponse};
pub use app::AppState;
pub use config::{CoresrvConfig, DEFAULT_PORT, ENV_PREFIX};
pub use ingest::{history_point, ingest_points, IngestReport};
