//! HTTP API tests against an in-memory store

#![allow(clippy::disallowed_methods)] // Integration test - unwrap is acceptable

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use coresrv::{create_routes, AppState, CoresrvConfig};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use tracing_test::traced_test;
use voltage_rtdb::helpers::create_test_rtdb_with_clock;

fn app() -> Router {
    let (rtdb, _clock) = create_test_rtdb_with_clock(1_000);
    create_routes(AppState::with_rtdb(CoresrvConfig::default(), rtdb))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, String) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, text) = send(app, method, uri, body).await;
    (status, serde_json::from_str(&text).unwrap())
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["service"], "coresrv");
    assert_eq!(body["data"]["scheduler"]["running"], false);
}

#[tokio::test]
async fn test_entity_crud_and_index_queries() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::PUT,
        "/api/entities/device:1",
        Some(json!({
            "entity_type": "device",
            "payload": {"site": "north", "power": 5},
            "indexes": [{"kind": "single", "field": "site"}, {"kind": "sorted", "field": "power"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["key"], "device:1");

    let (_, body) = call(&app, Method::GET, "/api/entities/device:1", None).await;
    assert_eq!(body["data"]["payload"]["site"], "north");

    let (_, body) = call(&app, Method::GET, "/api/indexes/device/site/north", None).await;
    assert_eq!(body["data"], json!(["device:1"]));

    let (_, body) = call(
        &app,
        Method::GET,
        "/api/indexes/device/range?field=power&min=0&max=10",
        None,
    )
    .await;
    assert_eq!(body["data"], json!([{"key": "device:1", "score": 5.0}]));

    let (_, body) = call(
        &app,
        Method::POST,
        "/api/indexes/device/query",
        Some(json!({"mode": "union", "filters": {"site": "north"}})),
    )
    .await;
    assert_eq!(body["data"], json!(["device:1"]));

    let (_, body) = call(&app, Method::GET, "/api/entities?type=device", None).await;
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["has_more"], false);

    let (status, _) = call(&app, Method::DELETE, "/api/entities/device:1", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, Method::GET, "/api/entities/device:1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
    assert_eq!(body["code"], 404);
}

#[tokio::test]
async fn test_condition_evaluation() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/conditions/evaluate",
        Some(json!({
            "condition": {"field": "soc", "operator": "lt", "value": 20},
            "data": {"soc": 12}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["result"], true);
}

#[tokio::test]
async fn test_rule_lifecycle_and_execution() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/rules",
        Some(json!({
            "id": "init",
            "kind": "dag",
            "nodes": [{"id": "set", "type": "action",
                       "config": {"action": "set_variable", "name": "mode", "value": "auto"}}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "init");

    let (_, body) = call(&app, Method::GET, "/api/rules/init/state", None).await;
    assert_eq!(body["data"]["state"], "draft");

    let (_, body) = call(&app, Method::POST, "/api/rules/init/execute", None).await;
    assert_eq!(body["data"]["status"], "disabled");

    let (_, body) = call(
        &app,
        Method::POST,
        "/api/rules/init/transition",
        Some(json!({"from": "draft", "event": "activate"})),
    )
    .await;
    assert_eq!(body["data"], "active");

    let (status, body) = call(&app, Method::POST, "/api/rules/init/execute", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "executed");
    assert_eq!(body["data"]["variables"]["mode"], "auto");

    let (_, body) = call(&app, Method::GET, "/api/rules/init/executions?limit=1", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["status"], "executed");

    // Stale expected state
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/rules/init/transition",
        Some(json!({"from": "draft", "event": "activate"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "state_mismatch");

    let (status, _) = call(&app, Method::DELETE, "/api/rules/init", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::GET, "/api/rules/init", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_points_ingest_triggers_sync() {
    let app = app();
    let (status, _) = call(
        &app,
        Method::PUT,
        "/api/sync/rules/telemetry",
        Some(json!({
            "source": {"pattern": "comsrv:*:T"},
            "target": {"pattern": "inst:*:M"},
            "field_mapping": {"1": "voltage"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/points",
        Some(json!([
            {"channel_id": 5, "telemetry_type": "T", "point_id": 1, "value": 231.0, "timestamp": 10}
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["points_written"], 1);
    assert_eq!(body["data"]["keys"], json!(["comsrv:5:T"]));
    assert_eq!(body["metadata"]["sync_errors"], 0);

    let (_, body) = call(&app, Method::GET, "/api/keys/inst:5:M", None).await;
    assert_eq!(body["data"]["voltage"], "231");

    let (status, text) = send(&app, Method::GET, "/api/history/comsrv:5:T?format=line", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "comsrv,channel=5,type=T 1=231 10");
}

#[tokio::test]
async fn test_alarm_raise_and_transition() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/alarms",
        Some(json!({
            "id": "a1",
            "source": "comsrv:1:T:3",
            "level": "major",
            "message": "over voltage"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["key"], "entity:alarm:a1");

    let (_, body) = call(&app, Method::GET, "/api/lifecycle/entity:alarm:a1/state", None).await;
    assert_eq!(body["data"]["state"], "active");

    let (_, body) = call(&app, Method::GET, "/api/lifecycle/entity:alarm:a1/events", None).await;
    let events = body["data"].as_array().unwrap();
    assert!(events.contains(&json!("acknowledge")));

    let (_, body) = call(
        &app,
        Method::POST,
        "/api/lifecycle/entity:alarm:a1/transition",
        Some(json!({"from": "active", "event": "acknowledge"})),
    )
    .await;
    assert_eq!(body["data"], "acknowledged");

    let (_, body) = call(&app, Method::GET, "/api/lifecycle/entity:alarm:a1/history", None).await;
    assert_eq!(body["data"][0]["event"], "acknowledge");

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/lifecycle/entity:alarm:a1/transition",
        Some(json!({"from": "active", "event": "acknowledge"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_input_is_rejected() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/points",
        Some(json!([{"channel_id": 1, "telemetry_type": "T", "point_id": 1, "value": 1.0}])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["points_written"], 1);

    let (status, body) = call(&app, Method::PUT, "/api/keys/some:key", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, _) = call(&app, Method::GET, "/api/sync/rules/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[traced_test]
async fn test_modifying_requests_are_access_logged() {
    let app = app();
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/conditions/evaluate",
        Some(json!({"condition": {"field": "x", "operator": "exists", "value": null}, "password": "p"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(logs_contain("HTTP request"));
    assert!(logs_contain("/api/conditions/evaluate"));
    assert!(!logs_contain("\"password\":\"p\""));
}

#[tokio::test]
#[traced_test]
async fn test_rejected_requests_are_logged() {
    let app = app();
    let (status, _) = call(&app, Method::GET, "/api/entities/device:404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(logs_contain("Request rejected (404)"));
    assert!(!logs_contain("Request failed"));
}
