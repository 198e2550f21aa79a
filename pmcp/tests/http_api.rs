//! HTTP surface contract tests against an engine with no cameras attached.

use std::sync::Arc;

use axum::body::Body;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use pmcp::engine::Engine;
use pmcp::http_api::router;
use pmcp_config_data::PmcpConfig;
use pmcp_types::{AlertEvent, EventType};

fn test_config(dir: &tempfile::TempDir) -> PmcpConfig {
    let mut cfg = PmcpConfig::default();
    cfg.server.data_dir = dir.path().display().to_string();
    cfg
}

async fn engine() -> (tempfile::TempDir, Arc<Engine>) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(&dir)).unwrap();
    engine.startup().await;
    (dir, engine)
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn send_json(
    app: &axum::Router,
    method: http::Method,
    uri: &str,
    body: Value,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_client_mode_without_provider() {
    let (_dir, engine) = engine().await;
    let app = router(engine);

    let (status, health) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["provider"], "none");
    assert_eq!(health["reasoning_mode"], "client");
    assert!(health["cameras"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn startup_without_provider_emits_exactly_one_warning() {
    let (_dir, engine) = engine().await;
    let app = router(engine);

    let (_, alerts) = get_json(&app, "/alerts?event_type=startup_warning").await;
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    let warning = &alerts[0];
    assert!(warning["message"]
        .as_str()
        .unwrap()
        .contains("fallback"));
    let event_id = warning["event_id"].as_str().unwrap();
    assert!(event_id.starts_with("evt_"));

    // The mcp_log fan-out carries the same event id.
    let (_, mirrors) = get_json(&app, "/alerts?event_type=mcp_log").await;
    let mirrors = mirrors.as_array().unwrap();
    assert_eq!(mirrors.len(), 1);
    assert_eq!(mirrors[0]["event_id"], event_id);
    let data = mirrors[0]["data"].as_str().unwrap();
    assert!(data.starts_with(&format!(
        "PMCP[STARTUP_WARNING] | event_id={event_id} |"
    )));
}

#[tokio::test]
async fn rule_crud_over_http() {
    let (_dir, engine) = engine().await;
    let app = router(engine);

    let (status, rule) = send_json(
        &app,
        http::Method::POST,
        "/rules",
        json!({ "name": "door", "condition": "a person is at the door" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = rule["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("r_"));
    assert_eq!(rule["enabled"], true);

    let (_, rules) = get_json(&app, "/rules").await;
    assert_eq!(rules.as_array().unwrap().len(), 1);

    let (status, toggled) = send_json(
        &app,
        http::Method::PUT,
        &format!("/rules/{id}/toggle"),
        Value::Null,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["enabled"], false);

    let (status, _) = send_json(
        &app,
        http::Method::DELETE,
        &format!("/rules/{id}"),
        Value::Null,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, error) = send_json(
        &app,
        http::Method::DELETE,
        &format!("/rules/{id}"),
        Value::Null,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "rule_not_found");
}

#[tokio::test]
async fn empty_rule_condition_is_invalid_request() {
    let (_dir, engine) = engine().await;
    let app = router(engine);
    let (status, error) = send_json(
        &app,
        http::Method::POST,
        "/rules",
        json!({ "name": "x", "condition": "  " }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_request");
}

#[tokio::test]
async fn alerts_cursor_pagination_over_http() {
    let (_dir, engine) = engine().await;

    for i in 0..100 {
        let mut event = AlertEvent::new(EventType::McpLog, format!("event {i}"));
        event.timestamp = format!("2024-05-01T00:{:02}:{:02}Z", i / 60, i % 60);
        engine.record_alert(event);
    }
    let app = router(engine);

    let (_, page1) = get_json(&app, "/alerts?event_type=mcp_log&limit=40").await;
    let page1 = page1.as_array().unwrap();
    assert_eq!(page1.len(), 40);
    assert_eq!(page1[0]["message"], "event 0");

    let cursor = page1.last().unwrap()["timestamp"].as_str().unwrap();
    let (_, page2) = get_json(
        &app,
        &format!("/alerts?event_type=mcp_log&limit=40&since={cursor}"),
    )
    .await;
    let page2 = page2.as_array().unwrap();
    assert_eq!(page2.len(), 40);
    assert_eq!(page2[0]["message"], "event 40");

    // Unparseable cursor behaves as absent.
    let (_, invalid) = get_json(&app, "/alerts?event_type=mcp_log&limit=40&since=invalid").await;
    assert_eq!(invalid.as_array().unwrap(), page1);
}

#[tokio::test]
async fn alerts_filter_normalization_over_http() {
    let (_dir, engine) = engine().await;
    let mut event = AlertEvent::new(EventType::ProviderError, "boom");
    event.camera_id = pmcp_types::CameraId::new("usb:0");
    engine.record_alert(event);
    let app = router(engine);

    let (_, plain) = get_json(&app, "/alerts?camera_id=usb:0&event_type=provider_error").await;
    let (_, decorated) = get_json(
        &app,
        "/alerts?camera_id=%20usb:0%20&event_type=PROVIDER_ERROR",
    )
    .await;
    assert_eq!(plain, decorated);
    assert_eq!(plain.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn bearer_auth_guards_mutating_routes() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(&dir);
    cfg.vision_api.auth_token = Some("sekrit".into());
    let engine = Engine::new(cfg).unwrap();
    let app = router(engine);

    // Open endpoint works without a token.
    let (status, _) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    // Mutating endpoint requires the token.
    let body = json!({ "name": "r", "condition": "c" });
    let (status, error) =
        send_json(&app, http::Method::POST, "/rules", body.clone(), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["code"], "unauthorized");

    let (status, _) = send_json(
        &app,
        http::Method::POST,
        "/rules",
        body.clone(),
        Some("wrong"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) =
        send_json(&app, http::Method::POST, "/rules", body, Some("sekrit")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn templates_are_listed_and_instantiable() {
    let (_dir, engine) = engine().await;
    let app = router(engine);

    let (_, templates) = get_json(&app, "/templates").await;
    assert!(templates.as_array().unwrap().len() >= 3);

    let (status, rule) = send_json(
        &app,
        http::Method::POST,
        "/templates/person/create",
        json!({ "camera_id": "usb:0" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rule["camera_id"], "usb:0");
    assert_eq!(rule["priority"], "HIGH");

    let (status, error) = send_json(
        &app,
        http::Method::POST,
        "/templates/nonsense/create",
        json!({}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "rule_not_found");
}

#[tokio::test]
async fn provider_downgrade_reports_runtime_switch() {
    let (_dir, engine) = engine().await;
    let app = router(engine.clone());

    // Client -> server: no warning.
    let (status, response) = send_json(
        &app,
        http::Method::POST,
        "/provider/configure",
        json!({ "provider": "anthropic", "api_key": "sk-test" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["reasoning_mode"], "server");
    assert_eq!(response["fallback_warning_emitted"], false);
    assert_eq!(response["fallback_warning_reason"], "");

    // Server -> client: downgrade with warning.
    let (status, response) = send_json(
        &app,
        http::Method::POST,
        "/provider/configure",
        json!({ "provider": "none" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["reasoning_mode"], "client");
    assert_eq!(response["fallback_warning_emitted"], true);
    assert_eq!(response["fallback_warning_reason"], "runtime_switch");

    let (_, warnings) = get_json(&app, "/alerts?event_type=startup_warning").await;
    let warnings = warnings.as_array().unwrap();
    assert!(warnings
        .iter()
        .any(|w| w["message"].as_str().unwrap().contains("runtime")));
}

#[tokio::test]
async fn memory_round_trip_over_http() {
    let (_dir, engine) = engine().await;
    let app = router(engine);

    let (status, stored) = send_json(
        &app,
        http::Method::POST,
        "/memory",
        json!({ "key": "dog", "value": "likes the couch" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["stored"], true);

    let (_, all) = get_json(&app, "/memory").await;
    assert_eq!(all["dog"], "likes the couch");

    let (_, removed) = send_json(
        &app,
        http::Method::DELETE,
        "/memory/dog",
        Value::Null,
        None,
    )
    .await;
    assert_eq!(removed["removed"], true);
}

#[tokio::test]
async fn unknown_camera_rules_surface_in_health_warnings() {
    let (_dir, engine) = engine().await;
    engine.rules.create(pmcp_types::RuleSpec {
        name: "ghost watcher".into(),
        condition: "anything".into(),
        camera_id: Some(pmcp_types::CameraId::new("no-such-camera")),
        priority: Default::default(),
        notification: Default::default(),
        cooldown_seconds: 0,
        custom_message: None,
        owner_id: None,
    });
    let app = router(engine);

    let (_, health) = get_json(&app, "/health").await;
    let warnings = health["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap().contains("no-such-camera"));
}

#[tokio::test]
async fn frame_without_cameras_is_not_found() {
    let (_dir, engine) = engine().await;
    let app = router(engine);
    let (status, error) = get_json(&app, "/frame").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "camera_not_found");
}
