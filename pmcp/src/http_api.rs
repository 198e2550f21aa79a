//! The vision HTTP API.
//!
//! Every endpoint is a thin translation between HTTP and engine operations;
//! the MCP tool surface wraps the same operations, so nothing here may hold
//! state of its own. Errors are JSON `{code, message, camera_id?}` with
//! conventional status codes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use pmcp_config_data::{CameraConfig, ReasoningConfig};
use pmcp_http_video_streaming::{mjpeg_response, DEFAULT_IDLE_TIMEOUT};
use pmcp_types::timestamp::parse_timestamp;
use pmcp_types::{
    AlertFilter, ApiError, CameraHealth, CameraId, ErrorCode, ReasoningMode, ReportedEvaluation,
    RuleSpec, SceneState,
};

use crate::changes::ChangeRecord;
use crate::engine::{Engine, EngineError};
use crate::rules;

/// Long-poll window for `GET /changes?wait=true`.
const CHANGES_WAIT: Duration = Duration::from_secs(30);

pub struct ApiFailure(pub ApiError);

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = match self.0.code {
            ErrorCode::CameraNotFound | ErrorCode::RuleNotFound => http::StatusCode::NOT_FOUND,
            ErrorCode::CameraNotAvailable | ErrorCode::CameraOpenTimeout => {
                http::StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::InvalidRequest => http::StatusCode::BAD_REQUEST,
            ErrorCode::ProviderBadJson => http::StatusCode::BAD_GATEWAY,
            ErrorCode::RateLimited => http::StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Unauthorized => http::StatusCode::UNAUTHORIZED,
        };
        (status, Json(self.0)).into_response()
    }
}

impl From<EngineError> for ApiFailure {
    fn from(e: EngineError) -> Self {
        let api = match &e {
            EngineError::CameraNotFound(id) => {
                ApiError::for_camera(ErrorCode::CameraNotFound, e.to_string(), id.clone())
            }
            EngineError::CameraExists(id) => {
                ApiError::for_camera(ErrorCode::InvalidRequest, e.to_string(), id.clone())
            }
            EngineError::Camera(pmcp_camera::Error::OpenTimeout(_)) => {
                ApiError::new(ErrorCode::CameraOpenTimeout, e.to_string())
            }
            EngineError::Camera(_) => ApiError::new(ErrorCode::CameraNotAvailable, e.to_string()),
            EngineError::Rules(rules::Error::NotFound(_)) => {
                ApiError::new(ErrorCode::RuleNotFound, e.to_string())
            }
            EngineError::Rules(_) => ApiError::new(ErrorCode::InvalidRequest, e.to_string()),
            EngineError::Provider(p) if p.is_bad_json() => {
                ApiError::new(ErrorCode::ProviderBadJson, e.to_string())
            }
            EngineError::Provider(_) => ApiError::new(ErrorCode::InvalidRequest, e.to_string()),
            EngineError::PendingNotFound(_) => {
                ApiError::new(ErrorCode::RuleNotFound, e.to_string())
            }
        };
        ApiFailure(api)
    }
}

type ApiResult<T> = std::result::Result<T, ApiFailure>;

fn unauthorized() -> ApiFailure {
    ApiFailure(ApiError::new(
        ErrorCode::Unauthorized,
        "missing or invalid bearer token",
    ))
}

/// Bearer-token check on mutating and frame/stream routes.
async fn require_auth(
    State(engine): State<Arc<Engine>>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let Some(expected) = engine.config.vision_api.auth_token.clone() else {
        return next.run(request).await;
    };
    let authorized = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == expected)
        .unwrap_or(false);
    if authorized {
        next.run(request).await
    } else {
        unauthorized().into_response()
    }
}

/// Per-request deadline for everything except the streaming and long-poll
/// routes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn router(engine: Arc<Engine>) -> Router {
    let open_routes = Router::new()
        .route("/health", get(health))
        .route("/scene", get(scene))
        .route("/cameras", get(list_cameras))
        .route("/cameras/discover", get(discover_cameras))
        .route("/rules", get(list_rules))
        .route("/templates", get(list_templates))
        .route("/alerts", get(query_alerts))
        .route("/alerts/pending", get(pending_alerts))
        .route("/stats", get(stats))
        .route("/memory", get(memory_list))
        .route_layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    // Streaming and long-polling run on their own clocks.
    let long_lived = Router::new()
        .route("/changes", get(changes));

    let protected_quick = Router::new()
        .route("/frame", get(frame))
        .route("/rules", post(create_rule))
        .route("/rules/{id}", delete(delete_rule))
        .route("/rules/{id}/toggle", put(toggle_rule))
        .route("/templates/{id}/create", post(create_from_template))
        .route("/evaluations/report", post(report_evaluation))
        .route("/provider/configure", post(configure_provider))
        .route("/memory", post(memory_put))
        .route("/memory/{key}", delete(memory_delete))
        .route_layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    // Camera opens block up to the open timeout; streams run until the
    // client leaves.
    let protected_slow = Router::new()
        .route("/cameras", post(add_camera))
        .route("/cameras/open", post(open_camera))
        .route("/stream", get(stream));

    let protected_routes = protected_quick.merge(protected_slow).route_layer(
        axum::middleware::from_fn_with_state(engine.clone(), require_auth),
    );

    open_routes
        .merge(long_lived)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Serve until the engine's shutdown signal fires, draining in-flight
/// requests.
pub async fn serve(engine: Arc<Engine>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    let mut shutdown_rx = engine.shutdown_signal();
    let app = router(engine);
    info!("vision api listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // Either an explicit shutdown or a dropped engine ends serving.
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
}

// ---------------------------------------------------------------- handlers

#[derive(Debug, Deserialize)]
struct CameraQuery {
    camera_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CameraHealthView {
    #[serde(flatten)]
    health: CameraHealth,
    last_gate_reason: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    provider: String,
    model: String,
    reasoning_mode: ReasoningMode,
    cameras: BTreeMap<CameraId, CameraHealthView>,
    warnings: Vec<String>,
}

async fn health(State(engine): State<Arc<Engine>>) -> Json<HealthResponse> {
    let (provider, model) = match engine.provider() {
        Some(p) => (p.provider_name().to_string(), p.model_name().to_string()),
        None => ("none".to_string(), String::new()),
    };

    let gate_reasons: BTreeMap<CameraId, String> = engine
        .cameras_snapshot()
        .into_iter()
        .map(|c| {
            (
                c.config.id.clone(),
                (*c.last_gate_reason.lock()).to_string(),
            )
        })
        .collect();

    let cameras = engine
        .health_map()
        .into_iter()
        .map(|(id, health)| {
            let last_gate_reason = gate_reasons.get(&id).cloned().unwrap_or_default();
            (
                id,
                CameraHealthView {
                    health,
                    last_gate_reason,
                },
            )
        })
        .collect();

    Json(HealthResponse {
        provider,
        model,
        reasoning_mode: engine.reasoning_mode(),
        cameras,
        warnings: engine.unreachable_rule_warnings(),
    })
}

async fn frame(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<CameraQuery>,
) -> ApiResult<Response> {
    let camera_id = q.camera_id.map(CameraId::new);
    let runtime = engine
        .camera_or_default(camera_id.as_ref())
        .ok_or_else(|| camera_not_found(camera_id))?;
    let frame = runtime
        .source
        .read()
        .grab_frame()
        .map_err(|e| ApiFailure::from(EngineError::Camera(e)))?;
    Ok((
        [(http::header::CONTENT_TYPE, "image/jpeg")],
        frame.jpeg.clone(),
    )
        .into_response())
}

async fn stream(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<CameraQuery>,
) -> ApiResult<Response> {
    let camera_id = q.camera_id.map(CameraId::new);
    let runtime = engine
        .camera_or_default(camera_id.as_ref())
        .ok_or_else(|| camera_not_found(camera_id))?;
    let rx = engine
        .mjpeg
        .subscribe(&runtime.config.id)
        .ok_or_else(|| camera_not_found(Some(runtime.config.id.clone())))?;
    Ok(mjpeg_response(rx, DEFAULT_IDLE_TIMEOUT))
}

fn camera_not_found(camera_id: Option<CameraId>) -> ApiFailure {
    let mut api = ApiError::new(ErrorCode::CameraNotFound, "camera not found");
    api.camera_id = camera_id;
    ApiFailure(api)
}

async fn scene(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<CameraQuery>,
) -> ApiResult<Json<BTreeMap<CameraId, SceneState>>> {
    match q.camera_id {
        Some(id) => {
            let id = CameraId::new(id);
            let state = engine
                .scenes
                .snapshot(&id)
                .ok_or_else(|| camera_not_found(Some(id.clone())))?;
            Ok(Json(BTreeMap::from([(id, state)])))
        }
        None => Ok(Json(engine.scenes.all())),
    }
}

#[derive(Debug, Serialize)]
struct CameraView {
    #[serde(flatten)]
    config: CameraConfig,
    open: bool,
}

async fn list_cameras(State(engine): State<Arc<Engine>>) -> Json<Vec<CameraView>> {
    let open_ids: std::collections::BTreeSet<CameraId> = engine
        .cameras_snapshot()
        .iter()
        .map(|c| c.config.id.clone())
        .collect();

    let mut views: Vec<CameraView> = Vec::new();
    for cfg in &engine.config.cameras {
        views.push(CameraView {
            config: cfg.clone(),
            open: open_ids.contains(&cfg.id),
        });
    }
    // Cameras registered at runtime are not in the static config.
    for runtime in engine.cameras_snapshot() {
        if !engine.config.cameras.iter().any(|c| c.id == runtime.config.id) {
            views.push(CameraView {
                config: runtime.config.clone(),
                open: true,
            });
        }
    }
    Json(views)
}

async fn add_camera(
    State(engine): State<Arc<Engine>>,
    Json(config): Json<CameraConfig>,
) -> ApiResult<Json<CameraView>> {
    if config.id.is_empty() {
        return Err(ApiFailure(ApiError::new(
            ErrorCode::InvalidRequest,
            "camera id must not be empty",
        )));
    }
    let runtime = engine.open_camera(config).await?;
    Ok(Json(CameraView {
        config: runtime.config.clone(),
        open: true,
    }))
}

#[derive(Debug, Deserialize)]
struct OpenCameraRequest {
    camera_id: CameraId,
}

async fn open_camera(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<OpenCameraRequest>,
) -> ApiResult<Json<CameraView>> {
    let config = engine
        .config
        .cameras
        .iter()
        .find(|c| c.id == req.camera_id)
        .cloned()
        .ok_or_else(|| camera_not_found(Some(req.camera_id.clone())))?;
    let runtime = engine.open_camera(config).await?;
    Ok(Json(CameraView {
        config: runtime.config.clone(),
        open: true,
    }))
}

#[derive(Debug, Serialize)]
struct DiscoveredEndpoint {
    address: String,
    port: u16,
    hint: &'static str,
}

/// Probe the local /24 for common camera ports. Short timeouts, bounded
/// concurrency; a best-effort LAN scan, not an inventory.
async fn discover_cameras(State(_engine): State<Arc<Engine>>) -> Json<Vec<DiscoveredEndpoint>> {
    const PROBE_PORTS: &[(u16, &str)] = &[
        (554, "rtsp"),
        (8554, "rtsp"),
        (80, "http"),
        (8080, "http"),
    ];
    let Some(local) = crate::mdns::lan_ip() else {
        return Json(Vec::new());
    };
    let octets = local.octets();

    let mut tasks = tokio::task::JoinSet::new();
    for host in 1..=254u8 {
        let addr = std::net::Ipv4Addr::new(octets[0], octets[1], octets[2], host);
        if addr == local {
            continue;
        }
        for &(port, hint) in PROBE_PORTS {
            tasks.spawn(async move {
                let target = std::net::SocketAddr::from((addr, port));
                let connect = tokio::net::TcpStream::connect(target);
                match tokio::time::timeout(Duration::from_millis(250), connect).await {
                    Ok(Ok(_)) => Some(DiscoveredEndpoint {
                        address: addr.to_string(),
                        port,
                        hint,
                    }),
                    _ => None,
                }
            });
        }
    }

    let mut found = Vec::new();
    while let Some(result) = tasks.join_next().await {
        if let Ok(Some(endpoint)) = result {
            found.push(endpoint);
        }
    }
    found.sort_by(|a, b| (&a.address, a.port).cmp(&(&b.address, b.port)));
    Json(found)
}

async fn list_rules(State(engine): State<Arc<Engine>>) -> Json<Vec<pmcp_types::WatchRule>> {
    Json(engine.rules.snapshot().as_ref().clone())
}

async fn create_rule(
    State(engine): State<Arc<Engine>>,
    Json(spec): Json<RuleSpec>,
) -> ApiResult<Json<pmcp_types::WatchRule>> {
    if spec.condition.trim().is_empty() {
        return Err(ApiFailure(ApiError::new(
            ErrorCode::InvalidRequest,
            "rule condition must not be empty",
        )));
    }
    Ok(Json(engine.rules.create(spec)))
}

async fn delete_rule(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<pmcp_types::WatchRule>> {
    let rule = engine
        .rules
        .delete(&id)
        .map_err(EngineError::Rules)?;
    Ok(Json(rule))
}

async fn toggle_rule(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> ApiResult<Json<pmcp_types::WatchRule>> {
    let rule = engine
        .rules
        .toggle(&id)
        .map_err(EngineError::Rules)?;
    Ok(Json(rule))
}

async fn list_templates() -> Json<&'static [rules::RuleTemplate]> {
    Json(rules::templates())
}

#[derive(Debug, Default, Deserialize)]
struct TemplateCreateRequest {
    #[serde(default)]
    camera_id: Option<CameraId>,
}

async fn create_from_template(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
    body: Option<Json<TemplateCreateRequest>>,
) -> ApiResult<Json<pmcp_types::WatchRule>> {
    let template = rules::template_by_id(&id).ok_or_else(|| {
        ApiFailure(ApiError::new(
            ErrorCode::RuleNotFound,
            format!("no template named {id}"),
        ))
    })?;
    let camera_id = body.and_then(|Json(b)| b.camera_id);
    let rule = engine.rules.create(RuleSpec {
        name: template.name.to_string(),
        condition: template.condition.to_string(),
        camera_id,
        priority: template.priority,
        notification: Default::default(),
        cooldown_seconds: template.cooldown_seconds,
        custom_message: None,
        owner_id: None,
    });
    Ok(Json(rule))
}

async fn query_alerts(
    State(engine): State<Arc<Engine>>,
    Query(filter): Query<AlertFilter>,
) -> Json<Vec<pmcp_types::AlertEvent>> {
    Json(engine.alert_log.query(&filter))
}

async fn pending_alerts(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<CameraQuery>,
) -> Json<Vec<pmcp_types::PendingAlert>> {
    let camera_id = q.camera_id.map(CameraId::new);
    Json(engine.pending.list(camera_id.as_ref()))
}

async fn report_evaluation(
    State(engine): State<Arc<Engine>>,
    Json(report): Json<ReportedEvaluation>,
) -> ApiResult<Json<Vec<pmcp_types::AlertEvent>>> {
    Ok(Json(engine.report_rule_evaluation(report)?))
}

async fn configure_provider(
    State(engine): State<Arc<Engine>>,
    Json(cfg): Json<ReasoningConfig>,
) -> ApiResult<Json<pmcp_types::ConfigureProviderResponse>> {
    Ok(Json(engine.configure_provider(cfg)?))
}

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    since: Option<String>,
    camera_id: Option<String>,
    #[serde(default)]
    wait: bool,
}

async fn changes(
    State(engine): State<Arc<Engine>>,
    Query(q): Query<ChangesQuery>,
) -> Json<Vec<ChangeRecord>> {
    let since: Option<DateTime<Utc>> = q.since.as_deref().and_then(parse_timestamp);
    let camera_id = q.camera_id.map(CameraId::new);

    let mut entries = engine.changes.list(since, camera_id.as_ref());
    if entries.is_empty() && q.wait {
        // Long poll: one new entry (for any camera) wakes us to re-filter.
        engine.changes.wait_for_next(CHANGES_WAIT).await;
        entries = engine.changes.list(since, camera_id.as_ref());
    }
    Json(entries)
}

async fn stats(State(engine): State<Arc<Engine>>) -> Json<crate::stats::StatsSnapshot> {
    Json(
        engine
            .stats
            .snapshot(&engine.config.cost_control, Utc::now()),
    )
}

async fn memory_list(
    State(engine): State<Arc<Engine>>,
) -> Json<std::collections::BTreeMap<String, String>> {
    Json(engine.memory.all())
}

#[derive(Debug, Deserialize)]
struct MemoryPutRequest {
    key: String,
    value: String,
}

async fn memory_put(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<MemoryPutRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.key.trim().is_empty() {
        return Err(ApiFailure(ApiError::new(
            ErrorCode::InvalidRequest,
            "memory key must not be empty",
        )));
    }
    let stored = engine.memory.remember(req.key, req.value);
    Ok(Json(serde_json::json!({ "stored": stored })))
}

async fn memory_delete(
    State(engine): State<Arc<Engine>>,
    Path(key): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "removed": engine.memory.forget(&key) }))
}
