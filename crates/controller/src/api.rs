//! Operator HTTP API: control surface, health checks and Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use controller_lib::{
    control::{ConfigUpdate, ControlLoop, LoopError},
    health::{ComponentStatus, HealthRegistry},
    observability::ControllerMetrics,
    safety::ApprovalError,
    source::EndpointConfig,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlLoop>,
    pub health_registry: HealthRegistry,
    pub metrics: ControllerMetrics,
}

impl AppState {
    pub fn new(
        control: Arc<ControlLoop>,
        health_registry: HealthRegistry,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            control,
            health_registry,
            metrics,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct ReasonBody {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

fn error_response(err: LoopError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &err {
        LoopError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LoopError::InvalidConfig(_) | LoopError::Detector(_) => StatusCode::BAD_REQUEST,
        LoopError::Approval(ApprovalError::OutOfRange(_)) => StatusCode::NOT_FOUND,
        LoopError::Approval(ApprovalError::KillSwitchEngaged(_)) => StatusCode::CONFLICT,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

/// Health check - 200 if healthy/degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check - 200 if ready, 503 if not
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control.status().await)
}

async fn start(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.control.start().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"state": "running"}))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.control.stop().await;
    Json(serde_json::json!({"state": "stopped"}))
}

async fn pause(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.control.pause().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"state": "paused"}))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn resume(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.control.resume().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"state": "running"}))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Force an out-of-band tick
async fn collect_now(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.control.collect_now().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"collected": true}))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn configure(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ConfigUpdate>,
) -> impl IntoResponse {
    match state.control.configure(update).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"applied": true}))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn list_endpoints(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control.list_endpoints().await)
}

async fn add_endpoint(
    State(state): State<Arc<AppState>>,
    Json(endpoint): Json<EndpointConfig>,
) -> impl IntoResponse {
    state.control.add_endpoint(endpoint).await;
    let count = state.control.list_endpoints().await.len();
    state.metrics.set_endpoints_monitored(count as i64);
    StatusCode::CREATED
}

async fn remove_endpoint(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if state.control.remove_endpoint(&name).await {
        let count = state.control.list_endpoints().await.len();
        state.metrics.set_endpoints_monitored(count as i64);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Metrics currently tracked by the detector
async fn tracked_signals(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control.tracked_metrics().await)
}

async fn recent_samples(
    State(state): State<Arc<AppState>>,
    Path(metric): Path<String>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100);
    Json(state.control.recent_samples(&metric, limit).await)
}

/// Derived window statistics for one tracked metric
async fn window_stats(
    State(state): State<Arc<AppState>>,
    Path(metric): Path<String>,
) -> impl IntoResponse {
    match state.control.window_stats(&metric).await {
        Some(stats) => (StatusCode::OK, Json(stats)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("no samples tracked for metric {metric}"),
            }),
        )
            .into_response(),
    }
}

async fn list_approvals(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pending = state.control.pending_approvals().await;
    state.metrics.set_approval_queue_depth(pending.len() as i64);
    Json(pending)
}

async fn approve(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    match state.control.approve(index).await {
        Ok(record) => {
            info!(action = %record.kind, metric = %record.metric, "Approval executed");
            (StatusCode::OK, Json(record)).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

async fn reject(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
    Json(body): Json<ReasonBody>,
) -> impl IntoResponse {
    match state.control.reject(index, &body.reason).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn clear_kill_switch(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.control.clear_kill_switch().await;
    state.metrics.set_kill_switch(false);
    Json(serde_json::json!({"kill_switch_engaged": false}))
}

async fn engage_kill_switch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReasonBody>,
) -> impl IntoResponse {
    state.control.engage_kill_switch(&body.reason).await;
    state.metrics.set_kill_switch(true);
    Json(serde_json::json!({"kill_switch_engaged": true}))
}

async fn recent_actions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50);
    Json(state.control.recent_actions(limit).await)
}

async fn learning_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control.learning_stats().await)
}

async fn dropped_candidates(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control.dropped_candidates().await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/collect", post(collect_now))
        .route("/config", post(configure))
        .route("/endpoints", get(list_endpoints).post(add_endpoint))
        .route("/endpoints/:name", delete(remove_endpoint))
        .route("/signals", get(tracked_signals))
        .route("/samples/:metric", get(recent_samples))
        .route("/stats/:metric", get(window_stats))
        .route("/approvals", get(list_approvals))
        .route("/approvals/:index/approve", post(approve))
        .route("/approvals/:index/reject", post(reject))
        .route("/killswitch/clear", post(clear_kill_switch))
        .route("/killswitch/engage", post(engage_kill_switch))
        .route("/actions", get(recent_actions))
        .route("/learning", get(learning_stats))
        .route("/dropped", get(dropped_candidates))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting control surface API");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
