//! Integration tests for the controller API endpoints

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use controller_lib::{
    clock::SystemClock,
    control::{ControlLoop, LoopConfig},
    detector::{AnomalyDetector, DetectorConfig},
    executor::LoggingExecutor,
    health::{components, ComponentStatus, HealthRegistry},
    observability::ControllerMetrics,
    router::{ResponseRouter, RouterConfig},
    safety::{SafetyConfig, SafetyController},
    source::{async_trait, EndpointConfig, MetricsSource},
};
use prometheus::{Encoder, TextEncoder};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;

/// Source that yields no signals; the API tests never tick
struct NullSource;

#[async_trait]
impl MetricsSource for NullSource {
    async fn fetch(&self, _endpoint: &EndpointConfig) -> anyhow::Result<BTreeMap<String, f64>> {
        Ok(BTreeMap::new())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlLoop>,
    pub health_registry: HealthRegistry,
    pub metrics: ControllerMetrics,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

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
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::CONFLICT,
    }
}

async fn approvals(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control.pending_approvals().await)
}

fn create_test_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/approvals", get(approvals))
        .with_state(state)
}

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let clock = Arc::new(SystemClock);
    let detector = AnomalyDetector::new(DetectorConfig::default()).unwrap();
    let router = ResponseRouter::new(RouterConfig::default(), clock.clone());
    let safety = SafetyController::new(
        SafetyConfig::default(),
        clock.clone(),
        Arc::new(LoggingExecutor),
    );
    let control = Arc::new(ControlLoop::new(
        LoopConfig::default(),
        detector,
        router,
        safety,
        Arc::new(NullSource),
        clock,
        vec![EndpointConfig::new("api", "http://localhost/health")],
    ));

    let health_registry = HealthRegistry::new();
    health_registry.register(components::METRICS_SOURCE).await;
    health_registry.register(components::DETECTOR).await;

    let metrics = ControllerMetrics::new();
    let state = Arc::new(AppState {
        control,
        health_registry,
        metrics,
    });
    let router = create_test_router(state.clone());

    (router, state)
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::METRICS_SOURCE, "Endpoint slow")
        .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Degraded still returns 200 (operational)
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::METRICS_SOURCE, "All endpoints unreachable")
        .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;

    state.health_registry.set_ready(true).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_reflects_lifecycle() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["state"], "stopped");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["state"], "running");
    assert_eq!(status["stats"]["ticks"], 0);
}

#[tokio::test]
async fn test_double_start_conflicts() {
    let (app, state) = setup_test_app().await;
    state.control.start().await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_approvals_empty_initially() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/approvals")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let approvals: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(approvals.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.observe_tick_latency(0.002);
    state.metrics.inc_findings();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("ops_controller_tick_latency_seconds"));
    assert!(metrics_text.contains("ops_controller_findings_total"));
}
