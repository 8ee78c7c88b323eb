//! Operations Controller - autonomous operations control loop
//!
//! Polls health-signal endpoints, detects anomalies, and gates remediation
//! actions behind confidence scoring and safety guardrails.

use anyhow::Result;
use controller_lib::{
    clock::SystemClock,
    control::ControlLoop,
    detector::AnomalyDetector,
    executor::LoggingExecutor,
    health::{components, HealthRegistry},
    observability::{ControllerMetrics, StructuredLogger},
    router::ResponseRouter,
    safety::SafetyController,
    source::HttpMetricsSource,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting ops-controller");

    // Load configuration
    let config = config::ControllerConfig::load()?;
    info!(
        instance = %config.instance_name,
        autonomy = %config.autonomy,
        "Controller configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::METRICS_SOURCE).await;
    health_registry.register(components::DETECTOR).await;
    health_registry.register(components::SAFETY).await;
    health_registry.register(components::EXECUTOR).await;

    // Initialize metrics and structured logger
    let metrics = ControllerMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(CONTROLLER_VERSION);

    // Wire the control loop
    let clock = Arc::new(SystemClock);
    let detector = AnomalyDetector::new(config.detector_config())?;
    let router = ResponseRouter::new(config.router_config(), clock.clone());
    let safety = SafetyController::new(
        config.safety_config(),
        clock.clone(),
        Arc::new(LoggingExecutor),
    );
    let source = Arc::new(HttpMetricsSource::new()?);

    let endpoints = config.endpoint_configs();
    metrics.set_endpoints_monitored(endpoints.len() as i64);

    let control = Arc::new(ControlLoop::new(
        config.loop_config(),
        detector,
        router,
        safety,
        source,
        clock,
        endpoints,
    ));

    if config.autostart {
        control.start().await?;
    }

    // Shutdown channel for the loop task
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let loop_handle = tokio::spawn(control.clone().run(shutdown_rx));

    // Create shared application state and serve the control surface
    let app_state = Arc::new(api::AppState::new(
        control.clone(),
        health_registry.clone(),
        metrics.clone(),
    ));

    // Mark controller as ready after initialization
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    control.stop().await;
    loop_handle.abort();
    api_handle.abort();

    Ok(())
}
