//! Component health for the operator API probes
//!
//! The controller reports liveness per component (source, detector, safety
//! gate, executor) and an explicit readiness flag set once wiring completes.
//! Degraded components keep the controller live; an unhealthy one fails
//! readiness.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Health status of a component
///
/// Ordered from best to worst so the overall status is simply the worst
/// component status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Impaired but still doing useful work
    Degraded,
    Unhealthy,
}

/// Health of one component at its last check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    fn now(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::now(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::now(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::now(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Liveness payload: overall status plus the per-component detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

/// Readiness payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names tracked by the registry
pub mod components {
    pub const METRICS_SOURCE: &str = "metrics_source";
    pub const DETECTOR: &str = "detector";
    pub const SAFETY: &str = "safety";
    pub const EXECUTOR: &str = "executor";
}

#[derive(Debug, Default)]
struct RegistryInner {
    components: HashMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared registry of component health, cloned into the API handlers
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component, initially healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut inner = self.inner.write().await;
        inner.components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Flip the readiness flag, set once wiring completes
    pub async fn set_ready(&self, ready: bool) {
        self.inner.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let inner = self.inner.read().await;
        let status = inner
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: inner.components.clone(),
        }
    }

    /// Ready only when the ready flag is set and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let health = self.health().await;
        let ready = self.inner.read().await.ready;

        let reason = if !ready {
            Some("controller still initializing".to_string())
        } else if health.status == ComponentStatus::Unhealthy {
            Some("a component is unhealthy".to_string())
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy_but_not_ready() {
        let registry = HealthRegistry::new();

        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_worst_component_status_wins() {
        let registry = HealthRegistry::new();
        registry.register(components::METRICS_SOURCE).await;
        registry.register(components::DETECTOR).await;
        registry.register(components::SAFETY).await;

        registry
            .set_degraded(components::METRICS_SOURCE, "slow endpoint")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::SAFETY, "executor unreachable")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        registry.set_healthy(components::SAFETY).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_readiness_requires_flag_and_no_unhealthy_component() {
        let registry = HealthRegistry::new();
        registry.register(components::EXECUTOR).await;

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::EXECUTOR, "executor unavailable")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_degraded_does_not_fail_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::DETECTOR).await;
        registry.set_ready(true).await;
        registry
            .set_degraded(components::DETECTOR, "one window empty")
            .await;

        assert!(registry.readiness().await.ready);
    }
}
