//! Autonomous operations control loop
//!
//! This crate provides the core functionality for:
//! - Polling health-signal endpoints
//! - Statistical anomaly detection (five-method ensemble)
//! - Routing findings to candidate remediation actions
//! - Safety gating with guardrails and an approval queue
//! - The control-loop lifecycle and operator control surface

pub mod clock;
pub mod control;
pub mod detector;
pub mod executor;
pub mod health;
pub mod models;
pub mod observability;
pub mod router;
pub mod safety;
pub mod source;

pub use clock::{Clock, ManualClock, SystemClock};
pub use control::{ConfigUpdate, ControlLoop, LoopConfig, LoopError, LoopState, LoopStatus};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
