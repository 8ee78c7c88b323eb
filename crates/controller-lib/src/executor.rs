//! Remediation executor boundary
//!
//! The safety controller decides whether and when an action runs; carrying it
//! out is the executor's job. Implementations must be idempotent-safe: the
//! controller guarantees at-most-N-per-hour, not exactly-once.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::ActionKind;

pub use async_trait::async_trait;

/// Result of carrying out one remediation action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub detail: String,
}

/// Trait for remediation executor implementations
#[async_trait]
pub trait Executor: Send + Sync {
    /// Carry out the remediation and report whether it succeeded
    async fn execute(&self, kind: ActionKind, reason: &str) -> Result<ExecutionOutcome>;
}

/// Executor that records the action without touching any infrastructure
///
/// Default wiring until a real self-healing executor is injected; also the
/// safe choice for dry-run deployments.
#[derive(Debug, Clone, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl Executor for LoggingExecutor {
    async fn execute(&self, kind: ActionKind, reason: &str) -> Result<ExecutionOutcome> {
        info!(
            event = "action_executed",
            action = %kind,
            reason = %reason,
            "Dry-run execution"
        );
        Ok(ExecutionOutcome {
            success: true,
            detail: format!("logged {kind} (dry-run)"),
        })
    }
}
