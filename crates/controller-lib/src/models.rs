//! Core data models for the operations controller

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single named health-signal observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub metric: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Sample {
    pub fn new(metric: impl Into<String>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            timestamp,
            value,
            tags: BTreeMap::new(),
        }
    }
}

/// Severity of an anomaly finding, derived from ensemble confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl Severity {
    /// Map ensemble confidence onto severity using the fixed thresholds
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.7 {
            Severity::Emergency
        } else if confidence > 0.5 {
            Severity::Critical
        } else if confidence > 0.3 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
            Severity::Emergency => write!(f, "emergency"),
        }
    }
}

/// Identifier of a detection method participating in the ensemble vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodId {
    ZScore,
    EmaDeviation,
    IqrOutlier,
    Seasonal,
    RollingShift,
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodId::ZScore => write!(f, "z_score"),
            MethodId::EmaDeviation => write!(f, "ema_deviation"),
            MethodId::IqrOutlier => write!(f, "iqr_outlier"),
            MethodId::Seasonal => write!(f, "seasonal"),
            MethodId::RollingShift => write!(f, "rolling_shift"),
        }
    }
}

/// One anomaly verdict for a metric at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub metric: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Expected value from the rolling baseline
    pub expected: f64,
    pub deviation: f64,
    /// Weighted ensemble confidence in [0, 1]
    pub confidence: f64,
    pub severity: Severity,
    /// Methods that fired for this sample
    pub voting_methods: Vec<MethodId>,
    pub reasons: Vec<String>,
}

/// Remediation action kinds understood by the executor
///
/// Closed set so an unknown action is a compile-time error, not a runtime
/// surprise. Risk and blast-radius figures are static per-kind tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RestartService,
    ScaleUp,
    ScaleDown,
    CleanupMemory,
    FlushCache,
    RollbackDeploy,
    TriggerDeploy,
    Escalate,
}

impl ActionKind {
    /// All kinds in a fixed order, used for learning-stat exposition
    pub const ALL: [ActionKind; 8] = [
        ActionKind::RestartService,
        ActionKind::ScaleUp,
        ActionKind::ScaleDown,
        ActionKind::CleanupMemory,
        ActionKind::FlushCache,
        ActionKind::RollbackDeploy,
        ActionKind::TriggerDeploy,
        ActionKind::Escalate,
    ];

    /// Static risk score in [0, 1]; higher means safer to run unattended
    pub fn risk_score(&self) -> f64 {
        match self {
            ActionKind::Escalate => 0.95,
            ActionKind::CleanupMemory => 0.80,
            ActionKind::FlushCache => 0.75,
            ActionKind::ScaleUp => 0.65,
            ActionKind::RestartService => 0.60,
            ActionKind::ScaleDown => 0.50,
            ActionKind::RollbackDeploy => 0.35,
            ActionKind::TriggerDeploy => 0.25,
        }
    }

    /// Projected number of independent services the action can touch
    pub fn blast_radius(&self) -> u32 {
        match self {
            ActionKind::Escalate => 0,
            ActionKind::RestartService | ActionKind::CleanupMemory | ActionKind::FlushCache => 1,
            ActionKind::ScaleUp | ActionKind::ScaleDown => 2,
            ActionKind::RollbackDeploy => 4,
            ActionKind::TriggerDeploy => 5,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::RestartService => write!(f, "restart_service"),
            ActionKind::ScaleUp => write!(f, "scale_up"),
            ActionKind::ScaleDown => write!(f, "scale_down"),
            ActionKind::CleanupMemory => write!(f, "cleanup_memory"),
            ActionKind::FlushCache => write!(f, "flush_cache"),
            ActionKind::RollbackDeploy => write!(f, "rollback_deploy"),
            ActionKind::TriggerDeploy => write!(f, "trigger_deploy"),
            ActionKind::Escalate => write!(f, "escalate"),
        }
    }
}

/// A proposed remediation, not yet safety-checked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAction {
    pub kind: ActionKind,
    pub metric: String,
    pub reason: String,
    pub finding: Finding,
}

/// Verdict of the safety gate for a candidate action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "reason")]
pub enum Verdict {
    AutoExecute,
    QueueForApproval(String),
    Rejected(String),
}

/// A gated candidate with its action-confidence score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub candidate: CandidateAction,
    /// Action confidence in [0, 1], independent of detector confidence
    pub confidence: f64,
    pub verdict: Verdict,
    pub decided_at: DateTime<Utc>,
}

/// Final disposition of a gated candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOutcome {
    Success,
    Failure,
    Skipped,
}

/// Append-only audit entry for a gated candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub kind: ActionKind,
    pub metric: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub executed: bool,
    pub outcome: ActionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

/// How much confidence is required before the controller acts on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    Manual,
    Supervised,
    Autonomous,
    FullAutonomous,
}

impl std::fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutonomyLevel::Manual => write!(f, "manual"),
            AutonomyLevel::Supervised => write!(f, "supervised"),
            AutonomyLevel::Autonomous => write!(f, "autonomous"),
            AutonomyLevel::FullAutonomous => write!(f, "full_autonomous"),
        }
    }
}
