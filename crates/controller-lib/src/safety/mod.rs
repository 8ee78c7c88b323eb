//! Safety gating for candidate actions
//!
//! The safety controller is the last gate before anything touches
//! infrastructure. It scores each candidate independently of the detector,
//! applies the autonomy-level threshold, and enforces the guardrails in
//! order: kill switch, global rate limit, blast radius, cascading-failure
//! detection. Executor outcomes fold back into per-kind success counters.

mod approval;

pub use approval::{ApprovalError, ApprovalQueue};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::executor::Executor;
use crate::models::{
    ActionKind, ActionOutcome, ActionRecord, AutonomyLevel, CandidateAction, Decision, Finding,
    Severity, Verdict,
};

/// Confidence factor weights: history, static risk, priority, system health
const WEIGHT_SUCCESS_HISTORY: f64 = 0.40;
const WEIGHT_ACTION_RISK: f64 = 0.20;
const WEIGHT_PRIORITY: f64 = 0.20;
const WEIGHT_SYSTEM_HEALTH: f64 = 0.20;

/// Success-rate prior before a kind has any history
const NEUTRAL_SUCCESS_PRIOR: f64 = 0.5;

/// Safety configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_autonomy")]
    pub autonomy: AutonomyLevel,
    /// Total executed actions allowed across all metrics per trailing hour
    #[serde(default = "default_global_hourly_cap")]
    pub global_hourly_cap: u32,
    /// Maximum projected services a single action may affect
    #[serde(default = "default_blast_radius_limit")]
    pub blast_radius_limit: u32,
    /// Unresolved actions in the trailing hour that engage the kill switch
    #[serde(default = "default_cascade_threshold")]
    pub cascade_threshold: u32,
    /// Window in which a recurring anomaly marks its action unresolved
    #[serde(default = "default_recurrence_window_secs")]
    pub recurrence_window_secs: u64,
    /// Bounded size of the action audit history
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Auto-execute threshold under supervised autonomy
    #[serde(default = "default_supervised_threshold")]
    pub supervised_threshold: f64,
    /// Auto-execute threshold under autonomous autonomy
    #[serde(default = "default_autonomous_threshold")]
    pub autonomous_threshold: f64,
    /// Window for the correlated-failure health context factor
    #[serde(default = "default_health_window_secs")]
    pub health_window_secs: u64,
}

fn default_autonomy() -> AutonomyLevel {
    AutonomyLevel::Supervised
}
fn default_global_hourly_cap() -> u32 {
    20
}
fn default_blast_radius_limit() -> u32 {
    3
}
fn default_cascade_threshold() -> u32 {
    3
}
fn default_recurrence_window_secs() -> u64 {
    5 * 60
}
fn default_history_size() -> usize {
    500
}
fn default_supervised_threshold() -> f64 {
    0.8
}
fn default_autonomous_threshold() -> f64 {
    0.5
}
fn default_health_window_secs() -> u64 {
    5 * 60
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            autonomy: default_autonomy(),
            global_hourly_cap: default_global_hourly_cap(),
            blast_radius_limit: default_blast_radius_limit(),
            cascade_threshold: default_cascade_threshold(),
            recurrence_window_secs: default_recurrence_window_secs(),
            history_size: default_history_size(),
            supervised_threshold: default_supervised_threshold(),
            autonomous_threshold: default_autonomous_threshold(),
            health_window_secs: default_health_window_secs(),
        }
    }
}

/// Per-kind learning counters, exposed for observability and tests
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ActionStats {
    pub attempts: u64,
    pub successes: u64,
}

impl ActionStats {
    /// Historical success rate with a neutral prior at zero history
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            NEUTRAL_SUCCESS_PRIOR
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Learning counters for one kind, as served over the operator API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindLearning {
    pub kind: ActionKind,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
}

/// Snapshot of the guardrail state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub kill_switch_engaged: bool,
    pub kill_switch_reason: Option<String>,
    pub actions_last_hour: usize,
    pub pending_approvals: usize,
    pub autonomy: AutonomyLevel,
}

/// An executed remediation watched for recurrence of its trigger
#[derive(Debug, Clone)]
struct WatchedAction {
    metric: String,
    kind: ActionKind,
    executed_at: DateTime<Utc>,
    recurred: bool,
}

/// Mutable guardrail state, owned by one controller instance
#[derive(Debug, Default)]
struct SafetyState {
    kill_switch_engaged: bool,
    kill_switch_reason: Option<String>,
    /// Executed-action timestamps across all metrics, trailing hour
    action_timestamps: VecDeque<DateTime<Utc>>,
}

/// The decision gate in front of the executor
pub struct SafetyController {
    config: SafetyConfig,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn Executor>,
    state: SafetyState,
    history: VecDeque<ActionRecord>,
    stats: HashMap<ActionKind, ActionStats>,
    /// Last finding time per metric, for the health context factor
    recent_findings: HashMap<String, DateTime<Utc>>,
    /// Executed actions watched for trigger recurrence
    watched: VecDeque<WatchedAction>,
    queue: ApprovalQueue,
}

impl SafetyController {
    pub fn new(config: SafetyConfig, clock: Arc<dyn Clock>, executor: Arc<dyn Executor>) -> Self {
        Self {
            config,
            clock,
            executor,
            state: SafetyState::default(),
            history: VecDeque::new(),
            stats: HashMap::new(),
            recent_findings: HashMap::new(),
            watched: VecDeque::new(),
            queue: ApprovalQueue::new(),
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SafetyConfig) {
        self.config = config;
    }

    /// Record a finding for the health context factor and check whether it
    /// marks a recently executed action as unresolved
    pub fn note_finding(&mut self, finding: &Finding) {
        let now = finding.timestamp;
        self.recent_findings.insert(finding.metric.clone(), now);

        let recurrence = Duration::seconds(self.config.recurrence_window_secs as i64);
        for watched in self.watched.iter_mut() {
            if !watched.recurred
                && watched.metric == finding.metric
                && now - watched.executed_at <= recurrence
                && now >= watched.executed_at
            {
                watched.recurred = true;
                warn!(
                    metric = %finding.metric,
                    action = %watched.kind,
                    "Anomaly recurred after remediation"
                );
            }
        }

        self.check_cascading_failure(now);
    }

    fn check_cascading_failure(&mut self, now: DateTime<Utc>) {
        let hour_ago = now - Duration::hours(1);
        while self
            .watched
            .front()
            .is_some_and(|w| w.executed_at < hour_ago)
        {
            self.watched.pop_front();
        }

        let unresolved = self.watched.iter().filter(|w| w.recurred).count();
        if unresolved >= self.config.cascade_threshold as usize && !self.state.kill_switch_engaged {
            let reason = format!(
                "cascading failure detected: {unresolved} remediation actions failed to resolve their trigger in the last hour"
            );
            error!(
                event = "kill_switch_engaged",
                unresolved = unresolved,
                "Cascading failure detected, engaging kill switch"
            );
            self.state.kill_switch_engaged = true;
            self.state.kill_switch_reason = Some(reason);
        }
    }

    /// Gate one candidate; does not execute
    pub fn evaluate(&mut self, candidate: &CandidateAction) -> Decision {
        let now = self.clock.now();
        let confidence = self.action_confidence(candidate, now);

        let verdict = self.verdict_for(candidate, confidence, now);
        Decision {
            candidate: candidate.clone(),
            confidence,
            verdict,
            decided_at: now,
        }
    }

    fn verdict_for(
        &mut self,
        candidate: &CandidateAction,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Verdict {
        // Guardrails first, in fixed order; autonomy thresholds last
        if self.state.kill_switch_engaged {
            let reason = self
                .state
                .kill_switch_reason
                .clone()
                .unwrap_or_else(|| "operator engaged".to_string());
            return Verdict::Rejected(format!("kill switch engaged: {reason}"));
        }

        self.prune_action_timestamps(now);
        if self.state.action_timestamps.len() >= self.config.global_hourly_cap as usize {
            return Verdict::QueueForApproval(format!(
                "global hourly action cap of {} reached",
                self.config.global_hourly_cap
            ));
        }

        if candidate.kind.blast_radius() > self.config.blast_radius_limit {
            return Verdict::QueueForApproval(format!(
                "blast radius {} exceeds limit {}",
                candidate.kind.blast_radius(),
                self.config.blast_radius_limit
            ));
        }

        match self.config.autonomy {
            AutonomyLevel::Manual => {
                Verdict::QueueForApproval("manual autonomy: all actions require approval".into())
            }
            AutonomyLevel::Supervised if confidence >= self.config.supervised_threshold => {
                Verdict::AutoExecute
            }
            AutonomyLevel::Supervised => Verdict::QueueForApproval(format!(
                "confidence {:.2} below supervised threshold {:.2}",
                confidence, self.config.supervised_threshold
            )),
            AutonomyLevel::Autonomous if confidence >= self.config.autonomous_threshold => {
                Verdict::AutoExecute
            }
            AutonomyLevel::Autonomous => Verdict::QueueForApproval(format!(
                "confidence {:.2} below autonomous threshold {:.2}",
                confidence, self.config.autonomous_threshold
            )),
            AutonomyLevel::FullAutonomous => Verdict::AutoExecute,
        }
    }

    /// Carry out a gated decision: execute, enqueue, or record the rejection
    pub async fn dispatch(&mut self, decision: Decision) -> ActionRecord {
        match decision.verdict.clone() {
            Verdict::AutoExecute => self.execute_candidate(decision).await,
            Verdict::QueueForApproval(reason) => {
                info!(
                    action = %decision.candidate.kind,
                    metric = %decision.candidate.metric,
                    reason = %reason,
                    "Queueing action for approval"
                );
                let record = self.record(
                    &decision,
                    false,
                    ActionOutcome::Skipped,
                    None,
                    Some(format!("queued for approval: {reason}")),
                );
                self.queue.push(decision);
                record
            }
            Verdict::Rejected(reason) => {
                info!(
                    action = %decision.candidate.kind,
                    metric = %decision.candidate.metric,
                    reason = %reason,
                    "Rejecting action"
                );
                self.record(&decision, false, ActionOutcome::Skipped, None, Some(reason))
            }
        }
    }

    async fn execute_candidate(&mut self, decision: Decision) -> ActionRecord {
        let kind = decision.candidate.kind;
        let now = self.clock.now();

        let (outcome, detail) = match self
            .executor
            .execute(kind, &decision.candidate.reason)
            .await
        {
            Ok(result) if result.success => (ActionOutcome::Success, result.detail),
            Ok(result) => (ActionOutcome::Failure, result.detail),
            Err(e) => (ActionOutcome::Failure, e.to_string()),
        };

        // Learning loop: fold the outcome into the per-kind counters
        let stats = self.stats.entry(kind).or_default();
        stats.attempts += 1;
        if outcome == ActionOutcome::Success {
            stats.successes += 1;
        }

        self.state.action_timestamps.push_back(now);
        self.watched.push_back(WatchedAction {
            metric: decision.candidate.metric.clone(),
            kind,
            executed_at: now,
            recurred: false,
        });

        info!(
            event = "action_executed",
            action = %kind,
            metric = %decision.candidate.metric,
            success = outcome == ActionOutcome::Success,
            confidence = decision.confidence,
            "Executed remediation action"
        );

        self.record(&decision, true, outcome, Some(detail), None)
    }

    fn record(
        &mut self,
        decision: &Decision,
        executed: bool,
        outcome: ActionOutcome,
        detail: Option<String>,
        skip_reason: Option<String>,
    ) -> ActionRecord {
        let record = ActionRecord {
            kind: decision.candidate.kind,
            metric: decision.candidate.metric.clone(),
            timestamp: self.clock.now(),
            confidence: decision.confidence,
            executed,
            outcome,
            detail,
            skip_reason,
        };
        if self.history.len() == self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(record.clone());
        record
    }

    fn action_confidence(&mut self, candidate: &CandidateAction, now: DateTime<Utc>) -> f64 {
        let success = self
            .stats
            .get(&candidate.kind)
            .copied()
            .unwrap_or_default()
            .success_rate();
        let risk = candidate.kind.risk_score();
        let priority = priority_alignment(candidate.finding.severity);
        let health = self.health_context(&candidate.metric, now);

        (WEIGHT_SUCCESS_HISTORY * success
            + WEIGHT_ACTION_RISK * risk
            + WEIGHT_PRIORITY * priority
            + WEIGHT_SYSTEM_HEALTH * health)
            .clamp(0.0, 1.0)
    }

    /// Degrades as other metrics report findings in the recent window
    fn health_context(&mut self, metric: &str, now: DateTime<Utc>) -> f64 {
        let window = Duration::seconds(self.config.health_window_secs as i64);
        self.recent_findings
            .retain(|_, at| now.signed_duration_since(*at) <= window);

        let other_anomalous = self
            .recent_findings
            .keys()
            .filter(|m| m.as_str() != metric)
            .count();
        (1.0 - 0.2 * other_anomalous as f64).max(0.2)
    }

    fn prune_action_timestamps(&mut self, now: DateTime<Utc>) {
        let hour_ago = now - Duration::hours(1);
        while self
            .state
            .action_timestamps
            .front()
            .is_some_and(|t| *t < hour_ago)
        {
            self.state.action_timestamps.pop_front();
        }
    }

    pub fn engage_kill_switch(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(event = "kill_switch_engaged", reason = %reason, "Kill switch engaged");
        self.state.kill_switch_engaged = true;
        self.state.kill_switch_reason = Some(reason);
    }

    /// Administrative clear; also resets the cascade bookkeeping that may
    /// have engaged the switch
    pub fn clear_kill_switch(&mut self) {
        info!(event = "kill_switch_cleared", "Kill switch cleared");
        self.state.kill_switch_engaged = false;
        self.state.kill_switch_reason = None;
        self.watched.clear();
    }

    pub fn kill_switch_engaged(&self) -> bool {
        self.state.kill_switch_engaged
    }

    pub fn pending_approvals(&self) -> Vec<Decision> {
        self.queue.list()
    }

    /// Approve the pending decision at `index` and execute it immediately
    ///
    /// The kill switch is re-checked: an approval cannot bypass a switch
    /// engaged after the decision was queued.
    pub async fn approve(&mut self, index: usize) -> Result<ActionRecord, ApprovalError> {
        if self.state.kill_switch_engaged {
            let reason = self
                .state
                .kill_switch_reason
                .clone()
                .unwrap_or_else(|| "operator engaged".to_string());
            return Err(ApprovalError::KillSwitchEngaged(reason));
        }
        let decision = self.queue.take(index)?;
        Ok(self.execute_candidate(decision).await)
    }

    /// Reject the pending decision at `index`, recording the reason
    pub fn reject(&mut self, index: usize, reason: &str) -> Result<ActionRecord, ApprovalError> {
        let decision = self.queue.take(index)?;
        Ok(self.record(
            &decision,
            false,
            ActionOutcome::Skipped,
            None,
            Some(format!("rejected by operator: {reason}")),
        ))
    }

    /// Most recent action records, oldest first, at most `limit`
    pub fn recent_actions(&self, limit: usize) -> Vec<ActionRecord> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Per-kind learning counters
    pub fn learning_stats(&self) -> Vec<KindLearning> {
        ActionKind::ALL
            .iter()
            .map(|kind| {
                let stats = self.stats.get(kind).copied().unwrap_or_default();
                KindLearning {
                    kind: *kind,
                    attempts: stats.attempts,
                    successes: stats.successes,
                    success_rate: stats.success_rate(),
                }
            })
            .collect()
    }

    pub fn status(&mut self) -> SafetyStatus {
        let now = self.clock.now();
        self.prune_action_timestamps(now);
        SafetyStatus {
            kill_switch_engaged: self.state.kill_switch_engaged,
            kill_switch_reason: self.state.kill_switch_reason.clone(),
            actions_last_hour: self.state.action_timestamps.len(),
            pending_approvals: self.queue.len(),
            autonomy: self.config.autonomy,
        }
    }
}

/// Static mapping from finding severity to the priority alignment factor
fn priority_alignment(severity: Severity) -> f64 {
    match severity {
        Severity::Emergency => 1.0,
        Severity::Critical => 0.8,
        Severity::Warning => 0.55,
        Severity::Info => 0.3,
    }
}
