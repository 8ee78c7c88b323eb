//! Response routing
//!
//! Maps anomaly findings to candidate remediation actions according to the
//! configured response strategy, and enforces the per-metric throttles
//! (cooldown after the last action, hourly cap) regardless of strategy.
//! Throttled findings are dropped with the reason recorded, never silently.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::models::{ActionKind, CandidateAction, Finding, Severity};

/// Bounded retention for the drop log
const MAX_DROP_LOG: usize = 256;

/// Bounded retention for the learning observation log
const MAX_OBSERVATIONS: usize = 1024;

/// How the router reacts to qualifying findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStrategy {
    /// Emit candidates on the first qualifying finding
    Immediate,
    /// Require repeated findings within the confirmation window
    ConfirmPattern,
    /// Never remediate; only escalate
    EscalateOnly,
    /// Record findings for offline analysis; emit nothing
    Learning,
}

/// One routing rule: metric-name pattern to ordered remediation kinds
///
/// A pattern matches when the metric name contains it as a substring; rules
/// are checked in declaration order and the first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub pattern: String,
    pub actions: Vec<ActionKind>,
}

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_strategy")]
    pub strategy: ResponseStrategy,
    /// Findings required within the confirmation window (ConfirmPattern)
    #[serde(default = "default_confirmation_count")]
    pub confirmation_count: usize,
    #[serde(default = "default_confirmation_window_secs")]
    pub confirmation_window_secs: u64,
    /// Quiet period per metric after its last executed action
    #[serde(default = "default_metric_cooldown_secs")]
    pub metric_cooldown_secs: u64,
    /// Maximum executed actions per metric in a trailing hour
    #[serde(default = "default_metric_hourly_cap")]
    pub metric_hourly_cap: u32,
    /// Findings below this severity never produce candidates
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    /// Findings below this confidence never produce candidates
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteRule>,
}

fn default_strategy() -> ResponseStrategy {
    ResponseStrategy::Immediate
}
fn default_confirmation_count() -> usize {
    2
}
fn default_confirmation_window_secs() -> u64 {
    5 * 60
}
fn default_metric_cooldown_secs() -> u64 {
    10 * 60
}
fn default_metric_hourly_cap() -> u32 {
    3
}
fn default_min_severity() -> Severity {
    Severity::Warning
}
fn default_min_confidence() -> f64 {
    0.6
}

fn default_routes() -> Vec<RouteRule> {
    vec![
        RouteRule {
            pattern: "latency".to_string(),
            actions: vec![ActionKind::RestartService, ActionKind::ScaleUp],
        },
        RouteRule {
            pattern: "memory".to_string(),
            actions: vec![ActionKind::CleanupMemory, ActionKind::RestartService],
        },
        RouteRule {
            pattern: "cpu".to_string(),
            actions: vec![ActionKind::ScaleUp],
        },
        RouteRule {
            pattern: "error_rate".to_string(),
            actions: vec![ActionKind::RollbackDeploy],
        },
        RouteRule {
            pattern: "queue".to_string(),
            actions: vec![ActionKind::ScaleUp],
        },
    ]
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            confirmation_count: default_confirmation_count(),
            confirmation_window_secs: default_confirmation_window_secs(),
            metric_cooldown_secs: default_metric_cooldown_secs(),
            metric_hourly_cap: default_metric_hourly_cap(),
            min_severity: default_min_severity(),
            min_confidence: default_min_confidence(),
            routes: default_routes(),
        }
    }
}

impl RouterConfig {
    fn confirmation_window(&self) -> Duration {
        Duration::from_secs(self.confirmation_window_secs)
    }

    fn metric_cooldown(&self) -> Duration {
        Duration::from_secs(self.metric_cooldown_secs)
    }
}

/// A finding that qualified for action but was throttled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedCandidate {
    pub metric: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Maps findings to candidate actions under the configured strategy
pub struct ResponseRouter {
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    /// Finding timestamps per metric for pattern confirmation
    pending_confirmations: HashMap<String, VecDeque<DateTime<Utc>>>,
    /// Last executed action per metric, for the cooldown
    last_action_at: HashMap<String, DateTime<Utc>>,
    /// Executed action timestamps per metric, trailing hour
    action_times: HashMap<String, VecDeque<DateTime<Utc>>>,
    drops: VecDeque<DroppedCandidate>,
    observations: VecDeque<Finding>,
}

impl ResponseRouter {
    pub fn new(config: RouterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            pending_confirmations: HashMap::new(),
            last_action_at: HashMap::new(),
            action_times: HashMap::new(),
            drops: VecDeque::new(),
            observations: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RouterConfig) {
        self.config = config;
    }

    /// Map one finding to zero or more candidate actions
    pub fn route(&mut self, finding: &Finding) -> Vec<CandidateAction> {
        if self.config.strategy == ResponseStrategy::Learning {
            if self.observations.len() == MAX_OBSERVATIONS {
                self.observations.pop_front();
            }
            self.observations.push_back(finding.clone());
            return Vec::new();
        }

        if finding.severity < self.config.min_severity
            || finding.confidence < self.config.min_confidence
        {
            return Vec::new();
        }

        if self.config.strategy == ResponseStrategy::ConfirmPattern
            && !self.confirm_pattern(finding)
        {
            return Vec::new();
        }

        let now = self.clock.now();
        if let Some(reason) = self.throttle_reason(&finding.metric, now) {
            debug!(
                metric = %finding.metric,
                reason = %reason,
                "Dropping qualifying finding"
            );
            if self.drops.len() == MAX_DROP_LOG {
                self.drops.pop_front();
            }
            self.drops.push_back(DroppedCandidate {
                metric: finding.metric.clone(),
                reason,
                at: now,
            });
            return Vec::new();
        }

        let kinds: Vec<ActionKind> = match self.config.strategy {
            ResponseStrategy::EscalateOnly => vec![ActionKind::Escalate],
            _ => self
                .matching_route(&finding.metric)
                .map(|rule| rule.actions.clone())
                .unwrap_or_default(),
        };

        kinds
            .into_iter()
            .map(|kind| CandidateAction {
                kind,
                metric: finding.metric.clone(),
                reason: format!(
                    "{} anomaly on {} (confidence {:.2})",
                    finding.severity, finding.metric, finding.confidence
                ),
                finding: finding.clone(),
            })
            .collect()
    }

    /// Record an executed action so the cooldown and hourly cap apply
    pub fn note_action(&mut self, metric: &str) {
        let now = self.clock.now();
        self.last_action_at.insert(metric.to_string(), now);

        let times = self.action_times.entry(metric.to_string()).or_default();
        let cutoff = now - chrono::Duration::hours(1);
        while times.front().is_some_and(|t| *t < cutoff) {
            times.pop_front();
        }
        times.push_back(now);
    }

    /// Record the finding for confirmation; true once the pattern is confirmed
    fn confirm_pattern(&mut self, finding: &Finding) -> bool {
        let now = finding.timestamp;
        let window = chrono::Duration::from_std(self.config.confirmation_window())
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let cutoff = now - window;

        let entry = self
            .pending_confirmations
            .entry(finding.metric.clone())
            .or_default();
        while entry.front().is_some_and(|t| *t < cutoff) {
            entry.pop_front();
        }
        entry.push_back(now);

        if entry.len() >= self.config.confirmation_count {
            // Confirmed; start a fresh window so each confirmation emits once
            entry.clear();
            true
        } else {
            false
        }
    }

    fn throttle_reason(&mut self, metric: &str, now: DateTime<Utc>) -> Option<String> {
        let cooldown = chrono::Duration::from_std(self.config.metric_cooldown())
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        if let Some(last) = self.last_action_at.get(metric) {
            if now - *last < cooldown {
                return Some(format!(
                    "cooldown active for {} until {}",
                    metric,
                    *last + cooldown
                ));
            }
        }

        if let Some(times) = self.action_times.get_mut(metric) {
            let cutoff = now - chrono::Duration::hours(1);
            while times.front().is_some_and(|t| *t < cutoff) {
                times.pop_front();
            }
            if times.len() >= self.config.metric_hourly_cap as usize {
                return Some(format!(
                    "hourly cap of {} reached for {}",
                    self.config.metric_hourly_cap, metric
                ));
            }
        }

        None
    }

    fn matching_route(&self, metric: &str) -> Option<&RouteRule> {
        self.config
            .routes
            .iter()
            .find(|rule| metric.contains(&rule.pattern))
    }

    /// Throttled findings with reasons, oldest first
    pub fn dropped(&self) -> Vec<DroppedCandidate> {
        self.drops.iter().cloned().collect()
    }

    /// Findings recorded under the Learning strategy, oldest first
    pub fn observations(&self) -> Vec<Finding> {
        self.observations.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    }

    fn finding(metric: &str, confidence: f64, at: DateTime<Utc>) -> Finding {
        Finding {
            metric: metric.to_string(),
            timestamp: at,
            value: 500.0,
            expected: 100.0,
            deviation: 400.0,
            confidence,
            severity: Severity::from_confidence(confidence),
            voting_methods: vec![crate::models::MethodId::ZScore],
            reasons: vec!["test".to_string()],
        }
    }

    fn router_with(strategy: ResponseStrategy, clock: Arc<ManualClock>) -> ResponseRouter {
        let config = RouterConfig {
            strategy,
            routes: vec![RouteRule {
                pattern: "latency".to_string(),
                actions: vec![ActionKind::RestartService],
            }],
            ..RouterConfig::default()
        };
        ResponseRouter::new(config, clock)
    }

    #[test]
    fn test_immediate_emits_on_first_finding() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut router = router_with(ResponseStrategy::Immediate, clock.clone());

        let candidates = router.route(&finding("api_latency_ms", 0.8, clock.now()));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, ActionKind::RestartService);
        assert_eq!(candidates[0].metric, "api_latency_ms");
    }

    #[test]
    fn test_low_confidence_is_ineligible() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut router = router_with(ResponseStrategy::Immediate, clock.clone());

        assert!(router.route(&finding("api_latency_ms", 0.4, clock.now())).is_empty());
        // Ineligibility is not a throttle drop
        assert!(router.dropped().is_empty());
    }

    #[test]
    fn test_unrouted_metric_produces_nothing() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut router = router_with(ResponseStrategy::Immediate, clock.clone());

        assert!(router.route(&finding("disk_io", 0.9, clock.now())).is_empty());
    }

    #[test]
    fn test_confirm_pattern_requires_second_finding() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut router = router_with(ResponseStrategy::ConfirmPattern, clock.clone());

        // One finding alone: no candidate
        assert!(router.route(&finding("api_latency_ms", 0.8, clock.now())).is_empty());

        // Second finding within the window: exactly one emission
        clock.advance(chrono::Duration::minutes(2));
        let candidates = router.route(&finding("api_latency_ms", 0.8, clock.now()));
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_confirm_pattern_window_expires() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut router = router_with(ResponseStrategy::ConfirmPattern, clock.clone());

        assert!(router.route(&finding("api_latency_ms", 0.8, clock.now())).is_empty());

        // 10 minutes later the first finding has aged out of the 5-minute window
        clock.advance(chrono::Duration::minutes(10));
        assert!(router.route(&finding("api_latency_ms", 0.8, clock.now())).is_empty());
    }

    #[test]
    fn test_cooldown_drops_with_reason() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut router = router_with(ResponseStrategy::Immediate, clock.clone());

        router.note_action("api_latency_ms");
        clock.advance(chrono::Duration::minutes(5));

        assert!(router.route(&finding("api_latency_ms", 0.9, clock.now())).is_empty());
        let drops = router.dropped();
        assert_eq!(drops.len(), 1);
        assert!(drops[0].reason.contains("cooldown"));

        // After the cooldown expires the metric is routable again
        clock.advance(chrono::Duration::minutes(6));
        assert_eq!(router.route(&finding("api_latency_ms", 0.9, clock.now())).len(), 1);
    }

    #[test]
    fn test_hourly_cap_drops_with_reason() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut router = router_with(ResponseStrategy::Immediate, clock.clone());

        for _ in 0..3 {
            router.note_action("api_latency_ms");
            clock.advance(chrono::Duration::minutes(11));
        }

        assert!(router.route(&finding("api_latency_ms", 0.9, clock.now())).is_empty());
        assert!(router
            .dropped()
            .last()
            .unwrap()
            .reason
            .contains("hourly cap"));
    }

    #[test]
    fn test_escalate_only_never_remediates() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut router = router_with(ResponseStrategy::EscalateOnly, clock.clone());

        let candidates = router.route(&finding("api_latency_ms", 0.9, clock.now()));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, ActionKind::Escalate);
    }

    #[test]
    fn test_learning_records_and_emits_nothing() {
        let clock = Arc::new(ManualClock::new(start()));
        let mut router = router_with(ResponseStrategy::Learning, clock.clone());

        assert!(router.route(&finding("api_latency_ms", 0.9, clock.now())).is_empty());
        assert_eq!(router.observations().len(), 1);
    }

    #[test]
    fn test_first_matching_route_wins() {
        let clock = Arc::new(ManualClock::new(start()));
        let config = RouterConfig {
            strategy: ResponseStrategy::Immediate,
            routes: vec![
                RouteRule {
                    pattern: "latency".to_string(),
                    actions: vec![ActionKind::RestartService],
                },
                RouteRule {
                    pattern: "api".to_string(),
                    actions: vec![ActionKind::ScaleUp],
                },
            ],
            ..RouterConfig::default()
        };
        let mut router = ResponseRouter::new(config, clock.clone());

        let candidates = router.route(&finding("api_latency_ms", 0.9, clock.now()));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, ActionKind::RestartService);
    }

    #[test]
    fn test_ordered_actions_emit_in_order() {
        let clock = Arc::new(ManualClock::new(start()));
        let config = RouterConfig {
            strategy: ResponseStrategy::Immediate,
            routes: vec![RouteRule {
                pattern: "memory".to_string(),
                actions: vec![ActionKind::CleanupMemory, ActionKind::RestartService],
            }],
            ..RouterConfig::default()
        };
        let mut router = ResponseRouter::new(config, clock.clone());

        let candidates = router.route(&finding("memory_usage", 0.9, clock.now()));
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].kind, ActionKind::CleanupMemory);
        assert_eq!(candidates[1].kind, ActionKind::RestartService);
    }
}
