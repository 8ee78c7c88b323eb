//! Observability infrastructure for the controller
//!
//! Provides:
//! - Prometheus metrics (tick latency, findings, decisions, guardrail state)
//! - Structured JSON logging helpers for significant control-loop events

use prometheus::{register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for tick latency (in seconds)
const TICK_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    tick_latency_seconds: Histogram,
    ticks_total: IntCounter,
    findings_total: IntCounter,
    actions_executed_total: IntCounter,
    actions_queued_total: IntCounter,
    actions_rejected_total: IntCounter,
    fetch_errors_total: IntCounter,
    kill_switch_engaged: IntGauge,
    approval_queue_depth: IntGauge,
    endpoints_monitored: IntGauge,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "ops_controller_tick_latency_seconds",
                "Time spent running one control-loop tick",
                TICK_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            ticks_total: register_int_counter!(
                "ops_controller_ticks_total",
                "Total control-loop ticks executed"
            )
            .expect("Failed to register ticks_total"),

            findings_total: register_int_counter!(
                "ops_controller_findings_total",
                "Total anomaly findings emitted by the detector"
            )
            .expect("Failed to register findings_total"),

            actions_executed_total: register_int_counter!(
                "ops_controller_actions_executed_total",
                "Total remediation actions executed"
            )
            .expect("Failed to register actions_executed_total"),

            actions_queued_total: register_int_counter!(
                "ops_controller_actions_queued_total",
                "Total candidate actions queued for approval"
            )
            .expect("Failed to register actions_queued_total"),

            actions_rejected_total: register_int_counter!(
                "ops_controller_actions_rejected_total",
                "Total candidate actions rejected by guardrails"
            )
            .expect("Failed to register actions_rejected_total"),

            fetch_errors_total: register_int_counter!(
                "ops_controller_fetch_errors_total",
                "Total metric endpoint fetch failures"
            )
            .expect("Failed to register fetch_errors_total"),

            kill_switch_engaged: register_int_gauge!(
                "ops_controller_kill_switch_engaged",
                "Whether the kill switch is currently engaged (0/1)"
            )
            .expect("Failed to register kill_switch_engaged"),

            approval_queue_depth: register_int_gauge!(
                "ops_controller_approval_queue_depth",
                "Decisions currently waiting for operator approval"
            )
            .expect("Failed to register approval_queue_depth"),

            endpoints_monitored: register_int_gauge!(
                "ops_controller_endpoints_monitored",
                "Number of metrics endpoints currently polled"
            )
            .expect("Failed to register endpoints_monitored"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone, Default)]
pub struct ControllerMetrics {
    _private: (),
}

impl ControllerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
        self.inner().ticks_total.inc();
    }

    pub fn inc_findings(&self) {
        self.inner().findings_total.inc();
    }

    pub fn inc_actions_executed(&self) {
        self.inner().actions_executed_total.inc();
    }

    pub fn inc_actions_queued(&self) {
        self.inner().actions_queued_total.inc();
    }

    pub fn inc_actions_rejected(&self) {
        self.inner().actions_rejected_total.inc();
    }

    pub fn inc_fetch_errors(&self) {
        self.inner().fetch_errors_total.inc();
    }

    pub fn set_kill_switch(&self, engaged: bool) {
        self.inner().kill_switch_engaged.set(engaged as i64);
    }

    pub fn set_approval_queue_depth(&self, depth: i64) {
        self.inner().approval_queue_depth.set(depth);
    }

    pub fn set_endpoints_monitored(&self, count: i64) {
        self.inner().endpoints_monitored.set(count);
    }
}

/// Structured logger for controller events
///
/// Consistent JSON-formatted logging for findings, decisions and lifecycle
/// transitions.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "controller_started",
            instance = %self.instance,
            version = %version,
            "Operations controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Operations controller shutting down"
        );
    }

    pub fn log_finding(&self, metric: &str, severity: &str, confidence: f64, details: &str) {
        match severity {
            "critical" | "emergency" => {
                warn!(
                    event = "anomaly_finding",
                    instance = %self.instance,
                    metric = %metric,
                    severity = %severity,
                    confidence = confidence,
                    details = %details,
                    "Anomaly finding"
                );
            }
            _ => {
                info!(
                    event = "anomaly_finding",
                    instance = %self.instance,
                    metric = %metric,
                    severity = %severity,
                    confidence = confidence,
                    details = %details,
                    "Anomaly finding"
                );
            }
        }
    }

    pub fn log_decision(&self, action: &str, metric: &str, verdict: &str, confidence: f64) {
        info!(
            event = "safety_decision",
            instance = %self.instance,
            action = %action,
            metric = %metric,
            verdict = %verdict,
            confidence = confidence,
            "Safety decision"
        );
    }

    /// The one condition that must be surfaced loudly
    pub fn log_kill_switch_engaged(&self, reason: &str) {
        error!(
            event = "kill_switch_engaged",
            instance = %self.instance,
            reason = %reason,
            "KILL SWITCH ENGAGED - automated remediation halted until cleared"
        );
    }

    pub fn log_kill_switch_cleared(&self) {
        info!(
            event = "kill_switch_cleared",
            instance = %self.instance,
            "Kill switch cleared by operator"
        );
    }

    pub fn log_state_transition(&self, from: &str, to: &str) {
        info!(
            event = "loop_state_transition",
            instance = %self.instance,
            from = %from,
            to = %to,
            "Control loop state transition"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_is_usable() {
        // Metrics register against the global registry once; exercising the
        // handle verifies the registration names are valid.
        let metrics = ControllerMetrics::new();

        metrics.observe_tick_latency(0.005);
        metrics.inc_findings();
        metrics.inc_actions_executed();
        metrics.inc_actions_queued();
        metrics.inc_actions_rejected();
        metrics.inc_fetch_errors();
        metrics.set_kill_switch(true);
        metrics.set_approval_queue_depth(2);
        metrics.set_endpoints_monitored(3);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance, "test-instance");
    }
}
