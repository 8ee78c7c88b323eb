//! Control loop
//!
//! Drives one tick (collect, detect, route, decide, dispatch) on an
//! interval, owns the running/paused/error lifecycle and the loop
//! statistics, and exposes the operator control surface.
//!
//! Ticks are strictly serialized behind a mutex: if the interval timer
//! fires while the previous tick is still executing, the late tick is
//! skipped, never queued. Operator mutations (approvals, configuration)
//! take the same mutex so they cannot race an in-flight tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::detector::{AnomalyDetector, DetectorError, MethodWeights, WindowStats};
use crate::models::{
    ActionRecord, AutonomyLevel, Decision, Sample, Severity, Verdict,
};
use crate::observability::ControllerMetrics;
use crate::router::{DroppedCandidate, ResponseRouter, ResponseStrategy};
use crate::safety::{ApprovalError, KindLearning, SafetyController, SafetyStatus};
use crate::source::{EndpointConfig, MetricsSource};

/// Default collection interval
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

/// Anti-thrash floor for the collection interval
pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        action: &'static str,
        from: LoopState,
    },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

/// Lifecycle state of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Stopped,
    Starting,
    Running,
    Paused,
    Error,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Stopped => write!(f, "stopped"),
            LoopState::Starting => write!(f, "starting"),
            LoopState::Running => write!(f, "running"),
            LoopState::Paused => write!(f, "paused"),
            LoopState::Error => write!(f, "error"),
        }
    }
}

/// Loop scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Floor below which the interval cannot be configured
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    /// Consecutive failed ticks before entering the error state
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// How long ticking stays suspended in the error state
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}
fn default_min_interval_secs() -> u64 {
    DEFAULT_MIN_INTERVAL_SECS
}
fn default_max_consecutive_errors() -> u32 {
    5
}
fn default_error_cooldown_secs() -> u64 {
    60
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            min_interval_secs: default_min_interval_secs(),
            max_consecutive_errors: default_max_consecutive_errors(),
            error_cooldown_secs: default_error_cooldown_secs(),
        }
    }
}

/// Partial runtime configuration update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub interval_secs: Option<u64>,
    pub max_consecutive_errors: Option<u32>,
    pub error_cooldown_secs: Option<u64>,
    pub sensitivity: Option<f64>,
    pub weights: Option<MethodWeights>,
    pub emission_floor: Option<f64>,
    pub strategy: Option<ResponseStrategy>,
    pub min_confidence: Option<f64>,
    pub min_severity: Option<Severity>,
    pub confirmation_count: Option<usize>,
    pub confirmation_window_secs: Option<u64>,
    pub metric_cooldown_secs: Option<u64>,
    pub metric_hourly_cap: Option<u32>,
    pub autonomy: Option<AutonomyLevel>,
    pub global_hourly_cap: Option<u32>,
    pub blast_radius_limit: Option<u32>,
    pub supervised_threshold: Option<f64>,
    pub autonomous_threshold: Option<f64>,
}

/// Counters maintained across ticks
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub findings: u64,
    pub actions_executed: u64,
    pub actions_queued: u64,
    pub actions_rejected: u64,
    pub fetch_errors: u64,
    pub consecutive_errors: u32,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Status payload for the operator API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStatus {
    pub state: LoopState,
    pub stats: LoopStats,
    pub safety: SafetyStatus,
    pub endpoints: usize,
    pub interval_secs: u64,
}

/// State mutated only under the tick mutex
struct LoopCore {
    detector: AnomalyDetector,
    router: ResponseRouter,
    safety: SafetyController,
    endpoints: Vec<EndpointConfig>,
    stats: LoopStats,
    /// When the loop entered the error state
    error_since: Option<DateTime<Utc>>,
}

/// Outcome of one tick attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    /// Previous tick still in flight; this one was skipped
    Skipped,
    /// Loop not in a ticking state
    NotRunning,
}

/// The scheduler driving the collect, detect, route, decide and dispatch
/// pipeline
pub struct ControlLoop {
    config: RwLock<LoopConfig>,
    state: RwLock<LoopState>,
    core: Mutex<LoopCore>,
    source: Arc<dyn MetricsSource>,
    clock: Arc<dyn Clock>,
    metrics: ControllerMetrics,
    /// Ticks skipped because the previous tick was still in flight
    skipped_ticks: std::sync::atomic::AtomicU64,
}

impl ControlLoop {
    pub fn new(
        config: LoopConfig,
        detector: AnomalyDetector,
        router: ResponseRouter,
        safety: SafetyController,
        source: Arc<dyn MetricsSource>,
        clock: Arc<dyn Clock>,
        endpoints: Vec<EndpointConfig>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            state: RwLock::new(LoopState::Stopped),
            core: Mutex::new(LoopCore {
                detector,
                router,
                safety,
                endpoints,
                stats: LoopStats::default(),
                error_since: None,
            }),
            source,
            clock,
            metrics: ControllerMetrics::new(),
            skipped_ticks: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> LoopState {
        *self.state.read().await
    }

    /// Begin ticking from the stopped or error state
    pub async fn start(&self) -> Result<(), LoopError> {
        let mut state = self.state.write().await;
        match *state {
            LoopState::Stopped | LoopState::Error => {
                *state = LoopState::Starting;
                info!(event = "loop_starting", "Control loop starting");
                *state = LoopState::Running;
                info!(event = "loop_running", "Control loop running");
                Ok(())
            }
            from => Err(LoopError::InvalidTransition {
                action: "start",
                from,
            }),
        }
    }

    /// Suspend ticking, retaining all windows and history
    pub async fn pause(&self) -> Result<(), LoopError> {
        let mut state = self.state.write().await;
        match *state {
            LoopState::Running => {
                *state = LoopState::Paused;
                info!(event = "loop_paused", "Control loop paused");
                Ok(())
            }
            from => Err(LoopError::InvalidTransition {
                action: "pause",
                from,
            }),
        }
    }

    pub async fn resume(&self) -> Result<(), LoopError> {
        let mut state = self.state.write().await;
        match *state {
            LoopState::Paused => {
                *state = LoopState::Running;
                info!(event = "loop_resumed", "Control loop resumed");
                Ok(())
            }
            from => Err(LoopError::InvalidTransition {
                action: "resume",
                from,
            }),
        }
    }

    /// Stop from any state; process-scoped state is retained, not flushed
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state != LoopState::Stopped {
            info!(event = "loop_stopped", "Control loop stopped");
        }
        *state = LoopState::Stopped;
    }

    /// Drive ticks until shutdown; honors pause/error states at tick
    /// boundaries
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let interval_secs = self.config.read().await.interval_secs;
        info!(
            interval_secs,
            "Control loop task started"
        );

        loop {
            let interval = Duration::from_secs(self.config.read().await.interval_secs);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.state().await {
                        LoopState::Running => {
                            self.tick().await;
                        }
                        LoopState::Error => {
                            self.try_recover_from_error().await;
                        }
                        _ => {}
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down control loop task");
                    break;
                }
            }
        }
    }

    /// Leave the error state once the cooldown has elapsed
    pub async fn try_recover_from_error(&self) -> bool {
        let cooldown =
            chrono::Duration::seconds(self.config.read().await.error_cooldown_secs as i64);
        let now = self.clock.now();

        let mut core = self.core.lock().await;
        let recovered = core
            .error_since
            .is_some_and(|since| now.signed_duration_since(since) >= cooldown);
        if recovered {
            core.error_since = None;
            core.stats.consecutive_errors = 0;
            drop(core);

            let mut state = self.state.write().await;
            if *state == LoopState::Error {
                *state = LoopState::Running;
                info!(event = "loop_recovered", "Error cooldown elapsed, resuming ticks");
            }
        }
        recovered
    }

    /// Attempt one tick; skips when the previous tick is still in flight
    pub async fn tick(&self) -> TickOutcome {
        if self.state().await != LoopState::Running {
            return TickOutcome::NotRunning;
        }

        let Ok(mut core) = self.core.try_lock() else {
            warn!("Previous tick still in flight, skipping");
            self.skipped_ticks
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return TickOutcome::Skipped;
        };

        self.tick_locked(&mut core).await;

        if core.stats.consecutive_errors >= self.config.read().await.max_consecutive_errors {
            core.error_since = Some(self.clock.now());
            drop(core);
            let mut state = self.state.write().await;
            if *state == LoopState::Running {
                *state = LoopState::Error;
                warn!(
                    event = "loop_error",
                    "Consecutive tick failures exceeded ceiling, entering error state"
                );
            }
        }

        TickOutcome::Completed
    }

    /// Force an out-of-band tick, serialized behind any in-flight tick
    pub async fn collect_now(&self) -> Result<(), LoopError> {
        let state = self.state().await;
        if matches!(state, LoopState::Stopped | LoopState::Starting) {
            return Err(LoopError::InvalidTransition {
                action: "collect",
                from: state,
            });
        }
        let mut core = self.core.lock().await;
        self.tick_locked(&mut core).await;
        Ok(())
    }

    async fn tick_locked(&self, core: &mut LoopCore) {
        let started = self.clock.now();
        let wall_start = std::time::Instant::now();
        let endpoints = core.endpoints.clone();
        let mut fetch_failed = false;

        for endpoint in &endpoints {
            match self.source.fetch(endpoint).await {
                Ok(signals) => {
                    // BTreeMap iteration keeps metric order deterministic;
                    // each metric is fully routed and gated before the next
                    for (metric, value) in signals {
                        let sample = Sample::new(metric, self.clock.now(), value);
                        self.process_sample(core, &sample).await;
                    }
                }
                Err(e) => {
                    fetch_failed = true;
                    core.stats.fetch_errors += 1;
                    self.metrics.inc_fetch_errors();
                    warn!(
                        endpoint = %endpoint.name,
                        error = %e,
                        "Failed to fetch metrics endpoint"
                    );
                }
            }
        }

        core.stats.ticks += 1;
        core.stats.last_tick_at = Some(started);
        if fetch_failed {
            core.stats.consecutive_errors += 1;
        } else {
            core.stats.consecutive_errors = 0;
        }

        self.metrics
            .observe_tick_latency(wall_start.elapsed().as_secs_f64());
        self.metrics
            .set_kill_switch(core.safety.kill_switch_engaged());
        self.metrics
            .set_approval_queue_depth(core.safety.pending_approvals().len() as i64);

        debug!(
            ticks = core.stats.ticks,
            findings = core.stats.findings,
            consecutive_errors = core.stats.consecutive_errors,
            "Tick complete"
        );
    }

    async fn process_sample(&self, core: &mut LoopCore, sample: &Sample) {
        let Some(finding) = core.detector.ingest(sample) else {
            return;
        };

        core.stats.findings += 1;
        self.metrics.inc_findings();
        info!(
            event = "finding",
            metric = %finding.metric,
            value = finding.value,
            expected = finding.expected,
            confidence = finding.confidence,
            severity = %finding.severity,
            "Anomaly finding emitted"
        );

        core.safety.note_finding(&finding);

        for candidate in core.router.route(&finding) {
            let decision = core.safety.evaluate(&candidate);
            match decision.verdict {
                Verdict::AutoExecute => {
                    core.stats.actions_executed += 1;
                    self.metrics.inc_actions_executed();
                }
                Verdict::QueueForApproval(_) => {
                    core.stats.actions_queued += 1;
                    self.metrics.inc_actions_queued();
                }
                Verdict::Rejected(_) => {
                    core.stats.actions_rejected += 1;
                    self.metrics.inc_actions_rejected();
                }
            }

            let record = core.safety.dispatch(decision).await;
            if record.executed {
                core.router.note_action(&record.metric);
            }
        }
    }

    pub async fn status(&self) -> LoopStatus {
        let state = self.state().await;
        let interval_secs = self.config.read().await.interval_secs;
        let mut core = self.core.lock().await;
        let mut stats = core.stats;
        stats.skipped_ticks = self
            .skipped_ticks
            .load(std::sync::atomic::Ordering::Relaxed);
        LoopStatus {
            state,
            stats,
            safety: core.safety.status(),
            endpoints: core.endpoints.len(),
            interval_secs,
        }
    }

    /// Apply a partial configuration update with validation
    pub async fn configure(&self, update: ConfigUpdate) -> Result<(), LoopError> {
        let mut config = self.config.write().await;
        if let Some(interval) = update.interval_secs {
            if interval < config.min_interval_secs {
                return Err(LoopError::InvalidConfig(format!(
                    "interval {}s below minimum {}s",
                    interval, config.min_interval_secs
                )));
            }
            config.interval_secs = interval;
        }
        if let Some(max) = update.max_consecutive_errors {
            config.max_consecutive_errors = max;
        }
        if let Some(cooldown) = update.error_cooldown_secs {
            config.error_cooldown_secs = cooldown;
        }
        drop(config);

        let mut core = self.core.lock().await;

        if update.sensitivity.is_some()
            || update.weights.is_some()
            || update.emission_floor.is_some()
        {
            let mut detector_config = core.detector.config().clone();
            if let Some(sensitivity) = update.sensitivity {
                detector_config.sensitivity = sensitivity;
            }
            if let Some(weights) = update.weights {
                detector_config.weights = weights;
            }
            if let Some(floor) = update.emission_floor {
                detector_config.emission_floor = floor;
            }
            core.detector.set_config(detector_config)?;
        }

        let mut router_config = core.router.config().clone();
        let mut router_changed = false;
        if let Some(strategy) = update.strategy {
            router_config.strategy = strategy;
            router_changed = true;
        }
        if let Some(min_confidence) = update.min_confidence {
            router_config.min_confidence = min_confidence;
            router_changed = true;
        }
        if let Some(min_severity) = update.min_severity {
            router_config.min_severity = min_severity;
            router_changed = true;
        }
        if let Some(count) = update.confirmation_count {
            router_config.confirmation_count = count;
            router_changed = true;
        }
        if let Some(window) = update.confirmation_window_secs {
            router_config.confirmation_window_secs = window;
            router_changed = true;
        }
        if let Some(cooldown) = update.metric_cooldown_secs {
            router_config.metric_cooldown_secs = cooldown;
            router_changed = true;
        }
        if let Some(cap) = update.metric_hourly_cap {
            router_config.metric_hourly_cap = cap;
            router_changed = true;
        }
        if router_changed {
            core.router.set_config(router_config);
        }

        let mut safety_config = core.safety.config().clone();
        let mut safety_changed = false;
        if let Some(autonomy) = update.autonomy {
            safety_config.autonomy = autonomy;
            safety_changed = true;
        }
        if let Some(cap) = update.global_hourly_cap {
            safety_config.global_hourly_cap = cap;
            safety_changed = true;
        }
        if let Some(limit) = update.blast_radius_limit {
            safety_config.blast_radius_limit = limit;
            safety_changed = true;
        }
        if let Some(threshold) = update.supervised_threshold {
            safety_config.supervised_threshold = threshold;
            safety_changed = true;
        }
        if let Some(threshold) = update.autonomous_threshold {
            safety_config.autonomous_threshold = threshold;
            safety_changed = true;
        }
        if safety_changed {
            core.safety.set_config(safety_config);
        }

        info!(event = "config_updated", "Runtime configuration applied");
        Ok(())
    }

    pub async fn list_endpoints(&self) -> Vec<EndpointConfig> {
        self.core.lock().await.endpoints.clone()
    }

    pub async fn add_endpoint(&self, endpoint: EndpointConfig) {
        let mut core = self.core.lock().await;
        core.endpoints.retain(|e| e.name != endpoint.name);
        info!(endpoint = %endpoint.name, url = %endpoint.url, "Endpoint added");
        core.endpoints.push(endpoint);
    }

    /// Remove by name; returns whether anything was removed
    pub async fn remove_endpoint(&self, name: &str) -> bool {
        let mut core = self.core.lock().await;
        let before = core.endpoints.len();
        core.endpoints.retain(|e| e.name != name);
        let removed = core.endpoints.len() != before;
        if removed {
            info!(endpoint = %name, "Endpoint removed");
        }
        removed
    }

    /// Metrics currently tracked by the detector
    pub async fn tracked_metrics(&self) -> Vec<String> {
        self.core.lock().await.detector.tracked_metrics()
    }

    /// Recent samples for one metric, newest last
    pub async fn recent_samples(&self, metric: &str, limit: usize) -> Vec<Sample> {
        let core = self.core.lock().await;
        core.detector
            .recent_samples(metric, limit)
            .into_iter()
            .map(|(timestamp, value)| Sample::new(metric, timestamp, value))
            .collect()
    }

    pub async fn window_stats(&self, metric: &str) -> Option<WindowStats> {
        self.core.lock().await.detector.window_stats(metric)
    }

    pub async fn pending_approvals(&self) -> Vec<Decision> {
        self.core.lock().await.safety.pending_approvals()
    }

    pub async fn approve(&self, index: usize) -> Result<ActionRecord, LoopError> {
        let mut core = self.core.lock().await;
        let record = core.safety.approve(index).await?;
        if record.executed {
            let metric = record.metric.clone();
            core.router.note_action(&metric);
            core.stats.actions_executed += 1;
        }
        Ok(record)
    }

    pub async fn reject(&self, index: usize, reason: &str) -> Result<ActionRecord, LoopError> {
        let mut core = self.core.lock().await;
        Ok(core.safety.reject(index, reason)?)
    }

    pub async fn clear_kill_switch(&self) {
        self.core.lock().await.safety.clear_kill_switch();
    }

    pub async fn engage_kill_switch(&self, reason: &str) {
        self.core.lock().await.safety.engage_kill_switch(reason);
    }

    pub async fn recent_actions(&self, limit: usize) -> Vec<ActionRecord> {
        self.core.lock().await.safety.recent_actions(limit)
    }

    pub async fn learning_stats(&self) -> Vec<KindLearning> {
        self.core.lock().await.safety.learning_stats()
    }

    pub async fn dropped_candidates(&self) -> Vec<DroppedCandidate> {
        self.core.lock().await.router.dropped()
    }
}
