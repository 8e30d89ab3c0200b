//! Engine facade: owns acquisition state, capture, and the recovery side.
//!
//! `EngineFactory` hands out at most one live engine at a time. Handles are
//! cheap clones of the same engine; once every handle is dropped the factory
//! builds a fresh one on the next request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::acquisition::{probe, AcquisitionDriver, AcquisitionOutcome};
use crate::capture::{self, CaptureEngine};
use crate::config::EngineConfig;
use crate::events::{EventBus, SentinelEvent};
use crate::host::{Host, KeyValueStore, MemoryStore};
use crate::monitoring::{ErrorLog, HostError, PerformanceMetrics, ReportSink};
use crate::recovery::degradation::{self, DegradationManager};
use crate::recovery::{
    exhaustion_level, severity_for, CascadeOutcome, HostStrategies, Notice, Notifier,
    PatternRecorder, RecoveryCascade, RecoveryStrategy, TracingNotifier,
};
use crate::types::{
    AcquisitionStatus, CaptureMode, CaptureRecord, DegradationLevel, EmergencyState,
    FailureRecord, FailureSignal, FailureType, SentinelError, SentinelResult, Severity,
    SurfaceBinding,
};

/// Key prefix for emergency saves.
pub const EMERGENCY_SAVE_PREFIX: &str = "sentinel_emergency_save_";
/// Key holding the bounded list of emergency reports.
pub const EMERGENCY_REPORTS_KEY: &str = "sentinel_emergency_reports";
/// Emergency reports kept in the store.
pub const MAX_EMERGENCY_REPORTS: usize = 20;

/// Services the engine talks to besides the host.
#[derive(Clone)]
pub struct EngineOptions {
    pub config: EngineConfig,
    pub store: Arc<dyn KeyValueStore>,
    pub notifier: Arc<dyn Notifier>,
    /// Receives every stored emergency report, in the background.
    pub sink: Option<Arc<dyn ReportSink>>,
    pub event_capacity: usize,
}

impl EngineOptions {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: Arc::new(MemoryStore::new()),
            notifier: Arc::new(TracingNotifier),
            sink: None,
            event_capacity: 64,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// How a recovery episode ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Restored {
        strategy: RecoveryStrategy,
    },
    Degraded {
        strategy: RecoveryStrategy,
        level: DegradationLevel,
    },
    Exhausted,
    AlreadyInProgress,
}

impl RecoveryOutcome {
    /// Whether the system is usable afterwards, fully or degraded.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RecoveryOutcome::Restored { .. } | RecoveryOutcome::Degraded { .. }
        )
    }
}

/// Summary of one `handle_emergency` call, also persisted as an emergency report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub timestamp: DateTime<Utc>,
    pub failure_type: FailureType,
    pub details: Value,
    /// Severity assessed before recovery ran.
    pub severity: Severity,
    pub outcome: RecoveryOutcome,
    pub degradation: DegradationLevel,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub recovery_strategy: Option<RecoveryStrategy>,
    #[serde(default)]
    pub recovery_attempts: u32,
    #[serde(default)]
    pub metrics: PerformanceMetrics,
}

/// Read-only snapshot of the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub session_id: String,
    pub acquisition: AcquisitionStatus,
    pub binding_count: usize,
    pub primary: Option<String>,
    pub emergency: EmergencyState,
    pub capture_mode: CaptureMode,
    pub capabilities: Vec<String>,
    pub recovery_budget: u32,
    pub cascade_order: Vec<RecoveryStrategy>,
    pub failures_recorded: usize,
    pub recovery_attempts: u32,
    pub active_recovery_strategy: Option<RecoveryStrategy>,
    pub host_errors: u64,
    pub uptime_ms: u64,
}

struct EngineState {
    status: AcquisitionStatus,
    bindings: Vec<SurfaceBinding>,
    emergency: EmergencyState,
    capture_mode: CaptureMode,
    recovery_budget: u32,
    recovery_attempts: u32,
    active_strategy: Option<RecoveryStrategy>,
    last_recovery_ms: Option<u64>,
    patterns: PatternRecorder,
    degradation: DegradationManager,
    errors: ErrorLog,
}

impl EngineState {
    /// Capture mode implied by the applied degradation and fallback flag.
    fn sync_capture_mode(&mut self) {
        self.capture_mode = if self.emergency.degradation == DegradationLevel::Critical {
            CaptureMode::Unavailable
        } else if self.emergency.fallback_active {
            CaptureMode::EmergencyMock
        } else {
            CaptureMode::Live
        };
    }
}

struct EngineInner {
    config: EngineConfig,
    host: Arc<dyn Host>,
    driver: Arc<AcquisitionDriver>,
    strategies: HostStrategies,
    capture: CaptureEngine,
    cascade: RecoveryCascade,
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    sink: Option<Arc<dyn ReportSink>>,
    events: EventBus,
    started: Instant,
    starting: AtomicBool,
    state: Mutex<EngineState>,
}

/// Clears the start flag however `start` ends.
struct Starting<'a>(&'a AtomicBool);

impl Drop for Starting<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Hands out the single live engine.
#[derive(Default)]
pub struct EngineFactory {
    current: Mutex<Weak<EngineInner>>,
}

impl EngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide factory.
    pub fn global() -> &'static EngineFactory {
        static FACTORY: OnceLock<EngineFactory> = OnceLock::new();
        FACTORY.get_or_init(EngineFactory::new)
    }

    /// The live engine if one exists, else a new one over `host`.
    ///
    /// While an engine is alive, `host` and `options` are ignored.
    pub fn handle(
        &self,
        host: Arc<dyn Host>,
        options: EngineOptions,
    ) -> SentinelResult<EngineHandle> {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(inner) = current.upgrade() {
            tracing::debug!("Reusing live engine");
            return Ok(EngineHandle { inner });
        }
        options.config.validate()?;
        let inner = Arc::new(EngineInner::new(host, options));
        *current = Arc::downgrade(&inner);
        tracing::info!("Engine created (session {})", capture::session_id());
        Ok(EngineHandle { inner })
    }

    pub fn is_live(&self) -> bool {
        self.current
            .lock()
            .map(|c| c.strong_count() > 0)
            .unwrap_or(false)
    }
}

impl EngineInner {
    fn new(host: Arc<dyn Host>, options: EngineOptions) -> Self {
        let config = options.config;
        let driver = Arc::new(AcquisitionDriver::new(host.clone()));
        let state = EngineState {
            status: AcquisitionStatus::default(),
            bindings: Vec::new(),
            emergency: EmergencyState::default(),
            capture_mode: CaptureMode::Live,
            recovery_budget: config.max_recovery_attempts.max(1),
            recovery_attempts: 0,
            active_strategy: None,
            last_recovery_ms: None,
            patterns: PatternRecorder::new(),
            degradation: DegradationManager::new(options.notifier.clone()),
            errors: ErrorLog::new(),
        };
        Self {
            strategies: HostStrategies::new(driver.clone(), config.clone()),
            capture: CaptureEngine::new(host.clone()),
            cascade: RecoveryCascade::new(),
            events: EventBus::new(options.event_capacity),
            store: options.store,
            notifier: options.notifier,
            sink: options.sink,
            started: Instant::now(),
            starting: AtomicBool::new(false),
            state: Mutex::new(state),
            config,
            host,
            driver,
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics(&self, state: &EngineState) -> PerformanceMetrics {
        PerformanceMetrics {
            uptime_ms: self.started.elapsed().as_millis() as u64,
            recovery_attempts: state.recovery_attempts,
            host_errors: state.errors.total(),
            last_recovery_ms: state.last_recovery_ms,
        }
    }
}

/// Cloneable handle to the live engine.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<EngineInner>,
}

impl EngineHandle {
    /// Whether two handles refer to the same engine.
    pub fn same_engine(&self, other: &EngineHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SentinelEvent> {
        self.inner.events.subscribe()
    }

    /// Run acquisition. On failure, records it and starts recovery.
    ///
    /// A start issued while another is still running returns
    /// [`AcquisitionOutcome::AlreadyRunning`] and leaves the first untouched.
    pub async fn start(&self) -> AcquisitionOutcome {
        if self.inner.starting.swap(true, Ordering::AcqRel) {
            tracing::warn!("Acquisition already running, ignoring start");
            return AcquisitionOutcome::AlreadyRunning;
        }
        let _starting = Starting(&self.inner.starting);

        tracing::info!("Starting surface acquisition");
        let outcome = self.inner.driver.run(&self.inner.config).await;
        match &outcome {
            AcquisitionOutcome::Ready {
                bindings, status, ..
            } => {
                {
                    let mut state = self.inner.state();
                    state.bindings = bindings.clone();
                    state.status = *status;
                }
                self.inner.events.emit(SentinelEvent::Ready {
                    binding_count: bindings.len(),
                });
            }
            AcquisitionOutcome::Failed { status, attempts } => {
                {
                    let mut state = self.inner.state();
                    state.bindings.clear();
                    state.status = *status;
                }
                self.inner.events.emit(SentinelEvent::InitializationFailed {
                    status: *status,
                    attempts: *attempts,
                });
                let signal = FailureSignal::new(FailureType::InitializationFailed).with_details(
                    json!({ "attempts": attempts, "status": status }),
                );
                self.handle_emergency(signal).await;
            }
            AcquisitionOutcome::Cancelled | AcquisitionOutcome::AlreadyRunning => {}
        }
        outcome
    }

    /// External failure trigger.
    pub async fn trigger_emergency(
        &self,
        failure_type: impl Into<FailureType>,
        details: Value,
    ) -> RecoveryReport {
        self.handle_emergency(FailureSignal::new(failure_type.into()).with_details(details))
            .await
    }

    /// Log an error the host caught outside any engine operation.
    ///
    /// With `escalate_host_errors` set, the error also runs through
    /// [`handle_emergency`](Self::handle_emergency) and that report is returned.
    pub async fn record_error(&self, error: HostError) -> Option<RecoveryReport> {
        tracing::warn!("Host {}: {}", error.source, error.message);
        self.inner.events.emit(SentinelEvent::HostErrorRecorded {
            source: error.source,
            message: error.message.clone(),
        });
        let signal = self.inner.config.escalate_host_errors.then(|| {
            FailureSignal::new(FailureType::Other(error.source.as_str().to_string()))
                .with_details(json!({ "message": error.message, "stack": error.stack }))
                .with_context(error.context.clone())
        });
        self.inner.state().errors.push(error);

        match signal {
            Some(signal) => Some(self.handle_emergency(signal).await),
            None => None,
        }
    }

    /// Record, assess, notify, recover, degrade, report.
    ///
    /// A trigger arriving while recovery runs is logged and dropped: nothing
    /// is recorded, stored or escalated for it.
    pub async fn handle_emergency(&self, signal: FailureSignal) -> RecoveryReport {
        let inner = &self.inner;
        let start = Instant::now();
        let failure_type = signal.failure_type.clone();

        let Some(guard) = inner.cascade.try_begin() else {
            tracing::warn!("Recovery already in progress, dropping {failure_type}");
            let severity = inner.state().emergency.severity;
            return self.report(
                failure_type,
                signal.details,
                severity,
                RecoveryOutcome::AlreadyInProgress,
                start,
            );
        };
        tracing::error!("Emergency: {failure_type} {}", signal.details);

        let (severity, budget) = {
            let mut state = inner.state();
            state.recovery_attempts += 1;
            let at_time = state.emergency.severity;
            let recurrence =
                state.patterns.record(failure_type.clone(), signal.context.clone(), at_time);
            if let Some(recurrence) = recurrence {
                let from = state.emergency.severity;
                let to = state.emergency.escalate();
                if to != from {
                    tracing::warn!("Recurring {failure_type}: severity {from} -> {to}");
                    inner.events.emit(SentinelEvent::SeverityChanged { from, to });
                }
                state.recovery_budget = state.recovery_budget.saturating_sub(1).max(1);
                inner.cascade.prune(&recurrence.excluded);
                inner.events.emit(SentinelEvent::RecurringFailure {
                    failure_type: recurrence.failure_type,
                    occurrences: recurrence.occurrences,
                });
            }
            let from = state.emergency.severity;
            if state.emergency.raise_severity(severity_for(&failure_type)) {
                let to = state.emergency.severity;
                tracing::warn!("Severity {from} -> {to}");
                inner.events.emit(SentinelEvent::SeverityChanged { from, to });
            }
            (state.emergency.severity, state.recovery_budget)
        };

        if severity.needs_immediate_notice() {
            inner
                .notifier
                .notice(&Notice::emergency(&failure_type, severity));
        }

        inner.events.emit(SentinelEvent::RecoveryStarted {
            failure_type: failure_type.clone(),
            severity,
        });
        let cascade_outcome = inner
            .cascade
            .run_guarded(&guard, &inner.strategies, budget)
            .await;
        drop(guard);
        let outcome = self.settle(&failure_type, cascade_outcome, start);

        let report = self.report(failure_type, signal.details, severity, outcome, start);
        if let Err(e) = self.store_report(&report) {
            tracing::warn!("Could not store emergency report: {e}");
        }
        self.forward_report(&report);
        report
    }

    fn report(
        &self,
        failure_type: FailureType,
        details: Value,
        severity: Severity,
        outcome: RecoveryOutcome,
        start: Instant,
    ) -> RecoveryReport {
        let state = self.inner.state();
        RecoveryReport {
            timestamp: Utc::now(),
            failure_type,
            details,
            severity,
            outcome,
            degradation: state.emergency.degradation,
            elapsed_ms: start.elapsed().as_millis() as u64,
            recovery_strategy: state.active_strategy,
            recovery_attempts: state.recovery_attempts,
            metrics: self.inner.metrics(&state),
        }
    }

    /// Apply a cascade outcome to engine state.
    fn settle(
        &self,
        failure_type: &FailureType,
        outcome: CascadeOutcome,
        start: Instant,
    ) -> RecoveryOutcome {
        let inner = &self.inner;
        let mut state = inner.state();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        state.last_recovery_ms = Some(elapsed_ms);
        match outcome {
            CascadeOutcome::Restored { strategy, bindings } => {
                state.status = AcquisitionStatus::derive(true, true, !bindings.is_empty());
                state.bindings = bindings;
                state.active_strategy = Some(strategy);
                let before = state.emergency.severity;
                state.emergency.reset();
                state.degradation.reset();
                state.sync_capture_mode();
                if before != Severity::Normal {
                    inner.events.emit(SentinelEvent::SeverityChanged {
                        from: before,
                        to: Severity::Normal,
                    });
                }
                inner.notifier.notice(&Notice::recovered(strategy.as_str()));
                tracing::info!("Recovered using {strategy}");
                inner.events.emit(SentinelEvent::RecoverySucceeded {
                    strategy,
                    elapsed_ms,
                });
                RecoveryOutcome::Restored { strategy }
            }
            CascadeOutcome::Degraded { strategy, level } => {
                if strategy == RecoveryStrategy::EmergencyMock {
                    state.emergency.fallback_active = true;
                }
                state.active_strategy = Some(strategy);
                Self::degrade(inner, &mut state, level);
                tracing::warn!(
                    "Running degraded via {strategy} at {}",
                    state.emergency.degradation
                );
                inner
                    .events
                    .emit(SentinelEvent::RecoveryDegraded { strategy, level });
                RecoveryOutcome::Degraded { strategy, level }
            }
            CascadeOutcome::Exhausted => {
                let before = state.emergency.severity;
                if state.emergency.raise_severity(Severity::Emergency) {
                    inner.events.emit(SentinelEvent::SeverityChanged {
                        from: before,
                        to: Severity::Emergency,
                    });
                }
                let level = exhaustion_level(failure_type);
                tracing::error!("{}; degrading to {level}", SentinelError::AllRecoveryExhausted);
                Self::degrade(inner, &mut state, level);
                inner.events.emit(SentinelEvent::RecoveryExhausted {
                    failure_type: failure_type.clone(),
                });
                RecoveryOutcome::Exhausted
            }
            CascadeOutcome::AlreadyInProgress => RecoveryOutcome::AlreadyInProgress,
        }
    }

    fn degrade(inner: &EngineInner, state: &mut EngineState, level: DegradationLevel) {
        state.emergency.raise_degradation(level);
        let target = state.emergency.degradation;
        if state.degradation.apply_level(target) {
            inner
                .events
                .emit(SentinelEvent::DegradationApplied { level: target });
        }
        state.sync_capture_mode();
    }

    fn store_report(&self, report: &RecoveryReport) -> SentinelResult<()> {
        let store = &self.inner.store;
        let mut reports = self.emergency_reports()?;
        reports.push(report.clone());
        if reports.len() > MAX_EMERGENCY_REPORTS {
            let excess = reports.len() - MAX_EMERGENCY_REPORTS;
            reports.drain(..excess);
        }
        store.put(EMERGENCY_REPORTS_KEY, &serde_json::to_string(&reports)?)
    }

    /// Hand the report to the monitoring sink without waiting on it.
    fn forward_report(&self, report: &RecoveryReport) {
        let Some(sink) = self.inner.sink.clone() else {
            return;
        };
        let report = report.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.send(&report).await {
                tracing::warn!("Failed to send emergency report to monitoring: {e}");
            }
        });
    }

    /// Stored emergency reports, oldest first.
    pub fn emergency_reports(&self) -> SentinelResult<Vec<RecoveryReport>> {
        match self.inner.store.get(EMERGENCY_REPORTS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Capture the primary surface. Never fails; failures are records.
    pub async fn capture(&self) -> CaptureRecord {
        let (mode, ready, bindings) = {
            let state = self.inner.state();
            (
                state.capture_mode,
                state.status.system_ready,
                state.bindings.clone(),
            )
        };

        let record = match mode {
            CaptureMode::EmergencyMock => capture::emergency_mock(),
            CaptureMode::Unavailable => capture::unavailable("critical fallback active"),
            CaptureMode::Live if ready => self.inner.capture.capture_live(&bindings).await,
            CaptureMode::Live => match self.emergency_probe().await {
                Ok(bindings) => self.inner.capture.capture_live(&bindings).await,
                Err(e) => CaptureRecord::failure(capture::session_id(), e.kind(), e.to_string()),
            },
        };

        self.inner.events.emit(SentinelEvent::CaptureProduced {
            record: Box::new(record.clone()),
        });
        record
    }

    /// One probe outside any acquisition run, adopting its bindings on success.
    async fn emergency_probe(&self) -> SentinelResult<Vec<SurfaceBinding>> {
        tracing::warn!("Capture requested before READY, re-probing");
        let report = probe(self.inner.host.as_ref()).await;
        let mut state = self.inner.state();
        state.status = report.status;
        match report.bindings() {
            Some(bindings) => {
                state.bindings = bindings.to_vec();
                Ok(state.bindings.clone())
            }
            None => Err(report.error().unwrap_or(SentinelError::NoSurfaceFound)),
        }
    }

    /// Persist `payload` under a fresh emergency-save key and return the key.
    pub fn emergency_save(&self, payload: Value) -> SentinelResult<String> {
        let store = &self.inner.store;
        let now = Utc::now();
        let mut millis = now.timestamp_millis();
        let mut key = format!("{EMERGENCY_SAVE_PREFIX}{millis}");
        while store.get(&key)?.is_some() {
            millis += 1;
            key = format!("{EMERGENCY_SAVE_PREFIX}{millis}");
        }
        let record = json!({
            "timestamp": now.to_rfc3339(),
            "emergency_save": true,
            "data": payload,
        });
        store.put(&key, &record.to_string())?;
        tracing::info!("Emergency data saved under {key}");
        Ok(key)
    }

    /// Keys of all emergency saves, oldest first.
    pub fn emergency_saves(&self) -> SentinelResult<Vec<String>> {
        self.inner.store.keys_with_prefix(EMERGENCY_SAVE_PREFIX)
    }

    pub fn system_status(&self) -> SystemStatus {
        let state = self.inner.state();
        let metrics = self.inner.metrics(&state);
        SystemStatus {
            session_id: capture::session_id().to_string(),
            acquisition: state.status,
            binding_count: state.bindings.len(),
            primary: state
                .bindings
                .iter()
                .find(|b| b.is_primary)
                .map(|b| b.instance_id.clone()),
            emergency: self.snapshot_emergency(&state),
            capture_mode: state.capture_mode,
            capabilities: state
                .degradation
                .enabled()
                .into_iter()
                .map(str::to_string)
                .collect(),
            recovery_budget: state.recovery_budget,
            cascade_order: self.inner.cascade.order(),
            failures_recorded: state.patterns.len(),
            recovery_attempts: state.recovery_attempts,
            active_recovery_strategy: state.active_strategy,
            host_errors: metrics.host_errors,
            uptime_ms: metrics.uptime_ms,
        }
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let state = self.inner.state();
        self.inner.metrics(&state)
    }

    /// Logged host errors, oldest first.
    pub fn host_errors(&self) -> Vec<HostError> {
        self.inner.state().errors.entries()
    }

    pub fn emergency_state(&self) -> EmergencyState {
        let state = self.inner.state();
        self.snapshot_emergency(&state)
    }

    fn snapshot_emergency(&self, state: &EngineState) -> EmergencyState {
        EmergencyState {
            recovery_in_progress: self.inner.cascade.in_progress(),
            ..state.emergency
        }
    }

    pub fn bindings(&self) -> Vec<SurfaceBinding> {
        self.inner.state().bindings.clone()
    }

    pub fn acquisition_status(&self) -> AcquisitionStatus {
        self.inner.state().status
    }

    pub fn failure_history(&self) -> Vec<FailureRecord> {
        self.inner.state().patterns.history()
    }

    pub fn recovery_attempts(&self) -> Vec<crate::recovery::AttemptRecord> {
        self.inner.cascade.attempts()
    }

    pub fn is_capability_enabled(&self, tag: &str) -> bool {
        self.inner.state().degradation.is_enabled(tag)
    }

    /// Mark a strategy as known to fail for a failure type. Applied on recurrence.
    pub fn exclude_strategy(&self, failure_type: FailureType, strategy: RecoveryStrategy) {
        self.inner.state().patterns.exclude(failure_type, strategy);
    }

    /// Explicit return to normal service.
    pub fn reset_emergency(&self) {
        let inner = &self.inner;
        let mut state = inner.state();
        let before = state.emergency.severity;
        state.emergency.reset();
        state.recovery_attempts = 0;
        state.active_strategy = None;
        state.sync_capture_mode();
        if state.degradation.level() != DegradationLevel::Normal {
            state.degradation.reset();
        }
        if before != Severity::Normal {
            inner.events.emit(SentinelEvent::SeverityChanged {
                from: before,
                to: Severity::Normal,
            });
        }
        tracing::info!(
            "Emergency state reset; capabilities: {:?}",
            degradation::allowed(DegradationLevel::Normal)
        );
    }
}
