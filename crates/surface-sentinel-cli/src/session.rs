//! One CLI session: start the engine, fire triggers, capture, summarize.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

use crate::monitor::HttpReportSink;

use surface_sentinel::{
    AcquisitionOutcome, CaptureRecord, EngineFactory, EngineHandle, EngineOptions, FailureType,
    Host, KeyValueStore, Notifier, RecoveryReport, SentinelEvent, SystemStatus, TracingNotifier,
};

/// Event buffer large enough for a full cascade plus a few captures.
const EVENT_CAPACITY: usize = 256;

/// What a session does after acquisition.
#[derive(Debug, Clone, Default)]
pub struct SessionPlan {
    /// Failures injected in order once acquisition settles.
    pub triggers: Vec<FailureType>,
    /// Capture the primary surface at the end.
    pub capture: bool,
    /// Store the final capture as an emergency save.
    pub save_capture: bool,
}

/// Everything a session observed, printed as JSON by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub acquisition: AcquisitionOutcome,
    pub reports: Vec<RecoveryReport>,
    pub capture: Option<CaptureRecord>,
    pub saved_as: Option<String>,
    pub events: Vec<SentinelEvent>,
    pub status: SystemStatus,
}

/// Build an engine over `host` with the CLI's services. A configured
/// monitoring endpoint gets every emergency report.
pub fn open_engine(
    factory: &EngineFactory,
    host: Arc<dyn Host>,
    config: surface_sentinel::EngineConfig,
    store: Arc<dyn KeyValueStore>,
    notifier: Option<Arc<dyn Notifier>>,
) -> anyhow::Result<EngineHandle> {
    let sink = config
        .monitoring_endpoint
        .as_deref()
        .map(|endpoint| Arc::new(HttpReportSink::new(endpoint)));
    let mut options = EngineOptions::new(config).with_store(store);
    options.notifier = notifier.unwrap_or_else(|| Arc::new(TracingNotifier));
    if let Some(sink) = sink {
        tracing::info!("Forwarding emergency reports to {}", sink.url());
        options = options.with_sink(sink);
    }
    options.event_capacity = EVENT_CAPACITY;
    Ok(factory.handle(host, options)?)
}

/// Run `plan` against `engine`.
pub async fn run_session(engine: &EngineHandle, plan: &SessionPlan) -> SessionSummary {
    let mut rx = engine.subscribe();

    let acquisition = engine.start().await;
    tracing::info!(
        "Acquisition {}",
        if acquisition.is_ready() { "ready" } else { "did not reach ready" }
    );

    let mut reports = Vec::with_capacity(plan.triggers.len());
    for failure_type in &plan.triggers {
        let report = engine
            .trigger_emergency(failure_type.clone(), json!({ "source": "cli" }))
            .await;
        tracing::info!("{failure_type}: {:?}", report.outcome);
        reports.push(report);
    }

    let capture = if plan.capture {
        Some(engine.capture().await)
    } else {
        None
    };

    let saved_as = match (&capture, plan.save_capture) {
        (Some(record), true) => match serde_json::to_value(record) {
            Ok(payload) => match engine.emergency_save(payload) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!("Emergency save failed: {e}");
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Could not serialize capture: {e}");
                None
            }
        },
        _ => None,
    };

    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!("Event log dropped {missed} events");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    SessionSummary {
        acquisition,
        reports,
        capture,
        saved_as,
        events,
        status: engine.system_status(),
    }
}
