//! Integration tests for config resolution, the file store and CLI sessions.

use std::sync::Arc;

use surface_sentinel::engine::EMERGENCY_SAVE_PREFIX;
use surface_sentinel::{
    CaptureMode, EngineFactory, FailureType, Host, KeyValueStore, Notifier, RecordingNotifier,
    RecoveryOutcome, Scenario, ScriptedSurface, SentinelEvent, SimulatedHost,
};
use surface_sentinel_cli::{
    load_config, open_engine, resolve_config_path, run_session, FileStore, SessionPlan,
};

// ─────────────────────── helpers ───────────────────────

fn simulated(scenario: Scenario) -> Arc<dyn Host> {
    Arc::new(SimulatedHost::new(scenario))
}

fn ready_scenario() -> Scenario {
    Scenario::immediately_ready(ScriptedSurface::new("design").with_objects(vec![
        serde_json::json!({ "type": "text", "left": 10, "top": 20, "text": "Hi" }),
    ]))
}

// ═══════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════

#[test]
fn test_explicit_config_path_wins() {
    let path = resolve_config_path(Some("/tmp/custom.json"));
    assert_eq!(path, std::path::PathBuf::from("/tmp/custom.json"));
}

#[test]
fn test_missing_config_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(&dir.path().join("absent.json")).unwrap();
    assert_eq!(config.base_delay_ms, 100);
    assert_eq!(config.cap_delay_ms, 1_500);
}

#[test]
fn test_config_file_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "max_recovery_attempts": 2, "constrained_context": true }"#).unwrap();
    let config = load_config(&path).unwrap();
    assert_eq!(config.max_recovery_attempts, 2);
    assert_eq!(config.max_attempts, 1);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "backoff_growth": 0.5 }"#).unwrap();
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("backoff_growth"));
}

// ═══════════════════════════════════════════════════════
// SESSIONS
// ═══════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_session_capture_is_saved_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(&dir.path().join("store.json")).unwrap());
    let factory = EngineFactory::new();
    let engine = open_engine(
        &factory,
        simulated(ready_scenario()),
        Default::default(),
        store.clone(),
        None,
    )
    .unwrap();

    let plan = SessionPlan {
        capture: true,
        save_capture: true,
        ..SessionPlan::default()
    };
    let summary = run_session(&engine, &plan).await;

    assert!(summary.acquisition.is_ready());
    let capture = summary.capture.expect("capture");
    assert_eq!(capture.mode, CaptureMode::Live);
    assert_eq!(capture.elements.len(), 1);
    assert!(summary
        .events
        .iter()
        .any(|e| matches!(e, SentinelEvent::Ready { binding_count: 1 })));

    let key = summary.saved_as.expect("saved");
    assert!(key.starts_with(EMERGENCY_SAVE_PREFIX));
    let reopened = FileStore::open(store.path()).unwrap();
    assert!(reopened.get(&key).unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_session_triggers_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(&dir.path().join("store.json")).unwrap());
    let notifier = Arc::new(RecordingNotifier::new());
    let factory = EngineFactory::new();
    let engine = open_engine(
        &factory,
        simulated(ready_scenario()),
        Default::default(),
        store,
        Some(notifier.clone() as Arc<dyn Notifier>),
    )
    .unwrap();

    let plan = SessionPlan {
        triggers: vec![FailureType::ManualRetry, "fabric-load-failed".into()],
        capture: false,
        save_capture: false,
    };
    let summary = run_session(&engine, &plan).await;

    assert!(summary.capture.is_none());
    assert_eq!(summary.reports.len(), 2);
    assert_eq!(summary.reports[0].failure_type, FailureType::ManualRetry);
    assert!(summary
        .reports
        .iter()
        .all(|r| matches!(r.outcome, RecoveryOutcome::Restored { .. })));
    assert!(notifier
        .notices()
        .iter()
        .any(|n| n.title == "✅ System Recovered"));
    assert_eq!(engine.emergency_reports().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_on_dead_page_degrades() {
    let factory = EngineFactory::new();
    let engine = open_engine(
        &factory,
        simulated(Scenario::never_ready()),
        surface_sentinel::EngineConfig::constrained(),
        Arc::new(surface_sentinel::MemoryStore::new()),
        None,
    )
    .unwrap();

    let plan = SessionPlan {
        capture: true,
        ..SessionPlan::default()
    };
    let summary = run_session(&engine, &plan).await;

    assert!(!summary.acquisition.is_ready());
    assert_eq!(summary.status.capture_mode, CaptureMode::EmergencyMock);
    assert_eq!(
        summary.capture.map(|c| c.mode),
        Some(CaptureMode::EmergencyMock)
    );
    let json = serde_json::to_value(&summary.status).unwrap();
    assert_eq!(json["emergency"]["fallback_active"], true);
}

#[tokio::test]
async fn test_session_reports_reach_monitoring_endpoint() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emergency-report"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = surface_sentinel::EngineConfig {
        monitoring_endpoint: Some(server.uri()),
        ..Default::default()
    };
    let factory = EngineFactory::new();
    let engine = open_engine(
        &factory,
        simulated(ready_scenario()),
        config,
        Arc::new(surface_sentinel::MemoryStore::new()),
        None,
    )
    .unwrap();

    let plan = SessionPlan {
        triggers: vec![FailureType::ManualRetry],
        ..SessionPlan::default()
    };
    run_session(&engine, &plan).await;

    let mut received = Vec::new();
    for _ in 0..50 {
        received = server.received_requests().await.unwrap_or_default();
        if !received.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(received.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["failure_type"], "manual-retry");
    assert_eq!(body["recovery_attempts"], 1);
}
