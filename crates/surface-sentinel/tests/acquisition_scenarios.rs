//! Time-driven acquisition scenarios on a scripted host.
//!
//! Every test runs on a paused tokio clock, so timelines are exact.

use std::sync::Arc;

use surface_sentinel::acquisition::{
    AcquisitionEvent, AcquisitionMachine, AcquisitionState, Effect, ProbeReport, TimerKind,
};
use surface_sentinel::backoff;
use surface_sentinel::host::{Scenario, ScriptedSurface, SimulatedHost};
use surface_sentinel::{
    AcquisitionDriver, AcquisitionOutcome, EngineConfig, EngineFactory, EngineOptions,
};

// ─────────────────────── helpers ───────────────────────

/// Library and surface show up together at `at_ms`; the document is ready at 150ms.
fn late_surface(at_ms: u64, observe_structure: bool) -> Scenario {
    Scenario {
        environment_ready_at_ms: 150,
        library_loaded_at_ms: Some(at_ms),
        surfaces: vec![ScriptedSurface::new("design").appearing_at(at_ms)],
        observe_structure,
        ..Scenario::default()
    }
}

fn poll_delays(effects: &[Effect]) -> Vec<u64> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::ScheduleTimer {
                timer: TimerKind::Poll,
                delay,
                ..
            } => Some(delay.as_millis() as u64),
            _ => None,
        })
        .collect()
}

// ═══════════════════════════════════════════════════════
// TIMELINES
// ═══════════════════════════════════════════════════════

/// Waiting for the environment, then polling, then the structural monitor
/// catches the surface before the next poll would.
#[tokio::test(start_paused = true)]
async fn test_monitor_beats_polling() {
    let host = Arc::new(SimulatedHost::new(late_surface(900, true)));
    let driver = AcquisitionDriver::new(host.clone());

    let outcome = driver.run(&EngineConfig::default()).await;
    let elapsed = host.elapsed_ms();

    match outcome {
        AcquisitionOutcome::Ready {
            bindings,
            status,
            timers_scheduled,
        } => {
            assert!(!bindings.is_empty());
            assert!(status.system_ready);
            // polls at 150, 250, 430, 754 plus one settle timer
            assert_eq!(timers_scheduled, 5);
        }
        other => panic!("expected ready, got {other:?}"),
    }
    assert!((900..1337).contains(&elapsed), "ready at {elapsed}ms");
}

/// Without a structure feed, the first poll after the surface appears wins.
#[tokio::test(start_paused = true)]
async fn test_polling_alone_reaches_ready() {
    let host = Arc::new(SimulatedHost::new(late_surface(900, false)));
    let driver = AcquisitionDriver::new(host.clone());

    let outcome = driver.run(&EngineConfig::default()).await;
    assert!(outcome.is_ready());
    // 150 + 100 + 180 + 324 + 583
    let elapsed = host.elapsed_ms();
    assert!((1337..=1341).contains(&elapsed), "ready at {elapsed}ms");
}

#[tokio::test(start_paused = true)]
async fn test_constrained_context_gives_up_quickly() {
    let host = Arc::new(SimulatedHost::new(Scenario::never_ready()));
    let driver = AcquisitionDriver::new(host.clone());

    let outcome = driver.run(&EngineConfig::constrained()).await;
    match outcome {
        AcquisitionOutcome::Failed { attempts, status } => {
            assert_eq!(attempts, 1);
            assert!(!status.library_loaded);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(host.elapsed_ms() <= 101);
}

#[tokio::test(start_paused = true)]
async fn test_unbound_surface_exhausts_budget() {
    let host = Arc::new(SimulatedHost::new(Scenario::immediately_ready(
        ScriptedSurface::new("orphan").bound_at(None),
    )));
    let driver = AcquisitionDriver::new(host);
    let config = EngineConfig {
        max_attempts: 4,
        ..EngineConfig::default()
    };
    match driver.run(&config).await {
        AcquisitionOutcome::Failed { attempts, status } => {
            assert_eq!(attempts, 4);
            assert!(status.surface_detected);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

// ═══════════════════════════════════════════════════════
// ENGINE START
// ═══════════════════════════════════════════════════════

/// A start issued while the first is still polling is ignored; the first
/// run keeps going and reaches READY.
#[tokio::test(start_paused = true)]
async fn test_second_start_is_ignored_while_first_runs() {
    let host = Arc::new(SimulatedHost::new(late_surface(3_000, false)));
    let engine = EngineFactory::new()
        .handle(host, EngineOptions::default())
        .unwrap();

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(engine.start().await, AcquisitionOutcome::AlreadyRunning);

    let first = first.await.unwrap();
    assert!(first.is_ready(), "first start was superseded: {first:?}");
    assert!(engine.acquisition_status().system_ready);
    assert!(engine.start().await.is_ready());
}

// ═══════════════════════════════════════════════════════
// PURE MACHINE WALK
// ═══════════════════════════════════════════════════════

/// The same timeline as `test_monitor_beats_polling`, driven by hand.
#[tokio::test(start_paused = true)]
async fn test_machine_walk_matches_backoff() {
    let host = SimulatedHost::new(late_surface(900, false));
    let config = EngineConfig::default();
    let mut machine = AcquisitionMachine::new(config.clone());

    machine.step(AcquisitionEvent::Start);
    let report: ProbeReport = surface_sentinel::acquisition::probe(&host).await;
    assert_eq!(
        machine.step(AcquisitionEvent::ProbeCompleted(report)),
        vec![Effect::AwaitEnvironment]
    );
    assert_eq!(machine.state(), AcquisitionState::WaitingEnvironment);

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    machine.step(AcquisitionEvent::EnvironmentReady);
    let report = surface_sentinel::acquisition::probe(&host).await;
    let mut delays = poll_delays(&machine.step(AcquisitionEvent::ProbeCompleted(report)));

    for _ in 0..3 {
        let epoch = machine.epoch();
        machine.step(AcquisitionEvent::TimerFired {
            epoch,
            timer: TimerKind::Poll,
        });
        let report = surface_sentinel::acquisition::probe(&host).await;
        delays.extend(poll_delays(
            &machine.step(AcquisitionEvent::ProbeCompleted(report)),
        ));
    }

    let expected: Vec<u64> = (0..4)
        .map(|n| backoff::delay_for(&config, n).as_millis() as u64)
        .collect();
    assert_eq!(delays, expected);
    assert_eq!(delays, vec![100, 180, 324, 583]);
    assert_eq!(machine.state(), AcquisitionState::Polling);
}

/// A probe needs no timers, so a plain blocking executor is enough.
#[test]
fn test_single_probe_outside_runtime() {
    let host = SimulatedHost::new(Scenario::immediately_ready(ScriptedSurface::new("s")));
    let report = tokio_test::block_on(surface_sentinel::acquisition::probe(&host));
    assert!(report.is_ready());
    assert_eq!(report.bindings().map(|b| b.len()), Some(1));
}
