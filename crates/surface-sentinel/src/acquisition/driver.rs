//! Async executor for the acquisition machine.
//!
//! Probes run inline so they never overlap. Timers and the environment wait
//! are spawned tasks posting events back on an mpsc channel. A watch channel
//! carries the run generation: starting a newer run cancels the older one at
//! its next suspension point.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::machine::{AcquisitionEvent, AcquisitionMachine, AcquisitionState, Effect};
use super::monitor::StructuralMonitor;
use super::probe::probe;
use crate::config::EngineConfig;
use crate::host::Host;
use crate::types::{AcquisitionStatus, SentinelError, SentinelResult, SurfaceBinding};

/// How one acquisition run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcquisitionOutcome {
    Ready {
        bindings: Vec<SurfaceBinding>,
        status: AcquisitionStatus,
        timers_scheduled: u32,
    },
    Failed {
        status: AcquisitionStatus,
        attempts: u32,
    },
    /// A newer run superseded this one.
    Cancelled,
    /// Another start was still running; this one was ignored.
    AlreadyRunning,
}

impl AcquisitionOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, AcquisitionOutcome::Ready { .. })
    }

    pub fn status(&self) -> AcquisitionStatus {
        match self {
            AcquisitionOutcome::Ready { status, .. } | AcquisitionOutcome::Failed { status, .. } => {
                *status
            }
            AcquisitionOutcome::Cancelled | AcquisitionOutcome::AlreadyRunning => {
                AcquisitionStatus::default()
            }
        }
    }

    pub fn into_result(self) -> SentinelResult<Vec<SurfaceBinding>> {
        match self {
            AcquisitionOutcome::Ready { bindings, .. } => Ok(bindings),
            AcquisitionOutcome::Failed { status, attempts } => {
                Err(SentinelError::AcquisitionExhausted { attempts, status })
            }
            AcquisitionOutcome::Cancelled => Err(SentinelError::Cancelled),
            AcquisitionOutcome::AlreadyRunning => Err(SentinelError::AcquisitionInProgress),
        }
    }
}

/// Runs acquisitions against one host.
pub struct AcquisitionDriver {
    host: Arc<dyn Host>,
    generation: watch::Sender<u64>,
}

impl AcquisitionDriver {
    pub fn new(host: Arc<dyn Host>) -> Self {
        let (generation, _) = watch::channel(0);
        Self { host, generation }
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    /// Cancel whatever run is in flight.
    pub fn cancel(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// Acquire with the given budget. Supersedes any run already in flight.
    pub async fn run(&self, config: &EngineConfig) -> AcquisitionOutcome {
        self.generation.send_modify(|g| *g += 1);
        let mine = *self.generation.borrow();
        let mut cancel = self.generation.subscribe();
        let run = Run::new(self.host.clone(), config.clone());
        tracing::debug!("Acquisition run {mine} started");
        let outcome = run.execute(mine, &mut cancel).await;
        match &outcome {
            AcquisitionOutcome::Ready { bindings, .. } => {
                tracing::info!("Acquisition run {mine} ready with {} bindings", bindings.len())
            }
            AcquisitionOutcome::Failed { attempts, .. } => {
                tracing::warn!("Acquisition run {mine} failed after {attempts} attempts")
            }
            AcquisitionOutcome::Cancelled | AcquisitionOutcome::AlreadyRunning => {
                tracing::info!("Acquisition run {mine} cancelled")
            }
        }
        outcome
    }
}

struct Run {
    host: Arc<dyn Host>,
    machine: AcquisitionMachine,
    events_tx: mpsc::UnboundedSender<AcquisitionEvent>,
    events_rx: mpsc::UnboundedReceiver<AcquisitionEvent>,
    tasks: Vec<JoinHandle<()>>,
    monitor: Option<StructuralMonitor>,
    surfaces_rx: Option<mpsc::UnboundedReceiver<usize>>,
}

impl Run {
    fn new(host: Arc<dyn Host>, config: EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            host,
            machine: AcquisitionMachine::new(config),
            events_tx,
            events_rx,
            tasks: Vec::new(),
            monitor: None,
            surfaces_rx: None,
        }
    }

    async fn execute(mut self, mine: u64, cancel: &mut watch::Receiver<u64>) -> AcquisitionOutcome {
        let mut queue: VecDeque<Effect> = self.machine.step(AcquisitionEvent::Start).into();

        loop {
            while let Some(effect) = queue.pop_front() {
                if let Some(outcome) = self.perform(effect, &mut queue, mine, cancel).await {
                    self.shutdown();
                    return outcome;
                }
            }

            let event = tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() != mine {
                        self.shutdown();
                        return AcquisitionOutcome::Cancelled;
                    }
                    continue;
                }
                Some(event) = self.events_rx.recv() => event,
                Some(count) = next_addition(&mut self.surfaces_rx) => {
                    AcquisitionEvent::SurfacesAdded(count)
                }
            };
            queue.extend(self.machine.step(event));
        }
    }

    async fn perform(
        &mut self,
        effect: Effect,
        queue: &mut VecDeque<Effect>,
        mine: u64,
        cancel: &mut watch::Receiver<u64>,
    ) -> Option<AcquisitionOutcome> {
        match effect {
            Effect::RunProbe(cause) => {
                tracing::debug!("Probing host ({cause:?})");
                let report = tokio::select! {
                    report = probe(self.host.as_ref()) => report,
                    _ = superseded(cancel, mine) => return Some(AcquisitionOutcome::Cancelled),
                };
                queue.extend(self.machine.step(AcquisitionEvent::ProbeCompleted(report)));
            }
            Effect::AwaitEnvironment => {
                tracing::debug!("Waiting for host environment");
                let host = self.host.clone();
                let tx = self.events_tx.clone();
                self.tasks.push(tokio::spawn(async move {
                    host.wait_environment_ready().await;
                    let _ = tx.send(AcquisitionEvent::EnvironmentReady);
                }));
            }
            Effect::AttachMonitor => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.monitor = StructuralMonitor::attach(self.host.as_ref(), tx);
                self.surfaces_rx = self.monitor.as_ref().map(|_| rx);
            }
            Effect::DetachMonitor => {
                if let Some(monitor) = self.monitor.take() {
                    monitor.disconnect();
                }
                self.surfaces_rx = None;
            }
            Effect::ScheduleTimer { timer, delay, epoch } => {
                tracing::debug!("Scheduling {timer:?} timer in {delay:?}");
                let tx = self.events_tx.clone();
                self.tasks.retain(|t| !t.is_finished());
                self.tasks.push(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(AcquisitionEvent::TimerFired { epoch, timer });
                }));
            }
            Effect::EmitReady { bindings } => {
                debug_assert_eq!(self.machine.state(), AcquisitionState::Ready);
                return Some(AcquisitionOutcome::Ready {
                    bindings,
                    status: self.machine.status(),
                    timers_scheduled: self.machine.timers_scheduled(),
                });
            }
            Effect::EmitFailed { status, attempts } => {
                return Some(AcquisitionOutcome::Failed { status, attempts });
            }
        }
        None
    }

    fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.disconnect();
        }
    }
}

async fn next_addition(rx: &mut Option<mpsc::UnboundedReceiver<usize>>) -> Option<usize> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Resolves once the generation moves past `mine`.
async fn superseded(cancel: &mut watch::Receiver<u64>, mine: u64) {
    loop {
        if cancel.changed().await.is_err() {
            return;
        }
        if *cancel.borrow() != mine {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Scenario, ScriptedSurface, SimulatedHost};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_ready_without_timers() {
        let host = Arc::new(SimulatedHost::new(Scenario::immediately_ready(
            ScriptedSurface::new("s"),
        )));
        let driver = AcquisitionDriver::new(host);
        match driver.run(&EngineConfig::default()).await {
            AcquisitionOutcome::Ready {
                bindings,
                timers_scheduled,
                status,
            } => {
                assert_eq!(bindings.len(), 1);
                assert_eq!(timers_scheduled, 0);
                assert!(status.system_ready);
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_budget() {
        let host = Arc::new(SimulatedHost::new(Scenario::never_ready()));
        let driver = AcquisitionDriver::new(host);
        let config = EngineConfig {
            max_attempts: 3,
            ..EngineConfig::default()
        };
        let outcome = driver.run(&config).await;
        assert_eq!(
            outcome,
            AcquisitionOutcome::Failed {
                status: AcquisitionStatus::derive(true, false, false),
                attempts: 3,
            }
        );
        assert!(matches!(
            outcome.into_result(),
            Err(SentinelError::AcquisitionExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_run_cancels_older() {
        let host = Arc::new(SimulatedHost::new(Scenario::never_ready()));
        let driver = Arc::new(AcquisitionDriver::new(host));

        let first = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.run(&EngineConfig::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        driver.cancel();

        assert_eq!(first.await.unwrap(), AcquisitionOutcome::Cancelled);
    }
}
