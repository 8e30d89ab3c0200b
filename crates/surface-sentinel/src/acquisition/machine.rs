//! Acquisition state machine as a pure transition function.
//!
//! `AcquisitionMachine::step` takes one event and returns the effects the
//! driver must perform. It never touches the host, a clock, or a runtime, so
//! every transition can be exercised in plain unit tests.
//!
//! ```text
//! Unstarted -> Probing -> Ready
//!                      -> WaitingEnvironment -> Probing
//!                      -> Polling -> Ready | Failed
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::probe::ProbeReport;
use crate::backoff;
use crate::config::EngineConfig;
use crate::types::{AcquisitionStatus, SurfaceBinding};

/// Where the acquisition currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    Unstarted,
    Probing,
    WaitingEnvironment,
    Polling,
    Ready,
    Failed,
}

impl AcquisitionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AcquisitionState::Ready | AcquisitionState::Failed)
    }
}

/// Which detection signal asked for a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeCause {
    Initial,
    Environment,
    Poll,
    Settle,
}

/// Timers the machine can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Backoff sleep between polling attempts.
    Poll,
    /// Settle delay after the structural monitor saw a new surface.
    Settle,
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    Start,
    ProbeCompleted(ProbeReport),
    EnvironmentReady,
    SurfacesAdded(usize),
    TimerFired { epoch: u64, timer: TimerKind },
    /// Discard the current run and acquire from scratch.
    Restart,
}

/// Side effects the driver must carry out, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RunProbe(ProbeCause),
    AwaitEnvironment,
    AttachMonitor,
    DetachMonitor,
    ScheduleTimer {
        timer: TimerKind,
        delay: Duration,
        epoch: u64,
    },
    EmitReady {
        bindings: Vec<SurfaceBinding>,
    },
    EmitFailed {
        status: AcquisitionStatus,
        attempts: u32,
    },
}

/// State, counters and flags of one acquisition.
#[derive(Debug, Clone)]
pub struct AcquisitionMachine {
    config: EngineConfig,
    state: AcquisitionState,
    attempt: u32,
    epoch: u64,
    in_flight: Option<ProbeCause>,
    pending: Option<ProbeCause>,
    monitor_attached: bool,
    last_status: AcquisitionStatus,
    timers_scheduled: u32,
}

impl AcquisitionMachine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: AcquisitionState::Unstarted,
            attempt: 0,
            epoch: 0,
            in_flight: None,
            pending: None,
            monitor_attached: false,
            last_status: AcquisitionStatus::default(),
            timers_scheduled: 0,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Completed poll attempts in the current run.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn status(&self) -> AcquisitionStatus {
        self.last_status
    }

    pub fn monitor_attached(&self) -> bool {
        self.monitor_attached
    }

    /// Timers requested since construction, across restarts.
    pub fn timers_scheduled(&self) -> u32 {
        self.timers_scheduled
    }

    /// Apply one event and return the effects to perform.
    pub fn step(&mut self, event: AcquisitionEvent) -> Vec<Effect> {
        match event {
            AcquisitionEvent::Start => self.on_start(),
            AcquisitionEvent::ProbeCompleted(report) => self.on_probe_completed(report),
            AcquisitionEvent::EnvironmentReady => self.on_environment_ready(),
            AcquisitionEvent::SurfacesAdded(count) => self.on_surfaces_added(count),
            AcquisitionEvent::TimerFired { epoch, timer } => self.on_timer(epoch, timer),
            AcquisitionEvent::Restart => self.on_restart(),
        }
    }

    fn on_start(&mut self) -> Vec<Effect> {
        if self.state != AcquisitionState::Unstarted {
            tracing::debug!("Ignoring re-entrant start in state {:?}", self.state);
            return Vec::new();
        }
        self.begin_probe(ProbeCause::Initial)
    }

    fn on_restart(&mut self) -> Vec<Effect> {
        self.epoch += 1;
        self.attempt = 0;
        self.in_flight = None;
        self.pending = None;
        let mut effects = self.detach_monitor();
        tracing::debug!("Acquisition restarted (epoch {})", self.epoch);
        effects.extend(self.begin_probe(ProbeCause::Initial));
        effects
    }

    fn on_probe_completed(&mut self, report: ProbeReport) -> Vec<Effect> {
        let Some(cause) = self.in_flight.take() else {
            tracing::debug!("Ignoring probe result with no probe in flight");
            return Vec::new();
        };
        self.last_status = report.status;

        if let Some(bindings) = report.bindings() {
            self.state = AcquisitionState::Ready;
            self.pending = None;
            let mut effects = self.detach_monitor();
            effects.push(Effect::EmitReady {
                bindings: bindings.to_vec(),
            });
            return effects;
        }

        let mut effects = match cause {
            ProbeCause::Initial if !report.status.environment_ready => {
                self.state = AcquisitionState::WaitingEnvironment;
                vec![Effect::AwaitEnvironment]
            }
            ProbeCause::Initial | ProbeCause::Environment => self.begin_polling(),
            ProbeCause::Poll => {
                self.attempt += 1;
                if self.attempt >= self.config.max_attempts {
                    return self.fail();
                }
                vec![self.schedule(TimerKind::Poll, backoff::delay_for(&self.config, self.attempt))]
            }
            ProbeCause::Settle => Vec::new(),
        };

        if self.state == AcquisitionState::Polling {
            if let Some(next) = self.pending.take() {
                effects.extend(self.begin_probe(next));
            }
        }
        effects
    }

    fn on_environment_ready(&mut self) -> Vec<Effect> {
        if self.state != AcquisitionState::WaitingEnvironment {
            return Vec::new();
        }
        tracing::debug!("Environment ready, re-probing");
        self.begin_probe(ProbeCause::Environment)
    }

    fn on_surfaces_added(&mut self, count: usize) -> Vec<Effect> {
        if !self.monitor_attached || self.state.is_terminal() || count == 0 {
            return Vec::new();
        }
        vec![self.schedule(TimerKind::Settle, self.config.settle_delay())]
    }

    fn on_timer(&mut self, epoch: u64, timer: TimerKind) -> Vec<Effect> {
        if epoch != self.epoch {
            tracing::debug!("Dropping stale {timer:?} timer from epoch {epoch}");
            return Vec::new();
        }
        if self.state != AcquisitionState::Polling {
            return Vec::new();
        }
        let cause = match timer {
            TimerKind::Poll => ProbeCause::Poll,
            TimerKind::Settle => ProbeCause::Settle,
        };
        if self.in_flight.is_some() {
            // A poll outranks a settle re-probe: losing it would stall the loop.
            self.pending = match (self.pending, cause) {
                (Some(ProbeCause::Poll), _) | (_, ProbeCause::Poll) => Some(ProbeCause::Poll),
                _ => Some(cause),
            };
            return Vec::new();
        }
        self.begin_probe(cause)
    }

    fn begin_probe(&mut self, cause: ProbeCause) -> Vec<Effect> {
        if !matches!(cause, ProbeCause::Poll | ProbeCause::Settle) {
            self.state = AcquisitionState::Probing;
        }
        self.in_flight = Some(cause);
        vec![Effect::RunProbe(cause)]
    }

    fn begin_polling(&mut self) -> Vec<Effect> {
        self.state = AcquisitionState::Polling;
        let mut effects = Vec::new();
        if !self.monitor_attached {
            self.monitor_attached = true;
            effects.push(Effect::AttachMonitor);
        }
        effects.push(self.schedule(TimerKind::Poll, backoff::delay_for(&self.config, self.attempt)));
        effects
    }

    fn fail(&mut self) -> Vec<Effect> {
        self.state = AcquisitionState::Failed;
        self.pending = None;
        let mut effects = self.detach_monitor();
        tracing::warn!(
            "Acquisition failed after {} attempts: {:?}",
            self.attempt,
            self.last_status
        );
        effects.push(Effect::EmitFailed {
            status: self.last_status,
            attempts: self.attempt,
        });
        effects
    }

    fn detach_monitor(&mut self) -> Vec<Effect> {
        if self.monitor_attached {
            self.monitor_attached = false;
            vec![Effect::DetachMonitor]
        } else {
            Vec::new()
        }
    }

    fn schedule(&mut self, timer: TimerKind, delay: Duration) -> Effect {
        self.timers_scheduled += 1;
        Effect::ScheduleTimer {
            timer,
            delay,
            epoch: self.epoch,
        }
    }
}
