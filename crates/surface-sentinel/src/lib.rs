//! surface-sentinel: resilient acquisition of asynchronously loaded render
//! surfaces, coordinate capture, and a cascading recovery/degradation engine.

pub mod acquisition;
pub mod backoff;
pub mod capture;
pub mod config;
pub mod engine;
pub mod events;
pub mod host;
pub mod monitoring;
pub mod recovery;
pub mod types;

pub use acquisition::{AcquisitionDriver, AcquisitionOutcome, AcquisitionState};
pub use capture::{session_id, CaptureEngine};
pub use config::EngineConfig;
pub use engine::{
    EngineFactory, EngineHandle, EngineOptions, RecoveryOutcome, RecoveryReport, SystemStatus,
};
pub use events::{EventBus, SentinelEvent};
pub use host::{Host, KeyValueStore, MemoryStore, Scenario, ScriptedSurface, SimulatedHost};
pub use monitoring::{ErrorSource, HostError, PerformanceMetrics, RecordingSink, ReportSink};
pub use recovery::{Notifier, RecordingNotifier, RecoveryStrategy, TracingNotifier};
pub use types::*;
