//! Recovery side: cascade, strategies, degradation, failure patterns, notices.

pub mod cascade;
pub mod degradation;
pub mod notice;
pub mod patterns;
pub mod severity;
pub mod strategy;

pub use cascade::{AttemptRecord, AttemptResult, CascadeOutcome, RecoveryCascade, RecoveryGuard};
pub use degradation::DegradationManager;
pub use notice::{Notice, NoticeAction, Notifier, RecordingNotifier, TracingNotifier};
pub use patterns::{PatternRecorder, Recurrence};
pub use severity::{degradation_for, exhaustion_level, severity_for};
pub use strategy::{HostStrategies, RecoveryStrategy, StrategyExecutor, StrategyOutcome};
