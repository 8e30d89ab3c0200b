//! Sentinel event bus: typed events from acquisition, capture and recovery.
//!
//! The bus is a `tokio::sync::broadcast` channel carrying [`SentinelEvent`]
//! values. With no subscribers, events are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::monitoring::ErrorSource;
use crate::recovery::strategy::RecoveryStrategy;
use crate::types::{
    AcquisitionStatus, CaptureRecord, DegradationLevel, FailureType, Severity,
};

/// Every event the engine emits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SentinelEvent {
    // ── Acquisition ───────────────────────
    /// Acquisition reached READY.
    Ready { binding_count: usize },
    /// Acquisition exhausted its polling budget.
    InitializationFailed {
        status: AcquisitionStatus,
        attempts: u32,
    },

    // ── Capture ───────────────────────────
    CaptureProduced { record: Box<CaptureRecord> },

    // ── Recovery ──────────────────────────
    RecoveryStarted {
        failure_type: FailureType,
        severity: Severity,
    },
    RecoverySucceeded {
        strategy: RecoveryStrategy,
        elapsed_ms: u64,
    },
    /// A fallback strategy kept the system usable at reduced service.
    RecoveryDegraded {
        strategy: RecoveryStrategy,
        level: DegradationLevel,
    },
    RecoveryExhausted { failure_type: FailureType },
    DegradationApplied { level: DegradationLevel },
    SeverityChanged { from: Severity, to: Severity },
    RecurringFailure {
        failure_type: FailureType,
        occurrences: usize,
    },

    // ── Monitoring ────────────────────────
    /// The host reported an error outside any engine operation.
    HostErrorRecorded { source: ErrorSource, message: String },
}

/// Broadcast hub for [`SentinelEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<SentinelEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit to all subscribers. Silently ignored without subscribers.
    pub fn emit(&self, event: SentinelEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SentinelEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SentinelEvent::RecoveryStarted {
            failure_type: FailureType::LibraryLoadFailed,
            severity: Severity::Critical,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("RecoveryStarted"));
        assert!(json.contains("library-load-failed"));

        let parsed: SentinelEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(SentinelEvent::Ready { binding_count: 1 });
    }

    #[test]
    fn test_subscribe_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(SentinelEvent::DegradationApplied {
            level: DegradationLevel::Minimal,
        });
        match rx.try_recv().unwrap() {
            SentinelEvent::DegradationApplied { level } => {
                assert_eq!(level, DegradationLevel::Minimal)
            }
            other => panic!("wrong event {other:?}"),
        }
    }
}
