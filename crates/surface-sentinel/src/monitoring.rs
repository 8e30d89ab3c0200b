//! Runtime monitoring: host error log, performance metrics, report sinks.
//!
//! Hosts forward uncaught page errors, unhandled rejections and failed
//! resource loads to [`crate::EngineHandle::record_error`]. Emergency reports
//! can be forwarded to an external monitoring service through a
//! [`ReportSink`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::RecoveryReport;
use crate::types::SentinelResult;

/// Host errors kept in the log.
pub const ERROR_LOG_CAPACITY: usize = 100;

/// Where a host error was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorSource {
    GlobalError,
    UnhandledRejection,
    ResourceError,
}

impl ErrorSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSource::GlobalError => "global-error",
            ErrorSource::UnhandledRejection => "unhandled-rejection",
            ErrorSource::ResourceError => "resource-error",
        }
    }
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One error reported by the host outside any engine operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostError {
    pub timestamp: DateTime<Utc>,
    pub source: ErrorSource,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default)]
    pub context: Value,
}

impl HostError {
    pub fn new(source: ErrorSource, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            message: message.into(),
            stack: None,
            context: Value::Null,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Bounded log of host errors, oldest first.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: VecDeque<HostError>,
    total: u64,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: HostError) {
        if self.entries.len() == ERROR_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(error);
        self.total += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Errors seen since start, including those evicted from the log.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn entries(&self) -> Vec<HostError> {
        self.entries.iter().cloned().collect()
    }
}

/// Snapshot attached to status queries and emergency reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub uptime_ms: u64,
    pub recovery_attempts: u32,
    pub host_errors: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recovery_ms: Option<u64>,
}

/// Destination for emergency reports beyond the local store.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send(&self, report: &RecoveryReport) -> SentinelResult<()>;
}

/// Sink that keeps every report in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<RecoveryReport>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<RecoveryReport> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn send(&self, report: &RecoveryReport) -> SentinelResult<()> {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_log_is_bounded() {
        let mut log = ErrorLog::new();
        for i in 0..(ERROR_LOG_CAPACITY + 5) {
            log.push(HostError::new(ErrorSource::GlobalError, format!("boom {i}")));
        }
        assert_eq!(log.len(), ERROR_LOG_CAPACITY);
        assert_eq!(log.total(), ERROR_LOG_CAPACITY as u64 + 5);
        assert_eq!(log.entries()[0].message, "boom 5");
    }

    #[test]
    fn test_host_error_serde() {
        let error = HostError::new(ErrorSource::ResourceError, "Resource loading failed")
            .with_context(json!({ "tagName": "SCRIPT", "src": "fabric.min.js" }));
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["source"], "resource-error");
        assert!(json.get("stack").is_none());
        let back: HostError = serde_json::from_value(json).unwrap();
        assert_eq!(back, error);
    }
}
