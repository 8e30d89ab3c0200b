//! Failure pattern recorder.
//!
//! Keeps the last 50 failures and flags a recurrence when the most recent
//! window (up to 5 records, at least 3) all share one failure type.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;

use super::strategy::RecoveryStrategy;
use crate::types::{FailureRecord, FailureType, Severity};

pub const HISTORY_CAPACITY: usize = 50;
const WINDOW: usize = 5;
const MIN_RECURRENCE: usize = 3;

/// A detected run of identical failures.
#[derive(Debug, Clone, PartialEq)]
pub struct Recurrence {
    pub failure_type: FailureType,
    /// Records in the inspected window.
    pub occurrences: usize,
    /// Strategies to drop from the cascade for this type.
    pub excluded: Vec<RecoveryStrategy>,
}

#[derive(Debug, Default)]
pub struct PatternRecorder {
    history: VecDeque<FailureRecord>,
    exclusions: HashMap<FailureType, Vec<RecoveryStrategy>>,
}

impl PatternRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `strategy` as known to fail for `failure_type`. Empty until called.
    pub fn exclude(&mut self, failure_type: FailureType, strategy: RecoveryStrategy) {
        let list = self.exclusions.entry(failure_type).or_default();
        if !list.contains(&strategy) {
            list.push(strategy);
        }
    }

    pub fn excluded_for(&self, failure_type: &FailureType) -> &[RecoveryStrategy] {
        self.exclusions
            .get(failure_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append a record and analyze the recent window.
    pub fn record(
        &mut self,
        failure_type: FailureType,
        context: serde_json::Value,
        severity: Severity,
    ) -> Option<Recurrence> {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(FailureRecord {
            timestamp: Utc::now(),
            failure_type,
            context,
            emergency_level_at_time: severity,
        });
        self.analyze()
    }

    fn analyze(&self) -> Option<Recurrence> {
        if self.history.len() < MIN_RECURRENCE {
            return None;
        }
        let window: Vec<&FailureRecord> = self.history.iter().rev().take(WINDOW).collect();
        let first = &window[0].failure_type;
        if !window.iter().all(|r| &r.failure_type == first) {
            return None;
        }
        tracing::warn!("Recurring failure: {first} in each of the last {} records", window.len());
        Some(Recurrence {
            failure_type: first.clone(),
            occurrences: window.len(),
            excluded: self.excluded_for(first).to_vec(),
        })
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<FailureRecord> {
        self.history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_three_identical_failures_recur() {
        let mut r = PatternRecorder::new();
        assert!(r.record("fabric-load-failed".into(), Value::Null, Severity::Normal).is_none());
        assert!(r.record("fabric-load-failed".into(), Value::Null, Severity::Normal).is_none());
        let rec = r
            .record("fabric-load-failed".into(), Value::Null, Severity::Normal)
            .expect("recurrence");
        assert_eq!(rec.failure_type, FailureType::LibraryLoadFailed);
        assert_eq!(rec.occurrences, 3);
        assert!(rec.excluded.is_empty());
    }

    #[test]
    fn test_mixed_window_does_not_recur() {
        let mut r = PatternRecorder::new();
        r.record(FailureType::SystemCrash, Value::Null, Severity::Normal);
        r.record(FailureType::InitializationFailed, Value::Null, Severity::Normal);
        r.record(FailureType::InitializationFailed, Value::Null, Severity::Normal);
        assert!(r
            .record(FailureType::InitializationFailed, Value::Null, Severity::Normal)
            .is_none());
        // the crash falls out of the five-record window on the next append
        assert!(r
            .record(FailureType::InitializationFailed, Value::Null, Severity::Normal)
            .is_none());
        assert!(r
            .record(FailureType::InitializationFailed, Value::Null, Severity::Normal)
            .is_some());
    }

    #[test]
    fn test_ring_buffer_capacity() {
        let mut r = PatternRecorder::new();
        for i in 0..60 {
            r.record(FailureType::Other(format!("t{i}")), Value::Null, Severity::Normal);
        }
        assert_eq!(r.len(), HISTORY_CAPACITY);
        assert_eq!(r.history()[0].failure_type, FailureType::Other("t10".into()));
    }

    #[test]
    fn test_exclusions_reported() {
        let mut r = PatternRecorder::new();
        r.exclude(FailureType::SystemCrash, RecoveryStrategy::LibraryReload);
        r.exclude(FailureType::SystemCrash, RecoveryStrategy::LibraryReload);
        for _ in 0..3 {
            r.record(FailureType::SystemCrash, Value::Null, Severity::Emergency);
        }
        assert_eq!(r.excluded_for(&FailureType::SystemCrash), &[RecoveryStrategy::LibraryReload]);
    }
}
