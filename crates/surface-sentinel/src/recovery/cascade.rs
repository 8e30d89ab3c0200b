//! Ordered recovery cascade with a single-flight guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::strategy::{RecoveryStrategy, StrategyExecutor, StrategyOutcome};
use crate::types::{DegradationLevel, SurfaceBinding};

/// Attempts kept in the log.
const ATTEMPT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptResult {
    Restored,
    Degraded { level: DegradationLevel },
    Failed { reason: String },
}

/// One timed strategy execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub started_at: DateTime<Utc>,
    pub strategy: RecoveryStrategy,
    pub elapsed_ms: u64,
    pub result: AttemptResult,
}

/// Result of one call to [`RecoveryCascade::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum CascadeOutcome {
    Restored {
        strategy: RecoveryStrategy,
        bindings: Vec<SurfaceBinding>,
    },
    Degraded {
        strategy: RecoveryStrategy,
        level: DegradationLevel,
    },
    Exhausted,
    /// Another run held the guard; this trigger was dropped.
    AlreadyInProgress,
}

pub struct RecoveryCascade {
    order: Mutex<Vec<RecoveryStrategy>>,
    in_progress: AtomicBool,
    attempts: Mutex<Vec<AttemptRecord>>,
}

/// Holds the cascade's single-flight flag; clears it however the run ends.
pub struct RecoveryGuard<'a>(&'a AtomicBool);

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RecoveryCascade {
    fn default() -> Self {
        Self::with_order(RecoveryStrategy::ORDER.to_vec())
    }
}

impl RecoveryCascade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(order: Vec<RecoveryStrategy>) -> Self {
        Self {
            order: Mutex::new(order),
            in_progress: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn order(&self) -> Vec<RecoveryStrategy> {
        lock(&self.order).clone()
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Remove strategies from the order. Returns how many were removed.
    pub fn prune(&self, excluded: &[RecoveryStrategy]) -> usize {
        let mut order = lock(&self.order);
        let before = order.len();
        order.retain(|s| !excluded.contains(s));
        let removed = before - order.len();
        if removed > 0 {
            tracing::warn!("Pruned {removed} strategies from the cascade: {:?}", excluded);
        }
        removed
    }

    /// Timed attempts, oldest first.
    pub fn attempts(&self) -> Vec<AttemptRecord> {
        lock(&self.attempts).clone()
    }

    /// Claim the single-flight flag, or `None` while another run holds it.
    pub fn try_begin(&self) -> Option<RecoveryGuard<'_>> {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(RecoveryGuard(&self.in_progress))
        }
    }

    /// Run strategies in order until one succeeds.
    ///
    /// Strategy errors are logged and the cascade moves on. Only exhaustion
    /// of the whole order is reported to the caller.
    pub async fn run(&self, executor: &dyn StrategyExecutor, budget: u32) -> CascadeOutcome {
        let Some(guard) = self.try_begin() else {
            tracing::warn!("Recovery already in progress, dropping trigger");
            return CascadeOutcome::AlreadyInProgress;
        };
        self.run_guarded(&guard, executor, budget).await
    }

    /// [`run`](Self::run) for a caller that already holds the flag.
    pub async fn run_guarded(
        &self,
        guard: &RecoveryGuard<'_>,
        executor: &dyn StrategyExecutor,
        budget: u32,
    ) -> CascadeOutcome {
        debug_assert!(std::ptr::eq(guard.0, &self.in_progress));

        for strategy in self.order() {
            tracing::info!("Trying recovery strategy {strategy}");
            let started_at = Utc::now();
            let start = Instant::now();
            let result = executor.execute(strategy, budget).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            let (attempt, outcome) = match result {
                Ok(StrategyOutcome::Restored(bindings)) => (
                    AttemptResult::Restored,
                    Some(CascadeOutcome::Restored { strategy, bindings }),
                ),
                Ok(StrategyOutcome::Degraded(level)) => (
                    AttemptResult::Degraded { level },
                    Some(CascadeOutcome::Degraded { strategy, level }),
                ),
                Err(e) => {
                    tracing::warn!("Recovery strategy {strategy} failed after {elapsed_ms}ms: {e}");
                    (AttemptResult::Failed { reason: e.to_string() }, None)
                }
            };
            self.log(AttemptRecord {
                started_at,
                strategy,
                elapsed_ms,
                result: attempt,
            });
            if let Some(outcome) = outcome {
                tracing::info!("Recovery strategy {strategy} succeeded in {elapsed_ms}ms");
                return outcome;
            }
        }

        tracing::error!("All recovery strategies failed");
        CascadeOutcome::Exhausted
    }

    fn log(&self, record: AttemptRecord) {
        let mut attempts = lock(&self.attempts);
        if attempts.len() == ATTEMPT_LOG_CAPACITY {
            attempts.remove(0);
        }
        attempts.push(record);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
