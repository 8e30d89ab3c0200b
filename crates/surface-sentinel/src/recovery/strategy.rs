//! Recovery strategies and their host-backed executor.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::acquisition::{probe, AcquisitionDriver};
use crate::config::EngineConfig;
use crate::host::Host;
use crate::types::{DegradationLevel, SentinelError, SentinelResult, SurfaceBinding};

/// One recovery strategy. Declaration order is cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategy {
    ImmediateReinit,
    DelayedReinit,
    LibraryReload,
    SurfaceRecreation,
    EmergencyMock,
    CriticalFallback,
}

impl RecoveryStrategy {
    pub const ORDER: [RecoveryStrategy; 6] = [
        RecoveryStrategy::ImmediateReinit,
        RecoveryStrategy::DelayedReinit,
        RecoveryStrategy::LibraryReload,
        RecoveryStrategy::SurfaceRecreation,
        RecoveryStrategy::EmergencyMock,
        RecoveryStrategy::CriticalFallback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStrategy::ImmediateReinit => "immediate-reinit",
            RecoveryStrategy::DelayedReinit => "delayed-reinit",
            RecoveryStrategy::LibraryReload => "library-reload",
            RecoveryStrategy::SurfaceRecreation => "surface-recreation",
            RecoveryStrategy::EmergencyMock => "emergency-mock",
            RecoveryStrategy::CriticalFallback => "critical-fallback",
        }
    }

    /// Fallback strategies keep the system usable without restoring it.
    pub fn is_fallback(self) -> bool {
        matches!(
            self,
            RecoveryStrategy::EmergencyMock | RecoveryStrategy::CriticalFallback
        )
    }

    fn failed(self, reason: impl Into<String>) -> SentinelError {
        SentinelError::RecoveryStrategyFailed {
            strategy: self.as_str().to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryStrategy {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate-reinit" => Ok(RecoveryStrategy::ImmediateReinit),
            "delayed-reinit" => Ok(RecoveryStrategy::DelayedReinit),
            "library-reload" | "fabric-reload" => Ok(RecoveryStrategy::LibraryReload),
            "surface-recreation" | "canvas-recreation" => Ok(RecoveryStrategy::SurfaceRecreation),
            "emergency-mock" => Ok(RecoveryStrategy::EmergencyMock),
            "critical-fallback" => Ok(RecoveryStrategy::CriticalFallback),
            other => Err(SentinelError::InvalidInput(format!(
                "unknown recovery strategy: {other}"
            ))),
        }
    }
}

/// What a successful strategy achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    /// Surfaces are bound again.
    Restored(Vec<SurfaceBinding>),
    /// Service continues at this degradation level.
    Degraded(DegradationLevel),
}

/// Runs one strategy. `budget` is the attempt budget for any re-acquisition.
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    async fn execute(
        &self,
        strategy: RecoveryStrategy,
        budget: u32,
    ) -> SentinelResult<StrategyOutcome>;
}

/// Executes strategies against a live [`Host`].
pub struct HostStrategies {
    host: Arc<dyn Host>,
    driver: Arc<AcquisitionDriver>,
    config: EngineConfig,
}

impl HostStrategies {
    pub fn new(driver: Arc<AcquisitionDriver>, config: EngineConfig) -> Self {
        Self {
            host: driver.host().clone(),
            driver,
            config,
        }
    }

    async fn immediate_reinit(
        &self,
        strategy: RecoveryStrategy,
        budget: u32,
    ) -> SentinelResult<StrategyOutcome> {
        if !self.host.library_loaded().await {
            return Err(strategy.failed("render-surface library not available"));
        }
        let config = EngineConfig {
            max_attempts: budget.max(1),
            ..self.config.clone()
        };
        self.driver
            .run(&config)
            .await
            .into_result()
            .map(StrategyOutcome::Restored)
            .map_err(|e| strategy.failed(e.to_string()))
    }

    /// Whether structural churn over the stability window stayed below threshold.
    async fn wait_for_stability(&self) -> bool {
        let before = self.host.mutation_count().await;
        tokio::time::sleep(self.config.stability_window()).await;
        let delta = self.host.mutation_count().await.saturating_sub(before);
        tracing::debug!(
            "{delta} mutations in the last {:?}",
            self.config.stability_window()
        );
        delta < self.config.stability_threshold
    }

    async fn wait_for_library(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.host.library_loaded().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.library_poll_interval()).await;
        }
    }

    async fn delayed_reinit(&self, budget: u32) -> SentinelResult<StrategyOutcome> {
        let strategy = RecoveryStrategy::DelayedReinit;
        if !self.wait_for_stability().await {
            tracing::warn!("Host structure still churning; continuing anyway");
        }
        if !self.wait_for_library(self.config.library_wait_timeout()).await {
            return Err(strategy.failed("library still missing after wait"));
        }
        self.immediate_reinit(strategy, budget).await
    }

    async fn library_reload(&self, budget: u32) -> SentinelResult<StrategyOutcome> {
        let strategy = RecoveryStrategy::LibraryReload;
        self.host.unload_library().await?;
        if !self.host.reload_library().await? {
            return Err(strategy.failed("host has no library loader"));
        }
        if !self.wait_for_library(self.config.library_wait_timeout()).await {
            return Err(strategy.failed("reloaded library never became available"));
        }
        self.immediate_reinit(strategy, budget).await
    }

    async fn surface_recreation(&self) -> SentinelResult<StrategyOutcome> {
        let strategy = RecoveryStrategy::SurfaceRecreation;
        let Some(container) = self.host.container().await else {
            return Err(strategy.failed("no design container"));
        };
        let disposed = self.host.dispose_surfaces().await?;
        tracing::debug!("Disposed {disposed} surfaces");

        let (width, height) = if container.width > 0.0 && container.height > 0.0 {
            (container.width, container.height)
        } else {
            (800.0, 600.0)
        };
        let element = self.host.create_surface(width, height).await?;
        if !self.host.library_loaded().await {
            return Err(strategy.failed("surface created but library unavailable to bind it"));
        }
        let instance = self.host.bind_instance(&element).await?;
        tracing::info!("Recreated surface {element} bound to {instance}");

        let report = probe(self.host.as_ref()).await;
        match report.bindings() {
            Some(bindings) => Ok(StrategyOutcome::Restored(bindings.to_vec())),
            None => Err(strategy.failed("recreated surface not visible to probe")),
        }
    }
}

#[async_trait]
impl StrategyExecutor for HostStrategies {
    async fn execute(
        &self,
        strategy: RecoveryStrategy,
        budget: u32,
    ) -> SentinelResult<StrategyOutcome> {
        match strategy {
            RecoveryStrategy::ImmediateReinit => self.immediate_reinit(strategy, budget).await,
            RecoveryStrategy::DelayedReinit => self.delayed_reinit(budget).await,
            RecoveryStrategy::LibraryReload => self.library_reload(budget).await,
            RecoveryStrategy::SurfaceRecreation => self.surface_recreation().await,
            RecoveryStrategy::EmergencyMock => Ok(StrategyOutcome::Degraded(DegradationLevel::Minimal)),
            RecoveryStrategy::CriticalFallback => {
                Ok(StrategyOutcome::Degraded(DegradationLevel::Critical))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Scenario, ScriptedSurface, SimulatedHost};

    fn strategies(scenario: Scenario) -> (HostStrategies, Arc<SimulatedHost>) {
        let host = Arc::new(SimulatedHost::new(scenario));
        let driver = Arc::new(AcquisitionDriver::new(host.clone()));
        (HostStrategies::new(driver, EngineConfig::default()), host)
    }

    #[test]
    fn test_strategy_names_and_aliases() {
        assert_eq!(
            "fabric-reload".parse::<RecoveryStrategy>().unwrap(),
            RecoveryStrategy::LibraryReload
        );
        assert_eq!(
            "canvas-recreation".parse::<RecoveryStrategy>().unwrap(),
            RecoveryStrategy::SurfaceRecreation
        );
        assert!("teleport".parse::<RecoveryStrategy>().is_err());
        assert_eq!(
            serde_json::to_string(&RecoveryStrategy::CriticalFallback).unwrap(),
            "\"critical-fallback\""
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_reinit_needs_library() {
        let (s, _) = strategies(Scenario::never_ready());
        let err = s
            .execute(RecoveryStrategy::ImmediateReinit, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::RecoveryStrategyFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_reinit_restores() {
        let (s, _) = strategies(Scenario::immediately_ready(ScriptedSurface::new("s")));
        match s.execute(RecoveryStrategy::ImmediateReinit, 5).await.unwrap() {
            StrategyOutcome::Restored(bindings) => assert_eq!(bindings.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_library_reload_without_loader_fails() {
        let (s, host) = strategies(Scenario::immediately_ready(ScriptedSurface::new("s")));
        assert!(s.execute(RecoveryStrategy::LibraryReload, 5).await.is_err());
        assert_eq!(host.reload_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_recreation_binds_new_surface() {
        let (s, _) = strategies(Scenario::default());
        match s.execute(RecoveryStrategy::SurfaceRecreation, 5).await.unwrap() {
            StrategyOutcome::Restored(bindings) => {
                assert_eq!(bindings.len(), 1);
                assert!(bindings[0].is_primary);
                assert_eq!(bindings[0].element.0, "recovery-surface-0");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallbacks_degrade() {
        let (s, _) = strategies(Scenario::never_ready());
        assert_eq!(
            s.execute(RecoveryStrategy::EmergencyMock, 1).await.unwrap(),
            StrategyOutcome::Degraded(DegradationLevel::Minimal)
        );
        assert_eq!(
            s.execute(RecoveryStrategy::CriticalFallback, 1).await.unwrap(),
            StrategyOutcome::Degraded(DegradationLevel::Critical)
        );
    }
}
