//! Engine configuration: backoff, budgets, and timing windows.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{SentinelError, SentinelResult};

/// Attempt budget when embedded in a constrained context (e.g. an admin iframe).
const CONSTRAINED_MAX_ATTEMPTS: u32 = 1;

/// Library-wait timeout in a constrained context.
const CONSTRAINED_LIBRARY_WAIT_MS: u64 = 4_000;

/// Explicit configuration passed to the engine at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum polling attempts before acquisition fails.
    pub max_attempts: u32,
    /// Delay before the first poll.
    pub base_delay_ms: u64,
    /// Multiplicative growth per attempt.
    pub backoff_growth: f64,
    /// Upper bound on any single poll delay.
    pub cap_delay_ms: u64,
    /// How long recovery waits for the library to appear.
    pub library_wait_timeout_ms: u64,
    /// Poll interval while waiting for the library.
    pub library_poll_interval_ms: u64,
    /// Settle time after the structural monitor sees a new surface.
    pub settle_delay_ms: u64,
    /// Window over which host mutations are sampled for stability.
    pub stability_window_ms: u64,
    /// The host counts as stable when fewer mutations than this occur in the window.
    pub stability_threshold: u64,
    /// Initial recovery attempt budget, shrunk by recurring failures.
    pub max_recovery_attempts: u32,
    /// Shrinks the budgets above.
    pub constrained_context: bool,
    /// Base URL of a monitoring service receiving emergency reports.
    pub monitoring_endpoint: Option<String>,
    /// Run host errors through the recovery cascade instead of only logging them.
    pub escalate_host_errors: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay_ms: 100,
            backoff_growth: 1.8,
            cap_delay_ms: 1_500,
            library_wait_timeout_ms: 5_000,
            library_poll_interval_ms: 100,
            settle_delay_ms: 50,
            stability_window_ms: 2_000,
            stability_threshold: 10,
            max_recovery_attempts: 5,
            constrained_context: false,
            monitoring_endpoint: None,
            escalate_host_errors: false,
        }
    }
}

impl EngineConfig {
    /// Defaults for a constrained embedding context.
    pub fn constrained() -> Self {
        Self::default().with_constrained(true)
    }

    /// Apply (or lift) the constrained-context limits.
    pub fn with_constrained(mut self, constrained: bool) -> Self {
        self.constrained_context = constrained;
        if constrained {
            self.max_attempts = self.max_attempts.min(CONSTRAINED_MAX_ATTEMPTS);
            self.library_wait_timeout_ms =
                self.library_wait_timeout_ms.min(CONSTRAINED_LIBRARY_WAIT_MS);
        }
        self
    }

    /// Reject values that would make backoff or budgets meaningless.
    pub fn validate(&self) -> SentinelResult<()> {
        if self.max_attempts == 0 {
            return Err(SentinelError::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_growth.is_finite() || self.backoff_growth < 1.0 {
            return Err(SentinelError::InvalidInput(format!(
                "backoff_growth must be >= 1.0, got {}",
                self.backoff_growth
            )));
        }
        if self.cap_delay_ms < self.base_delay_ms {
            return Err(SentinelError::InvalidInput(format!(
                "cap_delay_ms ({}) is below base_delay_ms ({})",
                self.cap_delay_ms, self.base_delay_ms
            )));
        }
        if let Some(endpoint) = &self.monitoring_endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(SentinelError::InvalidInput(format!(
                    "monitoring_endpoint must be an http(s) URL, got {endpoint}"
                )));
            }
        }
        if self.library_poll_interval_ms == 0 {
            return Err(SentinelError::InvalidInput(
                "library_poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON config document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> SentinelResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        let constrained = config.constrained_context;
        let config = config.with_constrained(constrained);
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `SENTINEL_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `SENTINEL_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        let mut config = self;
        if let Some(v) = env_parse("SENTINEL_MAX_ATTEMPTS") {
            config.max_attempts = v;
        }
        if let Some(v) = env_parse("SENTINEL_BASE_DELAY_MS") {
            config.base_delay_ms = v;
        }
        if let Some(v) = env_parse("SENTINEL_BACKOFF_GROWTH") {
            config.backoff_growth = v;
        }
        if let Some(v) = env_parse("SENTINEL_CAP_DELAY_MS") {
            config.cap_delay_ms = v;
        }
        if let Some(v) = env_parse("SENTINEL_LIBRARY_WAIT_TIMEOUT_MS") {
            config.library_wait_timeout_ms = v;
        }
        if let Some(v) = env_parse::<bool>("SENTINEL_ESCALATE_HOST_ERRORS") {
            config.escalate_host_errors = v;
        }
        if let Ok(endpoint) = std::env::var("SENTINEL_MONITORING_ENDPOINT") {
            let endpoint = endpoint.trim();
            config.monitoring_endpoint = (!endpoint.is_empty()).then(|| endpoint.to_string());
        }
        if let Some(v) = env_parse::<bool>("SENTINEL_CONSTRAINED") {
            config = config.with_constrained(v);
        }
        config
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    pub fn library_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.library_wait_timeout_ms)
    }

    pub fn library_poll_interval(&self) -> Duration {
        Duration::from_millis(self.library_poll_interval_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {key}={raw}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_delay_ms, 100);
        assert_eq!(config.cap_delay_ms, 1_500);
    }

    #[test]
    fn test_constrained_shrinks_budgets() {
        let config = EngineConfig::constrained();
        assert!(config.constrained_context);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.library_wait_timeout_ms, 4_000);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = EngineConfig::from_json(r#"{"max_attempts": 7, "backoff_growth": 2.0}"#).unwrap();
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.backoff_growth, 2.0);
        assert_eq!(config.settle_delay_ms, 50);
    }

    #[test]
    fn test_from_json_applies_constrained_flag() {
        let config = EngineConfig::from_json(r#"{"constrained_context": true}"#).unwrap();
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn test_monitoring_endpoint_must_be_http() {
        let config =
            EngineConfig::from_json(r#"{"monitoring_endpoint": "https://monitor.local"}"#).unwrap();
        assert_eq!(config.monitoring_endpoint.as_deref(), Some("https://monitor.local"));
        assert!(!config.escalate_host_errors);
        assert!(EngineConfig::from_json(r#"{"monitoring_endpoint": "monitor.local"}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_shrinking_growth() {
        let config = EngineConfig {
            backoff_growth: 0.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            cap_delay_ms: 10,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
