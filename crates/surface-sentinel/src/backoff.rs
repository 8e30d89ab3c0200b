//! Exponential backoff for acquisition polling.

use std::time::Duration;

use crate::config::EngineConfig;

/// Delay before poll attempt `attempt` (0-based): `min(base * growth^attempt, cap)`.
pub fn delay_ms(base_ms: u64, growth: f64, cap_ms: u64, attempt: u32) -> u64 {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = base_ms as f64 * growth.powi(exponent);
    if !raw.is_finite() || raw >= cap_ms as f64 {
        return cap_ms;
    }
    raw.round() as u64
}

/// Delay for `attempt` using the engine's backoff settings.
pub fn delay_for(config: &EngineConfig, attempt: u32) -> Duration {
    Duration::from_millis(delay_ms(
        config.base_delay_ms,
        config.backoff_growth,
        config.cap_delay_ms,
        attempt,
    ))
}

/// Every delay the polling loop can sleep through, in order.
pub fn schedule(config: &EngineConfig) -> Vec<Duration> {
    (0..config.max_attempts)
        .map(|attempt| delay_for(config, attempt))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_sequence() {
        let delays: Vec<u64> = (0..7).map(|n| delay_ms(100, 1.8, 1_500, n)).collect();
        assert_eq!(delays, vec![100, 180, 324, 583, 1050, 1500, 1500]);
    }

    #[test]
    fn test_delay_monotonic_and_capped() {
        for growth in [1.0, 1.5, 1.8, 2.0, 3.7] {
            let mut previous = 0;
            for n in 0..64 {
                let d = delay_ms(100, growth, 2_000, n);
                assert!(d >= previous, "growth {growth}: delay({n}) = {d} < {previous}");
                assert!(d <= 2_000);
                previous = d;
            }
        }
    }

    #[test]
    fn test_huge_attempt_saturates() {
        assert_eq!(delay_ms(100, 2.0, 1_500, u32::MAX), 1_500);
    }

    #[test]
    fn test_schedule_length_matches_budget() {
        let config = EngineConfig {
            max_attempts: 5,
            ..EngineConfig::default()
        };
        let schedule = schedule(&config);
        assert_eq!(schedule.len(), 5);
        assert_eq!(schedule[0], Duration::from_millis(100));
    }
}
