//! Failure classification tables.

use crate::types::{DegradationLevel, FailureType, Severity};

/// Severity a failure type maps to before any escalation.
pub fn severity_for(failure_type: &FailureType) -> Severity {
    match failure_type {
        FailureType::LibraryLoadFailed | FailureType::RecurringFailure => Severity::Critical,
        FailureType::SurfaceCreationFailed | FailureType::InitializationFailed => {
            Severity::Warning
        }
        FailureType::SystemCrash => Severity::Emergency,
        _ => Severity::Normal,
    }
}

/// Degradation level a failure type calls for once recovery is exhausted.
pub fn degradation_for(failure_type: &FailureType) -> DegradationLevel {
    match failure_type {
        FailureType::LibraryLoadFailed => DegradationLevel::Minimal,
        FailureType::SurfaceCreationFailed | FailureType::InitializationFailed => {
            DegradationLevel::Limited
        }
        FailureType::SystemCrash => DegradationLevel::Critical,
        _ => DegradationLevel::Normal,
    }
}

/// Level applied after every strategy failed: never below limited.
pub fn exhaustion_level(failure_type: &FailureType) -> DegradationLevel {
    degradation_for(failure_type).max(DegradationLevel::Limited)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_table() {
        assert_eq!(severity_for(&"fabric-load-failed".into()), Severity::Critical);
        assert_eq!(severity_for(&FailureType::SurfaceCreationFailed), Severity::Warning);
        assert_eq!(severity_for(&FailureType::SystemCrash), Severity::Emergency);
        assert_eq!(severity_for(&FailureType::ManualRetry), Severity::Normal);
        assert_eq!(severity_for(&"something-odd".into()), Severity::Normal);
    }

    #[test]
    fn test_exhaustion_level_floor() {
        assert_eq!(exhaustion_level(&FailureType::ManualRetry), DegradationLevel::Limited);
        assert_eq!(exhaustion_level(&FailureType::LibraryLoadFailed), DegradationLevel::Minimal);
        assert_eq!(exhaustion_level(&FailureType::SystemCrash), DegradationLevel::Critical);
    }
}
