//! User-facing notices, the degradation banner, and capability toggles.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::types::{DegradationLevel, FailureType, Severity};

/// Action a notice offers the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeAction {
    Retry,
    Report,
    EmergencySave,
    Continue,
}

/// One notice shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub actions: Vec<NoticeAction>,
    /// Stays until dismissed; otherwise it expires on its own.
    pub persistent: bool,
}

/// Milliseconds a transient success notice stays up.
pub const SUCCESS_NOTICE_MS: u64 = 5_000;

pub fn title_for(severity: Severity) -> &'static str {
    match severity {
        Severity::Normal => "System Notice",
        Severity::Warning => "⚠️ System Warning",
        Severity::Critical => "🚨 Critical Error",
        Severity::Emergency => "🆘 Emergency Mode",
    }
}

impl Notice {
    /// Immediate notice raised before recovery starts.
    pub fn emergency(failure_type: &FailureType, severity: Severity) -> Self {
        Self {
            severity,
            title: title_for(severity).to_string(),
            message: format!(
                "The design system has encountered a {failure_type} error. Recovery is in progress."
            ),
            actions: vec![
                NoticeAction::Retry,
                NoticeAction::Report,
                NoticeAction::EmergencySave,
            ],
            persistent: severity.needs_immediate_notice(),
        }
    }

    pub fn recovered(strategy: &str) -> Self {
        Self {
            severity: Severity::Normal,
            title: "✅ System Recovered".to_string(),
            message: format!("System has been successfully recovered using {strategy} strategy."),
            actions: vec![NoticeAction::Continue],
            persistent: false,
        }
    }
}

/// Surface through which the engine talks to the user.
pub trait Notifier: Send + Sync {
    fn notice(&self, notice: &Notice);
    /// Show or replace the persistent banner; `None` clears it.
    fn banner(&self, text: Option<&str>);
    fn set_capability(&self, tag: &str, enabled: bool);
}

/// Default notifier: every notice becomes a log line.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notice(&self, notice: &Notice) {
        match notice.severity {
            Severity::Critical | Severity::Emergency => {
                tracing::error!("{}: {}", notice.title, notice.message)
            }
            Severity::Warning => tracing::warn!("{}: {}", notice.title, notice.message),
            Severity::Normal => tracing::info!("{}: {}", notice.title, notice.message),
        }
    }

    fn banner(&self, text: Option<&str>) {
        match text {
            Some(text) => tracing::warn!("Banner: {text}"),
            None => tracing::info!("Banner cleared"),
        }
    }

    fn set_capability(&self, tag: &str, enabled: bool) {
        tracing::debug!("Capability {tag} {}", if enabled { "enabled" } else { "disabled" });
    }
}

/// Notifier that remembers everything, for tests and the simulate command.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
    banner: Mutex<Option<String>>,
    toggles: Mutex<Vec<(String, bool)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn current_banner(&self) -> Option<String> {
        self.banner.lock().ok().and_then(|b| b.clone())
    }

    pub fn toggles(&self) -> Vec<(String, bool)> {
        self.toggles.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notice(&self, notice: &Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice.clone());
        }
    }

    fn banner(&self, text: Option<&str>) {
        if let Ok(mut banner) = self.banner.lock() {
            *banner = text.map(str::to_string);
        }
    }

    fn set_capability(&self, tag: &str, enabled: bool) {
        if let Ok(mut toggles) = self.toggles.lock() {
            toggles.push((tag.to_string(), enabled));
        }
    }
}

/// Banner text for a degradation level.
pub fn banner_text(level: DegradationLevel) -> String {
    format!(
        "⚠️ Running in {} mode - Limited functionality available",
        level.name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_titles() {
        assert_eq!(title_for(Severity::Critical), "🚨 Critical Error");
        assert_eq!(title_for(Severity::Emergency), "🆘 Emergency Mode");
    }

    #[test]
    fn test_emergency_notice_persistence() {
        let notice = Notice::emergency(&FailureType::LibraryLoadFailed, Severity::Critical);
        assert!(notice.persistent);
        assert!(notice.message.contains("library-load-failed"));
        assert_eq!(notice.actions.len(), 3);

        let notice = Notice::emergency(&FailureType::InitializationFailed, Severity::Warning);
        assert!(!notice.persistent);
    }

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.banner(Some("degraded"));
        notifier.set_capability("json-export", true);
        notifier.notice(&Notice::recovered("immediate-reinit"));
        assert_eq!(notifier.current_banner().as_deref(), Some("degraded"));
        notifier.banner(None);
        assert!(notifier.current_banner().is_none());
        assert_eq!(notifier.notices().len(), 1);
        assert_eq!(notifier.toggles(), vec![("json-export".to_string(), true)]);
    }
}
