//! Degradation manager: four capability allow-lists and a sticky level.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::notice::{banner_text, Notifier};
use crate::types::DegradationLevel;

/// Capabilities allowed at a level.
pub fn allowed(level: DegradationLevel) -> &'static [&'static str] {
    match level {
        DegradationLevel::Normal => &["full-editor", "real-time-preview", "all-tools"],
        DegradationLevel::Limited => &["basic-editor", "static-preview", "essential-tools"],
        DegradationLevel::Minimal => &["text-only", "json-export", "basic-save"],
        DegradationLevel::Critical => &["error-reporting", "data-recovery", "emergency-save"],
    }
}

/// Every capability tag any level knows about.
pub fn all_capabilities() -> impl Iterator<Item = &'static str> {
    DegradationLevel::ALL
        .into_iter()
        .flat_map(|level| allowed(level).iter().copied())
}

pub struct DegradationManager {
    notifier: Arc<dyn Notifier>,
    level: DegradationLevel,
    capabilities: BTreeMap<&'static str, bool>,
    restorations: u32,
}

impl DegradationManager {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        let capabilities = all_capabilities()
            .map(|tag| (tag, allowed(DegradationLevel::Normal).contains(&tag)))
            .collect();
        Self {
            notifier,
            level: DegradationLevel::Normal,
            capabilities,
            restorations: 0,
        }
    }

    pub fn level(&self) -> DegradationLevel {
        self.level
    }

    pub fn is_enabled(&self, tag: &str) -> bool {
        self.capabilities.get(tag).copied().unwrap_or(false)
    }

    /// Enabled capability tags, sorted.
    pub fn enabled(&self) -> Vec<&'static str> {
        self.capabilities
            .iter()
            .filter(|(_, on)| **on)
            .map(|(tag, _)| *tag)
            .collect()
    }

    /// Times full service was restored by `reset`.
    pub fn restorations(&self) -> u32 {
        self.restorations
    }

    /// Restrict to `level`'s allow-list. Returns false if a higher or equal
    /// level is already in force.
    pub fn apply_level(&mut self, level: DegradationLevel) -> bool {
        if level <= self.level {
            tracing::debug!("Keeping degradation {} over requested {}", self.level, level);
            return false;
        }
        tracing::warn!("Applying degradation level {level}");
        self.level = level;
        self.sync_capabilities(level);
        self.notifier.banner(Some(&banner_text(level)));
        true
    }

    /// Back to level 0 with exactly its allow-list, banner cleared.
    pub fn reset(&mut self) {
        self.level = DegradationLevel::Normal;
        self.sync_capabilities(DegradationLevel::Normal);
        self.notifier.banner(None);
        self.restorations += 1;
        tracing::info!("Full service restored");
    }

    fn sync_capabilities(&mut self, level: DegradationLevel) {
        let allow = allowed(level);
        for (tag, on) in self.capabilities.iter_mut() {
            let want = allow.contains(tag);
            if *on != want {
                *on = want;
                self.notifier.set_capability(tag, want);
            }
        }
    }
}
