//! Immediate-check probe: one synchronous look at the host.

use crate::host::{Host, SurfaceElement};
use crate::types::{AcquisitionStatus, SentinelError, SurfaceBinding};

/// Result of one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub status: AcquisitionStatus,
    pub outcome: ProbeOutcome,
}

/// What the probe found.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Library loaded, surfaces present, at least one bound. Exactly one binding is primary.
    Ready(Vec<SurfaceBinding>),
    LibraryUnavailable,
    NoSurfaceFound,
    NoBoundInstance,
    /// The host itself failed to answer.
    HostError(String),
}

impl ProbeReport {
    pub fn is_ready(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Ready(_))
    }

    pub fn bindings(&self) -> Option<&[SurfaceBinding]> {
        match &self.outcome {
            ProbeOutcome::Ready(b) => Some(b),
            _ => None,
        }
    }

    /// The failure as an error value; `None` when ready.
    pub fn error(&self) -> Option<SentinelError> {
        match &self.outcome {
            ProbeOutcome::Ready(_) => None,
            ProbeOutcome::LibraryUnavailable => Some(SentinelError::LibraryUnavailable),
            ProbeOutcome::NoSurfaceFound => Some(SentinelError::NoSurfaceFound),
            ProbeOutcome::NoBoundInstance => Some(SentinelError::NoBoundInstance),
            ProbeOutcome::HostError(e) => Some(SentinelError::Host(e.clone())),
        }
    }
}

/// Check whether library, surface and a bound instance all exist right now.
///
/// Reads only; the binding list is returned, never stored here.
pub async fn probe(host: &dyn Host) -> ProbeReport {
    let environment_ready = host.environment_ready().await;
    let library_loaded = host.library_loaded().await;

    let elements = match host.surface_elements().await {
        Ok(elements) => elements,
        Err(e) => {
            tracing::debug!("Probe could not enumerate surfaces: {e}");
            return ProbeReport {
                status: AcquisitionStatus::derive(environment_ready, library_loaded, false),
                outcome: ProbeOutcome::HostError(e.to_string()),
            };
        }
    };

    let status = AcquisitionStatus::derive(environment_ready, library_loaded, !elements.is_empty());

    let outcome = if !library_loaded {
        tracing::debug!("Render-surface library not yet available");
        ProbeOutcome::LibraryUnavailable
    } else if elements.is_empty() {
        tracing::debug!("No surface elements found yet");
        ProbeOutcome::NoSurfaceFound
    } else {
        let bindings = bind(&elements);
        if bindings.is_empty() {
            tracing::debug!("{} surface elements, none bound yet", elements.len());
            ProbeOutcome::NoBoundInstance
        } else {
            ProbeOutcome::Ready(bindings)
        }
    };

    ProbeReport { status, outcome }
}

/// Pair bound elements with their instances and pick the primary.
///
/// The primary is the first binding inside the design container, else the
/// first binding overall.
pub fn bind(elements: &[SurfaceElement]) -> Vec<SurfaceBinding> {
    let bound: Vec<&SurfaceElement> = elements.iter().filter(|e| e.instance.is_some()).collect();
    let primary = bound
        .iter()
        .position(|e| e.in_container)
        .unwrap_or(0);

    bound
        .into_iter()
        .enumerate()
        .filter_map(|(i, e)| {
            let instance = e.instance.clone()?;
            Some(SurfaceBinding {
                instance_id: format!("surface-{i}"),
                instance,
                element: e.element.clone(),
                is_primary: i == primary,
            })
        })
        .collect()
}
