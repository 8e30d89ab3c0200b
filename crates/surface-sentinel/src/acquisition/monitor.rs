//! Structural change monitor.
//!
//! Passive: it never probes on its own. It reduces pushed mutation batches to
//! "surface elements were added" and the driver turns that into a settle-delayed
//! re-probe.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::host::{Host, MutationBatch};

/// Tag name of a render-surface element.
pub const SURFACE_TAG: &str = "CANVAS";

/// Number of surface elements a batch adds, directly or nested.
pub fn surfaces_added(batch: &MutationBatch) -> usize {
    batch
        .added
        .iter()
        .map(|node| {
            let direct = usize::from(node.tag.eq_ignore_ascii_case(SURFACE_TAG));
            direct + node.descendant_surfaces
        })
        .sum()
}

/// A connected monitor. Dropping or disconnecting stops forwarding.
pub struct StructuralMonitor {
    task: JoinHandle<()>,
}

impl StructuralMonitor {
    /// Subscribe to the host's structure feed and forward the surface count of
    /// every batch that adds at least one surface.
    ///
    /// Returns `None` if the host cannot observe its structure.
    pub fn attach(host: &dyn Host, forward: mpsc::UnboundedSender<usize>) -> Option<Self> {
        let Some(mut feed) = host.structure_changes() else {
            tracing::warn!("Host offers no structural change feed; relying on polling");
            return None;
        };
        let task = tokio::spawn(async move {
            while let Some(batch) = feed.recv().await {
                let added = surfaces_added(&batch);
                if added == 0 {
                    continue;
                }
                tracing::debug!("{added} surface elements added to document");
                if forward.send(added).is_err() {
                    break;
                }
            }
        });
        tracing::debug!("Structural change monitor attached");
        Some(Self { task })
    }

    pub fn disconnect(self) {
        self.task.abort();
        tracing::debug!("Structural change monitor disconnected");
    }
}

impl Drop for StructuralMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
