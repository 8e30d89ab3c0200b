//! Host abstraction for the document and its render-surface library.
//!
//! Defines the `Host` trait that abstracts over where surfaces live (a real
//! browser page, or a scripted simulation) and the `KeyValueStore` used by
//! the emergency-save path.

pub mod simulated;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{ElementHandle, InstanceHandle, Rect, SentinelResult};

pub use simulated::{Scenario, ScriptedSurface, SimulatedHost};
pub use store::{KeyValueStore, MemoryStore};

/// A surface element currently present in the host document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceElement {
    pub element: ElementHandle,
    /// Layout rectangle of the element at probe time.
    pub rect: Rect,
    /// Bound library instance, if the library has attached one yet.
    pub instance: Option<InstanceHandle>,
    /// Whether the element sits inside the designated design container.
    pub in_container: bool,
}

/// Instance-level facts needed for a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub width: f64,
    pub height: f64,
    pub zoom: f64,
    pub object_count: usize,
}

/// One node added to the observed document subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedNode {
    /// Upper-case tag name, e.g. `CANVAS`.
    pub tag: String,
    /// Surface elements nested below this node.
    #[serde(default)]
    pub descendant_surfaces: usize,
}

/// A batch of structural additions pushed by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationBatch {
    pub added: Vec<AddedNode>,
}

/// The host document plus the render-surface library living in it.
///
/// Implementations must make every method idempotent with respect to probing:
/// reading state never changes it.
#[async_trait]
pub trait Host: Send + Sync {
    /// Whether the document has finished its initial construction.
    async fn environment_ready(&self) -> bool;
    /// Resolve once the document is ready. Resolves immediately if it already is.
    async fn wait_environment_ready(&self);
    /// Whether the render-surface library global is present.
    async fn library_loaded(&self) -> bool;
    /// All surface elements in document order.
    async fn surface_elements(&self) -> SentinelResult<Vec<SurfaceElement>>;
    /// Layout rectangle of the designated design container, if one exists.
    async fn container(&self) -> Option<Rect>;
    /// Size, zoom and object count of a bound instance.
    async fn instance_info(&self, instance: &InstanceHandle) -> SentinelResult<InstanceInfo>;
    /// The instance's own serialization (an object with an `objects` array).
    async fn serialize_instance(&self, instance: &InstanceHandle)
        -> SentinelResult<serde_json::Value>;
    /// Direct enumeration of the instance's objects.
    async fn enumerate_objects(
        &self,
        instance: &InstanceHandle,
    ) -> SentinelResult<Vec<serde_json::Value>>;
    /// Push feed of structural additions, if the host can observe them.
    fn structure_changes(&self) -> Option<mpsc::UnboundedReceiver<MutationBatch>>;
    /// Monotonic count of structural mutations seen so far.
    async fn mutation_count(&self) -> u64;
    /// Drop library globals and the script resources that provided them.
    async fn unload_library(&self) -> SentinelResult<()>;
    /// Ask the host to load the library again. `false` when no loader exists.
    async fn reload_library(&self) -> SentinelResult<bool>;
    /// Dispose every surface instance and remove their elements. Returns the count.
    async fn dispose_surfaces(&self) -> SentinelResult<usize>;
    /// Create a new surface element inside the design container.
    async fn create_surface(&self, width: f64, height: f64) -> SentinelResult<ElementHandle>;
    /// Bind a fresh library instance to an element.
    async fn bind_instance(&self, element: &ElementHandle) -> SentinelResult<InstanceHandle>;
}
