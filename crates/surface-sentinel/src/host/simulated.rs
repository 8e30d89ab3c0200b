//! Timeline-scripted host for simulation runs and tests.
//!
//! Every fact (document ready, library loaded, surface appears, instance
//! binds) happens at a fixed offset from host creation, measured on the
//! tokio clock so paused-time tests advance it deterministically.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{AddedNode, Host, InstanceInfo, MutationBatch, SurfaceElement};
use crate::types::{ElementHandle, InstanceHandle, Rect, SentinelError, SentinelResult};

const DEFAULT_SURFACE_WIDTH: f64 = 800.0;
const DEFAULT_SURFACE_HEIGHT: f64 = 600.0;

/// Script describing how a host document evolves over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// When the document finishes loading.
    pub environment_ready_at_ms: u64,
    /// When the library global appears. `None` = never.
    pub library_loaded_at_ms: Option<u64>,
    /// Designated design container, if the page has one.
    pub container: Option<Rect>,
    pub surfaces: Vec<ScriptedSurface>,
    /// Whether `reload_library` has a loader to call.
    pub reloadable: bool,
    /// Time a reload takes before the library is present again.
    pub reload_delay_ms: u64,
    /// Whether the host can push structural additions.
    pub observe_structure: bool,
    /// Background churn used by the stability sampler.
    pub mutations_per_second: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            environment_ready_at_ms: 0,
            library_loaded_at_ms: Some(0),
            container: Some(Rect::new(0.0, 0.0, 800.0, 600.0)),
            surfaces: Vec::new(),
            reloadable: false,
            reload_delay_ms: 200,
            observe_structure: true,
            mutations_per_second: 0,
        }
    }
}

impl Scenario {
    /// Everything present at t=0 with one bound surface.
    pub fn immediately_ready(surface: ScriptedSurface) -> Self {
        Self {
            surfaces: vec![surface],
            ..Self::default()
        }
    }

    /// Library never loads and no surface ever appears.
    pub fn never_ready() -> Self {
        Self {
            library_loaded_at_ms: None,
            observe_structure: false,
            ..Self::default()
        }
    }
}

/// One surface element in a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedSurface {
    pub id: String,
    pub appear_at_ms: u64,
    /// When the library binds an instance to the element. `None` = never.
    pub bound_at_ms: Option<u64>,
    pub rect: Rect,
    pub in_container: bool,
    pub width: f64,
    pub height: f64,
    pub zoom: f64,
    pub objects: Vec<serde_json::Value>,
    pub serialize_fails: bool,
    pub enumerate_fails: bool,
}

impl Default for ScriptedSurface {
    fn default() -> Self {
        Self {
            id: "surface-0".to_string(),
            appear_at_ms: 0,
            bound_at_ms: Some(0),
            rect: Rect::new(0.0, 0.0, DEFAULT_SURFACE_WIDTH, DEFAULT_SURFACE_HEIGHT),
            in_container: true,
            width: DEFAULT_SURFACE_WIDTH,
            height: DEFAULT_SURFACE_HEIGHT,
            zoom: 1.0,
            objects: Vec::new(),
            serialize_fails: false,
            enumerate_fails: false,
        }
    }
}

impl ScriptedSurface {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn appearing_at(mut self, ms: u64) -> Self {
        self.appear_at_ms = ms;
        self.bound_at_ms = self.bound_at_ms.map(|b| b.max(ms));
        self
    }

    pub fn bound_at(mut self, ms: Option<u64>) -> Self {
        self.bound_at_ms = ms;
        self
    }

    pub fn at(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn outside_container(mut self) -> Self {
        self.in_container = false;
        self
    }

    pub fn with_objects(mut self, objects: Vec<serde_json::Value>) -> Self {
        self.objects = objects;
        self
    }

    fn instance_handle(&self) -> InstanceHandle {
        InstanceHandle(format!("{}#instance", self.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LibraryPhase {
    Scripted,
    Unloaded,
    ReloadedAt(Instant),
}

#[derive(Debug, Clone)]
struct CreatedSurface {
    element: ElementHandle,
    rect: Rect,
    instance: Option<InstanceHandle>,
}

#[derive(Debug)]
struct SimState {
    library: LibraryPhase,
    scripted_disposed: bool,
    created: Vec<CreatedSurface>,
    extra_mutations: u64,
    reload_requests: u32,
}

/// A [`Host`] driven entirely by a [`Scenario`].
pub struct SimulatedHost {
    scenario: Scenario,
    start: Instant,
    state: Mutex<SimState>,
}

impl SimulatedHost {
    /// Start the scenario clock now.
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            start: Instant::now(),
            state: Mutex::new(SimState {
                library: LibraryPhase::Scripted,
                scripted_disposed: false,
                created: Vec::new(),
                extra_mutations: 0,
                reload_requests: 0,
            }),
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Milliseconds since the scenario started.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Number of `reload_library` calls seen.
    pub fn reload_requests(&self) -> u32 {
        self.lock().map(|s| s.reload_requests).unwrap_or(0)
    }

    fn lock(&self) -> SentinelResult<std::sync::MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|e| SentinelError::Host(format!("simulated host lock poisoned: {e}")))
    }

    fn reached(&self, at_ms: u64) -> bool {
        self.elapsed_ms() >= at_ms
    }

    fn library_loaded_now(&self, state: &SimState) -> bool {
        match state.library {
            LibraryPhase::Scripted => self
                .scenario
                .library_loaded_at_ms
                .is_some_and(|at| self.reached(at)),
            LibraryPhase::Unloaded => false,
            LibraryPhase::ReloadedAt(at) => Instant::now() >= at,
        }
    }

    fn visible_scripted<'a>(&'a self, state: &SimState) -> Vec<&'a ScriptedSurface> {
        if state.scripted_disposed {
            return Vec::new();
        }
        self.scenario
            .surfaces
            .iter()
            .filter(|s| self.reached(s.appear_at_ms))
            .collect()
    }

    fn find_scripted(&self, instance: &InstanceHandle) -> SentinelResult<&ScriptedSurface> {
        let state = self.lock()?;
        self.visible_scripted(&state)
            .into_iter()
            .find(|s| &s.instance_handle() == instance)
            .ok_or_else(|| SentinelError::Host(format!("unknown instance {instance}")))
    }

    fn created_instance(&self, instance: &InstanceHandle) -> SentinelResult<Option<CreatedSurface>> {
        let state = self.lock()?;
        Ok(state
            .created
            .iter()
            .find(|c| c.instance.as_ref() == Some(instance))
            .cloned())
    }
}

#[async_trait]
impl Host for SimulatedHost {
    async fn environment_ready(&self) -> bool {
        self.reached(self.scenario.environment_ready_at_ms)
    }

    async fn wait_environment_ready(&self) {
        let at = self.start + Duration::from_millis(self.scenario.environment_ready_at_ms);
        tokio::time::sleep_until(at).await;
    }

    async fn library_loaded(&self) -> bool {
        match self.lock() {
            Ok(state) => self.library_loaded_now(&state),
            Err(_) => false,
        }
    }

    async fn surface_elements(&self) -> SentinelResult<Vec<SurfaceElement>> {
        let state = self.lock()?;
        let library = self.library_loaded_now(&state);
        let mut out: Vec<SurfaceElement> = self
            .visible_scripted(&state)
            .into_iter()
            .map(|s| SurfaceElement {
                element: ElementHandle(s.id.clone()),
                rect: s.rect,
                instance: match s.bound_at_ms {
                    Some(at) if library && self.reached(at) => Some(s.instance_handle()),
                    _ => None,
                },
                in_container: s.in_container,
            })
            .collect();
        out.extend(state.created.iter().map(|c| SurfaceElement {
            element: c.element.clone(),
            rect: c.rect,
            instance: c.instance.clone(),
            in_container: true,
        }));
        Ok(out)
    }

    async fn container(&self) -> Option<Rect> {
        self.scenario.container
    }

    async fn instance_info(&self, instance: &InstanceHandle) -> SentinelResult<InstanceInfo> {
        if let Some(created) = self.created_instance(instance)? {
            return Ok(InstanceInfo {
                width: created.rect.width,
                height: created.rect.height,
                zoom: 1.0,
                object_count: 0,
            });
        }
        let surface = self.find_scripted(instance)?;
        Ok(InstanceInfo {
            width: surface.width,
            height: surface.height,
            zoom: surface.zoom,
            object_count: surface.objects.len(),
        })
    }

    async fn serialize_instance(
        &self,
        instance: &InstanceHandle,
    ) -> SentinelResult<serde_json::Value> {
        if self.created_instance(instance)?.is_some() {
            return Ok(json!({ "version": "simulated", "objects": [] }));
        }
        let surface = self.find_scripted(instance)?;
        if surface.serialize_fails {
            return Err(SentinelError::SerializationFailure(format!(
                "{} refused to serialize",
                surface.id
            )));
        }
        Ok(json!({ "version": "simulated", "objects": surface.objects }))
    }

    async fn enumerate_objects(
        &self,
        instance: &InstanceHandle,
    ) -> SentinelResult<Vec<serde_json::Value>> {
        if self.created_instance(instance)?.is_some() {
            return Ok(Vec::new());
        }
        let surface = self.find_scripted(instance)?;
        if surface.enumerate_fails {
            return Err(SentinelError::Host(format!(
                "{} object enumeration failed",
                surface.id
            )));
        }
        Ok(surface.objects.clone())
    }

    fn structure_changes(&self) -> Option<mpsc::UnboundedReceiver<MutationBatch>> {
        if !self.scenario.observe_structure {
            return None;
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let elapsed = self.elapsed_ms();
        let mut pending: Vec<u64> = self
            .scenario
            .surfaces
            .iter()
            .map(|s| s.appear_at_ms)
            .filter(|at| *at > elapsed)
            .collect();
        pending.sort_unstable();

        let start = self.start;
        handle.spawn(async move {
            for at in pending {
                tokio::time::sleep_until(start + Duration::from_millis(at)).await;
                let batch = MutationBatch {
                    added: vec![AddedNode {
                        tag: "CANVAS".to_string(),
                        descendant_surfaces: 0,
                    }],
                };
                if tx.send(batch).is_err() {
                    break;
                }
            }
        });
        Some(rx)
    }

    async fn mutation_count(&self) -> u64 {
        let elapsed = self.elapsed_ms();
        let churn = self.scenario.mutations_per_second * elapsed / 1_000;
        let appeared = self
            .scenario
            .surfaces
            .iter()
            .filter(|s| s.appear_at_ms <= elapsed)
            .count() as u64;
        let extra = self.lock().map(|s| s.extra_mutations).unwrap_or(0);
        churn + appeared + extra
    }

    async fn unload_library(&self) -> SentinelResult<()> {
        let mut state = self.lock()?;
        state.library = LibraryPhase::Unloaded;
        state.extra_mutations += 1;
        Ok(())
    }

    async fn reload_library(&self) -> SentinelResult<bool> {
        let mut state = self.lock()?;
        state.reload_requests += 1;
        if !self.scenario.reloadable {
            return Ok(false);
        }
        state.library = LibraryPhase::ReloadedAt(
            Instant::now() + Duration::from_millis(self.scenario.reload_delay_ms),
        );
        state.extra_mutations += 1;
        Ok(true)
    }

    async fn dispose_surfaces(&self) -> SentinelResult<usize> {
        let mut state = self.lock()?;
        let scripted = if state.scripted_disposed {
            0
        } else {
            self.scenario
                .surfaces
                .iter()
                .filter(|s| self.reached(s.appear_at_ms))
                .count()
        };
        let count = scripted + state.created.len();
        state.scripted_disposed = true;
        state.created.clear();
        state.extra_mutations += count as u64;
        Ok(count)
    }

    async fn create_surface(&self, width: f64, height: f64) -> SentinelResult<ElementHandle> {
        let container = self
            .scenario
            .container
            .ok_or_else(|| SentinelError::Host("no design container to host a surface".into()))?;
        let mut state = self.lock()?;
        let element = ElementHandle(format!("recovery-surface-{}", state.created.len()));
        state.created.push(CreatedSurface {
            element: element.clone(),
            rect: Rect::new(container.x, container.y, width, height),
            instance: None,
        });
        state.extra_mutations += 1;
        Ok(element)
    }

    async fn bind_instance(&self, element: &ElementHandle) -> SentinelResult<InstanceHandle> {
        let mut state = self.lock()?;
        if !self.library_loaded_now(&state) {
            return Err(SentinelError::LibraryUnavailable);
        }
        let created = state
            .created
            .iter_mut()
            .find(|c| &c.element == element)
            .ok_or_else(|| SentinelError::Host(format!("unknown element {element}")))?;
        let instance = InstanceHandle(format!("{element}#instance"));
        created.instance = Some(instance.clone());
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_surface_appears_on_schedule() {
        let host = SimulatedHost::new(Scenario {
            surfaces: vec![ScriptedSurface::new("late").appearing_at(300)],
            ..Scenario::default()
        });
        assert!(host.surface_elements().await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let surfaces = host.surface_elements().await.unwrap();
        assert_eq!(surfaces.len(), 1);
        assert!(surfaces[0].instance.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_hides_instances() {
        let host = SimulatedHost::new(Scenario::immediately_ready(ScriptedSurface::new("s")));
        assert!(host.library_loaded().await);
        host.unload_library().await.unwrap();
        assert!(!host.library_loaded().await);
        let surfaces = host.surface_elements().await.unwrap();
        assert!(surfaces[0].instance.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_requires_loader() {
        let host = SimulatedHost::new(Scenario::default());
        assert!(!host.reload_library().await.unwrap());

        let host = SimulatedHost::new(Scenario {
            reloadable: true,
            reload_delay_ms: 100,
            ..Scenario::default()
        });
        host.unload_library().await.unwrap();
        assert!(host.reload_library().await.unwrap());
        assert!(!host.library_loaded().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(host.library_loaded().await);
        assert_eq!(host.reload_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreated_surface_binds() {
        let host = SimulatedHost::new(Scenario::default());
        let element = host.create_surface(640.0, 480.0).await.unwrap();
        let instance = host.bind_instance(&element).await.unwrap();
        let info = host.instance_info(&instance).await.unwrap();
        assert_eq!(info.width, 640.0);
        assert_eq!(info.object_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_structure_feed_reports_additions() {
        let host = SimulatedHost::new(Scenario {
            surfaces: vec![ScriptedSurface::new("late").appearing_at(250)],
            ..Scenario::default()
        });
        let mut rx = host.structure_changes().expect("feed");
        let batch = rx.recv().await.expect("batch");
        assert_eq!(batch.added[0].tag, "CANVAS");
        assert!(host.elapsed_ms() >= 250);
    }

    #[test]
    fn test_scenario_deserializes_with_defaults() {
        let scenario: Scenario = serde_json::from_str(
            r#"{"environment_ready_at_ms": 150, "surfaces": [{"id": "a", "appear_at_ms": 900}]}"#,
        )
        .unwrap();
        assert_eq!(scenario.environment_ready_at_ms, 150);
        assert_eq!(scenario.library_loaded_at_ms, Some(0));
        assert_eq!(scenario.surfaces[0].bound_at_ms, Some(0));
    }
}
