//! Coordinate capture: normalize a surface's object graph into a `CaptureRecord`.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use serde_json::Value;

use crate::host::Host;
use crate::types::{
    CaptureMode, CaptureRecord, Dimensions, ElementRecord, ErrorKind, Geometry, InstanceMeta,
    SentinelError, SentinelResult, SurfaceBinding,
};

/// Container size used when neither a container nor an instance reports one.
const FALLBACK_WIDTH: i64 = 800;
const FALLBACK_HEIGHT: i64 = 600;

const DEFAULT_FONT_SIZE: f64 = 16.0;
const DEFAULT_FILL: &str = "#000000";

/// Instance id reported by mock captures.
pub const MOCK_INSTANCE_ID: &str = "emergency-mock";

static SESSION_ID: OnceLock<String> = OnceLock::new();

/// Process-wide capture session id, generated on first use.
pub fn session_id() -> &'static str {
    SESSION_ID.get_or_init(|| format!("session_{}", uuid::Uuid::new_v4().simple()))
}

/// Translation from surface-local to container-relative coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Offset {
    pub dx: f64,
    pub dy: f64,
}

/// Reads bound surfaces through the host and produces capture records.
pub struct CaptureEngine {
    host: Arc<dyn Host>,
}

impl CaptureEngine {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }

    /// Capture the primary binding. Failures come back as error records.
    pub async fn capture_live(&self, bindings: &[SurfaceBinding]) -> CaptureRecord {
        let Some(primary) = bindings
            .iter()
            .find(|b| b.is_primary)
            .or_else(|| bindings.first())
        else {
            tracing::warn!("Capture requested with no bound surfaces");
            return CaptureRecord::failure(
                session_id(),
                ErrorKind::NoSurfaceFound,
                "no render surface is bound",
            );
        };

        match self.read(primary).await {
            Ok(record) => {
                tracing::debug!(
                    "Captured {} elements from {}",
                    record.elements.len(),
                    primary.instance_id
                );
                record
            }
            Err(e) => {
                tracing::error!("Capture of {} failed: {e}", primary.instance_id);
                CaptureRecord::failure(session_id(), e.kind(), e.to_string())
            }
        }
    }

    async fn read(&self, binding: &SurfaceBinding) -> SentinelResult<CaptureRecord> {
        let info = self.host.instance_info(&binding.instance).await?;
        let objects = self.objects(binding).await?;

        let container = self.host.container().await;
        let surface_rect = self
            .host
            .surface_elements()
            .await?
            .into_iter()
            .find(|e| e.element == binding.element)
            .map(|e| e.rect);
        let offset = match (surface_rect, container) {
            (Some(surface), Some(container)) => Offset {
                dx: surface.x - container.x,
                dy: surface.y - container.y,
            },
            _ => Offset::default(),
        };

        let container_dimensions = match container {
            Some(c) => Dimensions {
                width: c.width.round() as i64,
                height: c.height.round() as i64,
            },
            None if info.width > 0.0 && info.height > 0.0 => Dimensions {
                width: info.width.round() as i64,
                height: info.height.round() as i64,
            },
            None => Dimensions {
                width: FALLBACK_WIDTH,
                height: FALLBACK_HEIGHT,
            },
        };

        Ok(CaptureRecord {
            timestamp: Utc::now(),
            session_id: session_id().to_string(),
            container_dimensions,
            instance_meta: InstanceMeta {
                id: binding.instance_id.clone(),
                width: info.width.round() as i64,
                height: info.height.round() as i64,
                zoom: info.zoom,
                object_count: info.object_count,
            },
            elements: objects.iter().map(|o| classify(o, offset)).collect(),
            mode: CaptureMode::Live,
            error: None,
        })
    }

    /// Prefer the instance's own serialization; enumerate directly if it fails.
    async fn objects(&self, binding: &SurfaceBinding) -> SentinelResult<Vec<Value>> {
        match self.host.serialize_instance(&binding.instance).await {
            Ok(Value::Object(mut map)) => match map.remove("objects") {
                Some(Value::Array(objects)) => return Ok(objects),
                _ => tracing::warn!("Serialization of {} has no objects array", binding.instance),
            },
            Ok(_) => tracing::warn!("Serialization of {} is not an object", binding.instance),
            Err(e) => tracing::warn!("Serialization of {} failed: {e}", binding.instance),
        }
        self.host
            .enumerate_objects(&binding.instance)
            .await
            .map_err(|e| SentinelError::SerializationFailure(e.to_string()))
    }
}

/// Well-formed empty record used while running on the emergency mock.
pub fn emergency_mock() -> CaptureRecord {
    CaptureRecord {
        timestamp: Utc::now(),
        session_id: session_id().to_string(),
        container_dimensions: Dimensions {
            width: FALLBACK_WIDTH,
            height: FALLBACK_HEIGHT,
        },
        instance_meta: InstanceMeta {
            id: MOCK_INSTANCE_ID.to_string(),
            width: FALLBACK_WIDTH,
            height: FALLBACK_HEIGHT,
            zoom: 1.0,
            object_count: 0,
        },
        elements: Vec::new(),
        mode: CaptureMode::EmergencyMock,
        error: None,
    }
}

/// Error record returned while the critical fallback is active.
pub fn unavailable(reason: &str) -> CaptureRecord {
    CaptureRecord::failure(session_id(), ErrorKind::CaptureUnavailable, reason)
}

/// Normalize one raw object. Unrecognized kinds are kept whole as `Unknown`.
pub fn classify(obj: &Value, offset: Offset) -> ElementRecord {
    let left = num(obj, "left", 0.0) + offset.dx;
    let top = num(obj, "top", 0.0) + offset.dy;
    let scale_x = num(obj, "scaleX", 1.0);
    let scale_y = num(obj, "scaleY", 1.0);
    let geometry = Geometry {
        x: left.round() as i64,
        y: top.round() as i64,
        width: (num(obj, "width", 0.0) * scale_x).round() as i64,
        height: (num(obj, "height", 0.0) * scale_y).round() as i64,
        scale_x: round_to(scale_x, 3),
        scale_y: round_to(scale_y, 3),
        angle: round_to(num(obj, "angle", 0.0), 1),
    };

    let kind = obj.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "text" | "i-text" | "textbox" => ElementRecord::Text {
            geometry,
            text: text(obj, "text", ""),
            font_family: text(obj, "fontFamily", "Arial"),
            font_size: num(obj, "fontSize", DEFAULT_FONT_SIZE),
            fill: paint(obj, "fill"),
            font_weight: text(obj, "fontWeight", "normal"),
            font_style: text(obj, "fontStyle", "normal"),
            text_align: text(obj, "textAlign", "left"),
        },
        "image" => ElementRecord::Image {
            geometry,
            src: text(obj, "src", ""),
        },
        "rect" => ElementRecord::Rectangle {
            geometry,
            fill: paint(obj, "fill"),
            stroke: text(obj, "stroke", ""),
            stroke_width: num(obj, "strokeWidth", 0.0),
            rx: num(obj, "rx", 0.0),
            ry: num(obj, "ry", 0.0),
        },
        "circle" => ElementRecord::Circle {
            geometry,
            radius: num(obj, "radius", 0.0).round() as i64,
            fill: paint(obj, "fill"),
            stroke: text(obj, "stroke", ""),
            stroke_width: num(obj, "strokeWidth", 0.0),
        },
        "line" => ElementRecord::Line {
            geometry,
            x1: (num(obj, "x1", 0.0) + left).round() as i64,
            y1: (num(obj, "y1", 0.0) + top).round() as i64,
            x2: (num(obj, "x2", 0.0) + left).round() as i64,
            y2: (num(obj, "y2", 0.0) + top).round() as i64,
            stroke: text(obj, "stroke", "#000000"),
            stroke_width: num(obj, "strokeWidth", 1.0),
        },
        "group" => ElementRecord::Group {
            geometry,
            children: obj
                .get("objects")
                .and_then(Value::as_array)
                .map(|children| {
                    children
                        .iter()
                        .map(|c| classify(c, Offset::default()))
                        .collect()
                })
                .unwrap_or_default(),
        },
        other => {
            tracing::debug!("Unknown object type {other:?}, keeping raw");
            ElementRecord::Unknown {
                geometry,
                original_type: other.to_string(),
                raw: obj.clone(),
            }
        }
    }
}

fn num(obj: &Value, key: &str, default: f64) -> f64 {
    obj.get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Strings pass through; numbers (e.g. a numeric font weight) are stringified.
fn text(obj: &Value, key: &str, default: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => default.to_string(),
    }
}

/// Fills are kept as provided: colour strings, gradients and patterns alike.
fn paint(obj: &Value, key: &str) -> Value {
    match obj.get(key) {
        None | Some(Value::Null) => Value::String(DEFAULT_FILL.to_string()),
        Some(value) => value.clone(),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Scenario, ScriptedSurface, SimulatedHost};
    use crate::types::{ElementHandle, InstanceHandle, Rect};
    use serde_json::json;

    fn binding(id: &str) -> SurfaceBinding {
        SurfaceBinding {
            instance_id: "surface-0".to_string(),
            instance: InstanceHandle(format!("{id}#instance")),
            element: ElementHandle(id.to_string()),
            is_primary: true,
        }
    }

    #[test]
    fn test_session_id_is_stable() {
        assert!(session_id().starts_with("session_"));
        assert_eq!(session_id(), session_id());
    }

    #[test]
    fn test_numeric_policy() {
        let obj = json!({
            "type": "rect", "left": 10.4, "top": 20.6, "width": 100, "height": 50,
            "scaleX": 1.23456, "scaleY": 0.5, "angle": 12.345
        });
        let record = classify(&obj, Offset::default());
        let g = record.geometry();
        assert_eq!((g.x, g.y), (10, 21));
        assert_eq!((g.width, g.height), (123, 25));
        assert_eq!(g.scale_x, 1.235);
        assert_eq!(g.angle, 12.3);
    }

    #[test]
    fn test_text_defaults_and_serde() {
        let obj = json!({ "type": "i-text", "text": "Hello", "fontWeight": 700 });
        let record = classify(&obj, Offset::default());
        match &record {
            ElementRecord::Text {
                text,
                font_family,
                font_size,
                fill,
                font_weight,
                text_align,
                ..
            } => {
                assert_eq!(text, "Hello");
                assert_eq!(font_family, "Arial");
                assert_eq!(*font_size, 16.0);
                assert_eq!(fill, &json!("#000000"));
                assert_eq!(font_weight, "700");
                assert_eq!(text_align, "left");
            }
            other => panic!("expected text, got {other:?}"),
        }
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["x"], 0);
        let back: ElementRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_text_keeps_font_size_and_fill_as_provided() {
        let gradient = json!({ "type": "linear", "colorStops": [{ "offset": 0, "color": "red" }] });
        let obj = json!({
            "type": "text", "text": "Hi", "left": 100.4, "top": 49.6,
            "fontSize": 12.5, "fill": gradient
        });
        let record = classify(&obj, Offset::default());
        match &record {
            ElementRecord::Text {
                geometry,
                text,
                font_size,
                fill,
                ..
            } => {
                assert_eq!(text, "Hi");
                assert_eq!(*font_size, 12.5);
                assert_eq!(fill, &gradient);
                assert_eq!((geometry.x, geometry.y), (100, 50));
            }
            other => panic!("expected text, got {other:?}"),
        }
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["font_size"], 12.5);
        assert_eq!(json["fill"]["type"], "linear");
    }

    #[test]
    fn test_shape_fills_pass_through() {
        let rect = classify(&json!({ "type": "rect", "fill": "" }), Offset::default());
        assert!(matches!(rect, ElementRecord::Rectangle { ref fill, .. } if fill == &json!("")));

        let pattern = json!({ "source": "tile.png", "repeat": "repeat" });
        let circle = classify(
            &json!({ "type": "circle", "radius": 3, "fill": pattern.clone() }),
            Offset::default(),
        );
        assert!(matches!(circle, ElementRecord::Circle { ref fill, .. } if fill == &pattern));
    }

    #[test]
    fn test_line_endpoints_are_container_relative() {
        let obj = json!({ "type": "line", "left": 10, "top": 10, "x1": 0, "y1": 0, "x2": 30, "y2": 40 });
        match classify(&obj, Offset { dx: 5.0, dy: -5.0 }) {
            ElementRecord::Line {
                x1, y1, x2, y2, stroke_width, ..
            } => {
                assert_eq!((x1, y1, x2, y2), (15, 5, 45, 45));
                assert_eq!(stroke_width, 1.0);
            }
            other => panic!("expected line, got {other:?}"),
        }
    }

    #[test]
    fn test_group_children_stay_local() {
        let obj = json!({
            "type": "group", "left": 100, "top": 100,
            "objects": [{ "type": "circle", "left": 1, "top": 2, "radius": 4.6 }]
        });
        match classify(&obj, Offset { dx: 50.0, dy: 50.0 }) {
            ElementRecord::Group { geometry, children } => {
                assert_eq!((geometry.x, geometry.y), (150, 150));
                assert_eq!((children[0].geometry().x, children[0].geometry().y), (1, 2));
                assert!(matches!(children[0], ElementRecord::Circle { radius: 5, .. }));
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_keeps_raw() {
        let obj = json!({ "type": "path", "path": [["M", 0, 0]] });
        match classify(&obj, Offset::default()) {
            ElementRecord::Unknown {
                original_type, raw, ..
            } => {
                assert_eq!(original_type, "path");
                assert_eq!(raw, obj);
            }
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_container_relative_offset() {
        let surface = ScriptedSurface::new("design")
            .at(Rect::new(10.0, 20.0, 400.0, 300.0))
            .with_objects(vec![json!({ "type": "text", "left": 100, "top": 50, "text": "A" })]);
        let host = Arc::new(SimulatedHost::new(Scenario {
            container: Some(Rect::new(5.0, 5.0, 500.0, 400.0)),
            ..Scenario::immediately_ready(surface)
        }));
        let engine = CaptureEngine::new(host);
        let record = engine.capture_live(&[binding("design")]).await;
        assert!(!record.is_error());
        assert_eq!(record.mode, CaptureMode::Live);
        let g = record.elements[0].geometry();
        assert_eq!((g.x, g.y), (105, 65));
        assert_eq!(record.container_dimensions, Dimensions { width: 500, height: 400 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumeration_fallback() {
        let mut surface =
            ScriptedSurface::new("s").with_objects(vec![json!({ "type": "image", "src": "a.png" })]);
        surface.serialize_fails = true;
        let host = Arc::new(SimulatedHost::new(Scenario::immediately_ready(surface)));
        let record = CaptureEngine::new(host).capture_live(&[binding("s")]).await;
        assert_eq!(record.elements.len(), 1);
        assert_eq!(record.elements[0].kind(), "image");
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_is_a_record() {
        let mut surface = ScriptedSurface::new("s");
        surface.serialize_fails = true;
        surface.enumerate_fails = true;
        let host = Arc::new(SimulatedHost::new(Scenario::immediately_ready(surface)));
        let engine = CaptureEngine::new(host);

        let record = engine.capture_live(&[binding("s")]).await;
        assert!(record.elements.is_empty());
        assert_eq!(
            record.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::SerializationFailure)
        );

        let record = engine.capture_live(&[]).await;
        assert_eq!(record.error.map(|e| e.kind), Some(ErrorKind::NoSurfaceFound));
    }

    #[test]
    fn test_degraded_records() {
        let mock = emergency_mock();
        assert_eq!(mock.instance_meta.id, MOCK_INSTANCE_ID);
        assert_eq!(mock.container_dimensions.width, 800);
        assert!(!mock.is_error());

        let unavailable = unavailable("critical fallback active");
        assert!(unavailable.elements.is_empty());
        assert_eq!(unavailable.mode, CaptureMode::Unavailable);
    }
}
