//! Core data types for surface acquisition, capture, and recovery.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived snapshot of what the host currently offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionStatus {
    pub environment_ready: bool,
    pub library_loaded: bool,
    pub surface_detected: bool,
    pub system_ready: bool,
}

impl AcquisitionStatus {
    /// Build a status, deriving `system_ready` from the other three flags.
    pub fn derive(environment_ready: bool, library_loaded: bool, surface_detected: bool) -> Self {
        Self {
            environment_ready,
            library_loaded,
            surface_detected,
            system_ready: environment_ready && library_loaded && surface_detected,
        }
    }
}

/// Opaque reference to a render-surface instance owned by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceHandle(pub String);

/// Opaque reference to the document element hosting a surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(pub String);

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pairing of a render-surface instance with its hosting element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceBinding {
    pub instance_id: String,
    pub instance: InstanceHandle,
    pub element: ElementHandle,
    pub is_primary: bool,
}

/// Axis-aligned rectangle in the host's layout coordinate space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Width/height pair in whole pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: i64,
    pub height: i64,
}

/// Metadata about the instance a capture was taken from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceMeta {
    pub id: String,
    pub width: i64,
    pub height: i64,
    pub zoom: f64,
    pub object_count: usize,
}

/// How a capture record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    Live,
    EmergencyMock,
    Unavailable,
}

/// Machine-readable reason attached to a failed capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureFailure {
    pub kind: ErrorKind,
    pub reason: String,
}

/// Normalized, serializable output of reading an acquired surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub container_dimensions: Dimensions,
    pub instance_meta: InstanceMeta,
    pub elements: Vec<ElementRecord>,
    pub mode: CaptureMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CaptureFailure>,
}

impl CaptureRecord {
    /// Structured failure record: always empty, never thrown.
    pub fn failure(session_id: &str, kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            container_dimensions: Dimensions::default(),
            instance_meta: InstanceMeta {
                id: "error".to_string(),
                width: 0,
                height: 0,
                zoom: 1.0,
                object_count: 0,
            },
            elements: Vec::new(),
            mode: CaptureMode::Unavailable,
            error: Some(CaptureFailure {
                kind,
                reason: reason.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Position, size and transform shared by every element kind.
///
/// `x`/`y` are container-relative and rounded; `width`/`height` already have
/// the scale factors applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub angle: f64,
}

/// One normalized object from a surface's object graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementRecord {
    Text {
        #[serde(flatten)]
        geometry: Geometry,
        text: String,
        font_family: String,
        font_size: f64,
        fill: serde_json::Value,
        font_weight: String,
        font_style: String,
        text_align: String,
    },
    Image {
        #[serde(flatten)]
        geometry: Geometry,
        src: String,
    },
    Rectangle {
        #[serde(flatten)]
        geometry: Geometry,
        fill: serde_json::Value,
        stroke: String,
        stroke_width: f64,
        rx: f64,
        ry: f64,
    },
    Circle {
        #[serde(flatten)]
        geometry: Geometry,
        radius: i64,
        fill: serde_json::Value,
        stroke: String,
        stroke_width: f64,
    },
    Line {
        #[serde(flatten)]
        geometry: Geometry,
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        stroke: String,
        stroke_width: f64,
    },
    Group {
        #[serde(flatten)]
        geometry: Geometry,
        children: Vec<ElementRecord>,
    },
    Unknown {
        #[serde(flatten)]
        geometry: Geometry,
        original_type: String,
        raw: serde_json::Value,
    },
}

impl ElementRecord {
    pub fn geometry(&self) -> &Geometry {
        match self {
            ElementRecord::Text { geometry, .. }
            | ElementRecord::Image { geometry, .. }
            | ElementRecord::Rectangle { geometry, .. }
            | ElementRecord::Circle { geometry, .. }
            | ElementRecord::Line { geometry, .. }
            | ElementRecord::Group { geometry, .. }
            | ElementRecord::Unknown { geometry, .. } => geometry,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ElementRecord::Text { .. } => "text",
            ElementRecord::Image { .. } => "image",
            ElementRecord::Rectangle { .. } => "rectangle",
            ElementRecord::Circle { .. } => "circle",
            ElementRecord::Line { .. } => "line",
            ElementRecord::Group { .. } => "group",
            ElementRecord::Unknown { .. } => "unknown",
        }
    }
}

/// Ordered severity of an emergency. Comparisons follow declaration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl Severity {
    /// One step up, saturating at `Emergency`.
    pub fn escalated(self) -> Self {
        match self {
            Severity::Normal => Severity::Warning,
            Severity::Warning => Severity::Critical,
            Severity::Critical | Severity::Emergency => Severity::Emergency,
        }
    }

    pub fn needs_immediate_notice(self) -> bool {
        matches!(self, Severity::Critical | Severity::Emergency)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numbered tier of restricted capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DegradationLevel {
    #[default]
    Normal = 0,
    Limited = 1,
    Minimal = 2,
    Critical = 3,
}

impl DegradationLevel {
    pub const ALL: [DegradationLevel; 4] = [
        DegradationLevel::Normal,
        DegradationLevel::Limited,
        DegradationLevel::Minimal,
        DegradationLevel::Critical,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DegradationLevel::Normal => "normal",
            DegradationLevel::Limited => "limited",
            DegradationLevel::Minimal => "minimal",
            DegradationLevel::Critical => "critical",
        }
    }
}

impl From<DegradationLevel> for u8 {
    fn from(level: DegradationLevel) -> u8 {
        level as u8
    }
}

impl TryFrom<u8> for DegradationLevel {
    type Error = SentinelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DegradationLevel::Normal),
            1 => Ok(DegradationLevel::Limited),
            2 => Ok(DegradationLevel::Minimal),
            3 => Ok(DegradationLevel::Critical),
            other => Err(SentinelError::InvalidInput(format!(
                "degradation level {other} is out of range 0..=3"
            ))),
        }
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", *self as u8, self.name())
    }
}

/// Process-wide emergency state, mutated only by the recovery side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyState {
    pub severity: Severity,
    pub degradation: DegradationLevel,
    pub fallback_active: bool,
    pub recovery_in_progress: bool,
}

impl EmergencyState {
    /// Raise severity to at least `severity`. Never lowers it.
    pub fn raise_severity(&mut self, severity: Severity) -> bool {
        if severity > self.severity {
            self.severity = severity;
            true
        } else {
            false
        }
    }

    /// Raise the degradation level to at least `level`. Never lowers it.
    pub fn raise_degradation(&mut self, level: DegradationLevel) -> bool {
        if level > self.degradation {
            self.degradation = level;
            true
        } else {
            false
        }
    }

    /// Escalate severity one step (recurring failures).
    pub fn escalate(&mut self) -> Severity {
        self.severity = self.severity.escalated();
        self.severity
    }

    /// Back to normal after an explicit successful recovery.
    pub fn reset(&mut self) {
        self.severity = Severity::Normal;
        self.degradation = DegradationLevel::Normal;
        self.fallback_active = false;
        self.recovery_in_progress = false;
    }
}

/// Kind of failure reported into the recovery side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureType {
    InitializationFailed,
    LibraryLoadFailed,
    SurfaceCreationFailed,
    RecurringFailure,
    SystemCrash,
    ManualRetry,
    RecoveryFailed,
    Other(String),
}

impl FailureType {
    pub fn as_str(&self) -> &str {
        match self {
            FailureType::InitializationFailed => "initialization-failed",
            FailureType::LibraryLoadFailed => "library-load-failed",
            FailureType::SurfaceCreationFailed => "surface-creation-failed",
            FailureType::RecurringFailure => "recurring-failure",
            FailureType::SystemCrash => "system-crash",
            FailureType::ManualRetry => "manual-retry",
            FailureType::RecoveryFailed => "recovery-failed",
            FailureType::Other(s) => s,
        }
    }
}

impl FromStr for FailureType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "initialization-failed" => FailureType::InitializationFailed,
            "library-load-failed" | "fabric-load-failed" => FailureType::LibraryLoadFailed,
            "surface-creation-failed" | "canvas-creation-failed" => {
                FailureType::SurfaceCreationFailed
            }
            "recurring-failure" => FailureType::RecurringFailure,
            "system-crash" => FailureType::SystemCrash,
            "manual-retry" => FailureType::ManualRetry,
            "recovery-failed" => FailureType::RecoveryFailed,
            other => FailureType::Other(other.to_string()),
        })
    }
}

impl From<&str> for FailureType {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(t) => t,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FailureType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FailureType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FailureType::from(s.as_str()))
    }
}

/// A failure signal entering the recovery cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSignal {
    pub failure_type: FailureType,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl FailureSignal {
    pub fn new(failure_type: FailureType) -> Self {
        Self {
            failure_type,
            details: serde_json::Value::Null,
            context: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// One entry of the failure pattern log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub failure_type: FailureType,
    pub context: serde_json::Value,
    pub emergency_level_at_time: Severity,
}

/// Discriminant of [`SentinelError`], used where errors travel as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EnvironmentNotReady,
    LibraryUnavailable,
    NoSurfaceFound,
    NoBoundInstance,
    SerializationFailure,
    AcquisitionExhausted,
    RecoveryStrategyFailed,
    AllRecoveryExhausted,
    CaptureUnavailable,
    Cancelled,
    AcquisitionInProgress,
    Host,
    Store,
    InvalidInput,
    Internal,
}

/// Errors that can occur in the sentinel engine.
#[derive(thiserror::Error, Debug)]
pub enum SentinelError {
    #[error("Host environment has not finished loading")]
    EnvironmentNotReady,

    #[error("Render-surface library is not loaded")]
    LibraryUnavailable,

    #[error("No render-surface element found")]
    NoSurfaceFound,

    #[error("No surface element is bound to an instance")]
    NoBoundInstance,

    #[error("Serialization failed: {0}")]
    SerializationFailure(String),

    #[error("Acquisition exhausted after {attempts} attempts")]
    AcquisitionExhausted {
        attempts: u32,
        status: AcquisitionStatus,
    },

    #[error("Recovery strategy {strategy} failed: {reason}")]
    RecoveryStrategyFailed { strategy: String, reason: String },

    #[error("All recovery strategies exhausted")]
    AllRecoveryExhausted,

    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Operation cancelled by a newer acquisition")]
    Cancelled,

    #[error("An acquisition is already running")]
    AcquisitionInProgress,

    #[error("Host error: {0}")]
    Host(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SentinelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SentinelError::EnvironmentNotReady => ErrorKind::EnvironmentNotReady,
            SentinelError::LibraryUnavailable => ErrorKind::LibraryUnavailable,
            SentinelError::NoSurfaceFound => ErrorKind::NoSurfaceFound,
            SentinelError::NoBoundInstance => ErrorKind::NoBoundInstance,
            SentinelError::SerializationFailure(_) => ErrorKind::SerializationFailure,
            SentinelError::AcquisitionExhausted { .. } => ErrorKind::AcquisitionExhausted,
            SentinelError::RecoveryStrategyFailed { .. } => ErrorKind::RecoveryStrategyFailed,
            SentinelError::AllRecoveryExhausted => ErrorKind::AllRecoveryExhausted,
            SentinelError::CaptureUnavailable(_) => ErrorKind::CaptureUnavailable,
            SentinelError::Cancelled => ErrorKind::Cancelled,
            SentinelError::AcquisitionInProgress => ErrorKind::AcquisitionInProgress,
            SentinelError::Host(_) => ErrorKind::Host,
            SentinelError::Store(_) => ErrorKind::Store,
            SentinelError::InvalidInput(_) => ErrorKind::InvalidInput,
            SentinelError::Json(_) | SentinelError::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience result type.
pub type SentinelResult<T> = Result<T, SentinelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_ready_is_conjunction() {
        assert!(AcquisitionStatus::derive(true, true, true).system_ready);
        assert!(!AcquisitionStatus::derive(true, false, true).system_ready);
        assert!(!AcquisitionStatus::derive(false, true, true).system_ready);
    }

    #[test]
    fn test_failure_type_aliases() {
        assert_eq!(FailureType::from("fabric-load-failed"), FailureType::LibraryLoadFailed);
        assert_eq!(
            FailureType::from("canvas-creation-failed"),
            FailureType::SurfaceCreationFailed
        );
        assert_eq!(
            FailureType::from("mystery"),
            FailureType::Other("mystery".to_string())
        );
    }

    #[test]
    fn test_emergency_state_only_raises() {
        let mut state = EmergencyState::default();
        assert!(state.raise_severity(Severity::Critical));
        assert!(!state.raise_severity(Severity::Warning));
        assert_eq!(state.severity, Severity::Critical);

        assert!(state.raise_degradation(DegradationLevel::Minimal));
        assert!(!state.raise_degradation(DegradationLevel::Limited));
        assert_eq!(state.degradation, DegradationLevel::Minimal);

        state.reset();
        assert_eq!(state, EmergencyState::default());
    }

    #[test]
    fn test_severity_escalation_saturates() {
        assert_eq!(Severity::Normal.escalated(), Severity::Warning);
        assert_eq!(Severity::Emergency.escalated(), Severity::Emergency);
    }

    #[test]
    fn test_degradation_level_serializes_as_number() {
        let json = serde_json::to_string(&DegradationLevel::Minimal).unwrap();
        assert_eq!(json, "2");
        let back: DegradationLevel = serde_json::from_str("3").unwrap();
        assert_eq!(back, DegradationLevel::Critical);
        assert!(serde_json::from_str::<DegradationLevel>("7").is_err());
    }

    #[test]
    fn test_element_record_tagged_serialization() {
        let el = ElementRecord::Image {
            geometry: Geometry {
                x: 1,
                y: 2,
                width: 3,
                height: 4,
                scale_x: 1.0,
                scale_y: 1.0,
                angle: 0.0,
            },
            src: "logo.png".to_string(),
        };
        let json = serde_json::to_value(&el).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["x"], 1);
        assert_eq!(json["src"], "logo.png");
    }
}
