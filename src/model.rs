//! Data models for Firewatch.
//!
//! Everything the monitor passes between its components lives here: raw
//! detector output, the filtered per-frame sample that drives the fire state
//! machine, the records persisted to the detection history, and the request
//! and response bodies of the operator console.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box area in square pixels. Degenerate boxes have zero area.
    pub fn area(&self) -> f64 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// One box reported by the object-detection model for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Class index predicted by the model.
    pub class_id: u32,

    /// Model confidence in `[0, 1]`.
    pub confidence: f64,

    /// Where in the frame the object was found.
    pub bbox: BoundingBox,

    /// Fraction of pixels inside the box whose colour falls in the flame
    /// range, in `[0, 1]`.
    ///
    /// Computed by the detection source alongside inference; a source that
    /// cannot compute it reports `1.0` so the colour check passes.
    #[serde(default = "default_fire_ratio")]
    pub fire_ratio: f64,
}

fn default_fire_ratio() -> f64 {
    1.0
}

/// Everything the detection source produced for one camera frame.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub detections: Vec<RawDetection>,

    /// Encoded image bytes of the frame, kept as evidence when a fire is
    /// confirmed. Sources without access to the image leave this empty.
    pub image: Option<Vec<u8>>,
}

/// A detection that survived class, confidence and colour filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireCandidate {
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// One frame's analysis result as seen by the fire state machine.
///
/// Produced once per frame and consumed immediately; never retained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSample {
    pub candidates: Vec<FireCandidate>,
}

impl DetectionSample {
    /// A sample with no fire in it.
    pub fn clear() -> Self {
        Self::default()
    }

    /// A sample with a single fire candidate covering an arbitrary box.
    pub fn with_fire(confidence: f64) -> Self {
        Self {
            candidates: vec![FireCandidate {
                confidence,
                bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            }],
        }
    }

    pub fn fire_detected_now(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// Highest candidate confidence, or `0.0` for an empty sample.
    pub fn max_confidence(&self) -> f64 {
        self.candidates
            .iter()
            .map(|c| c.confidence)
            .fold(0.0, f64::max)
    }
}

/// Lifecycle phase of the fire state machine.
///
/// The "armed" part of the lifecycle is the stretch of `Onset` during which
/// the continuous-detection timer runs toward the arm delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirePhase {
    /// No fire in the most recent sample.
    Idle,

    /// Fire seen continuously, arm delay not yet reached.
    Onset,

    /// Arm delay reached during the current episode; the alarm was requested.
    Triggered,
}

impl FirePhase {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            FirePhase::Idle => "Idle",
            FirePhase::Onset => "Onset",
            FirePhase::Triggered => "Triggered",
        }
    }
}

/// Physical location of the monitored camera, stamped onto every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub zone: String,
    pub building: String,
    pub camera_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for LocationInfo {
    fn default() -> Self {
        Self {
            zone: "Systems Engineering Hall".to_string(),
            building: "Building B".to_string(),
            camera_id: "CAM_01".to_string(),
            latitude: 19.432608,
            longitude: -99.133209,
        }
    }
}

/// What happened, as handed to the event logger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerReport {
    /// Confidence on the 0–100 scale.
    pub confidence: f64,

    /// Continuous detection time in seconds.
    pub duration: f64,

    pub alarm_triggered: bool,
    pub manual_silence: bool,
}

/// One persisted historical event. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub timestamp: DateTime<Utc>,

    /// Confidence on the 0–100 scale.
    pub confidence: f64,

    /// Continuous detection time in seconds.
    pub duration: f64,

    pub alarm_triggered: bool,

    #[serde(default)]
    pub manual_silence: bool,

    /// Evidence image path. The file may have been removed since; readers
    /// must treat a dangling path as "no image".
    #[serde(default)]
    pub image_path: Option<String>,

    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Time window covered by a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    #[default]
    Week,
    Month,
}

impl ReportPeriod {
    pub fn days(&self) -> u32 {
        match self {
            ReportPeriod::Week => 7,
            ReportPeriod::Month => 30,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReportPeriod::Week => "weekly",
            ReportPeriod::Month => "monthly",
        }
    }
}

/// Aggregate figures over a set of detection records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_detections: usize,
    pub alarms_triggered: usize,
    pub avg_confidence: f64,
    pub total_duration: f64,
}

/// Point-in-time view of the whole monitor, published by the status loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub phase: FirePhase,
    pub fire_detected: bool,
    pub detection_count: u64,
    pub continuous_duration: f64,

    /// Confidence on the 0–100 scale.
    pub confidence: f64,

    pub alarm_active: bool,

    /// Seconds until the alarm silences itself, while it is sounding.
    pub alarm_remaining_secs: Option<f64>,

    pub actuator_connected: bool,
    pub camera_online: bool,
    pub updated_at: DateTime<Utc>,
}

/// Category of an operator notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    FireDetected,
    AlarmTriggered,
    FireCleared,
    AlarmSilenced,
    Connectivity,
    Persistence,
    Source,
}

/// A message pushed out to whatever presentation layer is attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub timestamp: DateTime<Utc>,
    pub kind: NoticeKind,
    pub message: String,
}

/// Request body for POST /chat.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Response for POST /chat.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

/// Response for the alarm action endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    /// Whether the action had an effect.
    pub performed: bool,
    pub message: String,
}

/// Query parameters for GET /history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Lookback window in days (default: 7).
    #[serde(default = "default_history_days")]
    pub days: u32,
}

fn default_history_days() -> u32 {
    7
}

/// Query parameters for POST /reports.
#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub period: ReportPeriod,
}

/// Response for POST /reports.
#[derive(Debug, Clone, Serialize)]
pub struct ReportResponse {
    pub path: String,
    pub period: ReportPeriod,
    pub detections: usize,
}
