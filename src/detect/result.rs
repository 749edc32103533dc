use serde::Serialize;
use std::time::Duration;

/// Outcome of the detection protocol for one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionResult {
    /// Sequence number of the originating frame.
    pub seq: u64,
    pub detections: Vec<Detection>,
    pub status: DetectionStatus,
    /// Time spent in the stages (zero when skipped).
    pub latency: Duration,
}

impl DetectionResult {
    pub fn skipped(seq: u64) -> Self {
        Self {
            seq,
            detections: Vec::new(),
            status: DetectionStatus::Skipped,
            latency: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DetectionStatus::Success
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Success,
    Skipped,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class: ObjectClass,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn label(&self) -> &'static str {
        self.class.label()
    }
}

/// Bounding region in normalized 0..1 coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.w * self.h
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Person,
    Obstacle,
    Motion,
    Unknown,
}

impl ObjectClass {
    pub fn label(self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Obstacle => "obstacle",
            ObjectClass::Motion => "motion",
            ObjectClass::Unknown => "unknown",
        }
    }
}
