//! Candidate filtering between the raw detector output and the state machine.
//!
//! The model alone produces enough false positives (sunsets, red clothing,
//! lamps) that its boxes are only trusted when three checks pass: the class
//! is fire, the model is confident enough, and a meaningful share of the
//! pixels inside the box actually have flame colours.

use crate::config::MonitorConfig;
use crate::model::{DetectionSample, FireCandidate, RawDetection};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateFilter {
    pub fire_class_id: u32,
    pub min_confidence: f64,
    /// Strict lower bound on the flame-coloured pixel share.
    pub min_fire_ratio: f64,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self {
            fire_class_id: 0,
            min_confidence: 0.5,
            min_fire_ratio: 0.15,
        }
    }
}

impl CandidateFilter {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            fire_class_id: config.fire_class_id,
            min_confidence: config.model_confidence,
            min_fire_ratio: config.min_fire_ratio,
        }
    }

    pub fn accepts(&self, detection: &RawDetection) -> bool {
        detection.class_id == self.fire_class_id
            && detection.confidence >= self.min_confidence
            && detection.bbox.area() > 0.0
            && detection.fire_ratio > self.min_fire_ratio
    }

    /// Reduce one frame's detections to the sample the state machine sees.
    pub fn sample(&self, detections: &[RawDetection]) -> DetectionSample {
        DetectionSample {
            candidates: detections
                .iter()
                .filter(|d| self.accepts(d))
                .map(|d| FireCandidate {
                    confidence: d.confidence,
                    bbox: d.bbox,
                })
                .collect(),
        }
    }
}
