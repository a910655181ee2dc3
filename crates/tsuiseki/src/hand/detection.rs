//! Palm detection.

use std::sync::Arc;

use tsuiseki_geom::Resolution;

use crate::{
    detection::{ssd::PALM_LAYERS, Detection, Detector},
    error::PredictError,
    frame::Frame,
    nn::{Cnn, ColorMapper, Model},
    timer::Timer,
};

/// Names of the palm keypoints, in output order.
pub const KEYPOINT_NAMES: &[&str] = &[
    "wrist",
    "indexMCP",
    "middleMCP",
    "ringMCP",
    "pinkyMCP",
    "thumbCMC",
    "thumbMCP",
];

pub const WRIST: usize = 0;
pub const MIDDLE_FINGER_BASE: usize = 2;

/// Locates palms and 7 palm keypoints.
///
/// Palms are easier to detect than whole hands, since they are roughly square and rigid. Works with
/// 192x192 SSD models using the palm anchor layout (2016 anchors).
pub struct PalmDetector {
    detector: Detector,
}

impl PalmDetector {
    /// Wraps a palm detection model. Its input is expected to take RGB values in `-1.0..=1.0`.
    pub fn new(model: Arc<dyn Model>) -> anyhow::Result<Self> {
        let cnn = Cnn::detect_layout(model, ColorMapper::linear(-1.0..=1.0))?;
        Ok(Self {
            detector: Detector::new(cnn, PALM_LAYERS, KEYPOINT_NAMES.len()),
        })
    }

    pub fn input_resolution(&self) -> Resolution {
        self.detector.input_resolution()
    }

    pub fn set_limits(&mut self, iou_threshold: f32, max_detected: usize) {
        let nms = self.detector.nms_mut();
        nms.set_iou_thresh(iou_threshold);
        nms.set_max_output(max_detected);
    }

    pub fn detect(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
    ) -> Result<Vec<Detection>, PredictError> {
        self.detector.detect(frame, min_confidence)
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        self.detector.timers()
    }
}
