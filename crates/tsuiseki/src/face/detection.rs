//! Short-range face detection.

use std::sync::Arc;

use tsuiseki_geom::Resolution;

use crate::{
    detection::{ssd::FACE_LAYERS, Detection, Detector},
    error::PredictError,
    frame::Frame,
    nn::{Cnn, ColorMapper, Model},
    timer::Timer,
};

/// Names of the keypoints the face detector regresses, in output order.
pub const KEYPOINT_NAMES: &[&str] = &[
    "leftEye", "rightEye", "nose", "mouth", "leftEar", "rightEar",
];

pub const NOSE: usize = 2;
pub const MOUTH: usize = 3;

/// Locates faces and 6 coarse facial keypoints.
///
/// Works with 128x128 SSD models using the short-range anchor layout (896 anchors).
pub struct FaceDetector {
    detector: Detector,
}

impl FaceDetector {
    /// Wraps a face detection model. Its input is expected to take RGB values in `-1.0..=1.0`.
    pub fn new(model: Arc<dyn Model>) -> anyhow::Result<Self> {
        let cnn = Cnn::detect_layout(model, ColorMapper::linear(-1.0..=1.0))?;
        Ok(Self {
            detector: Detector::new(cnn, FACE_LAYERS, KEYPOINT_NAMES.len()),
        })
    }

    pub fn input_resolution(&self) -> Resolution {
        self.detector.input_resolution()
    }

    /// Sets the IOU threshold for suppressing overlapping faces and the maximum number of faces to
    /// return.
    pub fn set_limits(&mut self, iou_threshold: f32, max_detected: usize) {
        let nms = self.detector.nms_mut();
        nms.set_iou_thresh(iou_threshold);
        nms.set_max_output(max_detected);
    }

    /// Detects faces with at least `min_confidence` in a frame.
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

#[cfg(test)]
mod tests {
    use crate::test::{solid_frame, ssd_outputs, StaticModel};

    use super::*;

    #[test]
    fn detects_in_frame_coordinates() {
        // anchor 0 sits at (4, 4) in input pixels
        let mut params = vec![0.0; 16];
        params[2] = 20.0;
        params[3] = 20.0;
        params[4 + 2 * MOUTH + 1] = 6.0;
        let model = StaticModel::arc(&[1, 128, 128, 3], ssd_outputs(896, 0, &params));

        let mut detector = FaceDetector::new(model).unwrap();
        assert_eq!(detector.input_resolution(), Resolution::square(128));
        detector.set_limits(0.3, 1);

        let frame = solid_frame(256, 128, 0.5);
        let detections = detector.detect(&frame, 0.5).unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.rect().center(), [8.0, 4.0]);
        assert_eq!(det.rect().size(), [40.0, 20.0]);
        assert_eq!(det.keypoints().len(), 6);
        assert_eq!(det.keypoints()[MOUTH], [8.0, 10.0]);
    }
}
