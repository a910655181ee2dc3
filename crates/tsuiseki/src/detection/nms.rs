//! Non-maximum suppression.
//!
//! SSD detectors fire on many neighboring anchors for the same object. NMS keeps the most confident
//! detection of every cluster of overlapping boxes and drops the rest.

use tsuiseki_geom::num::TotalF32;

use super::Detection;

/// Greedy non-maximum suppression with an output limit.
#[derive(Debug, Clone)]
pub struct NonMaxSuppression {
    iou_thresh: f32,
    max_output: usize,
}

impl NonMaxSuppression {
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    /// Creates a suppressor with [`Self::DEFAULT_IOU_THRESH`] and no output limit.
    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            max_output: usize::MAX,
        }
    }

    /// Detections overlapping a better one by more than `iou_thresh` are dropped.
    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    pub fn set_max_output(&mut self, max_output: usize) {
        self.max_output = max_output;
    }

    /// Filters `detections`, returning the survivors by descending confidence.
    ///
    /// At most `max_output` detections are returned. Detections of equal confidence keep their
    /// input order.
    pub fn process(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        detections.sort_by_key(|det| std::cmp::Reverse(TotalF32(det.confidence)));

        let mut kept: Vec<Detection> = Vec::new();
        for det in detections {
            if kept.len() >= self.max_output {
                break;
            }
            let rect = det.rect();
            let suppressed = kept
                .iter()
                .any(|better| better.rect().iou(&rect) > self.iou_thresh);
            if suppressed {
                log::trace!("suppressing {:?} ({})", rect, det.confidence);
            } else {
                kept.push(det);
            }
        }
        kept
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}
