//! Coarse object detection with Single-Shot MultiBox Detectors.
//!
//! The face and palm detectors share the same output format: one tensor with a box and a number of
//! keypoints per anchor, and one tensor with a logit score per anchor. [`Detector`] decodes both,
//! applies non-maximum suppression, and maps the results into frame coordinates.

pub mod nms;
pub mod ssd;

use tsuiseki_geom::{num::sigmoid, Point, Rect, Resolution};

use crate::{
    error::PredictError,
    frame::Frame,
    nn::{ops, tensor::Tensor, Cnn, Outputs},
    timer::Timer,
};

use self::{
    nms::NonMaxSuppression,
    ssd::{AnchorParams, Anchors, LayerInfo},
};

/// A detected object.
///
/// A [`Detection`] consists of a [`Rect`] enclosing the detected object, a confidence value
/// between 0.0 and 1.0, and a possibly empty set of located keypoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    confidence: f32,
    rect: Rect,
    keypoints: Vec<Point>,
}

impl Detection {
    pub fn new(confidence: f32, rect: Rect) -> Self {
        Self {
            confidence,
            rect,
            keypoints: Vec::new(),
        }
    }

    pub fn with_keypoints(confidence: f32, rect: Rect, keypoints: Vec<Point>) -> Self {
        Self {
            confidence,
            rect,
            keypoints,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the axis-aligned rectangle containing the detected object.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn keypoints(&self) -> &[Point] {
        &self.keypoints
    }

    /// Scales the rectangle and all keypoints by per-axis factors.
    pub fn scale(&mut self, factor: [f32; 2]) {
        self.rect = self.rect.scale_coords(factor);
        for kp in &mut self.keypoints {
            kp[0] *= factor[0];
            kp[1] *= factor[1];
        }
    }
}

/// Decodes raw SSD outputs into detections in network input coordinates.
///
/// Each anchor's regressors are `[x, y, w, h, kp0x, kp0y, ...]`. Box centers and keypoints are
/// offsets from the anchor in input pixels, box sizes are absolute.
fn decode_outputs(
    anchors: &Anchors,
    num_keypoints: usize,
    input_res: Resolution,
    boxes: &Tensor,
    scores: &Tensor,
    threshold: f32,
) -> Vec<Detection> {
    let [input_w, input_h] = input_res.as_f32();
    let stride = 4 + num_keypoints * 2;

    scores
        .data()
        .iter()
        .zip(boxes.data().chunks_exact(stride))
        .zip(anchors.iter())
        .filter_map(|((&logit, params), anchor)| {
            let conf = sigmoid(logit);
            if conf < threshold {
                return None;
            }

            let ax = anchor.x_center() * input_w;
            let ay = anchor.y_center() * input_h;
            let rect = Rect::from_center(params[0] + ax, params[1] + ay, params[2], params[3]);
            let keypoints = params[4..]
                .chunks_exact(2)
                .map(|kp| [kp[0] + ax, kp[1] + ay])
                .collect();
            Some(Detection::with_keypoints(conf, rect, keypoints))
        })
        .collect()
}

/// A generic SSD detector with a fixed anchor layout.
pub struct Detector {
    cnn: Cnn,
    anchors: Anchors,
    num_keypoints: usize,
    nms: NonMaxSuppression,
    t_infer: Timer,
    t_extract: Timer,
    t_nms: Timer,
}

impl Detector {
    /// Creates a detector for `cnn`, whose outputs are laid out according to `layers`.
    ///
    /// `num_keypoints` is the number of 2D keypoints each anchor regresses besides its box.
    pub fn new(cnn: Cnn, layers: &[LayerInfo], num_keypoints: usize) -> Self {
        Self {
            cnn,
            anchors: Anchors::calculate(&AnchorParams { layers }),
            num_keypoints,
            nms: NonMaxSuppression::new(),
            t_infer: Timer::new("detect"),
            t_extract: Timer::new("extract"),
            t_nms: Timer::new("nms"),
        }
    }

    pub fn input_resolution(&self) -> Resolution {
        self.cnn.input_resolution()
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.anchor_count()
    }

    pub fn nms_mut(&mut self) -> &mut NonMaxSuppression {
        &mut self.nms
    }

    /// Locates the boxes and scores in the network outputs.
    ///
    /// Exporters disagree on the output order and on leading unit dimensions, so the tensors are
    /// told apart by their element counts.
    fn split_outputs<'a>(&self, outputs: &'a Outputs) -> Result<(&'a Tensor, &'a Tensor), PredictError> {
        let n = self.anchor_count();
        let box_len = n * (4 + self.num_keypoints * 2);
        let find = |len: usize| outputs.iter().find(|t| t.len() == len);
        match (find(box_len), find(n)) {
            (Some(boxes), Some(scores)) => Ok((boxes, scores)),
            _ => Err(PredictError::invalid(format!(
                "detector outputs {:?} do not match {} anchors with {} keypoints",
                outputs.iter().map(|t| t.shape().to_vec()).collect::<Vec<_>>(),
                n,
                self.num_keypoints,
            ))),
        }
    }

    /// Runs the detector on a whole frame.
    ///
    /// The frame is stretched to the network's input resolution. Returned detections are in frame
    /// coordinates, ordered by descending confidence.
    pub fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>, PredictError> {
        let input_res = self.input_resolution();
        let outputs = self.t_infer.time(|| {
            let input = ops::resize(frame.tensor(), input_res);
            self.cnn.estimate(&input)
        })?;

        let (boxes, scores) = self.split_outputs(&outputs)?;
        let detections = self.t_extract.time(|| {
            decode_outputs(
                &self.anchors,
                self.num_keypoints,
                input_res,
                boxes,
                scores,
                threshold,
            )
        });
        let mut detections = self.t_nms.time(|| self.nms.process(detections));

        let [fw, fh] = frame.resolution().as_f32();
        let [iw, ih] = input_res.as_f32();
        for det in &mut detections {
            det.scale([fw / iw, fh / ih]);
        }

        log::trace!("{} detections above {threshold}", detections.len());
        Ok(detections)
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract, &self.t_nms].into_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use crate::{
        nn::{CnnInputShape, ColorMapper},
        test::{solid_frame, StaticModel},
    };

    use super::*;

    /// Layout with 2x2 cells and one box each.
    const TINY: &[LayerInfo] = &[LayerInfo::new(1, 2, 2)];

    fn tiny_outputs(hit: usize, params: [f32; 6]) -> Vec<Tensor> {
        let mut boxes = vec![0.0; 4 * 6];
        boxes[hit * 6..hit * 6 + 6].copy_from_slice(&params);
        let scores = (0..4).map(|i| if i == hit { 5.0 } else { -5.0 });
        vec![
            Tensor::from_iter(&[1, 4, 1], scores),
            Tensor::from_iter(&[1, 4, 6], boxes),
        ]
    }

    #[test]
    fn decodes_relative_to_anchor() {
        let anchors = Anchors::calculate(&AnchorParams { layers: TINY });
        let outputs = tiny_outputs(3, [1.0, -2.0, 8.0, 6.0, 0.5, 0.5]);
        let dets = decode_outputs(
            &anchors,
            1,
            Resolution::new(16, 16),
            &outputs[1],
            &outputs[0],
            0.5,
        );
        assert_eq!(dets.len(), 1);
        let det = &dets[0];
        // anchor 3 is the bottom right cell, centered at (12, 12)
        assert_eq!(det.rect().center(), [13.0, 10.0]);
        assert_eq!(det.rect().size(), [8.0, 6.0]);
        assert_eq!(det.keypoints(), &[[12.5, 12.5]]);
        assert_relative_eq!(det.confidence(), sigmoid(5.0));
    }

    #[test]
    fn detect_maps_to_frame() {
        let model = StaticModel::new(&[1, 16, 16, 3], tiny_outputs(0, [0.0, 0.0, 4.0, 4.0, 1.0, 1.0]));
        let cnn = Cnn::new(Arc::new(model), CnnInputShape::NHWC, ColorMapper::linear(-1.0..=1.0)).unwrap();
        let mut detector = Detector::new(cnn, TINY, 1);

        let frame = solid_frame(64, 32, 0.5);
        let dets = detector.detect(&frame, 0.5).unwrap();
        assert_eq!(dets.len(), 1);
        // input (4, 4) is frame (16, 8)
        assert_eq!(dets[0].rect(), Rect::from_center(16.0, 8.0, 16.0, 8.0));
        assert_eq!(dets[0].keypoints(), &[[20.0, 10.0]]);

        assert!(detector.detect(&frame, 0.9999).unwrap().is_empty());
    }

    #[test]
    fn rejects_unexpected_outputs() {
        let model = StaticModel::new(&[1, 16, 16, 3], vec![Tensor::zeros(&[1, 5])]);
        let cnn = Cnn::new(Arc::new(model), CnnInputShape::NHWC, ColorMapper::linear(0.0..=1.0)).unwrap();
        let mut detector = Detector::new(cnn, TINY, 1);
        assert!(matches!(
            detector.detect(&solid_frame(8, 8, 0.0), 0.5),
            Err(PredictError::InvalidInput(_))
        ));
    }
}
