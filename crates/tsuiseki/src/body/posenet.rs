//! Multi-person pose estimation with a bottom-up heatmap model.

use std::sync::Arc;

use tsuiseki_geom::{num::sigmoid, Resolution};

use crate::{
    config::PoseNetConfig,
    decode::{DecodeParams, DecodedPose, DecoderInputs, PoseChain, PoseGraphDecoder},
    error::{ConfigError, PredictError},
    frame::Frame,
    landmark::Instance,
    nn::{ops, tensor::Tensor, Cnn, ColorMapper, Model},
    pipeline::{EntityKind, Pipeline},
    timer::Timer,
};

use super::{coco_keypoint, pose_instance};

/// A PoseNet-style model: heatmaps, offsets and displacement fields over a coarse grid.
pub struct PoseNet {
    cnn: Cnn,
    t_infer: Timer,
}

impl PoseNet {
    /// Wraps a pose model. Its input is expected to take RGB values in `-1.0..=1.0`.
    ///
    /// The model must produce 4 outputs: offsets, heatmap logits, forward displacements and
    /// backward displacements.
    pub fn new(model: Arc<dyn Model>) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::detect_layout(model, ColorMapper::linear(-1.0..=1.0))?,
            t_infer: Timer::new("posenet"),
        })
    }

    pub fn input_resolution(&self) -> Resolution {
        self.cnn.input_resolution()
    }

    /// Runs the model on the whole frame.
    ///
    /// The returned outputs are in decoder order: heatmap (with sigmoid applied), offsets, forward
    /// and backward displacements.
    fn estimate(&self, frame: &Frame) -> Result<[Tensor; 4], PredictError> {
        let input = ops::resize(frame.tensor(), self.input_resolution());
        let outputs = self.t_infer.time(|| self.cnn.estimate(&input))?;
        let [offsets, mut heatmap, fwd, bwd]: [Tensor; 4] = outputs
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|outputs: Vec<Tensor>| {
                PredictError::invalid(format!(
                    "pose model produced {} outputs, expected 4",
                    outputs.len()
                ))
            })?;
        heatmap.map_in_place(sigmoid);
        Ok([heatmap, offsets, fwd, bwd])
    }

    pub fn timer(&self) -> &Timer {
        &self.t_infer
    }
}

/// Finds the poses of any number of people in a frame.
///
/// Poses are not tracked across frames: the model always runs on the whole frame, and instance ids
/// are the rank of each pose's root score.
pub struct PoseNetPipeline {
    config: PoseNetConfig,
    model: PoseNet,
    decoder: PoseGraphDecoder,
    t_decode: Timer,
}

impl PoseNetPipeline {
    pub fn new(config: PoseNetConfig, model: PoseNet) -> Result<Self, ConfigError> {
        config.validate()?;
        let decoder = PoseGraphDecoder::new(
            PoseChain::coco(),
            DecodeParams {
                min_confidence: config.min_confidence,
                max_detected: config.max_detected,
                nms_radius: config.nms_radius,
                output_stride: config.output_stride,
                ..DecodeParams::default()
            },
        );
        Ok(Self {
            config,
            model,
            decoder,
            t_decode: Timer::new("pose decode"),
        })
    }

    pub fn config(&self) -> &PoseNetConfig {
        &self.config
    }

    pub fn set_min_confidence(&mut self, min_confidence: f32) {
        self.config.min_confidence = min_confidence;
        self.decoder.set_min_confidence(min_confidence);
    }

    /// Converts a decoded pose from model input to frame coordinates.
    fn to_instance(&self, id: usize, pose: &DecodedPose, frame: &Frame) -> Option<Instance> {
        let res = frame.resolution();
        let [fw, fh] = res.as_f32();
        let [iw, ih] = self.model.input_resolution().as_f32();
        let (sx, sy) = (fw / iw, fh / ih);

        let keypoints = pose
            .keypoints
            .iter()
            .map(|kp| {
                let [x, y] = kp.position;
                coco_keypoint(kp.part, [x * sx, y * sy], kp.score, res)
            })
            .collect();
        pose_instance(id, keypoints, pose.score, res)
    }
}

impl Pipeline for PoseNetPipeline {
    fn kind(&self) -> EntityKind {
        EntityKind::Body
    }

    fn predict(&mut self, frame: &Frame) -> Result<Vec<Instance>, PredictError> {
        let [heatmap, offsets, fwd, bwd] = self.model.estimate(frame)?;

        let poses = self.t_decode.time(|| {
            self.decoder.decode(&DecoderInputs {
                heatmap: &heatmap,
                offsets: &offsets,
                displacements_fwd: &fwd,
                displacements_bwd: &bwd,
            })
        })?;

        let min_confidence = self.config.min_confidence;
        let instances: Vec<_> = poses
            .iter()
            .filter(|pose| {
                let keep = pose.score >= min_confidence;
                if !keep {
                    log::trace!("dropping pose with score {:.3}", pose.score);
                }
                keep
            })
            .enumerate()
            .filter_map(|(id, pose)| self.to_instance(id, pose, frame))
            .collect();

        log::debug!("{} bodies ({} decoded)", instances.len(), poses.len());
        Ok(instances)
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![self.model.timer(), &self.t_decode]
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::test::{solid_frame, StaticModel};

    use super::*;

    const PARTS: usize = 17;
    const EDGES: usize = 16;

    /// A 4x4 grid where every part peaks in cell (1, 1) with logit `logit`.
    fn outputs(logit: f32) -> Vec<Tensor> {
        let heatmap = Tensor::from_array_shape_fn([1, 4, 4, PARTS], |[_, y, x, _]| {
            if (y, x) == (1, 1) {
                logit
            } else {
                -10.0
            }
        });
        vec![
            Tensor::zeros(&[1, 4, 4, 2 * PARTS]),
            heatmap,
            Tensor::zeros(&[1, 4, 4, 2 * EDGES]),
            Tensor::zeros(&[1, 4, 4, 2 * EDGES]),
        ]
    }

    fn pipeline(outputs: Vec<Tensor>, config: PoseNetConfig) -> PoseNetPipeline {
        let model = PoseNet::new(StaticModel::arc(&[1, 64, 64, 3], outputs)).unwrap();
        PoseNetPipeline::new(config, model).unwrap()
    }

    #[test]
    fn single_pose_in_frame_coordinates() {
        let mut pipeline = pipeline(outputs(5.0), PoseNetConfig::default());
        let frame = solid_frame(128, 96, 0.5);
        let instances = pipeline.predict(&frame).unwrap();

        assert_eq!(instances.len(), 1);
        let body = &instances[0];
        assert_eq!(body.id, 0);
        assert_abs_diff_eq!(body.score, sigmoid(5.0), epsilon = 1e-5);
        assert_eq!(body.keypoints.len(), PARTS);
        // cell (1, 1) is at (16, 16) in input pixels
        for kp in &body.keypoints {
            assert_abs_diff_eq!(kp.x(), 32.0);
            assert_abs_diff_eq!(kp.y(), 24.0);
        }
        let nose = body.keypoint("nose").unwrap();
        assert_eq!(nose.raw, Some([0.25, 0.25, 0.0]));
        assert_eq!(body.annotation("torso").map(|t| t.len()), Some(5));
    }

    #[test]
    fn weak_poses_are_dropped() {
        let config = PoseNetConfig {
            min_confidence: 0.999,
            ..PoseNetConfig::default()
        };
        let mut pipeline = pipeline(outputs(5.0), config);
        let frame = solid_frame(64, 64, 0.5);
        assert!(pipeline.predict(&frame).unwrap().is_empty());

        pipeline.set_min_confidence(0.5);
        assert_eq!(pipeline.predict(&frame).unwrap().len(), 1);
    }

    #[test]
    fn empty_heatmap() {
        let mut pipeline = pipeline(outputs(-10.0), PoseNetConfig::default());
        let frame = solid_frame(64, 64, 0.5);
        assert!(pipeline.predict(&frame).unwrap().is_empty());
    }

    #[test]
    fn wrong_output_count() {
        let mut outputs = outputs(5.0);
        outputs.pop();
        let mut pipeline = pipeline(outputs, PoseNetConfig::default());
        let frame = solid_frame(64, 64, 0.5);
        assert!(matches!(
            pipeline.predict(&frame),
            Err(PredictError::InvalidInput(_))
        ));
    }

    #[test]
    fn invalid_config() {
        let model = PoseNet::new(StaticModel::arc(&[1, 64, 64, 3], outputs(0.0))).unwrap();
        let config = PoseNetConfig {
            output_stride: 0,
            ..PoseNetConfig::default()
        };
        assert!(PoseNetPipeline::new(config, model).is_err());
    }
}
