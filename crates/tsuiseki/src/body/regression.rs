//! Single-person pose estimation with a keypoint regression model.

use std::{sync::Arc, time::Instant};

use tsuiseki_geom::{Rect, Resolution};

use crate::{
    cache::{CachePolicy, Region, RegionCache, SlotOutcome},
    config::RegressionConfig,
    decode::COCO_PARTS,
    detection::Detector,
    error::{ConfigError, PredictError},
    frame::{Frame, FrameChangeDetector},
    landmark::Instance,
    nn::{tensor::Tensor, Cnn, ColorMapper, Model},
    normalize::correct_region,
    pipeline::{EntityKind, Pipeline},
    timer::Timer,
};

use super::{coco_keypoint, pose_instance};

const TRACKED_BOX_SCALE: f32 = 1.5;

/// A model regressing the 17 COCO keypoints of the person in its input.
pub struct PoseRegressor {
    cnn: Cnn,
    t_infer: Timer,
}

impl PoseRegressor {
    /// Wraps a keypoint regression model. Its input is expected to take RGB values in
    /// `0.0..=255.0`.
    pub fn new(model: Arc<dyn Model>) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::detect_layout(model, ColorMapper::linear(0.0..=255.0))?,
            t_infer: Timer::new("pose regression"),
        })
    }

    pub fn input_resolution(&self) -> Resolution {
        self.cnn.input_resolution()
    }

    /// Returns one `[y, x, score]` row per part, with positions normalized to the crop.
    pub fn estimate(&self, crop: &Tensor) -> Result<Vec<[f32; 3]>, PredictError> {
        let outputs = self.t_infer.time(|| self.cnn.estimate(crop))?;
        let rows = outputs
            .iter()
            .find(|t| t.len() == COCO_PARTS.len() * 3)
            .ok_or_else(|| PredictError::invalid("pose model produced no keypoint output"))?;
        Ok(rows
            .data()
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect())
    }

    pub fn timer(&self) -> &Timer {
        &self.t_infer
    }
}

/// Tracks the pose of one person, or of one person per detected box.
///
/// Without a person detector, the model runs on the whole frame until a pose is found, and then on
/// the area around that pose if [`RegressionConfig::track_box`] is set.
pub struct RegressionPipeline {
    config: RegressionConfig,
    regressor: PoseRegressor,
    detector: Option<Detector>,
    cache: RegionCache,
    gate: FrameChangeDetector,
    t_post: Timer,
}

impl RegressionPipeline {
    /// Creates a pipeline that looks for a single person in the whole frame.
    pub fn new(config: RegressionConfig, regressor: PoseRegressor) -> Result<Self, ConfigError> {
        Self::build(config, regressor, None)
    }

    /// Creates a pipeline that runs the regression model on the boxes found by a person detector.
    pub fn with_detector(
        config: RegressionConfig,
        regressor: PoseRegressor,
        mut detector: Detector,
    ) -> Result<Self, ConfigError> {
        let nms = detector.nms_mut();
        nms.set_iou_thresh(config.iou_threshold);
        nms.set_max_output(config.max_detected);
        Self::build(config, regressor, Some(detector))
    }

    fn build(
        config: RegressionConfig,
        regressor: PoseRegressor,
        detector: Option<Detector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let max_tracked = if detector.is_some() {
            config.max_detected
        } else {
            1
        };
        let cache = RegionCache::new(CachePolicy::new(
            &config.cache,
            max_tracked,
            config.track_box,
        ));
        Ok(Self {
            gate: FrameChangeDetector::new(config.cache.cache_sensitivity),
            config,
            regressor,
            detector,
            cache,
            t_post: Timer::new("pose post"),
        })
    }

    pub fn config(&self) -> &RegressionConfig {
        &self.config
    }

    pub fn cache(&self) -> &RegionCache {
        &self.cache
    }

    pub fn set_min_confidence(&mut self, min_confidence: f32) {
        self.config.min_confidence = min_confidence;
    }

    fn track(
        &self,
        frame: &Frame,
        id: usize,
        region: &Region,
    ) -> Result<(Option<Instance>, SlotOutcome), PredictError> {
        let res = frame.resolution();
        let input = self.regressor.input_resolution();
        let Some(corrected) = correct_region(frame, &region.rect, input, false, 0.0) else {
            return Ok((None, SlotOutcome::Evict));
        };
        let rows = self.regressor.estimate(&corrected.crop)?;

        let _guard = self.t_post.start();
        let rect = region.rect;
        let min_confidence = self.config.min_confidence;
        let keypoints: Vec<_> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row[2] > min_confidence)
            .map(|(part, &[y, x, score])| {
                let pos = [rect.x() + x * rect.width(), rect.y() + y * rect.height()];
                coco_keypoint(part, pos, score, res)
            })
            .collect();
        let score = keypoints.iter().map(|kp| kp.score).fold(0.0, f32::max);
        if score < min_confidence {
            log::trace!("pose {id}: score {score:.3} below {min_confidence}, dropping");
            return Ok((None, SlotOutcome::Evict));
        }

        let positions: Vec<_> = keypoints.iter().map(|kp| kp.position).collect();
        let found = positions.len();
        let Some(instance) = pose_instance(id, keypoints, score, res) else {
            return Ok((None, SlotOutcome::Evict));
        };

        let outcome = if !self.config.track_box {
            SlotOutcome::Keep(region.clone())
        } else if found > COCO_PARTS.len() / 2 {
            match Rect::bounding(&positions) {
                Some(bounds) => {
                    let next = bounds.enlarge(TRACKED_BOX_SCALE).squarify();
                    SlotOutcome::Keep(Region::tracked(next, positions, score))
                }
                None => SlotOutcome::Evict,
            }
        } else {
            // too few keypoints for a stable box
            log::trace!("pose {id}: only {found} keypoints, not tracking");
            SlotOutcome::Evict
        };
        Ok((Some(instance), outcome))
    }
}

fn detect_regions(
    detector: Option<&mut Detector>,
    frame: &Frame,
    min_confidence: f32,
) -> Result<Vec<Region>, PredictError> {
    let Some(detector) = detector else {
        return Ok(vec![Region::detected(frame.rect(), Vec::new(), 1.0)]);
    };
    Ok(detector
        .detect(frame, min_confidence)?
        .iter()
        .map(|det| {
            let keypoints = det.keypoints().iter().map(|&[x, y]| [x, y, 0.0]).collect();
            Region::detected(det.rect(), keypoints, det.confidence())
        })
        .collect())
}

impl Pipeline for RegressionPipeline {
    fn kind(&self) -> EntityKind {
        EntityKind::Body
    }

    fn predict(&mut self, frame: &Frame) -> Result<Vec<Instance>, PredictError> {
        let skip_allowed = self.gate.skip_allowed(frame);
        let min_confidence = self.config.min_confidence;
        let detector = self.detector.as_mut();
        let refresh = self
            .cache
            .refresh_if_needed(skip_allowed, Instant::now(), || {
                detect_regions(detector, frame, min_confidence)
            })?;

        let mut outcomes = Vec::with_capacity(self.cache.tracked());
        let mut instances = Vec::new();
        for (id, region) in self.cache.regions().enumerate() {
            let (instance, outcome) = self.track(frame, id, region)?;
            instances.extend(instance);
            outcomes.push(outcome);
        }
        self.cache.finish_pass(outcomes);

        log::debug!("{} bodies ({refresh:?})", instances.len());
        Ok(instances)
    }

    fn timers(&self) -> Vec<&Timer> {
        let mut timers = match &self.detector {
            Some(detector) => detector.timers().collect(),
            None => Vec::new(),
        };
        timers.push(self.regressor.timer());
        timers.push(&self.t_post);
        timers
    }
}
