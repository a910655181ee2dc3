//! Hand tracking.
//!
//! [`HandPipeline`] finds palms with a [`PalmDetector`] and estimates a 21-point hand skeleton on
//! each with the [`HandLandmarker`]. Hand crops are rotated so that the fingers point up, and the
//! skeleton of one frame determines the hand region of the next.

pub mod detection;
pub mod landmark;

use std::time::Instant;

use tsuiseki_geom::{
    rotation::{compute_rotation, is_significant, rotate_point, rotation_matrix},
    Point, Rect,
};

use crate::{
    cache::{CachePolicy, Origin, Region, RegionCache, SlotOutcome},
    config::HandConfig,
    error::{ConfigError, PredictError},
    frame::{Frame, FrameChangeDetector},
    landmark::{annotate, keypoints_from_positions, Instance},
    normalize::{correct_region_about, transform_keypoints_back, DepthScale},
    pipeline::{EntityKind, Pipeline},
    timer::Timer,
};

pub use self::{detection::PalmDetector, landmark::HandLandmarker};

/// Moves palm boxes towards the fingers, relative to their size.
const PALM_BOX_SHIFT: [f32; 2] = [0.0, -0.4];
const PALM_BOX_SCALE: f32 = 5.0;
const HAND_BOX_SHIFT: [f32; 2] = [0.0, -0.1];
const HAND_BOX_SCALE: f32 = 1.65;

/// Tracks hands and their skeletons.
pub struct HandPipeline {
    config: HandConfig,
    detector: PalmDetector,
    landmarker: HandLandmarker,
    cache: RegionCache,
    gate: FrameChangeDetector,
    t_post: Timer,
}

impl HandPipeline {
    pub fn new(
        config: HandConfig,
        mut detector: PalmDetector,
        landmarker: HandLandmarker,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        detector.set_limits(config.iou_threshold, config.max_detected);
        let cache = RegionCache::new(CachePolicy::new(
            &config.cache,
            config.max_detected,
            config.landmarks_enabled,
        ));
        Ok(Self {
            gate: FrameChangeDetector::new(config.cache.cache_sensitivity),
            config,
            detector,
            landmarker,
            cache,
            t_post: Timer::new("hand post"),
        })
    }

    pub fn config(&self) -> &HandConfig {
        &self.config
    }

    pub fn cache(&self) -> &RegionCache {
        &self.cache
    }

    pub fn set_min_confidence(&mut self, min_confidence: f32) {
        self.config.min_confidence = min_confidence;
    }

    /// Enables or disables rotating hand crops upright.
    pub fn set_rotation(&mut self, enabled: bool) {
        self.config.rotation = enabled;
    }

    /// Computes the hand's rotation from its wrist-to-middle-finger line.
    ///
    /// Returns 0 if rotation is disabled or too small to matter.
    fn rotation_of(&self, region: &Region) -> f32 {
        if !self.config.rotation {
            return 0.0;
        }
        let (from, to) = match region.origin {
            Origin::Detector => (detection::WRIST, detection::MIDDLE_FINGER_BASE),
            Origin::Landmarks => (landmark::WRIST, landmark::MIDDLE_FINGER_BASE),
        };
        let landmarks = region.landmarks();
        let angle = match (landmarks.get(from), landmarks.get(to)) {
            (Some(a), Some(b)) => compute_rotation([a[0], a[1]], [b[0], b[1]]),
            _ => 0.0,
        };
        if is_significant(angle) {
            angle
        } else {
            0.0
        }
    }

    /// Determines the crop rectangle and rotation pivot for a region.
    ///
    /// Tracked regions are used as they are. Palm regions are rebuilt around the palm keypoints,
    /// in the coordinates of the frame rotated by `-angle` around the palm center.
    fn crop_for(&self, region: &Region, angle: f32) -> Option<(Rect, Point)> {
        let pivot = region.rect.center();
        match region.origin {
            Origin::Landmarks => Some((region.rect, pivot)),
            Origin::Detector => {
                let m = rotation_matrix(-angle, pivot);
                let rotated = region
                    .landmarks()
                    .iter()
                    .map(|p| rotate_point([p[0], p[1]], &m));
                let palm = Rect::bounding(rotated)?;
                let rect = palm
                    .shift(PALM_BOX_SHIFT)
                    .squarify()
                    .enlarge(PALM_BOX_SCALE);
                Some((rect, pivot))
            }
        }
    }

    fn track(
        &self,
        frame: &Frame,
        id: usize,
        region: &Region,
    ) -> Result<Option<(Instance, Region)>, PredictError> {
        let res = frame.resolution();
        let [fw, fh] = res.as_f32();

        if !self.config.landmarks_enabled {
            let keypoints = keypoints_from_positions(
                detection::KEYPOINT_NAMES,
                region.landmarks(),
                region.confidence,
                res,
            );
            let instance = Instance::new(id, region.rect.clamp_to(fw, fh), res, region.confidence)
                .with_keypoints(keypoints);
            return Ok(Some((instance, region.clone())));
        }

        let angle = self.rotation_of(region);
        let Some((rect, pivot)) = self.crop_for(region, angle) else {
            return Ok(None);
        };
        let input = self.landmarker.input_resolution();
        let Some(corrected) = correct_region_about(frame, &rect, pivot, input, true, angle) else {
            return Ok(None);
        };

        let output = self.landmarker.estimate(&corrected.crop)?;
        if output.presence < self.config.min_confidence {
            log::trace!(
                "hand {id}: presence {:.3} below {}, dropping",
                output.presence,
                self.config.min_confidence
            );
            return Ok(None);
        }

        let _guard = self.t_post.start();
        let landmarks = transform_keypoints_back(
            &output.landmarks,
            &rect,
            corrected.angle,
            &corrected.matrix,
            input,
            DepthScale::BoxMean,
        );
        let Some(bounds) = Rect::bounding(&landmarks) else {
            return Ok(None);
        };
        let next = bounds
            .shift(HAND_BOX_SHIFT)
            .squarify()
            .enlarge(HAND_BOX_SCALE);

        let keypoints =
            keypoints_from_positions(landmark::LANDMARK_NAMES, &landmarks, output.presence, res);
        let instance = Instance::new(id, bounds.clamp_to(fw, fh), res, output.presence)
            .with_keypoints(keypoints)
            .with_annotations(annotate(landmark::HAND_ANNOTATIONS, &landmarks));
        Ok(Some((
            instance,
            Region::tracked(next, landmarks, output.presence),
        )))
    }
}

fn detect_regions(
    detector: &mut PalmDetector,
    frame: &Frame,
    min_confidence: f32,
) -> Result<Vec<Region>, PredictError> {
    let detections = detector.detect(frame, min_confidence)?;
    Ok(detections
        .iter()
        .map(|det| {
            let keypoints = det.keypoints().iter().map(|&[x, y]| [x, y, 0.0]).collect();
            Region::detected(det.rect(), keypoints, det.confidence())
        })
        .collect())
}

impl Pipeline for HandPipeline {
    fn kind(&self) -> EntityKind {
        EntityKind::Hand
    }

    fn predict(&mut self, frame: &Frame) -> Result<Vec<Instance>, PredictError> {
        let skip_allowed = self.gate.skip_allowed(frame);
        let min_confidence = self.config.min_confidence;
        let detector = &mut self.detector;
        let refresh = self
            .cache
            .refresh_if_needed(skip_allowed, Instant::now(), || {
                detect_regions(detector, frame, min_confidence)
            })?;

        let mut outcomes = Vec::with_capacity(self.cache.tracked());
        let mut instances = Vec::new();
        for (id, region) in self.cache.regions().enumerate() {
            match self.track(frame, id, region)? {
                Some((instance, next)) => {
                    instances.push(instance);
                    outcomes.push(SlotOutcome::Keep(next));
                }
                None => outcomes.push(SlotOutcome::Evict),
            }
        }
        self.cache.finish_pass(outcomes);

        log::debug!("{} hands ({refresh:?})", instances.len());
        Ok(instances)
    }

    fn timers(&self) -> Vec<&Timer> {
        let mut timers = self.detector.timers().collect::<Vec<_>>();
        timers.push(self.landmarker.timer());
        timers.push(&self.t_post);
        timers
    }
}
