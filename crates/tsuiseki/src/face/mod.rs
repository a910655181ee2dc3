//! Face detection, mesh tracking and iris refinement.
//!
//! [`FacePipeline`] runs a [`FaceDetector`] to find faces, then tracks each face with the
//! 468-point [`FaceMesh`] model. The mesh of one frame determines the face region of the next, so
//! the detector only has to run again when the cache goes stale. An [`IrisModel`] can optionally
//! refine the eye contours and add 10 iris landmarks.

pub mod detection;
pub mod iris;
pub mod mesh;

use std::time::Instant;

use tsuiseki_geom::{rotation::compute_rotation, Rect};

use crate::{
    cache::{CachePolicy, Origin, Region, RegionCache, SlotOutcome},
    config::FaceConfig,
    error::{ConfigError, PredictError},
    frame::{Frame, FrameChangeDetector},
    landmark::{annotate, keypoints_from_positions, Instance},
    normalize::{correct_region, transform_keypoints_back, DepthScale},
    pipeline::{EntityKind, Pipeline},
    timer::Timer,
};

pub use self::{detection::FaceDetector, iris::IrisModel, mesh::FaceMesh};

/// Scale applied to detector boxes to get the mesh crop.
const FRESH_BOX_SCALE: f32 = 1.6;
/// Scale applied to the mesh bounding box to get the next frame's crop.
const TRACKED_BOX_SCALE: f32 = 1.5;

/// Tracks faces and their landmarks.
pub struct FacePipeline {
    config: FaceConfig,
    detector: FaceDetector,
    mesh: FaceMesh,
    iris: Option<IrisModel>,
    cache: RegionCache,
    gate: FrameChangeDetector,
    t_post: Timer,
}

impl FacePipeline {
    /// Creates a face pipeline.
    ///
    /// `iris` is only used if [`FaceConfig::iris_enabled`] is set.
    pub fn new(
        config: FaceConfig,
        mut detector: FaceDetector,
        mesh: FaceMesh,
        iris: Option<IrisModel>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.iris_enabled && iris.is_none() {
            log::warn!("iris refinement is enabled, but no iris model was provided");
        }

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
            mesh,
            iris,
            cache,
            t_post: Timer::new("face post"),
        })
    }

    pub fn config(&self) -> &FaceConfig {
        &self.config
    }

    pub fn cache(&self) -> &RegionCache {
        &self.cache
    }

    pub fn set_min_confidence(&mut self, min_confidence: f32) {
        self.config.min_confidence = min_confidence;
    }

    /// Enables or disables rotating face crops upright.
    pub fn set_rotation(&mut self, enabled: bool) {
        self.config.rotation = enabled;
    }

    fn iris(&self) -> Option<&IrisModel> {
        self.iris.as_ref().filter(|_| self.config.iris_enabled)
    }

    /// Tracks the face in one cached region.
    ///
    /// Returns the instance and the region to look at in the next frame, or `None` if the face was
    /// lost.
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

        let input = self.mesh.input_resolution();
        let angle = rotation_of(region);
        let rotation = self.config.rotation;
        let Some(corrected) = correct_region(frame, &region.rect, input, rotation, angle) else {
            return Ok(None);
        };

        let mut output = self.mesh.estimate(&corrected.crop)?;
        if output.confidence < self.config.min_confidence {
            log::trace!(
                "face {id}: mesh confidence {:.3} below {}, dropping",
                output.confidence,
                self.config.min_confidence
            );
            return Ok(None);
        }
        if let Some(iris) = self.iris() {
            iris.augment(&mut output.landmarks, &corrected.crop)?;
        }

        let _guard = self.t_post.start();
        let landmarks = transform_keypoints_back(
            &output.landmarks,
            &region.rect,
            corrected.angle,
            &corrected.matrix,
            input,
            DepthScale::Raw,
        );
        let Some(bounds) = Rect::bounding(&landmarks) else {
            return Ok(None);
        };
        let rect = bounds.enlarge(TRACKED_BOX_SCALE).squarify();

        let instance = Instance::new(id, rect.clamp_to(fw, fh), res, output.confidence)
            .with_keypoints(keypoints_from_positions(&[], &landmarks, output.confidence, res))
            .with_annotations(annotate(mesh::MESH_ANNOTATIONS, &landmarks));
        Ok(Some((
            instance,
            Region::tracked(rect, landmarks, output.confidence),
        )))
    }
}

/// Runs the detector and turns its boxes into mesh crop regions.
fn detect_regions(
    detector: &mut FaceDetector,
    frame: &Frame,
    min_confidence: f32,
) -> Result<Vec<Region>, PredictError> {
    let detections = detector.detect(frame, min_confidence)?;
    Ok(detections
        .iter()
        .map(|det| {
            let keypoints = det.keypoints().iter().map(|&[x, y]| [x, y, 0.0]).collect();
            Region::detected(
                det.rect().enlarge(FRESH_BOX_SCALE).squarify(),
                keypoints,
                det.confidence(),
            )
        })
        .collect())
}

/// Computes the in-plane rotation of the face in `region` from its mouth-to-forehead line.
fn rotation_of(region: &Region) -> f32 {
    let (from, to) = match region.origin {
        Origin::Detector => (detection::MOUTH, detection::NOSE),
        Origin::Landmarks => (mesh::UPPER_LIP, mesh::MIDWAY_BETWEEN_EYES),
    };
    let landmarks = region.landmarks();
    match (landmarks.get(from), landmarks.get(to)) {
        (Some(a), Some(b)) => compute_rotation([a[0], a[1]], [b[0], b[1]]),
        _ => 0.0,
    }
}

impl Pipeline for FacePipeline {
    fn kind(&self) -> EntityKind {
        EntityKind::Face
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

        log::debug!("{} faces ({refresh:?})", instances.len());
        Ok(instances)
    }

    fn timers(&self) -> Vec<&Timer> {
        let mut timers = self.detector.timers().collect::<Vec<_>>();
        timers.push(self.mesh.timer());
        if let Some(iris) = self.iris() {
            timers.push(iris.timer());
        }
        timers.push(&self.t_post);
        timers
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use approx::assert_abs_diff_eq;
    use tsuiseki_geom::num::sigmoid;

    use crate::{
        nn::{tensor::Tensor, Model},
        test::{
            model_sequence, solid_frame, ssd_hits, ssd_outputs, CountingModel, FailingModel,
            FnModel, StaticModel,
        },
    };

    use super::*;

    /// Anchor at cell (8, 8) of the 16x16 layer, centered at (68, 68) in detector input pixels.
    const HIT: usize = (8 * 16 + 8) * 2;

    /// A detector reporting one upright 40x40 face, plus its call counter.
    fn detector() -> (FaceDetector, Arc<AtomicUsize>) {
        let mut params = vec![0.0; 16];
        params[2] = 40.0;
        params[3] = 40.0;
        params[4 + 2 * detection::MOUTH + 1] = 10.0;
        let (model, calls) = CountingModel::wrap(StaticModel::arc(
            &[1, 128, 128, 3],
            ssd_outputs(896, HIT, &params),
        ));
        (FaceDetector::new(model).unwrap(), calls)
    }

    /// A mesh laid out on a grid in the middle of the crop, with an upright reference line.
    fn mesh_model(flag: f32) -> Arc<dyn Model> {
        let mut points = (0..FaceMesh::NUM_LANDMARKS)
            .map(|i| [48.0 + (i % 24) as f32 * 4.0, 48.0 + (i / 24) as f32 * 4.0, 0.0])
            .collect::<Vec<_>>();
        points[mesh::UPPER_LIP] = [96.0, 150.0, 0.0];
        points[mesh::MIDWAY_BETWEEN_EYES] = [96.0, 60.0, 0.0];
        StaticModel::arc(
            &[1, 192, 192, 3],
            vec![
                Tensor::from_iter(&[1, 1, 1, 1404], points.into_iter().flatten()),
                Tensor::from_iter(&[1, 1], [flag]),
            ],
        )
    }

    fn iris_model() -> IrisModel {
        let model = FnModel::arc(&[1, 64, 64, 3], |_| {
            Ok(vec![Tensor::from_iter(
                &[1, 228],
                (0..76).flat_map(|_| [32.0, 32.0, 0.0]),
            )])
        });
        IrisModel::new(model).unwrap()
    }

    fn pipeline(config: FaceConfig, mesh: Arc<dyn Model>) -> (FacePipeline, Arc<AtomicUsize>) {
        let (detector, calls) = detector();
        let mesh = FaceMesh::new(mesh).unwrap();
        let pipeline = FacePipeline::new(config, detector, mesh, Some(iris_model())).unwrap();
        (pipeline, calls)
    }

    #[test]
    fn tracks_mesh_across_frames() {
        let (mut pipeline, calls) = pipeline(FaceConfig::default(), mesh_model(4.0));
        let frame = solid_frame(256, 256, 0.5);

        let faces = pipeline.predict(&frame).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert_eq!(face.id, 0);
        assert_abs_diff_eq!(face.score, sigmoid(4.0));
        assert_eq!(face.keypoints.len(), 478);
        assert_eq!(face.annotation("leftEyeIris").map(|a| a.len()), Some(5));
        assert_eq!(face.annotation("silhouette").map(|a| a.len()), Some(36));

        // the detector box (80x80 around (136, 136)) is enlarged to a 128x128 crop at (72, 72),
        // which the 192x192 mesh input maps onto
        let [x, y, z] = face.keypoints[0].position;
        assert_abs_diff_eq!(x, 72.0 + 48.0 * 128.0 / 192.0, epsilon = 1e-3);
        assert_abs_diff_eq!(y, 72.0 + 48.0 * 128.0 / 192.0, epsilon = 1e-3);
        assert_eq!(z, 0.0);
        assert_eq!(face.keypoints[0].raw.map(|r| r[0]), Some(x / 256.0));

        // the crop for the next frame comes from the mesh
        assert_eq!(pipeline.cache().tracked(), 1);
        assert_eq!(pipeline.cache().entries()[0].region.origin, Origin::Landmarks);
        assert_eq!(pipeline.cache().entries()[0].region.landmarks().len(), 478);

        let faces = pipeline.predict(&frame).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "detector must not run again");
        assert_eq!(faces.len(), 1);
        let rect = faces[0].rect;
        assert!(rect.x() >= 0.0 && rect.end()[0] <= 256.0);
    }

    #[test]
    fn detector_runs_after_skip_budget() {
        let mut config = FaceConfig::default();
        config.cache.skip_frames = 5;
        config.cache.skip_time = Duration::from_secs(3600);
        let (mut pipeline, calls) = pipeline(config, mesh_model(4.0));
        let frame = solid_frame(256, 256, 0.5);

        let mut counts = Vec::new();
        for _ in 0..7 {
            assert_eq!(pipeline.predict(&frame).unwrap().len(), 1);
            counts.push(calls.load(Ordering::SeqCst));
        }
        assert_eq!(counts, [1, 1, 1, 1, 1, 1, 2]);
    }

    #[test]
    fn changed_frame_forces_detection() {
        let (mut pipeline, calls) = pipeline(FaceConfig::default(), mesh_model(4.0));
        pipeline.predict(&solid_frame(256, 256, 0.0)).unwrap();
        pipeline.predict(&solid_frame(256, 256, 1.0)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn detector_boxes_without_landmarks() {
        let config = FaceConfig {
            landmarks_enabled: false,
            ..Default::default()
        };
        let (detector, _) = detector();
        let mesh = FaceMesh::new(Arc::new(FailingModel(vec![1, 192, 192, 3]))).unwrap();
        let mut pipeline = FacePipeline::new(config, detector, mesh, None).unwrap();

        let faces = pipeline.predict(&solid_frame(256, 256, 0.5)).unwrap();
        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert_eq!(face.keypoints.len(), 6);
        assert_eq!(face.keypoint("mouth").map(|kp| kp.position), Some([136.0, 156.0, 0.0]));
        assert_abs_diff_eq!(
            face.rect,
            Rect::from_top_left(72.0, 72.0, 128.0, 128.0),
            epsilon = 1e-3
        );
    }

    #[test]
    fn face_leaving_view_is_forgotten() {
        let mut params = vec![0.0; 16];
        params[2] = 40.0;
        params[3] = 40.0;

        for landmarks_enabled in [false, true] {
            let model = model_sequence(
                &[1, 128, 128, 3],
                vec![ssd_outputs(896, HIT, &params), ssd_hits(896, 16, &[])],
            );
            let detector = FaceDetector::new(model).unwrap();
            let mesh = FaceMesh::new(mesh_model(4.0)).unwrap();
            let mut config = FaceConfig {
                landmarks_enabled,
                ..Default::default()
            };
            config.cache.skip_frames = 0;
            let mut pipeline = FacePipeline::new(config, detector, mesh, None).unwrap();
            let frame = solid_frame(256, 256, 0.5);

            assert_eq!(pipeline.predict(&frame).unwrap().len(), 1);
            for _ in 0..4 {
                let faces = pipeline.predict(&frame).unwrap();
                assert!(faces.is_empty(), "landmarks enabled: {landmarks_enabled}");
                assert_eq!(pipeline.cache().tracked(), 0);
            }
        }
    }

    #[test]
    fn low_mesh_confidence_drops_face() {
        let (mut pipeline, _) = pipeline(FaceConfig::default(), mesh_model(-4.0));
        let faces = pipeline.predict(&solid_frame(256, 256, 0.5)).unwrap();
        assert!(faces.is_empty());
        assert_eq!(pipeline.cache().tracked(), 0);
    }

    #[test]
    fn no_faces_is_not_an_error() {
        let model = StaticModel::arc(&[1, 128, 128, 3], ssd_hits(896, 16, &[]));
        let detector = FaceDetector::new(model).unwrap();
        let mesh = FaceMesh::new(mesh_model(4.0)).unwrap();
        let mut pipeline = FacePipeline::new(FaceConfig::default(), detector, mesh, None).unwrap();
        assert!(pipeline.predict(&solid_frame(64, 64, 0.5)).unwrap().is_empty());
    }

    #[test]
    fn inference_errors_propagate() {
        let (detector, _) = detector();
        let mesh = FaceMesh::new(Arc::new(FailingModel(vec![1, 192, 192, 3]))).unwrap();
        let mut pipeline = FacePipeline::new(FaceConfig::default(), detector, mesh, None).unwrap();
        assert!(matches!(
            pipeline.predict(&solid_frame(256, 256, 0.5)),
            Err(PredictError::Inference(_))
        ));
    }

    #[test]
    fn rejects_invalid_config() {
        let (detector, _) = detector();
        let mesh = FaceMesh::new(mesh_model(0.0)).unwrap();
        let config = FaceConfig {
            iou_threshold: 2.0,
            ..Default::default()
        };
        assert!(FacePipeline::new(config, detector, mesh, None).is_err());
    }
}
