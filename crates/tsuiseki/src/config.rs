//! Per-entity pipeline configuration.
//!
//! Every pipeline takes its configuration struct at construction and validates it once. The
//! defaults are tuned for a single user in front of a webcam.

use std::time::Duration;

use crate::error::ConfigError;

/// Skipping is disabled when the frame difference exceeds this. See
/// [`crate::frame::FrameChangeDetector`].
pub const DEFAULT_CACHE_SENSITIVITY: f32 = 0.7;

/// Boxes overlapping the previous frame's box by more than this are not updated.
pub const DEFAULT_REUSE_IOU: f32 = 0.8;

pub const DEFAULT_FACE_MIN_CONFIDENCE: f32 = 0.2;
pub const DEFAULT_FACE_IOU_THRESHOLD: f32 = 0.1;
pub const DEFAULT_FACE_SKIP_FRAMES: u32 = 99;
pub const DEFAULT_FACE_SKIP_TIME: Duration = Duration::from_millis(2500);

pub const DEFAULT_HAND_MIN_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_HAND_IOU_THRESHOLD: f32 = 0.2;
pub const DEFAULT_HAND_MAX_DETECTED: usize = 2;
pub const DEFAULT_HAND_SKIP_FRAMES: u32 = 99;
pub const DEFAULT_HAND_SKIP_TIME: Duration = Duration::from_millis(2000);

pub const DEFAULT_BODY_MIN_CONFIDENCE: f32 = 0.2;
pub const DEFAULT_NMS_RADIUS: f32 = 20.0;
pub const DEFAULT_OUTPUT_STRIDE: usize = 16;
pub const DEFAULT_BODY_SKIP_FRAMES: u32 = 1;
pub const DEFAULT_BODY_SKIP_TIME: Duration = Duration::from_millis(200);

fn probability(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::NotAProbability { field, value })
    }
}

fn non_negative(field: &'static str, value: f32) -> Result<(), ConfigError> {
    // `!(value >= 0.0)` also rejects NaN
    if !(value >= 0.0) {
        Err(ConfigError::Negative { field, value })
    } else {
        Ok(())
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

/// Settings shared by all pipelines that cache detector regions across frames.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of consecutive frames that may reuse cached regions.
    pub skip_frames: u32,
    /// Maximum time since the last detector run during which cached regions may be reused.
    pub skip_time: Duration,
    /// Frame-difference threshold, see [`crate::frame::FrameChangeDetector`]. 0 disables caching.
    pub cache_sensitivity: f32,
    /// New boxes that overlap the previous box by more than this keep the previous box.
    pub reuse_iou: f32,
}

impl CacheConfig {
    fn with_budget(skip_frames: u32, skip_time: Duration) -> Self {
        Self {
            skip_frames,
            skip_time,
            cache_sensitivity: DEFAULT_CACHE_SENSITIVITY,
            reuse_iou: DEFAULT_REUSE_IOU,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("cache_sensitivity", self.cache_sensitivity)?;
        probability("reuse_iou", self.reuse_iou)?;
        Ok(())
    }
}

/// Configuration of [`crate::face::FacePipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct FaceConfig {
    /// Detector boxes and mesh results below this confidence are dropped.
    pub min_confidence: f32,
    /// IOU above which overlapping detector boxes are suppressed.
    pub iou_threshold: f32,
    pub max_detected: usize,
    /// Rotate face crops upright before running the mesh model.
    pub rotation: bool,
    /// Run the mesh model. If disabled, detector boxes are reported directly.
    pub landmarks_enabled: bool,
    /// Refine eye contours and add iris keypoints. Requires an iris model.
    pub iris_enabled: bool,
    pub cache: CacheConfig,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_FACE_MIN_CONFIDENCE,
            iou_threshold: DEFAULT_FACE_IOU_THRESHOLD,
            max_detected: 1,
            rotation: true,
            landmarks_enabled: true,
            iris_enabled: true,
            cache: CacheConfig::with_budget(DEFAULT_FACE_SKIP_FRAMES, DEFAULT_FACE_SKIP_TIME),
        }
    }
}

impl FaceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        probability("min_confidence", self.min_confidence)?;
        probability("iou_threshold", self.iou_threshold)?;
        self.cache.validate()
    }
}

/// Configuration of [`crate::hand::HandPipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct HandConfig {
    /// Palm boxes and hand landmark results below this confidence are dropped.
    pub min_confidence: f32,
    pub iou_threshold: f32,
    pub max_detected: usize,
    /// Rotate hand crops so that the fingers point up.
    pub rotation: bool,
    /// Run the hand landmark model. If disabled, palm boxes are reported directly.
    pub landmarks_enabled: bool,
    pub cache: CacheConfig,
}

impl Default for HandConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_HAND_MIN_CONFIDENCE,
            iou_threshold: DEFAULT_HAND_IOU_THRESHOLD,
            max_detected: DEFAULT_HAND_MAX_DETECTED,
            rotation: true,
            landmarks_enabled: true,
            cache: CacheConfig::with_budget(DEFAULT_HAND_SKIP_FRAMES, DEFAULT_HAND_SKIP_TIME),
        }
    }
}

impl HandConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        probability("min_confidence", self.min_confidence)?;
        probability("iou_threshold", self.iou_threshold)?;
        self.cache.validate()
    }
}

/// Configuration of [`crate::body::PoseNetPipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoseNetConfig {
    /// Minimum heatmap score of root candidates and of reported keypoints and instances.
    pub min_confidence: f32,
    pub max_detected: usize,
    /// Radius in model input pixels within which two instances may not claim the same part.
    pub nms_radius: f32,
    /// Number of input pixels covered by one cell of the model's output grid.
    pub output_stride: usize,
}

impl Default for PoseNetConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_BODY_MIN_CONFIDENCE,
            max_detected: 1,
            nms_radius: DEFAULT_NMS_RADIUS,
            output_stride: DEFAULT_OUTPUT_STRIDE,
        }
    }
}

impl PoseNetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        probability("min_confidence", self.min_confidence)?;
        non_negative("nms_radius", self.nms_radius)?;
        positive("output_stride", self.output_stride as f32)?;
        Ok(())
    }
}

/// Configuration of [`crate::body::RegressionPipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionConfig {
    /// Keypoints at or below this score are dropped, and so are instances whose best keypoint is.
    pub min_confidence: f32,
    /// IOU threshold for the optional person detector.
    pub iou_threshold: f32,
    /// Number of person boxes tracked when a detector is used.
    pub max_detected: usize,
    /// Crop the next frame around the previous pose instead of running the detector (or using the
    /// whole frame) again.
    pub track_box: bool,
    pub cache: CacheConfig,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_BODY_MIN_CONFIDENCE,
            iou_threshold: DEFAULT_FACE_IOU_THRESHOLD,
            max_detected: 1,
            track_box: true,
            cache: CacheConfig::with_budget(DEFAULT_BODY_SKIP_FRAMES, DEFAULT_BODY_SKIP_TIME),
        }
    }
}

impl RegressionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        probability("min_confidence", self.min_confidence)?;
        probability("iou_threshold", self.iou_threshold)?;
        self.cache.validate()
    }
}
