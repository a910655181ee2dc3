//! Body pose estimation.
//!
//! Two kinds of body models are supported, both producing the 17 COCO keypoints:
//!
//! * [`PoseNetPipeline`] runs a bottom-up model on the whole frame and assembles any number of
//!   skeletons with the [`PoseGraphDecoder`](crate::decode::PoseGraphDecoder).
//! * [`RegressionPipeline`] runs a single-person model that regresses keypoint positions directly,
//!   either on the whole frame or on boxes found by a person detector.

pub mod posenet;
pub mod regression;

use tsuiseki_geom::{Rect, Resolution};

use crate::{
    decode::COCO_PARTS,
    landmark::{Annotation, Instance, Keypoint},
};

pub use self::{
    posenet::{PoseNet, PoseNetPipeline},
    regression::{PoseRegressor, RegressionPipeline},
};

/// Body connectivity groups, as lists of part names.
///
/// The torso is a closed loop, so its first part is repeated at the end.
pub const BODY_CONNECTIONS: &[(&str, &[&str])] = &[
    ("leftLeg", &["leftHip", "leftKnee", "leftAnkle"]),
    ("rightLeg", &["rightHip", "rightKnee", "rightAnkle"]),
    (
        "torso",
        &["leftShoulder", "rightShoulder", "rightHip", "leftHip", "leftShoulder"],
    ),
    ("leftArm", &["leftShoulder", "leftElbow", "leftWrist"]),
    ("rightArm", &["rightShoulder", "rightElbow", "rightWrist"]),
    ("head", &["leftEar", "leftEye", "nose", "rightEye", "rightEar"]),
];

/// Builds the connectivity groups of a pose from the keypoints that were found.
///
/// Parts that are missing from `keypoints` are left out of their group, so groups may be shorter
/// than in [`BODY_CONNECTIONS`], or empty.
pub fn connect(keypoints: &[Keypoint]) -> Vec<Annotation> {
    BODY_CONNECTIONS
        .iter()
        .map(|&(name, parts)| {
            let positions = parts
                .iter()
                .filter_map(|part| keypoints.iter().find(|kp| kp.name == *part))
                .map(|kp| kp.position)
                .collect();
            (name, positions)
        })
        .collect()
}

/// Creates a COCO keypoint at a 2D position in frame pixels.
fn coco_keypoint(part: usize, [x, y]: [f32; 2], score: f32, res: Resolution) -> Keypoint {
    Keypoint::new(part, COCO_PARTS.get(part).copied().unwrap_or(""), [x, y, 0.0], score)
        .with_raw(res)
}

/// Assembles a pose instance whose box is the bounding box of its keypoints.
///
/// Returns `None` if there are no keypoints.
fn pose_instance(
    id: usize,
    keypoints: Vec<Keypoint>,
    score: f32,
    res: Resolution,
) -> Option<Instance> {
    let [w, h] = res.as_f32();
    let rect = Rect::bounding(keypoints.iter().map(|kp| kp.position))?.clamp_to(w, h);
    let annotations = connect(&keypoints);
    Some(
        Instance::new(id, rect, res, score)
            .with_keypoints(keypoints)
            .with_annotations(annotations),
    )
}
