//! Eye contour and iris refinement of the face mesh.
//!
//! The iris model runs on a small crop around each eye, taken from the same upright face crop the
//! mesh model ran on. It returns 71 eye contour points, which replace the corresponding (less
//! precise) mesh points, and 5 iris points, which are appended to the mesh.

use std::{ops::RangeInclusive, sync::Arc};

use tsuiseki_geom::{Rect, Resolution};

use crate::{
    error::PredictError,
    nn::{ops, tensor::Tensor, Cnn, ColorMapper, Model},
    timer::Timer,
};

use super::mesh::{self, FaceMesh};

const NUM_POINTS: usize = 76;
/// The first iris point in the model output. Everything before it is eye contour.
const IRIS_START: usize = 71;

const EYE_BOX_SCALE: f32 = 2.3;

/// Eyes turned away from the camera by more than this mesh depth difference only get their
/// innermost contours refined.
const FRONTAL_DEPTH_DIFFERENCE: f32 = 30.0;

/// Iris model point ranges and the mesh contours they replace.
struct Contour {
    points: RangeInclusive<usize>,
    left: &'static [usize],
    right: &'static [usize],
    /// Whether this is the upper or lower contour directly around the eyeball.
    inner: bool,
}

const CONTOURS: [Contour; 9] = [
    Contour {
        points: 9..=15,
        left: mesh::LEFT_EYE_UPPER0,
        right: mesh::RIGHT_EYE_UPPER0,
        inner: true,
    },
    Contour {
        points: 25..=31,
        left: mesh::LEFT_EYE_UPPER1,
        right: mesh::RIGHT_EYE_UPPER1,
        inner: false,
    },
    Contour {
        points: 41..=47,
        left: mesh::LEFT_EYE_UPPER2,
        right: mesh::RIGHT_EYE_UPPER2,
        inner: false,
    },
    Contour {
        points: 0..=8,
        left: mesh::LEFT_EYE_LOWER0,
        right: mesh::RIGHT_EYE_LOWER0,
        inner: true,
    },
    Contour {
        points: 16..=24,
        left: mesh::LEFT_EYE_LOWER1,
        right: mesh::RIGHT_EYE_LOWER1,
        inner: false,
    },
    Contour {
        points: 32..=40,
        left: mesh::LEFT_EYE_LOWER2,
        right: mesh::RIGHT_EYE_LOWER2,
        inner: false,
    },
    Contour {
        points: 54..=62,
        left: mesh::LEFT_EYE_LOWER3,
        right: mesh::RIGHT_EYE_LOWER3,
        inner: false,
    },
    Contour {
        points: 63..=70,
        left: mesh::LEFT_EYEBROW_UPPER,
        right: mesh::RIGHT_EYEBROW_UPPER,
        inner: false,
    },
    Contour {
        points: 48..=53,
        left: mesh::LEFT_EYEBROW_LOWER,
        right: mesh::RIGHT_EYEBROW_LOWER,
        inner: false,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eye {
    Left,
    Right,
}

impl Eye {
    /// Mesh indices of the outer and inner eye corner.
    fn corners(self) -> (usize, usize) {
        match self {
            Eye::Left => (263, 362),
            Eye::Right => (33, 133),
        }
    }

    /// The iris model is trained on right eyes, so left eye crops are mirrored.
    fn flipped(self) -> bool {
        self == Eye::Left
    }

    fn contour(self, contour: &Contour) -> &'static [usize] {
        match self {
            Eye::Left => contour.left,
            Eye::Right => contour.right,
        }
    }

    fn upper0(self) -> &'static [usize] {
        match self {
            Eye::Left => mesh::LEFT_EYE_UPPER0,
            Eye::Right => mesh::RIGHT_EYE_UPPER0,
        }
    }

    fn lower0(self) -> &'static [usize] {
        match self {
            Eye::Left => mesh::LEFT_EYE_LOWER0,
            Eye::Right => mesh::RIGHT_EYE_LOWER0,
        }
    }
}

/// Refines the eyes of a face mesh and adds iris landmarks.
pub struct IrisModel {
    cnn: Cnn,
    t_infer: Timer,
}

impl IrisModel {
    /// Wraps an iris model. Its input is expected to take RGB values in `0.0..=1.0`.
    pub fn new(model: Arc<dyn Model>) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::detect_layout(model, ColorMapper::linear(0.0..=1.0))?,
            t_infer: Timer::new("iris"),
        })
    }

    pub fn input_resolution(&self) -> Resolution {
        self.cnn.input_resolution()
    }

    /// Refines `landmarks` in place and appends the left and right iris (10 points in total).
    ///
    /// `landmarks` are the 468 raw mesh landmarks in pixels of `face`, the crop the mesh model ran
    /// on.
    pub fn augment(&self, landmarks: &mut Vec<[f32; 3]>, face: &Tensor) -> Result<(), PredictError> {
        if landmarks.len() != FaceMesh::NUM_LANDMARKS {
            return Err(PredictError::invalid(format!(
                "iris refinement needs {} mesh landmarks, got {}",
                FaceMesh::NUM_LANDMARKS,
                landmarks.len()
            )));
        }

        let left = self.estimate_eye(landmarks, face, Eye::Left)?;
        let right = self.estimate_eye(landmarks, face, Eye::Right)?;

        let difference = depth_difference(landmarks);
        if difference.abs() < FRONTAL_DEPTH_DIFFERENCE {
            replace_contours(landmarks, &left, Eye::Left, false);
            replace_contours(landmarks, &right, Eye::Right, false);
        } else if difference < 1.0 {
            // looking to the right, only the left eye is fully visible
            replace_contours(landmarks, &left, Eye::Left, true);
        } else {
            replace_contours(landmarks, &right, Eye::Right, true);
        }

        let left_iris = adjusted_iris(landmarks, &left[IRIS_START..], Eye::Left);
        let right_iris = adjusted_iris(landmarks, &right[IRIS_START..], Eye::Right);
        landmarks.extend(left_iris);
        landmarks.extend(right_iris);
        Ok(())
    }

    /// Runs the model on one eye, returning its 76 points in pixels of `face`.
    fn estimate_eye(
        &self,
        landmarks: &[[f32; 3]],
        face: &Tensor,
        eye: Eye,
    ) -> Result<Vec<[f32; 3]>, PredictError> {
        let (a, b) = eye.corners();
        let rect = eye_box(landmarks[a], landmarks[b]);
        let res = self.input_resolution();

        let mut crop = ops::crop_and_resize(face, &rect, res);
        if eye.flipped() {
            crop = ops::flip_horizontal(&crop);
        }
        let outputs = self.t_infer.time(|| self.cnn.estimate(&crop))?;

        // single [1, 228] output, or contours [1, 213] and iris [1, 15]
        let raw: Vec<f32> = outputs.iter().flat_map(|t| t.data().iter().copied()).collect();
        if raw.len() != NUM_POINTS * 3 {
            return Err(PredictError::invalid(format!(
                "iris model produced {} values, expected {}",
                raw.len(),
                NUM_POINTS * 3
            )));
        }

        Ok(eye_points(&raw, &rect, eye.flipped(), res))
    }

    pub fn timer(&self) -> &Timer {
        &self.t_infer
    }
}

/// Computes the crop region for an eye from its two corner landmarks.
fn eye_box(a: [f32; 3], b: [f32; 3]) -> Rect {
    Rect::from_corners([a[0], a[1]], [b[0], b[1]])
        .enlarge(EYE_BOX_SCALE)
        .squarify()
}

/// Maps iris model output from eye crop pixels into face crop pixels.
fn eye_points(raw: &[f32], rect: &Rect, flipped: bool, input: Resolution) -> Vec<[f32; 3]> {
    let [iw, ih] = input.as_f32();
    let [w, h] = rect.size();
    let [x0, y0] = rect.start();
    raw.chunks_exact(3)
        .map(|p| {
            let x = if flipped { 1.0 - p[0] / iw } else { p[0] / iw };
            [x * w + x0, p[1] / ih * h + y0, p[2]]
        })
        .collect()
}

/// Depth of the left eye's outer corner minus the right eye's.
fn depth_difference(landmarks: &[[f32; 3]]) -> f32 {
    let (left, _) = Eye::Left.corners();
    let (right, _) = Eye::Right.corners();
    landmarks[left][2] - landmarks[right][2]
}

/// Replaces the mesh contours of `eye` with the iris model's points.
///
/// Replaced points take X and Y from the iris model and average the old and new Z.
fn replace_contours(landmarks: &mut [[f32; 3]], points: &[[f32; 3]], eye: Eye, inner_only: bool) {
    for contour in CONTOURS.iter().filter(|c| c.inner || !inner_only) {
        for (&mesh_index, point_index) in eye.contour(contour).iter().zip(contour.points.clone()) {
            let [x, y, z] = points[point_index];
            let old = &mut landmarks[mesh_index];
            *old = [x, y, (z + old[2]) / 2.0];
        }
    }
}

/// Takes the iris points' depth from the refined eye contour.
///
/// The iris model's own Z output is not used: the top iris point gets the depth of the upper
/// eyelid center, the bottom point that of the lower eyelid center, and the rest their mean.
fn adjusted_iris(landmarks: &[[f32; 3]], iris: &[[f32; 3]], eye: Eye) -> Vec<[f32; 3]> {
    let upper = landmarks[eye.upper0()[3]][2];
    let lower = landmarks[eye.lower0()[4]][2];
    let mean = (upper + lower) / 2.0;
    iris.iter()
        .enumerate()
        .map(|(i, &[x, y, _])| {
            let z = match i {
                2 => upper,
                4 => lower,
                _ => mean,
            };
            [x, y, z]
        })
        .collect()
}
