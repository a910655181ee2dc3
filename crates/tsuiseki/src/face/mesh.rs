//! The 468-point face mesh model and its landmark tables.

use std::sync::Arc;

use tsuiseki_geom::{num::sigmoid, Resolution};

use crate::{
    error::PredictError,
    nn::{tensor::Tensor, Cnn, ColorMapper, Model},
    timer::Timer,
};

pub const SILHOUETTE: &[usize] = &[
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];

pub const LIPS_UPPER_OUTER: &[usize] = &[61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291];
pub const LIPS_LOWER_OUTER: &[usize] = &[146, 91, 181, 84, 17, 314, 405, 321, 375, 291];
pub const LIPS_UPPER_INNER: &[usize] = &[78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308];
pub const LIPS_LOWER_INNER: &[usize] = &[78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308];

pub const RIGHT_EYE_UPPER0: &[usize] = &[246, 161, 160, 159, 158, 157, 173];
pub const RIGHT_EYE_LOWER0: &[usize] = &[33, 7, 163, 144, 145, 153, 154, 155, 133];
pub const RIGHT_EYE_UPPER1: &[usize] = &[247, 30, 29, 27, 28, 56, 190];
pub const RIGHT_EYE_LOWER1: &[usize] = &[130, 25, 110, 24, 23, 22, 26, 112, 243];
pub const RIGHT_EYE_UPPER2: &[usize] = &[113, 225, 224, 223, 222, 221, 189];
pub const RIGHT_EYE_LOWER2: &[usize] = &[226, 31, 228, 229, 230, 231, 232, 233, 244];
pub const RIGHT_EYE_LOWER3: &[usize] = &[143, 111, 117, 118, 119, 120, 121, 128, 245];
pub const RIGHT_EYEBROW_UPPER: &[usize] = &[156, 70, 63, 105, 66, 107, 55, 193];
pub const RIGHT_EYEBROW_LOWER: &[usize] = &[35, 124, 46, 53, 52, 65];

pub const LEFT_EYE_UPPER0: &[usize] = &[466, 388, 387, 386, 385, 384, 398];
pub const LEFT_EYE_LOWER0: &[usize] = &[263, 249, 390, 373, 374, 380, 381, 382, 362];
pub const LEFT_EYE_UPPER1: &[usize] = &[467, 260, 259, 257, 258, 286, 414];
pub const LEFT_EYE_LOWER1: &[usize] = &[359, 255, 339, 254, 253, 252, 256, 341, 463];
pub const LEFT_EYE_UPPER2: &[usize] = &[342, 445, 444, 443, 442, 441, 413];
pub const LEFT_EYE_LOWER2: &[usize] = &[446, 261, 448, 449, 450, 451, 452, 453, 464];
pub const LEFT_EYE_LOWER3: &[usize] = &[372, 340, 346, 347, 348, 349, 350, 357, 465];
pub const LEFT_EYEBROW_UPPER: &[usize] = &[383, 300, 293, 334, 296, 336, 285, 417];
pub const LEFT_EYEBROW_LOWER: &[usize] = &[265, 353, 276, 283, 282, 295];

/// Iris center followed by 4 points on the iris ring. Only present after iris refinement.
pub const RIGHT_EYE_IRIS: &[usize] = &[473, 474, 475, 476, 477];
pub const LEFT_EYE_IRIS: &[usize] = &[468, 469, 470, 471, 472];

pub const MIDWAY_BETWEEN_EYES: usize = 168;
/// Center of the upper lip.
pub const UPPER_LIP: usize = 13;

/// Named regions of the face mesh.
pub const MESH_ANNOTATIONS: &[(&str, &[usize])] = &[
    ("silhouette", SILHOUETTE),
    ("lipsUpperOuter", LIPS_UPPER_OUTER),
    ("lipsLowerOuter", LIPS_LOWER_OUTER),
    ("lipsUpperInner", LIPS_UPPER_INNER),
    ("lipsLowerInner", LIPS_LOWER_INNER),
    ("rightEyeUpper0", RIGHT_EYE_UPPER0),
    ("rightEyeLower0", RIGHT_EYE_LOWER0),
    ("rightEyeUpper1", RIGHT_EYE_UPPER1),
    ("rightEyeLower1", RIGHT_EYE_LOWER1),
    ("rightEyeUpper2", RIGHT_EYE_UPPER2),
    ("rightEyeLower2", RIGHT_EYE_LOWER2),
    ("rightEyeLower3", RIGHT_EYE_LOWER3),
    ("rightEyebrowUpper", RIGHT_EYEBROW_UPPER),
    ("rightEyebrowLower", RIGHT_EYEBROW_LOWER),
    ("rightEyeIris", RIGHT_EYE_IRIS),
    ("leftEyeUpper0", LEFT_EYE_UPPER0),
    ("leftEyeLower0", LEFT_EYE_LOWER0),
    ("leftEyeUpper1", LEFT_EYE_UPPER1),
    ("leftEyeLower1", LEFT_EYE_LOWER1),
    ("leftEyeUpper2", LEFT_EYE_UPPER2),
    ("leftEyeLower2", LEFT_EYE_LOWER2),
    ("leftEyeLower3", LEFT_EYE_LOWER3),
    ("leftEyebrowUpper", LEFT_EYEBROW_UPPER),
    ("leftEyebrowLower", LEFT_EYEBROW_LOWER),
    ("leftEyeIris", LEFT_EYE_IRIS),
    ("midwayBetweenEyes", &[MIDWAY_BETWEEN_EYES]),
    ("noseTip", &[1]),
    ("noseBottom", &[2]),
    ("noseRightCorner", &[98]),
    ("noseLeftCorner", &[327]),
    ("rightCheek", &[205]),
    ("leftCheek", &[425]),
];

/// Result of running the mesh model on a face crop.
#[derive(Debug, Clone)]
pub struct MeshOutput {
    /// Landmarks in pixels of the model input. Z is the model's raw depth output.
    pub landmarks: Vec<[f32; 3]>,
    /// Probability that the crop contains a face.
    pub confidence: f32,
}

/// Estimates a dense face mesh on an upright, square face crop.
pub struct FaceMesh {
    cnn: Cnn,
    t_infer: Timer,
}

impl FaceMesh {
    pub const NUM_LANDMARKS: usize = 468;

    /// Wraps a mesh model. Its input is expected to take RGB values in `0.0..=1.0`.
    pub fn new(model: Arc<dyn Model>) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::detect_layout(model, ColorMapper::linear(0.0..=1.0))?,
            t_infer: Timer::new("mesh"),
        })
    }

    pub fn input_resolution(&self) -> Resolution {
        self.cnn.input_resolution()
    }

    /// Runs the model on a face crop of any size.
    pub fn estimate(&self, crop: &Tensor) -> Result<MeshOutput, PredictError> {
        let outputs = self.t_infer.time(|| self.cnn.estimate(crop))?;

        let landmarks = outputs
            .iter()
            .find(|t| t.len() == Self::NUM_LANDMARKS * 3)
            .ok_or_else(|| {
                PredictError::invalid(format!(
                    "face mesh produced no output with {} landmarks",
                    Self::NUM_LANDMARKS
                ))
            })?;
        let flag = outputs
            .iter()
            .find(|t| t.len() == 1)
            .ok_or_else(|| PredictError::invalid("face mesh produced no face flag"))?;

        Ok(MeshOutput {
            landmarks: landmarks
                .data()
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
            confidence: sigmoid(flag.data()[0]),
        })
    }

    pub fn timer(&self) -> &Timer {
        &self.t_infer
    }
}
