//! The 21-point hand landmark model.

use std::sync::Arc;

use tsuiseki_geom::Resolution;

use crate::{
    error::PredictError,
    nn::{tensor::Tensor, Cnn, ColorMapper, Model},
    timer::Timer,
};

pub const LANDMARK_NAMES: &[&str] = &[
    "wrist",
    "thumbCMC",
    "thumbMCP",
    "thumbIP",
    "thumbTip",
    "indexMCP",
    "indexPIP",
    "indexDIP",
    "indexTip",
    "middleMCP",
    "middlePIP",
    "middleDIP",
    "middleTip",
    "ringMCP",
    "ringPIP",
    "ringDIP",
    "ringTip",
    "pinkyMCP",
    "pinkyPIP",
    "pinkyDIP",
    "pinkyTip",
];

pub const WRIST: usize = 0;
pub const MIDDLE_FINGER_BASE: usize = 9;

pub const HAND_ANNOTATIONS: &[(&str, &[usize])] = &[
    ("thumb", &[1, 2, 3, 4]),
    ("index", &[5, 6, 7, 8]),
    ("middle", &[9, 10, 11, 12]),
    ("ring", &[13, 14, 15, 16]),
    ("pinky", &[17, 18, 19, 20]),
    ("palm", &[0]),
];

/// Result of running the landmark model on a hand crop.
#[derive(Debug, Clone)]
pub struct HandOutput {
    /// Landmarks in pixels of the model input.
    pub landmarks: Vec<[f32; 3]>,
    /// Probability that the crop contains a hand.
    pub presence: f32,
}

/// Estimates hand landmarks on an upright hand crop.
pub struct HandLandmarker {
    cnn: Cnn,
    t_infer: Timer,
}

impl HandLandmarker {
    pub const NUM_LANDMARKS: usize = 21;

    /// Wraps a hand landmark model. Its input is expected to take RGB values in `0.0..=1.0`.
    pub fn new(model: Arc<dyn Model>) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::detect_layout(model, ColorMapper::linear(0.0..=1.0))?,
            t_infer: Timer::new("hand landmarks"),
        })
    }

    pub fn input_resolution(&self) -> Resolution {
        self.cnn.input_resolution()
    }

    pub fn estimate(&self, crop: &Tensor) -> Result<HandOutput, PredictError> {
        let outputs = self.t_infer.time(|| self.cnn.estimate(crop))?;

        let landmarks = outputs
            .iter()
            .find(|t| t.len() == Self::NUM_LANDMARKS * 3)
            .ok_or_else(|| PredictError::invalid("hand model produced no landmark output"))?;
        // the presence flag comes before the handedness flag
        let presence = outputs
            .iter()
            .find(|t| t.len() == 1)
            .ok_or_else(|| PredictError::invalid("hand model produced no presence flag"))?;

        Ok(HandOutput {
            landmarks: landmarks
                .data()
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
            presence: presence.data()[0],
        })
    }

    pub fn timer(&self) -> &Timer {
        &self.t_infer
    }
}
