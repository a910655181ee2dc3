//! Input frames and the frame-change gate.

use image::RgbImage;
use tsuiseki_geom::{Rect, Resolution};

use crate::{
    error::PredictError,
    nn::{ops, tensor::Tensor},
};

/// A validated video frame.
///
/// Wraps an `[1, height, width, 3]` tensor with RGB values in `0.0..=1.0`. Building a `Frame` is
/// the only way to hand image data to a [`Pipeline`], so malformed input is rejected here, before
/// any pipeline work is done.
///
/// [`Pipeline`]: crate::pipeline::Pipeline
#[derive(Debug, Clone)]
pub struct Frame {
    tensor: Tensor,
    res: Resolution,
}

impl Frame {
    /// Validates and wraps an image tensor.
    ///
    /// Returns [`PredictError::InvalidInput`] if the tensor does not have rank 4, a batch size of 1,
    /// a non-zero width and height, and exactly 3 channels.
    pub fn new(tensor: Tensor) -> Result<Self, PredictError> {
        let shape = tensor.shape();
        if shape.len() != 4 {
            return Err(PredictError::invalid(format!(
                "frame tensor must have rank 4, got shape {shape:?}"
            )));
        }
        if shape[0] != 1 {
            return Err(PredictError::invalid(format!(
                "frame tensor must have a batch size of 1, got shape {shape:?}"
            )));
        }
        if shape[1] == 0 || shape[2] == 0 {
            return Err(PredictError::invalid(format!(
                "frame must not be empty, got shape {shape:?}"
            )));
        }
        if shape[3] != 3 {
            return Err(PredictError::invalid(format!(
                "frame must have 3 color channels, got shape {shape:?}"
            )));
        }

        let (w, h) = (u32::try_from(shape[2]), u32::try_from(shape[1]));
        let (Ok(w), Ok(h)) = (w, h) else {
            return Err(PredictError::invalid(format!(
                "frame dimensions out of range: {shape:?}"
            )));
        };
        Ok(Self {
            tensor,
            res: Resolution::new(w, h),
        })
    }

    /// Converts an 8-bit RGB image to a frame.
    pub fn from_rgb_image(image: &RgbImage) -> Result<Self, PredictError> {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let tensor = Tensor::from_iter(
            &[1, h, w, 3],
            image.as_raw().iter().map(|&v| f32::from(v) / 255.0),
        );
        Self::new(tensor)
    }

    #[inline]
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.res
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.res.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.res.height()
    }

    /// Returns the rectangle covering the whole frame.
    pub fn rect(&self) -> Rect {
        Rect::from_top_left(0.0, 0.0, self.width() as f32, self.height() as f32)
    }

    /// Returns the RGB value of a pixel.
    #[track_caller]
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 3] {
        let (x, y) = (x as usize, y as usize);
        [0, 1, 2].map(|c| self.tensor.at([0, y, x, c]))
    }
}

const THUMBNAIL: Resolution = Resolution::square(32);

/// Decides whether a frame is similar enough to the previous one to reuse cached regions.
///
/// Frames are compared on a 32x32 grayscale thumbnail. The difference measure is
/// `255 * mean((a - b)^2)` over all thumbnail pixels, so it is 0 for identical frames and 255 for a
/// black frame following a white one.
#[derive(Debug)]
pub struct FrameChangeDetector {
    sensitivity: f32,
    last: Option<Vec<f32>>,
}

impl FrameChangeDetector {
    /// Creates a detector that allows skipping while the difference stays at or below
    /// `sensitivity`.
    ///
    /// A `sensitivity` of 0 disables skipping entirely.
    pub fn new(sensitivity: f32) -> Self {
        Self {
            sensitivity,
            last: None,
        }
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    /// Computes the difference between two thumbnails.
    fn difference(a: &[f32], b: &[f32]) -> f32 {
        let sum: f32 = a.iter().zip(b).map(|(a, b)| (a - b) * (a - b)).sum();
        255.0 * sum / a.len() as f32
    }

    /// Feeds the next frame to the detector.
    ///
    /// Returns `true` if cached regions may be reused for `frame`. The first frame never allows
    /// reuse.
    pub fn skip_allowed(&mut self, frame: &Frame) -> bool {
        if self.sensitivity <= 0.0 {
            return false;
        }

        let thumb = ops::grayscale(&ops::resize(frame.tensor(), THUMBNAIL));
        let allowed = match &self.last {
            Some(last) => {
                let diff = Self::difference(last, &thumb);
                log::trace!("frame difference {diff:.3} (sensitivity {})", self.sensitivity);
                diff <= self.sensitivity
            }
            None => false,
        };
        self.last = Some(thumb);
        allowed
    }

    /// Forgets the previous frame.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
