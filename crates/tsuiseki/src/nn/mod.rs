//! Neural network inference.
//!
//! The tracking pipelines only talk to inference engines through the [`Model`] trait. The stock
//! implementation is [`tract::TractModel`], which runs ONNX networks on the CPU.

pub mod ops;
pub mod tensor;
pub mod tract;

use std::{
    ops::{Index, RangeInclusive},
    sync::Arc,
};

use tensor::Tensor;
use tsuiseki_geom::Resolution;

/// An inference engine that can run a single network.
///
/// Implementations are shared between threads via `Arc<dyn Model>` and must not require mutable
/// access to run inference.
pub trait Model: Send + Sync {
    /// Returns the shape of the network's (single) input tensor.
    fn input_shape(&self) -> &[usize];

    /// Runs the network on `input`, returning all of its output tensors.
    fn execute(&self, input: &Tensor) -> anyhow::Result<Outputs>;
}

/// A convolutional neural network (CNN) that operates on image data.
///
/// This is a cheaply [`Clone`]able handle to the underlying [`Model`].
#[derive(Clone)]
pub struct Cnn {
    model: Arc<dyn Model>,
    input_res: Resolution,
    shape: CnnInputShape,
    color: ColorMapper,
}

impl Cnn {
    /// Creates a CNN wrapper from a [`Model`].
    ///
    /// The model's input shape must match the given [`CnnInputShape`].
    pub fn new(
        model: Arc<dyn Model>,
        shape: CnnInputShape,
        color_mapper: ColorMapper,
    ) -> anyhow::Result<Self> {
        let input_res = Self::get_input_res(model.input_shape(), shape)?;
        Ok(Self {
            model,
            input_res,
            shape,
            color: color_mapper,
        })
    }

    /// Creates a CNN wrapper, detecting the input layout from the model's input shape.
    pub fn detect_layout(model: Arc<dyn Model>, color_mapper: ColorMapper) -> anyhow::Result<Self> {
        let shape = CnnInputShape::detect(model.input_shape()).ok_or_else(|| {
            anyhow::anyhow!(
                "cannot determine image layout of model input shape {:?}",
                model.input_shape()
            )
        })?;
        Self::new(model, shape, color_mapper)
    }

    fn get_input_res(tensor_shape: &[usize], shape: CnnInputShape) -> anyhow::Result<Resolution> {
        let (w, h) = match (shape, tensor_shape) {
            (CnnInputShape::NCHW, [1, 3, h, w]) | (CnnInputShape::NHWC, [1, h, w, 3]) => (*w, *h),
            _ => {
                anyhow::bail!(
                    "invalid model input shape for {:?} CNN: {:?}",
                    shape,
                    tensor_shape,
                );
            }
        };
        anyhow::ensure!(w > 0 && h > 0, "model input shape {tensor_shape:?} is empty");

        let (w, h): (u32, u32) = (w.try_into()?, h.try_into()?);
        Ok(Resolution::new(w, h))
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Runs the network on an input image, returning the estimated outputs.
    ///
    /// `image` is an `[1, H, W, 3]` tensor with values in `0.0..=1.0`. If its resolution does not
    /// match the network's input resolution, it will be stretched to fit.
    pub fn estimate(&self, image: &Tensor) -> anyhow::Result<Outputs> {
        anyhow::ensure!(
            matches!(image.shape(), [1, _, _, 3]),
            "CNN input image must have shape [1, H, W, 3], got {:?}",
            image.shape(),
        );
        let (w, h) = (
            self.input_res.width() as usize,
            self.input_res.height() as usize,
        );

        let resized;
        let image = if image.shape()[1] == h && image.shape()[2] == w {
            image
        } else {
            resized = ops::resize(image, self.input_res);
            &resized
        };

        let tensor = match self.shape {
            CnnInputShape::NHWC => Tensor::from_iter(
                &[1, h, w, 3],
                image.data().iter().map(|&v| self.color.map(v)),
            ),
            CnnInputShape::NCHW => Tensor::from_array_shape_fn([1, 3, h, w], |[_, c, y, x]| {
                self.color.map(image.at([0, y, x, c]))
            }),
        };

        self.model.execute(&tensor)
    }
}

#[derive(Clone, Copy)]
enum ColorMapperKind {
    Linear { start: f32, end: f32 },
}

/// Maps the `0.0..=1.0` channel values of image tensors to the value range a network expects.
#[derive(Clone, Copy)]
pub struct ColorMapper {
    kind: ColorMapperKind,
}

impl ColorMapper {
    /// Creates a simple color mapper that uniformly maps channel values to `target_range`.
    ///
    /// Networks in this crate expect one of `0.0..=1.0`, `-1.0..=1.0` or `0.0..=255.0`.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        let start = *target_range.start();
        let end = *target_range.end();
        assert!(end > start);

        Self {
            kind: ColorMapperKind::Linear { start, end },
        }
    }

    fn map(&self, value: f32) -> f32 {
        match self.kind {
            ColorMapperKind::Linear { start, end } => value * (end - start) + start,
        }
    }
}

/// Describes in what order a CNN expects its input image data.
///
/// - `N` is the number of images, fixed at 1.
/// - `C` is the number of color channels, 3 for RGB inputs.
/// - `H` and `W` are the height and width of the input, respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive] // shouldn't be matched on by user code
pub enum CnnInputShape {
    /// Shape is `[N, C, H, W]`.
    NCHW,
    /// Shape is `[N, H, W, C]`.
    NHWC,
}

impl CnnInputShape {
    /// Guesses the layout from a model input shape.
    ///
    /// Channels-last is preferred when both interpretations are possible.
    pub fn detect(shape: &[usize]) -> Option<Self> {
        match shape {
            [1, _, _, 3] => Some(Self::NHWC),
            [1, 3, _, _] => Some(Self::NCHW),
            _ => None,
        }
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug)]
pub struct Outputs {
    inner: Vec<Tensor>,
}

impl Outputs {
    pub fn from_vec(tensors: Vec<Tensor>) -> Self {
        Self { inner: tensors }
    }

    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.inner.get(index)
    }

    /// Returns an iterator over the output tensors.
    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.inner.iter()
    }
}

impl Index<usize> for Outputs {
    type Output = Tensor;

    fn index(&self, index: usize) -> &Tensor {
        &self.inner[index]
    }
}

impl<'a> IntoIterator for &'a Outputs {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Tensor> for Outputs {
    fn from_iter<T: IntoIterator<Item = Tensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records the last input it was given.
    struct Recorder {
        shape: Vec<usize>,
        last: Mutex<Option<Tensor>>,
    }

    impl Model for Recorder {
        fn input_shape(&self) -> &[usize] {
            &self.shape
        }

        fn execute(&self, input: &Tensor) -> anyhow::Result<Outputs> {
            *self.last.lock().unwrap() = Some(input.clone());
            Ok(Outputs::from_vec(vec![Tensor::from(1.0)]))
        }
    }

    fn recorder(shape: &[usize]) -> Arc<Recorder> {
        Arc::new(Recorder {
            shape: shape.to_vec(),
            last: Mutex::new(None),
        })
    }

    #[test]
    fn color_mapper() {
        let mapper = ColorMapper::linear(-1.0..=1.0);
        assert_eq!(mapper.map(0.0), -1.0);
        assert_eq!(mapper.map(1.0), 1.0);

        let mapper = ColorMapper::linear(0.0..=255.0);
        assert_eq!(mapper.map(0.0), 0.0);
        assert_eq!(mapper.map(1.0), 255.0);
    }

    #[test]
    fn layout_detection() {
        assert_eq!(CnnInputShape::detect(&[1, 128, 128, 3]), Some(CnnInputShape::NHWC));
        assert_eq!(CnnInputShape::detect(&[1, 3, 64, 64]), Some(CnnInputShape::NCHW));
        assert_eq!(CnnInputShape::detect(&[1, 63]), None);
    }

    #[test]
    fn rejects_mismatched_input_shape() {
        let model = recorder(&[1, 3, 16, 16]);
        assert!(Cnn::new(model, CnnInputShape::NHWC, ColorMapper::linear(0.0..=1.0)).is_err());
    }

    #[test]
    fn nchw_input_is_permuted_and_mapped() {
        let model = recorder(&[1, 3, 2, 2]);
        let cnn = Cnn::new(
            model.clone(),
            CnnInputShape::NCHW,
            ColorMapper::linear(-1.0..=1.0),
        )
        .unwrap();
        assert_eq!(cnn.input_resolution(), Resolution::new(2, 2));

        let image = Tensor::from_array_shape_fn([1, 2, 2, 3], |[_, _, _, c]| c as f32 * 0.5);
        cnn.estimate(&image).unwrap();

        let input = model.last.lock().unwrap().take().unwrap();
        assert_eq!(input.shape(), &[1, 3, 2, 2]);
        assert_eq!(input.at([0, 0, 1, 1]), -1.0);
        assert_eq!(input.at([0, 1, 1, 0]), 0.0);
        assert_eq!(input.at([0, 2, 0, 0]), 1.0);
    }

    #[test]
    fn input_is_stretched_to_model_resolution() {
        let model = recorder(&[1, 4, 4, 3]);
        let cnn = Cnn::detect_layout(model.clone(), ColorMapper::linear(0.0..=1.0)).unwrap();
        let image = Tensor::from_array_shape_fn([1, 8, 16, 3], |_| 0.25);
        cnn.estimate(&image).unwrap();
        let input = model.last.lock().unwrap().take().unwrap();
        assert_eq!(input.shape(), &[1, 4, 4, 3]);
        assert!(input.data().iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }
}
