//! Tensor API.
//!
//! Tensors are the inputs and outputs of the networks driven by the tracking pipelines, and also
//! carry frames and crops between pipeline stages. Image tensors always use the `[1, H, W, 3]`
//! layout with values in `0.0..=1.0`, see [`crate::frame::Frame`].

use std::fmt;

use tinyvec::TinyVec;

type Shape = TinyVec<[usize; 6]>;

/// A dense, row-major `f32` tensor of any rank.
///
/// Model outputs often differ in their number of leading unit dimensions depending on the
/// exporter, so most consumers look at [`Tensor::len`] and the flat [`Tensor::data`] rather than
/// the exact shape. Single elements of a tensor with a known rank can be read with [`Tensor::at`].
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Box<[f32]>,
}

/// Visits every index of `shape` in row-major order.
///
/// `index` must have the same length as `shape` and be zeroed. Nothing is visited if any dimension
/// is 0. A rank-0 shape has exactly one (empty) index.
fn for_each_index(shape: &[usize], index: &mut [usize], mut f: impl FnMut(&[usize])) {
    if shape.contains(&0) {
        return;
    }
    loop {
        f(index);

        // increment like an odometer, last axis fastest
        let mut axis = shape.len();
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}

impl Tensor {
    /// Creates an `N`-dimensional tensor of the given shape by calling `f` for each element.
    ///
    /// `f` is called with every index in row-major order: `[0, ..., 0, 0]`, then `[0, ..., 0, 1]`
    /// and so on.
    pub fn from_array_shape_fn<const N: usize, F: FnMut([usize; N]) -> f32>(
        shape: [usize; N],
        mut f: F,
    ) -> Self {
        let mut data = Vec::with_capacity(shape.iter().product());
        let mut index = [0; N];
        for_each_index(&shape, &mut index, |idx| {
            let mut arr = [0; N];
            arr.copy_from_slice(idx);
            data.push(f(arr));
        });
        Self {
            shape: Shape::from(&shape[..]),
            data: data.into_boxed_slice(),
        }
    }

    /// Like [`Tensor::from_array_shape_fn`], for a rank that is only known at runtime.
    pub fn from_dyn_shape_fn<F: FnMut(&[usize]) -> f32>(shape: &[usize], mut f: F) -> Self {
        let mut data = Vec::with_capacity(shape.iter().product());
        let mut index = vec![0; shape.len()];
        for_each_index(shape, &mut index, |idx| data.push(f(idx)));
        Self {
            shape: Shape::from(shape),
            data: data.into_boxed_slice(),
        }
    }

    /// Creates a tensor of the given shape from row-major elements.
    ///
    /// # Panics
    ///
    /// Panics if `iter` doesn't yield exactly as many elements as `shape` holds.
    #[track_caller]
    pub fn from_iter<I: IntoIterator<Item = f32>>(shape: &[usize], iter: I) -> Self {
        let data: Box<[f32]> = iter.into_iter().collect();
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "element count does not match shape {shape:?}"
        );
        Self {
            shape: Shape::from(shape),
            data,
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: Shape::from(shape),
            data: vec![0.0; shape.iter().product()].into_boxed_slice(),
        }
    }

    pub(super) fn from_tract(tract: &tract_onnx::prelude::Tensor) -> anyhow::Result<Self> {
        Ok(Self {
            shape: Shape::from(tract.shape()),
            data: tract.as_slice::<f32>()?.into(),
        })
    }

    pub(super) fn to_tract(&self) -> anyhow::Result<tract_onnx::prelude::Tensor> {
        Ok(tract_onnx::prelude::Tensor::from_shape(
            &self.shape,
            &self.data,
        )?)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns all elements in row-major order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Reads the element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not have one entry per dimension, or is out of bounds.
    #[track_caller]
    #[inline]
    pub fn at<const N: usize>(&self, index: [usize; N]) -> f32 {
        assert!(
            N == self.rank() && index.iter().zip(self.shape()).all(|(i, len)| i < len),
            "index {index:?} is invalid for tensor of shape {:?}",
            self.shape()
        );
        let offset = index
            .iter()
            .zip(self.shape())
            .fold(0, |offset, (&i, &len)| offset * len + i);
        self.data[offset]
    }

    /// Applies `f` to every element.
    pub fn map_in_place(&mut self, mut f: impl FnMut(f32) -> f32) {
        self.data.iter_mut().for_each(|v| *v = f(*v));
    }
}

impl From<f32> for Tensor {
    fn from(value: f32) -> Self {
        Self {
            shape: Shape::new(),
            data: Box::new([value]),
        }
    }
}

impl<const N: usize> From<[f32; N]> for Tensor {
    fn from(arr: [f32; N]) -> Self {
        Self::from_iter(&[N], arr)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .finish_non_exhaustive()
    }
}
