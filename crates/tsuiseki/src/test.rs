//! Shared test helpers: synthetic frames and mock models.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    frame::Frame,
    nn::{tensor::Tensor, Model, Outputs},
};

/// Creates a frame where every channel of every pixel is `value`.
pub fn solid_frame(width: usize, height: usize, value: f32) -> Frame {
    frame_from_fn(width, height, |_, _| [value; 3])
}

/// Creates a frame from a function mapping pixel coordinates `(x, y)` to an RGB value.
pub fn frame_from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> [f32; 3]) -> Frame {
    let tensor = Tensor::from_array_shape_fn([1, height, width, 3], |[_, y, x, c]| f(x, y)[c]);
    Frame::new(tensor).unwrap()
}

/// A model that ignores its input and returns a fixed set of outputs.
pub struct StaticModel {
    input_shape: Vec<usize>,
    outputs: Vec<Tensor>,
}

impl StaticModel {
    pub fn new(input_shape: &[usize], outputs: Vec<Tensor>) -> Self {
        Self {
            input_shape: input_shape.to_vec(),
            outputs,
        }
    }

    pub fn arc(input_shape: &[usize], outputs: Vec<Tensor>) -> Arc<dyn Model> {
        Arc::new(Self::new(input_shape, outputs))
    }
}

impl Model for StaticModel {
    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn execute(&self, _: &Tensor) -> anyhow::Result<Outputs> {
        Ok(self.outputs.iter().cloned().collect())
    }
}

/// A model that computes its outputs from its input with a closure.
pub struct FnModel<F> {
    input_shape: Vec<usize>,
    f: F,
}

impl<F> FnModel<F>
where
    F: Fn(&Tensor) -> anyhow::Result<Vec<Tensor>> + Send + Sync + 'static,
{
    pub fn arc(input_shape: &[usize], f: F) -> Arc<dyn Model> {
        Arc::new(Self {
            input_shape: input_shape.to_vec(),
            f,
        })
    }
}

impl<F> Model for FnModel<F>
where
    F: Fn(&Tensor) -> anyhow::Result<Vec<Tensor>> + Send + Sync,
{
    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn execute(&self, input: &Tensor) -> anyhow::Result<Outputs> {
        (self.f)(input).map(Outputs::from_vec)
    }
}

/// Wraps a model and counts how often it runs.
pub struct CountingModel {
    inner: Arc<dyn Model>,
    calls: Arc<AtomicUsize>,
}

impl CountingModel {
    /// Returns the wrapped model and a handle to its call counter.
    pub fn wrap(inner: Arc<dyn Model>) -> (Arc<dyn Model>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = Arc::new(Self {
            inner,
            calls: calls.clone(),
        });
        (model, calls)
    }
}

impl Model for CountingModel {
    fn input_shape(&self) -> &[usize] {
        self.inner.input_shape()
    }

    fn execute(&self, input: &Tensor) -> anyhow::Result<Outputs> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(input)
    }
}

/// A model whose inference always fails.
pub struct FailingModel(pub Vec<usize>);

impl Model for FailingModel {
    fn input_shape(&self) -> &[usize] {
        &self.0
    }

    fn execute(&self, _: &Tensor) -> anyhow::Result<Outputs> {
        anyhow::bail!("inference backend unavailable")
    }
}

/// Builds SSD outputs for a layout with `anchors` anchors where only anchor `hit` fires.
///
/// `params` are the raw regressors of the hit anchor: box center offset, size, then keypoint
/// offsets.
pub fn ssd_outputs(anchors: usize, hit: usize, params: &[f32]) -> Vec<Tensor> {
    ssd_hits(anchors, params.len(), &[(hit, params)])
}

/// Builds SSD outputs with `stride` regressors per anchor where only the listed anchors fire.
pub fn ssd_hits(anchors: usize, stride: usize, hits: &[(usize, &[f32])]) -> Vec<Tensor> {
    let mut boxes = vec![0.0; anchors * stride];
    let mut scores = vec![-8.0; anchors];
    for &(hit, params) in hits {
        boxes[hit * stride..(hit + 1) * stride].copy_from_slice(params);
        scores[hit] = 8.0;
    }
    vec![
        Tensor::from_iter(&[1, anchors, stride], boxes),
        Tensor::from_iter(&[1, anchors, 1], scores),
    ]
}

/// A model that returns `runs[i]` on its `i`-th run, and the last entry once `runs` is exhausted.
pub fn model_sequence(input_shape: &[usize], runs: Vec<Vec<Tensor>>) -> Arc<dyn Model> {
    let count = AtomicUsize::new(0);
    FnModel::arc(input_shape, move |_| {
        let run = count.fetch_add(1, Ordering::SeqCst);
        runs.get(run)
            .or_else(|| runs.last())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no outputs configured"))
    })
}
