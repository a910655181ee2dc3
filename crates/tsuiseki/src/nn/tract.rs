//! ONNX inference on the CPU, via `tract`.

use std::{path::Path, sync::Arc};

use tract_onnx::prelude::{
    tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TypedFact, TypedOp,
};

use super::{tensor::Tensor, Model, Outputs};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A network loaded with `tract`.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct TractModel {
    plan: Arc<Plan>,
    input_shape: Vec<usize>,
}

impl TractModel {
    /// Loads an ONNX file. The path must have a `.onnx` extension.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => anyhow::bail!("neural network file must have `.onnx` extension"),
        }
        Self::from_onnx(&std::fs::read(path)?)
    }

    /// Loads and optimizes a network from an in-memory ONNX file.
    ///
    /// Returns an error if the network data is malformed, if the network uses unimplemented
    /// operations, or if its input shape is not fully known.
    pub fn from_onnx(mut raw: &[u8]) -> anyhow::Result<Self> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut raw)?
            .into_optimized()?;

        anyhow::ensure!(
            graph.inputs.len() == 1,
            "network has to take exactly 1 input, this one takes {}",
            graph.inputs.len(),
        );
        let input_shape = graph
            .input_fact(0)?
            .shape
            .as_concrete()
            .ok_or_else(|| anyhow::anyhow!("network input shape is symbolic"))?
            .to_vec();

        log::debug!(
            "loaded network with input shape {:?} and {} outputs",
            input_shape,
            graph.outputs.len(),
        );

        Ok(Self {
            plan: Arc::new(SimplePlan::new(graph)?),
            input_shape,
        })
    }
}

impl Model for TractModel {
    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn execute(&self, input: &Tensor) -> anyhow::Result<Outputs> {
        let outputs = self
            .plan
            .run(tvec![TValue::from_const(Arc::new(input.to_tract()?))])?;
        outputs
            .iter()
            .map(|tract| Tensor::from_tract(tract))
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Outputs::from_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_onnx_extension() {
        let err = TractModel::load("model.tflite").err().unwrap();
        assert_eq!(
            err.to_string(),
            "neural network file must have `.onnx` extension"
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(TractModel::load("/nonexistent/face_detector.onnx").is_err());
    }

    #[test]
    fn garbage_data_is_an_error() {
        assert!(TractModel::from_onnx(b"not a network").is_err());
    }
}
