//! Errors reported by the tracking pipelines.
//!
//! Not finding anything in a frame is never an error: pipelines return an empty instance list in
//! that case, and instances whose fine-model confidence is too low are silently dropped. Only
//! malformed input and failures of the inference engine are surfaced through [`PredictError`].

use std::{error::Error, fmt};

/// Error returned by [`Pipeline::predict`] for a single frame.
///
/// Both variants abort the current frame only. The pipeline stays usable and can be fed the next
/// frame right away; there is no internal retry.
///
/// [`Pipeline::predict`]: crate::pipeline::Pipeline::predict
#[derive(Debug)]
pub enum PredictError {
    /// The input frame or a model output had an unexpected shape.
    InvalidInput(String),
    /// The inference engine failed to run a model.
    Inference(anyhow::Error),
}

impl PredictError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl fmt::Display for PredictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            PredictError::Inference(_) => f.write_str("inference failed"),
        }
    }
}

impl Error for PredictError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PredictError::InvalidInput(_) => None,
            PredictError::Inference(e) => Some(&**e),
        }
    }
}

impl From<anyhow::Error> for PredictError {
    fn from(e: anyhow::Error) -> Self {
        Self::Inference(e)
    }
}

/// A pipeline configuration value is out of range.
///
/// Returned by the `validate` methods in [`crate::config`], which every pipeline constructor
/// calls.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A value that must lie in `0.0..=1.0` does not.
    NotAProbability { field: &'static str, value: f32 },
    /// A value that must be strictly positive is not.
    NotPositive { field: &'static str, value: f32 },
    /// A value that must be zero or greater is negative or NaN.
    Negative { field: &'static str, value: f32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotAProbability { field, value } => {
                write!(f, "`{field}` must be between 0.0 and 1.0, got {value}")
            }
            ConfigError::NotPositive { field, value } => {
                write!(f, "`{field}` must be greater than 0, got {value}")
            }
            ConfigError::Negative { field, value } => {
                write!(f, "`{field}` must not be negative, got {value}")
            }
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_error_keeps_source() {
        let err = PredictError::from(anyhow::anyhow!("backend unavailable"));
        assert_eq!(err.to_string(), "inference failed");
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "backend unavailable");
    }

    #[test]
    fn messages() {
        assert_eq!(
            PredictError::invalid("frame has rank 3").to_string(),
            "invalid input: frame has rank 3"
        );
        let err = ConfigError::NotAProbability {
            field: "min_confidence",
            value: 1.5,
        };
        assert_eq!(
            err.to_string(),
            "`min_confidence` must be between 0.0 and 1.0, got 1.5"
        );
        let err = ConfigError::Negative {
            field: "nms_radius",
            value: -2.0,
        };
        assert_eq!(err.to_string(), "`nms_radius` must not be negative, got -2");
    }
}
