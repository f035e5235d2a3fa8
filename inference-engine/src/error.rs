use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading a checkpoint
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Checkpoint directory not found: {}", .0.display())]
    MissingCheckpoint(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed checkpoint file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Checkpoint metadata has no {0:?} collection")]
    MissingCollection(&'static str),

    #[error("Unparseable {name:?} collection: {source}")]
    BadCollection {
        name: &'static str,
        source: serde_json::Error,
    },

    #[error("No tensor bound to role {0:?}")]
    MissingBinding(String),

    #[error("Unknown tensor: {0}")]
    UnknownTensor(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Parameter {name} has shape {actual:?}, expected {expected:?}")]
    ParameterShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Errors raised by a single prediction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Feature vector has {actual} values, model expects {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Model returned identifier {returned} for input {submitted}")]
    KeyMismatch { submitted: i64, returned: i64 },
}
