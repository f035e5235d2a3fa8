use crate::error::InferenceError;

/// Output of a single prediction: the identifier the model passed through
/// and one score per class.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub identifier: i64,
    pub scores: Vec<f64>,
}

impl Prediction {
    pub fn new(identifier: i64, scores: Vec<f64>) -> Self {
        Self { identifier, scores }
    }
}

/// A loaded model that can score feature vectors.
///
/// Implementations are shared across worker threads behind an `Arc`, so
/// `predict` must not rely on per-instance scratch state.
pub trait InferenceBackend: Send + Sync {
    /// Score one feature vector as a batch of one.
    fn predict(&self, identifier: i64, features: &[f64]) -> Result<Prediction, InferenceError>;

    /// Number of features the model expects, when known.
    fn input_width(&self) -> Option<usize> {
        None
    }
}
