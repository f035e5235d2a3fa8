//! Records flowing through the pipeline.

/// A decoded input message: the caller's identifier plus the feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    /// Opaque identifier, echoed back on the matching result
    pub identifier: i64,

    /// Feature values in wire order
    pub features: Vec<f64>,
}

impl InputRecord {
    pub fn new(identifier: i64, features: Vec<f64>) -> Self {
        Self {
            identifier,
            features,
        }
    }
}

/// Scores produced for one input record, one entry per output class.
///
/// On the wire class `i` is published under the key `P<i>`.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub identifier: i64,
    pub scores: Vec<f64>,
}

impl PredictionResult {
    pub fn new(identifier: i64, scores: Vec<f64>) -> Self {
        Self { identifier, scores }
    }

    /// Class index to score pairs, in class order.
    pub fn class_scores(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.scores.iter().copied().enumerate()
    }

    /// The highest scoring class, if any. NaN scores never win.
    pub fn top_class(&self) -> Option<(usize, f64)> {
        self.class_scores()
            .filter(|(_, score)| !score.is_nan())
            .fold(None, |best, (idx, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((idx, score)),
            })
    }
}
