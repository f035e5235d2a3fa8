//! Checkpoint-backed inference engine
//!
//! Loading resolves four tensor bindings through the checkpoint's metadata
//! collections:
//!
//! | collection | role     | expected tensor          |
//! |------------|----------|--------------------------|
//! | `inputs`   | `image`  | float placeholder        |
//! | `inputs`   | `key`    | int placeholder          |
//! | `outputs`  | `scores` | float node               |
//! | `outputs`  | `key`    | int node                 |
//!
//! Once loaded the engine is immutable. Each `predict` call builds its own
//! batch-of-one tensors, so the engine can be shared freely across threads.

use std::path::{Path, PathBuf};
use std::time::Instant;

use ndarray::{Array1, Array2};
use tracing::{debug, info};

use crate::backend::{InferenceBackend, Prediction};
use crate::checkpoint::{self, Bindings, INPUTS_COLLECTION, OUTPUTS_COLLECTION};
use crate::error::{InferenceError, LoadError};
use crate::graph::{Graph, Kind, Tensor};

/// Input role carrying the feature vector
pub const IMAGE_ROLE: &str = "image";

/// Input and output role carrying the pass-through identifier
pub const KEY_ROLE: &str = "key";

/// Output role carrying the class scores
pub const SCORES_ROLE: &str = "scores";

/// A loaded classification model
#[derive(Debug)]
pub struct InferenceEngine {
    checkpoint: PathBuf,
    graph: Graph,
    image: usize,
    input_key: usize,
    scores: usize,
    output_key: usize,
    input_width: usize,
    num_classes: usize,
}

impl InferenceEngine {
    /// Load the graph and parameters stored in `checkpoint`.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if:
    /// - The directory, `export.meta` or `export.params` is missing or unreadable
    /// - Either file is not valid JSON of the expected shape
    /// - A metadata collection or role binding is missing
    /// - A binding names an unknown tensor or one of the wrong type
    pub fn load(checkpoint: impl AsRef<Path>) -> Result<Self, LoadError> {
        let checkpoint = checkpoint.as_ref();
        let started = Instant::now();
        info!(checkpoint = %checkpoint.display(), "Loading checkpoint");

        let (meta, params) = checkpoint::read_checkpoint(checkpoint)?;
        let inputs = meta.bindings(INPUTS_COLLECTION)?;
        let outputs = meta.bindings(OUTPUTS_COLLECTION)?;
        let graph = Graph::build(meta.graph, &params)?;

        let image = bind(&graph, &inputs, IMAGE_ROLE)?;
        let input_key = bind(&graph, &inputs, KEY_ROLE)?;
        let scores = bind(&graph, &outputs, SCORES_ROLE)?;
        let output_key = bind(&graph, &outputs, KEY_ROLE)?;

        let input_width = match graph.kind(image) {
            Kind::Float(width) if graph.is_placeholder(image) => width,
            _ => return Err(wrong_binding(&graph, IMAGE_ROLE, image, "a float placeholder")),
        };
        if graph.kind(input_key) != Kind::Int || !graph.is_placeholder(input_key) {
            return Err(wrong_binding(&graph, KEY_ROLE, input_key, "an int placeholder"));
        }
        let Kind::Float(num_classes) = graph.kind(scores) else {
            return Err(wrong_binding(&graph, SCORES_ROLE, scores, "a float tensor"));
        };
        if graph.kind(output_key) != Kind::Int {
            return Err(wrong_binding(&graph, KEY_ROLE, output_key, "an int tensor"));
        }

        info!(
            checkpoint = %checkpoint.display(),
            input_width,
            num_classes,
            elapsed_ms = started.elapsed().as_millis(),
            "Checkpoint loaded"
        );

        Ok(Self {
            checkpoint: checkpoint.to_path_buf(),
            graph,
            image,
            input_key,
            scores,
            output_key,
            input_width,
            num_classes,
        })
    }

    /// Directory this engine was loaded from.
    pub fn checkpoint(&self) -> &Path {
        &self.checkpoint
    }

    /// Number of classes scored per prediction.
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl InferenceBackend for InferenceEngine {
    fn predict(&self, identifier: i64, features: &[f64]) -> Result<Prediction, InferenceError> {
        if features.len() != self.input_width {
            return Err(InferenceError::ShapeMismatch {
                expected: self.input_width,
                actual: features.len(),
            });
        }

        let image = Array2::from_shape_vec((1, self.input_width), features.to_vec())
            .map_err(|e| InferenceError::Computation(e.to_string()))?;
        let key = Array1::from_vec(vec![identifier]);

        let mut outputs = self.graph.run(
            &[
                (self.image, Tensor::Float(image)),
                (self.input_key, Tensor::Int(key)),
            ],
            &[self.output_key, self.scores],
        )?;

        let scores = match outputs.pop() {
            Some(Tensor::Float(batch)) if batch.nrows() == 1 => batch.row(0).to_vec(),
            _ => {
                return Err(InferenceError::Computation(
                    "scores output is not a batch of one".to_string(),
                ))
            }
        };
        let returned = match outputs.pop() {
            Some(Tensor::Int(batch)) if batch.len() == 1 => batch[0],
            _ => {
                return Err(InferenceError::Computation(
                    "key output is not a batch of one".to_string(),
                ))
            }
        };

        if let Some(bad) = scores.iter().position(|s| !s.is_finite()) {
            return Err(InferenceError::Computation(format!(
                "non-finite score for class {bad}"
            )));
        }

        debug!(identifier = returned, classes = scores.len(), "Prediction computed");

        Ok(Prediction::new(returned, scores))
    }

    fn input_width(&self) -> Option<usize> {
        Some(self.input_width)
    }
}

fn bind(graph: &Graph, bindings: &Bindings, role: &str) -> Result<usize, LoadError> {
    let tensor = bindings
        .get(role)
        .ok_or_else(|| LoadError::MissingBinding(role.to_string()))?;
    graph.lookup(tensor)
}

fn wrong_binding(graph: &Graph, role: &str, node: usize, expected: &str) -> LoadError {
    LoadError::InvalidGraph(format!(
        "role {role} is bound to {} which is not {expected}",
        graph.name(node)
    ))
}
