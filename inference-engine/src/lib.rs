//! Inference Engine - load-once classification models
//!
//! This crate turns a checkpoint directory into an [`InferenceEngine`] and
//! hands it out through an [`EngineRegistry`] that constructs each engine
//! at most once per process.
//!
//! # Architecture
//!
//! - [`InferenceBackend`] is the only thing callers depend on: a synchronous
//!   `predict(identifier, features)` that is safe to call from many threads.
//! - [`InferenceEngine`] is the checkpoint-backed backend. Tensor names are
//!   resolved through the checkpoint's metadata collections at load time.
//! - [`EngineRegistry`] is an injectable handle guarding construction with a
//!   once-cell, so racing first callers share one load.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use inference_engine::{CacheMode, EngineRegistry};
//!
//! let registry = Arc::new(EngineRegistry::new(CacheMode::Process));
//! let engine = registry.get("/models/mnist".as_ref())?;
//! let prediction = engine.predict(42, &vec![0.0; 784])?;
//! assert_eq!(prediction.identifier, 42);
//! ```

pub mod backend;
pub mod checkpoint;
pub mod engine;
pub mod error;
mod graph;
pub mod registry;

// Re-export main types for convenience
pub use backend::{InferenceBackend, Prediction};
pub use engine::InferenceEngine;
pub use error::{InferenceError, LoadError};
pub use registry::{CacheMode, EngineHandle, EngineRegistry};
