//! Prediction Service
//!
//! Streaming worker that applies a checkpointed classifier to JSON records:
//!
//! ```text
//! subscribe → decode → PredictStage → encode → publish
//! ```
//!
//! The engine is loaded once per process through a shared
//! [`EngineRegistry`](inference_engine::EngineRegistry) and reused for every
//! record. Records that fail to decode or score are reported and skipped;
//! load and transport failures stop the worker.

pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod stage;
pub mod transport;

pub use config::Config;
pub use pipeline::{Pipeline, PipelineError, PipelineState, PipelineStats};
pub use stage::{PredictStage, StageError};
