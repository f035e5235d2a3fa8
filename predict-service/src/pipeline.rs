//! Streaming pipeline: subscribe → decode → predict → encode → publish
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Subscribed → Running → Cancelled | Failed
//! ```
//!
//! There is no success state. The pipeline runs until the shutdown future
//! resolves or the input stream ends (both `Cancelled`), or until a fatal
//! error occurs (`Failed`). Per-record decode, inference and timeout errors
//! are logged, counted and optionally dead-lettered; the stream carries on.
//!
//! Records are processed with bounded concurrency, so results may be
//! published in a different order than their inputs arrived.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::stage::{PredictStage, StageError};
use crate::transport::{Publisher, Subscriber, TransportError};

/// Records in flight when no concurrency is configured
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Subscribed,
    Running,
    Cancelled,
    Failed,
}

impl PipelineState {
    /// Numeric code exported as a gauge.
    pub const fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Subscribed => 1,
            Self::Running => 2,
            Self::Cancelled => 3,
            Self::Failed => 4,
        }
    }
}

/// Errors that stop the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Fatal stage failure: {0}")]
    Stage(#[source] StageError),
}

/// Counters reported when the pipeline stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub published: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

pub struct Pipeline {
    stage: Arc<PredictStage>,
    source: Box<dyn Subscriber>,
    sink: Box<dyn Publisher>,
    dead_letter: Option<Box<dyn Publisher>>,
    concurrency: usize,
    state: Arc<watch::Sender<PipelineState>>,
}

impl Pipeline {
    pub fn new(
        stage: Arc<PredictStage>,
        source: Box<dyn Subscriber>,
        sink: Box<dyn Publisher>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            state: Arc::new(state),
            stage,
            source,
            sink,
            dead_letter: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Route per-record failures to `sink`.
    #[must_use]
    pub fn with_dead_letter(mut self, sink: Box<dyn Publisher>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    /// Maximum records processed at once (at least one).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Watch the pipeline's state transitions.
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` resolves, the input ends, or a fatal error occurs.
    pub async fn run<F>(self, shutdown: F) -> Result<PipelineStats, PipelineError>
    where
        F: Future<Output = ()>,
    {
        let state = Arc::clone(&self.state);
        let result = self.drive(shutdown).await;

        match &result {
            Ok(stats) => {
                transition(&state, PipelineState::Cancelled);
                info!(
                    received = stats.received,
                    published = stats.published,
                    failed = stats.failed,
                    "Pipeline stopped"
                );
            }
            Err(e) => {
                transition(&state, PipelineState::Failed);
                error!(error = %e, "Pipeline failed");
            }
        }

        result
    }

    async fn drive<F>(self, shutdown: F) -> Result<PipelineStats, PipelineError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            stage,
            source,
            mut sink,
            mut dead_letter,
            concurrency,
            state,
        } = self;

        transition(&state, PipelineState::Subscribed);

        let messages: BoxStream<'static, Result<Vec<u8>, TransportError>> =
            stream::unfold(source, |mut source| async move {
                match source.next_message().await {
                    Ok(Some(payload)) => Some((Ok(payload), source)),
                    Ok(None) => None,
                    Err(e) => Some((Err(e), source)),
                }
            })
            .boxed();

        let outcomes = messages
            .map(move |message| {
                let stage = Arc::clone(&stage);
                async move {
                    match message {
                        Ok(payload) => {
                            let started = Instant::now();
                            let outcome = stage.handle_message(&payload).await;
                            Ok((payload, outcome, started.elapsed()))
                        }
                        Err(e) => Err(e),
                    }
                }
            })
            .buffer_unordered(concurrency);
        tokio::pin!(outcomes);
        tokio::pin!(shutdown);

        transition(&state, PipelineState::Running);
        info!(concurrency, "Pipeline running");

        let mut stats = PipelineStats::default();
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(stats);
                }
                next = outcomes.next() => {
                    let Some(next) = next else {
                        info!("Input stream ended");
                        return Ok(stats);
                    };
                    let (payload, outcome, elapsed) = next?;
                    stats.received += 1;

                    match outcome {
                        Ok(outputs) => {
                            for output in outputs {
                                sink.publish(output).await?;
                                stats.published += 1;
                            }
                            metrics::record_success(elapsed);
                            debug!(elapsed_us = elapsed.as_micros(), "Record published");
                        }
                        Err(e) if e.is_record_local() => {
                            stats.failed += 1;
                            metrics::record_failure(e.kind());
                            warn!(error = %e, kind = e.kind(), "Record failed");

                            if let Some(dead_letter) = dead_letter.as_mut() {
                                dead_letter.publish(dead_letter_payload(&e, &payload)).await?;
                                stats.dead_lettered += 1;
                                metrics::record_dead_letter();
                            }
                        }
                        Err(e) => {
                            metrics::record_failure(e.kind());
                            return Err(PipelineError::Stage(e));
                        }
                    }
                }
            }
        }
    }
}

/// JSON body published to the dead-letter topic for a failed record.
pub fn dead_letter_payload(error: &StageError, payload: &[u8]) -> Vec<u8> {
    json!({
        "error": error.to_string(),
        "kind": error.kind(),
        "payload": String::from_utf8_lossy(payload),
    })
    .to_string()
    .into_bytes()
}

fn transition(state: &watch::Sender<PipelineState>, next: PipelineState) {
    state.send_replace(next);
    metrics::set_pipeline_state(next);
    debug!(state = ?next, "Pipeline state changed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use predict_core::DecodeError;

    #[test]
    fn test_state_codes_are_ordered() {
        assert_eq!(PipelineState::Idle.code(), 0);
        assert_eq!(PipelineState::Failed.code(), 4);
    }

    #[test]
    fn test_dead_letter_payload_shape() {
        let err = StageError::Decode(DecodeError::MissingField("Image"));
        let body: serde_json::Value =
            serde_json::from_slice(&dead_letter_payload(&err, br#"{"ID": 1}"#)).unwrap();

        assert_eq!(body["kind"], "decode");
        assert_eq!(body["payload"], r#"{"ID": 1}"#);
        assert!(body["error"].as_str().unwrap().contains("Image"));
    }
}
