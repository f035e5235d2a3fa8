//! Per-record prediction stage
//!
//! For each record the stage fetches the engine from the shared
//! [`EngineRegistry`] (constructing it on first use), runs a batch-of-one
//! prediction and wraps the output as a [`PredictionResult`]. Engine calls
//! are synchronous and CPU-bound, so the async entry points move them onto
//! tokio's blocking pool.
//!
//! Only the prediction itself is subject to the timeout; engine construction
//! runs to completion and its failure is reported as [`StageError::Load`].
//! A semaphore caps the predictions occupying blocking threads, including
//! timed-out ones that are still finishing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use inference_engine::{EngineHandle, EngineRegistry, InferenceError, LoadError};
use predict_core::{codec, DecodeError, InputRecord, PredictionResult};
use thiserror::Error;
use tokio::sync::{AcquireError, Semaphore};
use tracing::{debug, warn};

use crate::pipeline::DEFAULT_CONCURRENCY;

/// Errors raised while handling one record
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Failed to decode record: {0}")]
    Decode(#[from] DecodeError),

    #[error("Failed to load engine: {0}")]
    Load(#[from] LoadError),

    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("Prediction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Prediction task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Prediction workers closed: {0}")]
    WorkersClosed(#[from] AcquireError),
}

impl StageError {
    /// Whether the failure only concerns the record that caused it.
    ///
    /// Load and worker failures mean no later record can succeed either.
    pub const fn is_record_local(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Inference(_) | Self::Timeout(_)
        )
    }

    /// Short label used in logs, metrics and dead letters.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Load(_) => "load",
            Self::Inference(_) => "inference",
            Self::Timeout(_) => "timeout",
            Self::Worker(_) | Self::WorkersClosed(_) => "worker",
        }
    }
}

/// Applies the model to individual records
#[derive(Debug)]
pub struct PredictStage {
    registry: Arc<EngineRegistry>,
    checkpoint: PathBuf,
    timeout: Option<Duration>,
    workers: Arc<Semaphore>,
}

impl PredictStage {
    pub fn new(registry: Arc<EngineRegistry>, checkpoint: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            checkpoint: checkpoint.into(),
            timeout: None,
            workers: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
        }
    }

    /// Bound each prediction made through the async entry points.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Maximum predictions running on the blocking pool at once (at least one).
    #[must_use]
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.workers = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    pub fn checkpoint(&self) -> &Path {
        &self.checkpoint
    }

    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Score one record. Emits exactly one result on success.
    pub fn process(&self, record: &InputRecord) -> Result<Vec<PredictionResult>, StageError> {
        let engine = self.registry.get(&self.checkpoint)?;
        Self::score(&engine, record)
    }

    fn score(
        engine: &EngineHandle,
        record: &InputRecord,
    ) -> Result<Vec<PredictionResult>, StageError> {
        let prediction = engine.predict(record.identifier, &record.features)?;

        if prediction.identifier != record.identifier {
            return Err(InferenceError::KeyMismatch {
                submitted: record.identifier,
                returned: prediction.identifier,
            }
            .into());
        }

        debug!(
            identifier = prediction.identifier,
            classes = prediction.scores.len(),
            "Record scored"
        );

        Ok(vec![PredictionResult::new(
            prediction.identifier,
            prediction.scores,
        )])
    }

    /// Fetch the engine, constructing it on the blocking pool if needed.
    ///
    /// Not bounded by the timeout: a slow load delays records, a failed one
    /// surfaces as [`StageError::Load`].
    async fn engine(self: &Arc<Self>) -> Result<EngineHandle, StageError> {
        if self.registry.is_loaded(&self.checkpoint) {
            return Ok(self.registry.get(&self.checkpoint)?);
        }
        let stage = Arc::clone(self);
        let engine = tokio::task::spawn_blocking(move || stage.registry.get(&stage.checkpoint)).await??;
        Ok(engine)
    }

    /// Score one record on the blocking pool, honouring the timeout.
    ///
    /// The timeout covers waiting for a worker slot and the prediction. A
    /// timed-out prediction keeps its slot until it finishes in the
    /// background; only its result is discarded.
    pub async fn process_async(
        self: &Arc<Self>,
        record: InputRecord,
    ) -> Result<Vec<PredictionResult>, StageError> {
        let engine = self.engine().await?;
        let identifier = record.identifier;
        let predict = Self::score_bounded(Arc::clone(&self.workers), engine, record);

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, predict).await.unwrap_or_else(|_| {
                warn!(
                    identifier,
                    timeout_ms = limit.as_millis(),
                    "Prediction timed out"
                );
                Err(StageError::Timeout(limit))
            }),
            None => predict.await,
        }
    }

    async fn score_bounded(
        workers: Arc<Semaphore>,
        engine: EngineHandle,
        record: InputRecord,
    ) -> Result<Vec<PredictionResult>, StageError> {
        let permit = workers.acquire_owned().await?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            Self::score(&engine, &record)
        })
        .await?
    }

    /// Decode a wire message, score it and encode the results.
    pub async fn handle_message(self: &Arc<Self>, payload: &[u8]) -> Result<Vec<Vec<u8>>, StageError> {
        let record = codec::decode(payload)?;
        let results = self.process_async(record).await?;
        Ok(results.iter().map(codec::encode).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_engine::{CacheMode, EngineHandle, InferenceBackend, Prediction};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns fixed scores and echoes the identifier.
    struct FixedScores(Vec<f64>);

    impl InferenceBackend for FixedScores {
        fn predict(&self, identifier: i64, _features: &[f64]) -> Result<Prediction, InferenceError> {
            Ok(Prediction::new(identifier, self.0.clone()))
        }
    }

    /// Always answers with the wrong identifier.
    struct Forgetful;

    impl InferenceBackend for Forgetful {
        fn predict(&self, identifier: i64, _features: &[f64]) -> Result<Prediction, InferenceError> {
            Ok(Prediction::new(identifier + 1, vec![1.0]))
        }
    }

    /// Sleeps longer than any test timeout.
    struct Slow;

    impl InferenceBackend for Slow {
        fn predict(&self, identifier: i64, _features: &[f64]) -> Result<Prediction, InferenceError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Prediction::new(identifier, vec![1.0]))
        }
    }

    fn stage_with<B: InferenceBackend + 'static>(backend: B) -> Arc<PredictStage> {
        let engine: EngineHandle = Arc::new(backend);
        let registry = EngineRegistry::with_loader(CacheMode::Process, move |_| Ok(Arc::clone(&engine)));
        Arc::new(PredictStage::new(Arc::new(registry), "/models/stub"))
    }

    #[test]
    fn test_process_emits_one_result() {
        let stage = stage_with(FixedScores(vec![0.1, 0.7, 0.2]));
        let results = stage.process(&InputRecord::new(42, vec![0.0])).unwrap();
        assert_eq!(results, vec![PredictionResult::new(42, vec![0.1, 0.7, 0.2])]);
    }

    #[test]
    fn test_identifier_mismatch_is_an_inference_error() {
        let stage = stage_with(Forgetful);
        let err = stage.process(&InputRecord::new(5, vec![0.0])).unwrap_err();
        assert!(matches!(
            err,
            StageError::Inference(InferenceError::KeyMismatch {
                submitted: 5,
                returned: 6
            })
        ));
        assert!(err.is_record_local());
    }

    #[test]
    fn test_load_failure_is_not_record_local() {
        let registry = EngineRegistry::with_loader(CacheMode::Process, |path| {
            Err(LoadError::MissingCheckpoint(path.to_path_buf()))
        });
        let stage = PredictStage::new(Arc::new(registry), "/models/missing");
        let err = stage.process(&InputRecord::new(1, vec![0.0])).unwrap_err();
        assert!(matches!(err, StageError::Load(_)));
        assert!(!err.is_record_local());
        assert_eq!(err.kind(), "load");
    }

    #[test]
    fn test_engine_constructed_once_across_records() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let registry = EngineRegistry::with_loader(CacheMode::Process, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedScores(vec![1.0])) as EngineHandle)
        });
        let stage = PredictStage::new(Arc::new(registry), "/models/stub");

        for id in 0..10 {
            stage.process(&InputRecord::new(id, vec![0.0])).unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handle_message_end_to_end() {
        let stage = stage_with(FixedScores(vec![0.9, 0.1]));
        let out = stage
            .handle_message(br#"{"ID": "7", "Image": "0.0,0.0,0.0"}"#)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            codec::decode_result(&out[0]).unwrap(),
            PredictionResult::new(7, vec![0.9, 0.1])
        );
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_poison_stage() {
        let stage = stage_with(FixedScores(vec![1.0]));

        for bad in [
            &b"{not json"[..],
            br#"{"ID": 1}"#,
            br#"{"ID": 1, "Image": "1,x,3"}"#,
        ] {
            let err = stage.handle_message(bad).await.unwrap_err();
            assert!(matches!(err, StageError::Decode(_)));
            assert!(err.is_record_local());
        }

        let ok = stage
            .handle_message(br#"{"ID": 2, "Image": "1,2,3"}"#)
            .await
            .unwrap();
        assert_eq!(ok.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_timeout_error() {
        let engine: EngineHandle = Arc::new(Slow);
        let registry = EngineRegistry::with_loader(CacheMode::Process, move |_| Ok(Arc::clone(&engine)));
        let stage = Arc::new(
            PredictStage::new(Arc::new(registry), "/models/slow")
                .with_timeout(Duration::from_millis(20)),
        );

        let err = stage
            .process_async(InputRecord::new(1, vec![0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Timeout(_)));
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_slow_load_is_not_a_timeout() {
        let registry = EngineRegistry::with_loader(CacheMode::Process, |_| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(Arc::new(FixedScores(vec![0.4, 0.6])) as EngineHandle)
        });
        let stage = Arc::new(
            PredictStage::new(Arc::new(registry), "/models/slow-load")
                .with_timeout(Duration::from_millis(20)),
        );

        let results = stage
            .process_async(InputRecord::new(3, vec![0.0]))
            .await
            .unwrap();
        assert_eq!(results, vec![PredictionResult::new(3, vec![0.4, 0.6])]);
    }

    #[tokio::test]
    async fn test_failed_load_with_timeout_surfaces_as_load_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let registry = EngineRegistry::with_loader(CacheMode::Process, move |path| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            Err(LoadError::MissingCheckpoint(path.to_path_buf()))
        });
        let stage = Arc::new(
            PredictStage::new(Arc::new(registry), "/models/missing")
                .with_timeout(Duration::from_millis(20)),
        );

        let err = stage
            .process_async(InputRecord::new(1, vec![0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Load(LoadError::MissingCheckpoint(_))));
        assert!(!err.is_record_local());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    /// Counts calls and the most predictions seen running at once.
    #[derive(Default)]
    struct Hanging {
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InferenceBackend for Hanging {
        fn predict(&self, identifier: i64, _features: &[f64]) -> Result<Prediction, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(150));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Prediction::new(identifier, vec![1.0]))
        }
    }

    #[tokio::test]
    async fn test_timed_out_predictions_stay_bounded() {
        let hanging = Arc::new(Hanging::default());
        let engine: EngineHandle = Arc::clone(&hanging) as EngineHandle;
        let registry = EngineRegistry::with_loader(CacheMode::Process, move |_| Ok(Arc::clone(&engine)));
        let stage = Arc::new(
            PredictStage::new(Arc::new(registry), "/models/hanging")
                .with_timeout(Duration::from_millis(20))
                .with_max_in_flight(2),
        );

        let outcomes = futures_util::future::join_all(
            (0..8).map(|id| stage.process_async(InputRecord::new(id, vec![0.0]))),
        )
        .await;
        assert!(outcomes
            .iter()
            .all(|outcome| matches!(outcome, Err(StageError::Timeout(_)))));

        // Let the background predictions drain
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(hanging.calls.load(Ordering::SeqCst), 2);
        assert!(hanging.peak.load(Ordering::SeqCst) <= 2);
    }
}
