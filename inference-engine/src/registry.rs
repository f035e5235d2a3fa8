//! Load-once engine registry
//!
//! The registry is an explicit handle rather than module-level state: build
//! one per process, wrap it in an `Arc`, and pass it to every stage that
//! needs an engine.
//!
//! # Cache modes
//!
//! - [`CacheMode::Process`] keeps a single engine for the process lifetime.
//!   Requests naming a different checkpoint receive that same engine and a
//!   warning is logged once.
//! - [`CacheMode::PerCheckpoint`] keeps one engine per checkpoint path.
//!
//! Every slot is a [`OnceCell`]: racing first callers block on a single
//! construction and all of them receive the same `Arc`; later callers read
//! the slot without locking. A failed construction leaves the slot empty.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use tracing::{error, info, warn};

use crate::backend::InferenceBackend;
use crate::engine::InferenceEngine;
use crate::error::LoadError;

/// Shared handle to a loaded engine
pub type EngineHandle = Arc<dyn InferenceBackend>;

/// Engine constructor used by the registry
pub type Loader = dyn Fn(&Path) -> Result<EngineHandle, LoadError> + Send + Sync;

/// Metric names
pub const ENGINE_LOADS_TOTAL: &str = "predict_engine_loads_total";
pub const ENGINE_LOAD_SECONDS: &str = "predict_engine_load_seconds";

/// How the registry keys its cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// One engine per process, whatever checkpoint is requested
    #[default]
    Process,
    /// One engine per distinct checkpoint path
    PerCheckpoint,
}

struct LoadedEngine {
    checkpoint: PathBuf,
    engine: EngineHandle,
}

/// Process-wide, lazily populated engine cache
pub struct EngineRegistry {
    mode: CacheMode,
    loader: Box<Loader>,
    process_slot: OnceCell<LoadedEngine>,
    per_checkpoint: DashMap<PathBuf, Arc<OnceCell<EngineHandle>>>,
    mismatch_warned: AtomicBool,
}

impl EngineRegistry {
    /// Create a registry that loads checkpoints with [`InferenceEngine::load`].
    pub fn new(mode: CacheMode) -> Self {
        Self::with_loader(mode, |checkpoint| {
            InferenceEngine::load(checkpoint).map(|engine| Arc::new(engine) as EngineHandle)
        })
    }

    /// Create a registry with a custom engine constructor.
    pub fn with_loader<F>(mode: CacheMode, loader: F) -> Self
    where
        F: Fn(&Path) -> Result<EngineHandle, LoadError> + Send + Sync + 'static,
    {
        Self {
            mode,
            loader: Box::new(loader),
            process_slot: OnceCell::new(),
            per_checkpoint: DashMap::new(),
            mismatch_warned: AtomicBool::new(false),
        }
    }

    pub const fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Fetch the engine for `checkpoint`, constructing it on first use.
    pub fn get(&self, checkpoint: &Path) -> Result<EngineHandle, LoadError> {
        match self.mode {
            CacheMode::Process => {
                let loaded = self.process_slot.get_or_try_init(|| {
                    self.construct(checkpoint).map(|engine| LoadedEngine {
                        checkpoint: checkpoint.to_path_buf(),
                        engine,
                    })
                })?;

                self.warn_on_mismatch(checkpoint, &loaded.checkpoint);
                Ok(Arc::clone(&loaded.engine))
            }
            CacheMode::PerCheckpoint => {
                let slot = Arc::clone(
                    &self
                        .per_checkpoint
                        .entry(checkpoint.to_path_buf())
                        .or_default(),
                );
                slot.get_or_try_init(|| self.construct(checkpoint))
                    .map(Arc::clone)
            }
        }
    }

    /// Whether an engine for `checkpoint` is ready without constructing it.
    pub fn is_loaded(&self, checkpoint: &Path) -> bool {
        match self.mode {
            CacheMode::Process => self.process_slot.get().is_some(),
            CacheMode::PerCheckpoint => self
                .per_checkpoint
                .get(checkpoint)
                .is_some_and(|slot| slot.get().is_some()),
        }
    }

    /// Number of engines currently held.
    pub fn loaded_count(&self) -> usize {
        match self.mode {
            CacheMode::Process => usize::from(self.process_slot.get().is_some()),
            CacheMode::PerCheckpoint => self
                .per_checkpoint
                .iter()
                .filter(|entry| entry.value().get().is_some())
                .count(),
        }
    }

    /// Log once per registry when `requested` is not the checkpoint being
    /// served. Returns whether this call logged.
    fn warn_on_mismatch(&self, requested: &Path, loaded: &Path) -> bool {
        if requested == loaded || self.mismatch_warned.swap(true, Ordering::Relaxed) {
            return false;
        }
        warn!(
            requested = %requested.display(),
            loaded = %loaded.display(),
            "Process already serves another checkpoint; reusing it"
        );
        true
    }

    fn construct(&self, checkpoint: &Path) -> Result<EngineHandle, LoadError> {
        let started = Instant::now();
        info!(checkpoint = %checkpoint.display(), mode = ?self.mode, "Constructing engine");

        match (self.loader)(checkpoint) {
            Ok(engine) => {
                counter!(ENGINE_LOADS_TOTAL, "result" => "success").increment(1);
                histogram!(ENGINE_LOAD_SECONDS).record(started.elapsed().as_secs_f64());
                Ok(engine)
            }
            Err(e) => {
                counter!(ENGINE_LOADS_TOTAL, "result" => "failure").increment(1);
                error!(checkpoint = %checkpoint.display(), error = %e, "Engine construction failed");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("mode", &self.mode)
            .field("loaded", &self.loaded_count())
            .finish_non_exhaustive()
    }
}
