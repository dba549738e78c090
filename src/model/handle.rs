//! Load-once ownership of the recognition model.
//!
//! A [`ModelHandle`] is constructed once at process start and shared by
//! reference (usually through an `Arc`) with every pipeline call. The first
//! [`ensure_loaded`](ModelHandle::ensure_loaded) performs the expensive
//! acquisition; concurrent callers that arrive while it runs block on the
//! same attempt instead of starting their own. The outcome, success or
//! failure, is cached for the lifetime of the handle. Only
//! [`retry`](ModelHandle::retry) leaves the `Failed` state.
//!
//! ```text
//! Unloaded -> Loading -> Ready
//!                     -> Failed -- retry() --> Loading
//! ```

use super::capability::ModelLoader;
use crate::core::config::{AppConfig, ModelLocation};
use crate::core::errors::{HmeError, error_chain, panic_message};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Why a load attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    /// The model directory or the checkpoint file does not exist.
    MissingCheckpoint { path: PathBuf },
    /// The loader returned an error or panicked.
    LoadError { message: String },
}

impl From<LoadFailure> for HmeError {
    fn from(failure: LoadFailure) -> Self {
        match failure {
            LoadFailure::MissingCheckpoint { path } => HmeError::MissingCheckpoint { path },
            LoadFailure::LoadError { message } => HmeError::LoadError { message },
        }
    }
}

/// Observable lifecycle state of a [`ModelHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Failed(LoadFailure),
}

impl ModelState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Summary of a handle for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub backend: String,
    pub model_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub device: String,
    pub state: &'static str,
    pub load_attempts: u32,
    pub load_time_ms: Option<f64>,
}

enum Slot<M> {
    Unloaded,
    Loading,
    Ready(Arc<M>),
    Failed(LoadFailure),
}

impl<M> Slot<M> {
    fn state(&self) -> ModelState {
        match self {
            Slot::Unloaded => ModelState::Unloaded,
            Slot::Loading => ModelState::Loading,
            Slot::Ready(_) => ModelState::Ready,
            Slot::Failed(failure) => ModelState::Failed(failure.clone()),
        }
    }
}

struct Inner<M> {
    slot: Slot<M>,
    attempts: u32,
    load_time: Option<Duration>,
}

/// Owns a model loader and the single cached outcome of loading it.
pub struct ModelHandle<L: ModelLoader> {
    loader: L,
    location: ModelLocation,
    device: String,
    inner: Mutex<Inner<L::Model>>,
    settled: Condvar,
}

impl<L: ModelLoader> ModelHandle<L> {
    /// Creates an unloaded handle. Nothing is read from disk until the
    /// first [`ensure_loaded`](Self::ensure_loaded).
    ///
    /// # Arguments
    ///
    /// * `loader` - Backend used to build the model.
    /// * `location` - Model directory and checkpoint file name.
    /// * `device` - Device string passed through to the loader.
    pub fn new(loader: L, location: ModelLocation, device: impl Into<String>) -> Self {
        Self {
            loader,
            location,
            device: device.into(),
            inner: Mutex::new(Inner {
                slot: Slot::Unloaded,
                attempts: 0,
                load_time: None,
            }),
            settled: Condvar::new(),
        }
    }

    /// Creates a handle bound to the configured location and device.
    pub fn from_config(loader: L, config: &AppConfig) -> Self {
        Self::new(loader, config.model.clone(), config.device.clone())
    }

    /// Directory and checkpoint the loader is pointed at.
    pub fn location(&self) -> &ModelLocation {
        &self.location
    }

    /// Device string handed to the loader, e.g. `cpu` or `cuda:0`.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Short name of the backend, taken from [`ModelLoader::backend_name`].
    pub fn backend_name(&self) -> &str {
        self.loader.backend_name()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<L::Model>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads the model on first call and returns the cached outcome afterwards.
    ///
    /// Callers arriving while a load is in flight wait for it and observe its
    /// outcome. A failure is returned as-is on every later call.
    pub fn ensure_loaded(&self) -> Result<Arc<L::Model>, LoadFailure> {
        let mut inner = self.lock();
        loop {
            let in_flight = match &inner.slot {
                Slot::Ready(model) => return Ok(Arc::clone(model)),
                Slot::Failed(failure) => return Err(failure.clone()),
                Slot::Loading => true,
                Slot::Unloaded => false,
            };
            if !in_flight {
                break;
            }
            debug!("waiting for in-flight model load");
            inner = self
                .settled
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner.slot = Slot::Loading;
        inner.attempts += 1;
        let attempt = inner.attempts;
        drop(inner);

        info!(
            "loading {} model from {} on {} (attempt {attempt})",
            self.loader.backend_name(),
            self.location.model_dir.display(),
            self.device
        );
        let started = Instant::now();
        let outcome = self.acquire();
        let elapsed = started.elapsed();

        let mut inner = self.lock();
        let result = match outcome {
            Ok(model) => {
                info!(
                    "model ready in {:.2}ms",
                    elapsed.as_secs_f64() * 1000.0
                );
                let model = Arc::new(model);
                inner.slot = Slot::Ready(Arc::clone(&model));
                inner.load_time = Some(elapsed);
                Ok(model)
            }
            Err(failure) => {
                warn!("model load failed: {failure:?}");
                inner.slot = Slot::Failed(failure.clone());
                Err(failure)
            }
        };
        drop(inner);
        self.settled.notify_all();
        result
    }

    fn acquire(&self) -> Result<L::Model, LoadFailure> {
        let model_dir = &self.location.model_dir;
        if !model_dir.is_dir() {
            return Err(LoadFailure::MissingCheckpoint {
                path: model_dir.clone(),
            });
        }
        let checkpoint = self.location.checkpoint_path();
        if !checkpoint.is_file() {
            return Err(LoadFailure::MissingCheckpoint { path: checkpoint });
        }

        match catch_unwind(AssertUnwindSafe(|| {
            self.loader.load(&self.location, &self.device)
        })) {
            Ok(Ok(model)) => Ok(model),
            Ok(Err(err)) => Err(LoadFailure::LoadError {
                message: error_chain(&*err),
            }),
            Err(payload) => Err(LoadFailure::LoadError {
                message: format!("loader panicked: {}", panic_message(&*payload)),
            }),
        }
    }

    /// Clears a `Failed` outcome and attempts the load again.
    ///
    /// This is the operator action for recovering without a restart. For any
    /// other state it behaves like [`ensure_loaded`](Self::ensure_loaded).
    pub fn retry(&self) -> Result<Arc<L::Model>, LoadFailure> {
        {
            let mut inner = self.lock();
            if matches!(inner.slot, Slot::Failed(_)) {
                info!("retrying failed model load");
                inner.slot = Slot::Unloaded;
            }
        }
        self.ensure_loaded()
    }

    /// The loaded model, if and only if the handle is `Ready`. Never loads.
    pub fn ready_model(&self) -> Option<Arc<L::Model>> {
        match &self.lock().slot {
            Slot::Ready(model) => Some(Arc::clone(model)),
            _ => None,
        }
    }

    /// Current state without triggering a load.
    pub fn state(&self) -> ModelState {
        self.lock().slot.state()
    }

    /// Snapshot of the handle for status displays.
    ///
    /// Reads the state under the same lock as the load counters, so the
    /// reported label, attempt count and load time always agree.
    ///
    /// # Returns
    ///
    /// A [`ModelInfo`] whose `state` is the [`ModelState::label`] of the
    /// current state.
    pub fn info(&self) -> ModelInfo {
        let inner = self.lock();
        let state = inner.slot.state().label();
        ModelInfo {
            backend: self.loader.backend_name().to_string(),
            model_dir: self.location.model_dir.clone(),
            checkpoint_path: self.location.checkpoint_path(),
            device: self.device.clone(),
            state,
            load_attempts: inner.attempts,
            load_time_ms: inner.load_time.map(|d| d.as_secs_f64() * 1000.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::stub::StubLoader;
    use std::sync::Barrier;
    use tempfile::TempDir;

    fn model_dir() -> (TempDir, ModelLocation) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"stub").unwrap();
        let location = ModelLocation::new(dir.path(), "model.safetensors");
        (dir, location)
    }

    #[test]
    fn test_loads_once_and_caches() {
        let (_dir, location) = model_dir();
        let loader = StubLoader::new();
        let counters = loader.counters();
        let handle = ModelHandle::new(loader, location, "cpu");

        assert_eq!(handle.state(), ModelState::Unloaded);
        assert!(handle.ready_model().is_none());

        let first = handle.ensure_loaded().unwrap();
        let second = handle.ensure_loaded().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counters.loads(), 1);
        assert_eq!(handle.state(), ModelState::Ready);
        assert!(handle.ready_model().is_some());
    }

    #[test]
    fn test_missing_directory() {
        let location = ModelLocation::new("/nonexistent/hme-weights", "model.safetensors");
        let loader = StubLoader::new();
        let counters = loader.counters();
        let handle = ModelHandle::new(loader, location, "cpu");

        let failure = handle.ensure_loaded().unwrap_err();
        assert_eq!(
            failure,
            LoadFailure::MissingCheckpoint {
                path: PathBuf::from("/nonexistent/hme-weights")
            }
        );
        assert_eq!(counters.loads(), 0);
    }

    #[test]
    fn test_missing_checkpoint_file() {
        let dir = tempfile::tempdir().unwrap();
        let location = ModelLocation::new(dir.path(), "model.safetensors");
        let handle = ModelHandle::new(StubLoader::new(), location.clone(), "cpu");

        let err: HmeError = handle.ensure_loaded().unwrap_err().into();
        assert_eq!(
            err,
            HmeError::MissingCheckpoint {
                path: location.checkpoint_path()
            }
        );
    }

    #[test]
    fn test_failure_is_cached_until_retry() {
        let (_dir, location) = model_dir();
        let loader = StubLoader::new().failing_load("out of memory");
        let counters = loader.counters();
        let handle = ModelHandle::new(loader, location, "cpu");

        let failure = handle.ensure_loaded().unwrap_err();
        assert!(matches!(&failure, LoadFailure::LoadError { message } if message.contains("out of memory")));
        assert!(handle.ensure_loaded().is_err());
        assert_eq!(counters.loads(), 1);
        assert_eq!(handle.state().label(), "failed");

        assert!(handle.retry().is_err());
        assert_eq!(counters.loads(), 2);
        assert_eq!(handle.info().load_attempts, 2);
    }

    #[test]
    fn test_retry_on_ready_does_not_reload() {
        let (_dir, location) = model_dir();
        let loader = StubLoader::new();
        let counters = loader.counters();
        let handle = ModelHandle::new(loader, location, "cpu");
        handle.ensure_loaded().unwrap();
        handle.retry().unwrap();
        assert_eq!(counters.loads(), 1);
    }

    #[test]
    fn test_loader_panic_becomes_load_error() {
        let (_dir, location) = model_dir();
        let handle = ModelHandle::new(StubLoader::new().panicking_load(), location, "cpu");
        let failure = handle.ensure_loaded().unwrap_err();
        assert!(matches!(failure, LoadFailure::LoadError { message } if message.contains("panicked")));
        assert_eq!(handle.state().label(), "failed");
    }

    #[test]
    fn test_concurrent_callers_share_one_load() {
        let (_dir, location) = model_dir();
        let loader = StubLoader::new().with_load_delay(Duration::from_millis(50));
        let counters = loader.counters();
        let handle = ModelHandle::new(loader, location, "cpu");
        let callers = 8;
        let barrier = Barrier::new(callers);

        let outcomes: Vec<bool> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..callers)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        handle.ensure_loaded().is_ok()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert!(outcomes.iter().all(|ok| *ok));
        assert_eq!(counters.loads(), 1);
        assert_eq!(handle.state(), ModelState::Ready);
    }

    #[test]
    fn test_concurrent_callers_share_one_failure() {
        let (_dir, location) = model_dir();
        let loader = StubLoader::new()
            .failing_load("bad weights")
            .with_load_delay(Duration::from_millis(30));
        let counters = loader.counters();
        let handle = ModelHandle::new(loader, location, "cpu");
        let barrier = Barrier::new(4);

        let failures: Vec<LoadFailure> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        handle.ensure_loaded().unwrap_err()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(counters.loads(), 1);
        assert!(failures.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_info_reports_state() {
        let (_dir, location) = model_dir();
        let handle = ModelHandle::new(StubLoader::new(), location.clone(), "cpu");
        let info = handle.info();
        assert_eq!(info.backend, "stub");
        assert_eq!(info.state, "unloaded");
        assert!(info.load_time_ms.is_none());

        handle.ensure_loaded().unwrap();
        let info = handle.info();
        assert_eq!(info.state, "ready");
        assert_eq!(info.checkpoint_path, location.checkpoint_path());
        assert!(info.load_time_ms.is_some());
    }

    #[test]
    fn test_info_label_tracks_state() {
        let (_dir, location) = model_dir();
        let handle = ModelHandle::new(StubLoader::new(), location, "cpu");
        assert_eq!(handle.info().state, handle.state().label());
        handle.ensure_loaded().unwrap();
        assert_eq!(handle.info().state, handle.state().label());

        let failing = ModelHandle::new(
            StubLoader::new(),
            ModelLocation::new("/nonexistent/hme-weights", "model.safetensors"),
            "cpu",
        );
        assert!(failing.ensure_loaded().is_err());
        assert_eq!(failing.state().label(), "failed");
        assert_eq!(failing.info().state, failing.state().label());
        assert_eq!(failing.info().load_attempts, 1);
    }
}
