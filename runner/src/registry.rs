//! Process-wide table of runs.
//!
//! [`RunRegistry`] owns run creation and starts one driver per run. Storage is
//! behind the [`RunStore`] trait so a persistent or expiring store can replace
//! [`InMemoryRunStore`] without changing callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::Url;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::types::{Run, RunStatus};
use crate::driver::{DriverConfig, RunDriver};
use crate::error::{EngineError, Result};
use crate::event_log::EventLog;
use crate::executor::ExecutorFactory;
use crate::run_state::RunState;

/// A registered run: its state, its log and its cancellation flag.
#[derive(Debug)]
pub struct RunHandle {
    id: String,
    state: RunState,
    cancel: AtomicBool,
}

impl RunHandle {
    pub fn new(run: Run) -> Self {
        Self {
            id: run.id.clone(),
            state: RunState::new(run, Arc::new(EventLog::new())),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run(&self) -> Run {
        self.state.snapshot()
    }

    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    pub fn log(&self) -> &EventLog {
        self.state.log()
    }

    pub(crate) fn state(&self) -> &RunState {
        &self.state
    }

    /// Ask the driver to stop before its next step.
    pub fn request_cancel(&self) -> Result<()> {
        let status = self.status();
        if status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "run {} already {status}",
                self.id
            )));
        }
        self.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Storage for registered runs. `list` returns runs in creation order.
pub trait RunStore: Send + Sync {
    fn insert(&self, handle: Arc<RunHandle>);
    fn get(&self, id: &str) -> Option<Arc<RunHandle>>;
    fn list(&self) -> Vec<Arc<RunHandle>>;
}

/// Keeps every run for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    order: Vec<Arc<RunHandle>>,
    by_id: HashMap<String, usize>,
}

impl RunStore for InMemoryRunStore {
    fn insert(&self, handle: Arc<RunHandle>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let index = inner.order.len();
        inner.by_id.insert(handle.id().to_string(), index);
        inner.order.push(handle);
    }

    fn get(&self, id: &str) -> Option<Arc<RunHandle>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_id
            .get(id)
            .and_then(|&index| inner.order.get(index))
            .cloned()
    }

    fn list(&self) -> Vec<Arc<RunHandle>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.order.clone()
    }
}

pub struct RunRegistry {
    store: Arc<dyn RunStore>,
    executors: Arc<dyn ExecutorFactory>,
    config: DriverConfig,
}

impl RunRegistry {
    pub fn new(executors: Arc<dyn ExecutorFactory>, config: DriverConfig) -> Self {
        Self::with_store(Arc::new(InMemoryRunStore::default()), executors, config)
    }

    pub fn with_store(
        store: Arc<dyn RunStore>,
        executors: Arc<dyn ExecutorFactory>,
        config: DriverConfig,
    ) -> Self {
        Self {
            store,
            executors,
            config,
        }
    }

    /// Register a pending run for `target` and start its driver.
    ///
    /// Returns as soon as the driver task is spawned; must be called from
    /// within a tokio runtime.
    pub fn create(&self, target: &str) -> Result<Run> {
        let target = validate_target(target)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| EngineError::InvalidState("no async runtime to drive the run".into()))?;

        let run = Run::new(Uuid::new_v4().to_string(), target);
        let handle = Arc::new(RunHandle::new(run.clone()));
        self.store.insert(Arc::clone(&handle));
        info!(run_id = %run.id, target = %run.target, "run created");

        let executor = self.executors.create(&run.target);
        let driver = RunDriver::new(handle, executor, self.config.clone());
        runtime.spawn(driver.run());

        Ok(run)
    }

    /// Current metadata for `id`, `None` if unknown.
    pub fn get(&self, id: &str) -> Option<Run> {
        self.store.get(id).map(|handle| handle.run())
    }

    pub fn handle(&self, id: &str) -> Option<Arc<RunHandle>> {
        self.store.get(id)
    }

    /// All runs in creation order.
    pub fn list(&self) -> Vec<Run> {
        self.store.list().iter().map(|handle| handle.run()).collect()
    }

    pub fn handles(&self) -> Vec<Arc<RunHandle>> {
        self.store.list()
    }

    /// Request cancellation of a non-terminal run.
    pub fn cancel(&self, id: &str) -> Result<()> {
        let handle = self
            .store
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        handle.request_cancel().inspect_err(|err| {
            warn!(run_id = %id, error = %err, "cancel rejected");
        })?;
        info!(run_id = %id, "cancellation requested");
        Ok(())
    }
}

/// Accept absolute `http`/`https` URLs with a host.
fn validate_target(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation("url must not be empty".to_string()));
    }
    let url = Url::parse(trimmed)
        .map_err(|err| EngineError::Validation(format!("invalid url '{trimmed}': {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EngineError::Validation(format!(
            "unsupported url scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(EngineError::Validation(format!("url '{trimmed}' has no host")));
    }
    Ok(url.to_string())
}
