//! The engine: the public face of the cell runtime.
//!
//! An [`Engine`] owns a registry of declared cells and a scheduler actor
//! that serializes every state mutation through one command queue. Handles
//! returned by [`Engine::declare`] are cheap tokens; `read`, `invalidate`
//! and `await_all` may be called from any task at any time.
//!
//! There is no global singleton: each engine is an explicit context object,
//! and cells from different engines do not mix.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Engine, DepValues};
//!
//! let engine = Engine::new();
//!
//! let studies = engine.declare("studies", || vec![], |_deps| async {
//!     Ok(fetch_studies().await?)
//! });
//!
//! let names = engine.declare(
//!     "study-names",
//!     move || vec![studies.into()],
//!     move |deps: DepValues| async move {
//!         let studies = deps.get(studies)?;
//!         Ok(studies.iter().map(|s| s.name.clone()).collect::<Vec<_>>())
//!     },
//! );
//!
//! let snapshot = engine.settled(&names).await;
//! ```

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::cell::record::{CellRecord, ErasedCompute, ResultHook, TypedCompute};
use crate::cell::values::ArcAny;
use crate::cell::view::{CellView, CompositeState};
use crate::cell::{CellHandle, CellId, CellRef, CellSnapshot, DepValues, Phase};
use crate::config::EngineConfig;
use crate::error::{BoxError, CellError};
use crate::graph::scheduler::{Command, Scheduler};

/// State shared between engine handles and the scheduler actor.
pub(crate) struct Shared {
    pub(crate) cells: DashMap<CellId, Arc<CellRecord>>,
    pub(crate) config: EngineConfig,
}

/// A reactive runtime for asynchronously computed, memoized values.
///
/// Cloning an engine is cheap and yields another handle to the same cell
/// graph. The scheduler stops once every engine handle is dropped and all
/// in-flight computations have settled; [`Engine::shutdown`] stops it
/// immediately.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Command>,
}

impl Engine {
    /// Create an engine with default configuration.
    ///
    /// Must be called within a tokio runtime: the scheduler actor is
    /// spawned immediately.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with the given configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            cells: DashMap::new(),
            config,
        });
        let scheduler = Scheduler::new(Arc::clone(&shared), rx, tx.downgrade());
        tokio::spawn(scheduler.run());
        Self { shared, tx }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Declare a cell: a named, memoized asynchronous computation.
    ///
    /// `deps` is re-evaluated on every recomputation attempt, so the
    /// dependency set may change between runs. `compute` receives the
    /// settled values of the declared dependencies and runs only once all
    /// of them are ready; it is never invoked while a dependency is failed.
    ///
    /// Nothing runs until the cell is first read (or awaited).
    pub fn declare<T, D, F, Fut>(&self, name: impl Into<String>, deps: D, compute: F) -> CellHandle<T>
    where
        T: Send + Sync + 'static,
        D: Fn() -> Vec<CellRef> + Send + Sync + 'static,
        F: Fn(DepValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.declare_inner(
            name.into(),
            Box::new(deps),
            Box::new(TypedCompute::<T, F>::new(compute)),
            None,
        )
    }

    /// Like [`Engine::declare`], additionally invoking `on_result` with each
    /// freshly settled value.
    ///
    /// The callback runs on the scheduler task, once per applied `Ready`
    /// settlement, before waiters are woken. Superseded and failed runs do
    /// not trigger it; keep it short.
    pub fn declare_with<T, D, F, Fut, R>(
        &self,
        name: impl Into<String>,
        deps: D,
        compute: F,
        on_result: R,
    ) -> CellHandle<T>
    where
        T: Send + Sync + 'static,
        D: Fn() -> Vec<CellRef> + Send + Sync + 'static,
        F: Fn(DepValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        R: Fn(&T) + Send + Sync + 'static,
    {
        let hook: ResultHook = Box::new(move |value: &ArcAny| {
            if let Ok(value) = Arc::clone(value).downcast::<T>() {
                on_result(value.as_ref());
            }
        });
        self.declare_inner(
            name.into(),
            Box::new(deps),
            Box::new(TypedCompute::<T, F>::new(compute)),
            Some(hook),
        )
    }

    fn declare_inner<T>(
        &self,
        name: String,
        deps: Box<dyn Fn() -> Vec<CellRef> + Send + Sync>,
        compute: Box<dyn ErasedCompute>,
        on_result: Option<ResultHook>,
    ) -> CellHandle<T>
    where
        T: Send + Sync + 'static,
    {
        let id = CellId::next();
        debug!(cell = %name, %id, "cell declared");
        let record = CellRecord::new(id, name, deps, compute, on_result);
        self.shared.cells.insert(id, Arc::new(record));
        CellHandle::new(id)
    }

    /// Non-blocking read of a cell's current state.
    ///
    /// Reading a never-demanded cell requests its first computation, but
    /// the returned snapshot reflects the state before that request; it is
    /// never `Ready` before the computation has settled.
    pub fn read<T>(&self, handle: &CellHandle<T>) -> CellSnapshot<T>
    where
        T: Send + Sync + 'static,
    {
        let record = self.record(handle.id);
        let snapshot = {
            let slot = record.slot.read();
            CellSnapshot {
                phase: slot.phase,
                value: slot.value.clone().and_then(|v| v.downcast::<T>().ok()),
                error: slot.error.clone(),
                generation: slot.generation,
            }
        };
        if snapshot.phase == Phase::NotStarted {
            let _ = self.tx.send(Command::Demand(handle.id));
        }
        snapshot
    }

    /// Mark a cell and all its transitive dependents stale.
    ///
    /// Never recomputes synchronously; recomputation is scheduled and
    /// multiple invalidations before it starts coalesce into one run.
    pub fn invalidate(&self, cell: impl Into<CellRef>) {
        let cell = cell.into();
        let _ = self.tx.send(Command::Invalidate(cell.id));
    }

    /// Compose several cells into one state.
    ///
    /// `Failed` if any input has failed (the first failure in declaration
    /// order is reported, and failure takes precedence over pending),
    /// otherwise `Pending` if any input has not settled, otherwise
    /// `Ready` with typed access to every result. Inputs that were never
    /// demanded are demanded.
    pub fn await_all(&self, cells: &[CellRef]) -> CompositeState {
        let mut pending = false;
        let mut failure: Option<(CellId, CellError)> = None;
        let mut values = DepValues::new();

        for cell in cells {
            let record = self.record(cell.id);
            let (phase, value, error) = {
                let slot = record.slot.read();
                (slot.phase, slot.value.clone(), slot.error.clone())
            };
            match phase {
                Phase::Failed => {
                    if failure.is_none() {
                        let error = error.expect("failed cell records an error");
                        failure = Some((cell.id, error));
                    }
                }
                Phase::Ready => {
                    if let Some(value) = value {
                        values.insert(cell.id, value);
                    }
                }
                Phase::NotStarted => {
                    let _ = self.tx.send(Command::Demand(cell.id));
                    pending = true;
                }
                Phase::Pending => pending = true,
            }
        }

        if let Some((source, error)) = failure {
            CompositeState::Failed { source, error }
        } else if pending {
            CompositeState::Pending
        } else {
            CompositeState::Ready(values)
        }
    }

    /// Wait until the cell reaches a terminal state and return the snapshot.
    ///
    /// Demands the cell if it was never started. If the cell is invalidated
    /// while this waits, waiting continues until the superseding run
    /// settles.
    pub async fn settled<T>(&self, handle: &CellHandle<T>) -> CellSnapshot<T>
    where
        T: Send + Sync + 'static,
    {
        let record = self.record(handle.id);
        loop {
            let notified = record.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let snapshot = self.read(handle);
            if snapshot.phase.is_terminal() {
                return snapshot;
            }
            notified.await;
        }
    }

    /// A render-oriented view of a cell, using the engine's configured
    /// stale-while-revalidate policy.
    pub fn view<T>(&self, handle: CellHandle<T>) -> CellView<T>
    where
        T: Send + Sync + 'static,
    {
        CellView::new(
            self.clone(),
            handle,
            self.shared.config.show_last_result_while_recomputing,
        )
    }

    /// Stop the scheduler. Cells keep their last state and can still be
    /// read, but no further recomputation happens.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    fn record(&self, id: CellId) -> Arc<CellRecord> {
        self.shared
            .cells
            .get(&id)
            .map(|r| Arc::clone(&r))
            .expect("cell handle does not belong to this engine")
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
