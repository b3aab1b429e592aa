//! Internal per-cell storage.
//!
//! A `CellRecord` is the engine-side representation of a declared cell: the
//! user's dependency and compute functions (type-erased so the scheduler
//! stays monomorphic), plus the state slot that reads take snapshots of.
//!
//! Only the scheduler actor writes to a slot, so every state transition for
//! a given cell is serialized; readers take the lock briefly to copy out a
//! snapshot.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::cell::handle::{CellId, CellRef};
use crate::cell::state::Phase;
use crate::cell::values::{ArcAny, DepValues};
use crate::error::{BoxError, CellError};

/// Type-erased compute function.
///
/// Each declared cell wraps its typed compute closure in one of these so the
/// scheduler can drive any cell through a single vtable call, independent of
/// the cell's value type.
pub(crate) trait ErasedCompute: Send + Sync {
    fn compute(&self, deps: DepValues) -> BoxFuture<'static, Result<ArcAny, CellError>>;
}

/// Typed adapter implementing [`ErasedCompute`] for a concrete value type.
pub(crate) struct TypedCompute<T, F> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> TypedCompute<T, F> {
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<T, F, Fut> ErasedCompute for TypedCompute<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(DepValues) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
{
    fn compute(&self, deps: DepValues) -> BoxFuture<'static, Result<ArcAny, CellError>> {
        let fut = (self.f)(deps);
        Box::pin(async move {
            match fut.await {
                Ok(value) => Ok(Arc::new(value) as ArcAny),
                Err(err) => Err(CellError::computation(err)),
            }
        })
    }
}

/// Side-effect callback invoked with each freshly settled value.
pub(crate) type ResultHook = Box<dyn Fn(&ArcAny) + Send + Sync>;

/// Mutable state of a cell. Written only by the scheduler actor.
pub(crate) struct CellSlot {
    pub(crate) phase: Phase,
    /// Last successfully computed value, retained across re-pending and
    /// across later failures.
    pub(crate) value: Option<ArcAny>,
    /// Last failure, cleared when a computation settles successfully.
    pub(crate) error: Option<CellError>,
    /// Incremented once per recomputation start.
    pub(crate) generation: u64,
}

impl CellSlot {
    fn new() -> Self {
        Self {
            phase: Phase::NotStarted,
            value: None,
            error: None,
            generation: 0,
        }
    }
}

/// Engine-side record of a declared cell.
pub(crate) struct CellRecord {
    pub(crate) id: CellId,
    pub(crate) name: String,
    /// Re-evaluated on every recomputation attempt; the declared dependency
    /// set may differ between runs.
    pub(crate) deps: Box<dyn Fn() -> Vec<CellRef> + Send + Sync>,
    pub(crate) compute: Box<dyn ErasedCompute>,
    /// Invoked by the scheduler each time a run settles `Ready`, before
    /// waiters are woken. Superseded and failed runs never trigger it.
    pub(crate) on_result: Option<ResultHook>,
    pub(crate) slot: RwLock<CellSlot>,
    /// Signaled on every applied state transition; `Engine::settled` waits
    /// on this.
    pub(crate) notify: Notify,
}

impl CellRecord {
    pub(crate) fn new(
        id: CellId,
        name: String,
        deps: Box<dyn Fn() -> Vec<CellRef> + Send + Sync>,
        compute: Box<dyn ErasedCompute>,
        on_result: Option<ResultHook>,
    ) -> Self {
        Self {
            id,
            name,
            deps,
            compute,
            on_result,
            slot: RwLock::new(CellSlot::new()),
            notify: Notify::new(),
        }
    }
}
