//! Render-oriented views over cells.
//!
//! A [`CellView`] maps a cell's state transitions onto the three questions a
//! consumer asks before rendering: is it pending, what is the result, what
//! went wrong. The stale-while-revalidate policy decides whether a cell that
//! is refreshing keeps exposing its previous result, so consumers can avoid
//! flicker while new data is in flight.

use std::sync::Arc;

use crate::cell::handle::{CellHandle, CellId};
use crate::cell::state::Phase;
use crate::cell::values::DepValues;
use crate::engine::Engine;
use crate::error::CellError;

/// Read-only consumer view of a single cell.
pub struct CellView<T> {
    engine: Engine,
    handle: CellHandle<T>,
    show_last: bool,
}

impl<T> CellView<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(engine: Engine, handle: CellHandle<T>, show_last: bool) -> Self {
        Self {
            engine,
            handle,
            show_last,
        }
    }

    /// Override the engine-wide stale-while-revalidate policy for this view.
    pub fn show_last_result_while_recomputing(mut self, enabled: bool) -> Self {
        self.show_last = enabled;
        self
    }

    pub fn handle(&self) -> CellHandle<T> {
        self.handle
    }

    /// True while a computation is requested or in flight (including before
    /// the first one starts).
    pub fn is_pending(&self) -> bool {
        self.engine.read(&self.handle).is_pending()
    }

    /// The last settled result.
    ///
    /// `None` if the cell never settled `Ready`, or if it is currently
    /// recomputing and the stale-while-revalidate policy is off.
    pub fn result(&self) -> Option<Arc<T>> {
        let snapshot = self.engine.read(&self.handle);
        match snapshot.phase {
            Phase::Ready | Phase::Failed => snapshot.value,
            Phase::NotStarted | Phase::Pending => {
                if self.show_last {
                    snapshot.value
                } else {
                    None
                }
            }
        }
    }

    /// The last failure, if the most recent settlement was an error.
    pub fn error(&self) -> Option<CellError> {
        self.engine.read(&self.handle).error
    }
}

/// Combined state of a group of cells, as produced by
/// [`Engine::await_all`](crate::engine::Engine::await_all).
#[derive(Debug, Clone)]
pub enum CompositeState {
    /// At least one input has not settled (and none has failed).
    Pending,

    /// At least one input failed; `source` is the first failed cell in
    /// declaration order.
    Failed { source: CellId, error: CellError },

    /// Every input is ready; results are accessed by handle.
    Ready(DepValues),
}

impl CompositeState {
    pub fn is_pending(&self) -> bool {
        matches!(self, CompositeState::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CompositeState::Failed { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CompositeState::Ready(_))
    }

    /// The resolved values, if every input is ready.
    pub fn values(&self) -> Option<&DepValues> {
        match self {
            CompositeState::Ready(values) => Some(values),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn failed_cell_keeps_reporting_last_good_result() {
        let engine = Engine::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&runs);
        let cell = engine.declare("refresh", || vec![], move |_| {
            let runs = Arc::clone(&seen);
            async move {
                if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok("x".to_string())
                } else {
                    Err::<String, crate::error::BoxError>("refresh failed".into())
                }
            }
        });

        let first = engine.settled(&cell).await;
        assert_eq!(first.value.as_deref(), Some(&"x".to_string()));

        engine.invalidate(cell);
        while !engine.read(&cell).is_pending() {
            tokio::task::yield_now().await;
        }
        let second = engine.settled(&cell).await;
        assert!(second.is_failed());

        // The last good value stays available next to the error, so a
        // consumer can render stale data with an error badge.
        let view = engine.view(cell);
        assert!(!view.is_pending());
        assert_eq!(view.result().as_deref(), Some(&"x".to_string()));
        assert!(view.error().is_some());
    }

    #[tokio::test]
    async fn view_reports_result_and_error() {
        let engine = Engine::new();
        let good = engine.declare("good", || vec![], |_| async { Ok("data".to_string()) });
        let bad = engine.declare("bad", || vec![], |_| async {
            Err::<String, crate::error::BoxError>("timeout".into())
        });

        engine.settled(&good).await;
        engine.settled(&bad).await;

        let good_view = engine.view(good);
        assert!(!good_view.is_pending());
        assert_eq!(good_view.result().as_deref(), Some(&"data".to_string()));
        assert!(good_view.error().is_none());

        let bad_view = engine.view(bad);
        assert!(bad_view.result().is_none());
        assert!(bad_view.error().is_some());
    }

    #[tokio::test]
    async fn view_on_unstarted_cell_is_pending_with_no_result() {
        let engine = Engine::new();
        let cell = engine.declare("slow", || vec![], |_| async { Ok(1u8) });

        let view = engine.view(cell).show_last_result_while_recomputing(true);
        assert!(view.is_pending());
        assert!(view.result().is_none());
        assert!(view.error().is_none());
    }

    #[tokio::test]
    async fn composite_accessors() {
        let engine = Engine::new();
        let a = engine.declare("a", || vec![], |_| async { Ok(1u32) });
        let b = engine.declare("b", || vec![], |_| async { Ok(2u32) });
        engine.settled(&a).await;
        engine.settled(&b).await;

        let composite = engine.await_all(&[a.into(), b.into()]);
        assert!(composite.is_ready());
        let values = composite.values().unwrap();
        assert_eq!(*values.get(a).unwrap(), 1);
        assert_eq!(*values.get(b).unwrap(), 2);
    }
}
