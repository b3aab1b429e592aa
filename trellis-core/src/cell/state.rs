//! Cell state snapshots.
//!
//! A snapshot is what `Engine::read` returns: the cell's current phase plus
//! the last good value and last error. The value survives re-pending so
//! consumers can keep showing it while a refresh is in flight.

use std::sync::Arc;

use crate::error::CellError;

/// Lifecycle phase of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Declared but never demanded; no computation has been requested.
    NotStarted,

    /// A computation has been requested or is in flight.
    Pending,

    /// The last computation settled successfully.
    Ready,

    /// The last computation settled with an error (or a dependency failed).
    Failed,
}

impl Phase {
    /// True for `Ready` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Failed)
    }
}

/// Point-in-time view of a cell's state.
#[derive(Debug, Clone)]
pub struct CellSnapshot<T> {
    /// Current phase.
    pub phase: Phase,

    /// Last successfully computed value, retained across re-pending.
    /// `None` only if the cell has never settled `Ready`.
    pub value: Option<Arc<T>>,

    /// Last failure, if the most recent settlement was an error.
    pub error: Option<CellError>,

    /// Number of recomputations started so far.
    pub generation: u64,
}

impl<T> CellSnapshot<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self.phase, Phase::NotStarted | Phase::Pending)
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed
    }

    /// The value if the cell is currently `Ready`, regardless of retention.
    pub fn ready_value(&self) -> Option<&Arc<T>> {
        if self.is_ready() {
            self.value.as_ref()
        } else {
            None
        }
    }
}
