//! Cell identity and handles.
//!
//! A cell is addressed two ways: a `CellHandle<T>` is the typed token
//! returned by `Engine::declare`, used for reads and views; a `CellRef` is
//! its untyped form, used in dependency lists where cells of different value
//! types mix.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u64);

impl CellId {
    /// Generate a new unique cell ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Untyped reference to a cell, used in dependency lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub(crate) id: CellId,
}

impl CellRef {
    /// The identity of the referenced cell.
    pub fn id(&self) -> CellId {
        self.id
    }
}

/// Typed handle to a declared cell.
///
/// Handles are cheap `Copy` tokens; they carry no storage of their own and
/// are only meaningful to the engine that issued them.
pub struct CellHandle<T> {
    pub(crate) id: CellId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CellHandle<T> {
    pub(crate) fn new(id: CellId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// The identity of the cell this handle refers to.
    pub fn id(&self) -> CellId {
        self.id
    }

    /// The untyped form of this handle, for use in dependency lists.
    pub fn as_ref(&self) -> CellRef {
        CellRef { id: self.id }
    }
}

// Manual impls: `T` itself need not be Clone/Copy for the handle to be.
impl<T> Clone for CellHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CellHandle<T> {}

impl<T> fmt::Debug for CellHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellHandle").field("id", &self.id).finish()
    }
}

impl<T> From<CellHandle<T>> for CellRef {
    fn from(handle: CellHandle<T>) -> Self {
        handle.as_ref()
    }
}

impl<T> From<&CellHandle<T>> for CellRef {
    fn from(handle: &CellHandle<T>) -> Self {
        handle.as_ref()
    }
}
