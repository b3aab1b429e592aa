//! Resolved dependency values handed to compute functions.

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::cell::handle::{CellHandle, CellId};
use crate::error::DepAccessError;

pub(crate) type ArcAny = Arc<dyn Any + Send + Sync>;

/// The settled values of a computation's dependencies, in declaration order.
///
/// Passed to the compute function once every declared dependency is `Ready`.
/// Values are shared (`Arc`), so taking one out never copies the underlying
/// data.
#[derive(Default, Clone)]
pub struct DepValues {
    values: IndexMap<CellId, ArcAny>,
}

impl std::fmt::Debug for DepValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

impl DepValues {
    pub(crate) fn new() -> Self {
        Self {
            values: IndexMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, id: CellId, value: ArcAny) {
        self.values.insert(id, value);
    }

    /// Look up the resolved value of a dependency by its handle.
    pub fn get<T>(&self, handle: CellHandle<T>) -> Result<Arc<T>, DepAccessError>
    where
        T: Send + Sync + 'static,
    {
        let value = self
            .values
            .get(&handle.id)
            .ok_or(DepAccessError::NotADependency(handle.id))?;
        value
            .clone()
            .downcast::<T>()
            .map_err(|_| DepAccessError::TypeMismatch(handle.id))
    }

    /// Number of resolved dependencies.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
