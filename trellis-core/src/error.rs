//! Error taxonomy for the cell engine.
//!
//! Failures are values, not panics: a failed computation sets its cell's
//! state to `Failed` and flows forward through dependents as
//! `DependencyFailed`. Errors are returned inside snapshots and composite
//! reads, never thrown across the read boundary, and none of them is fatal
//! to the engine itself.

use std::sync::Arc;

use thiserror::Error;

use crate::cell::CellId;

/// Boxed error type accepted from user-supplied compute functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failure recorded against a cell.
///
/// `Clone` is cheap: underlying causes are reference-counted so the same
/// failure can be observed from many snapshots.
#[derive(Debug, Clone, Error)]
pub enum CellError {
    /// The user-supplied compute function returned an error.
    #[error("computation failed: {0}")]
    Computation(Arc<dyn std::error::Error + Send + Sync>),

    /// A declared dependency settled `Failed`, so this cell was failed
    /// without invoking its compute function. Carries the originating cell
    /// so the root cause is never masked.
    #[error("dependency {dependency} failed: {cause}")]
    DependencyFailed {
        dependency: CellId,
        cause: Arc<CellError>,
    },

    /// The cell participates in a dependency cycle. Detected before the
    /// computation starts; never silently retried.
    #[error("cyclic dependency: {}", format_cycle(.path))]
    CyclicDependency { path: Vec<CellId> },

    /// A dependency list named a cell this engine has never declared.
    #[error("unknown cell {0} in dependency list")]
    UnknownDependency(CellId),
}

impl CellError {
    pub(crate) fn computation(err: BoxError) -> Self {
        CellError::Computation(Arc::from(err))
    }

    /// Walk the `DependencyFailed` chain down to the originating failure.
    pub fn root_cause(&self) -> &CellError {
        let mut current = self;
        while let CellError::DependencyFailed { cause, .. } = current {
            current = cause;
        }
        current
    }

    /// True if this failure was propagated from a dependency rather than
    /// produced by the cell's own computation.
    pub fn is_propagated(&self) -> bool {
        matches!(self, CellError::DependencyFailed { .. })
    }
}

fn format_cycle(path: &[CellId]) -> String {
    let names: Vec<String> = path.iter().map(|id| id.to_string()).collect();
    names.join(" -> ")
}

/// Failure looking up a dependency value inside a compute function.
#[derive(Debug, Clone, Error)]
pub enum DepAccessError {
    /// The requested cell was not among the declared dependencies of the
    /// running computation.
    #[error("{0} is not a declared dependency of this computation")]
    NotADependency(CellId),

    /// The stored value could not be downcast to the requested type.
    #[error("dependency {0} holds a value of a different type")]
    TypeMismatch(CellId),
}
