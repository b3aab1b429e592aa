//! Dependency graph and scheduling.
//!
//! The graph records which cells each cell declared as dependencies on its
//! last recomputation attempt; the scheduler is the actor that decides when
//! invalidated cells recompute and applies every state transition.

mod graph;
pub(crate) mod scheduler;

pub use graph::DependencyGraph;
