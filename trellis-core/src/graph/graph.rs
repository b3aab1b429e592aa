//! Dependency graph.
//!
//! Tracks, for every cell, the set of cells it declared as dependencies on
//! its last recomputation attempt, together with the reverse edges used to
//! propagate invalidation. The edge set for a cell is fully replaced on
//! every attempt: conditional logic inside a dependency function may declare
//! different cells on different runs.
//!
//! The graph is owned by the scheduler actor, so no internal locking is
//! needed; all mutation is serialized through the actor's command queue.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;

use crate::cell::CellId;
use crate::error::CellError;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward edges: cell -> cells it reads.
    deps: HashMap<CellId, IndexSet<CellId>>,
    /// Reverse edges: cell -> cells that read it.
    dependents: HashMap<CellId, IndexSet<CellId>>,
    /// Cells currently between `begin_evaluation` and `end_evaluation`.
    in_progress: HashSet<CellId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a cell as evaluating. Re-entrant evaluation of the same cell is
    /// a cycle and fails immediately instead of recursing.
    pub fn begin_evaluation(&mut self, id: CellId) -> Result<(), CellError> {
        if !self.in_progress.insert(id) {
            return Err(CellError::CyclicDependency { path: vec![id, id] });
        }
        Ok(())
    }

    /// Mark a cell's evaluation as finished.
    pub fn end_evaluation(&mut self, id: CellId) {
        self.in_progress.remove(&id);
    }

    /// Replace a cell's declared dependency set, subscribing it to new
    /// dependencies and unsubscribing it from ones no longer declared.
    pub fn replace_edges(&mut self, id: CellId, new_deps: &[CellId]) {
        let next: IndexSet<CellId> = new_deps.iter().copied().collect();
        let previous = self.deps.insert(id, next.clone()).unwrap_or_default();

        for removed in previous.difference(&next) {
            if let Some(back) = self.dependents.get_mut(removed) {
                back.shift_remove(&id);
            }
        }
        for added in next.difference(&previous) {
            self.dependents.entry(*added).or_default().insert(id);
        }
    }

    /// The cells `id` declared as dependencies on its last attempt.
    pub fn dependencies(&self, id: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.deps.get(&id).into_iter().flatten().copied()
    }

    /// The cells whose last attempt declared `id` as a dependency.
    pub fn dependents(&self, id: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.dependents.get(&id).into_iter().flatten().copied()
    }

    /// Collect the cell and every transitive dependent, breadth-first over
    /// reverse edges, each cell at most once. The source comes first, so
    /// processing the result in order recomputes upstream before downstream.
    pub fn propagate_invalidation(&self, id: CellId) -> Vec<CellId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();

        queue.push_back(id);
        seen.insert(id);

        while let Some(current) = queue.pop_front() {
            order.push(current);
            for dependent in self.dependents(current) {
                if seen.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }

        order
    }

    /// Search for a dependency cycle containing `start`, following forward
    /// edges. Returns the cycle path (`start .. start`) if one exists.
    pub fn find_cycle(&self, start: CellId) -> Option<Vec<CellId>> {
        let mut path = vec![start];
        let mut visited = HashSet::new();
        visited.insert(start);
        self.search_back_to(start, start, &mut path, &mut visited)
    }

    fn search_back_to(
        &self,
        current: CellId,
        target: CellId,
        path: &mut Vec<CellId>,
        visited: &mut HashSet<CellId>,
    ) -> Option<Vec<CellId>> {
        for next in self.dependencies(current) {
            if next == target {
                let mut cycle = path.clone();
                cycle.push(target);
                return Some(cycle);
            }
            if visited.insert(next) {
                path.push(next);
                if let Some(cycle) = self.search_back_to(next, target, path, visited) {
                    return Some(cycle);
                }
                path.pop();
            }
        }
        None
    }

}
