//! Recomputation scheduler.
//!
//! The scheduler is a single actor task owning the dependency graph and the
//! per-cell queue state. Every mutation (demand, invalidation, settlement)
//! arrives as a command on one queue, so no two writes to a cell's state
//! ever race and the graph needs no internal locking.
//!
//! Per-cell queue states: `Idle -> Queued -> Running -> Idle`, with
//! `Running -> Queued` again when an invalidation arrives mid-computation.
//! A recomputation starts only once every currently-declared dependency is
//! terminal; a failed dependency short-circuits the dependent without
//! invoking its compute function.
//!
//! Cancellation is advisory: invalidating a running cell does not abort the
//! in-flight future, it only arranges for the eventual result to be
//! discarded and a fresh run scheduled.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use indexmap::IndexSet;
use smallvec::SmallVec;
use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tracing::{debug, trace, warn};

use crate::cell::record::CellRecord;
use crate::cell::values::{ArcAny, DepValues};
use crate::cell::{CellId, Phase};
use crate::engine::Shared;
use crate::error::CellError;
use crate::graph::DependencyGraph;

type DepList = SmallVec<[CellId; 4]>;

/// Commands accepted by the scheduler actor.
pub(crate) enum Command {
    /// A consumer read a cell that has never been computed.
    Demand(CellId),
    /// Mark a cell and its transitive dependents stale.
    Invalidate(CellId),
    /// An in-flight computation settled.
    Settled {
        id: CellId,
        generation: u64,
        outcome: Result<ArcAny, CellError>,
    },
    /// Stop serving commands.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Idle,
    Queued,
    Running { rerun: bool },
}

pub(crate) struct Scheduler {
    shared: Arc<Shared>,
    graph: DependencyGraph,
    queue: HashMap<CellId, QueueState>,
    /// dep -> cells queued behind it, retried when the dep settles.
    waiters: HashMap<CellId, IndexSet<CellId>>,
    /// Cells ready to run but held back by the concurrency bound.
    backlog: VecDeque<CellId>,
    running: usize,
    rx: UnboundedReceiver<Command>,
    /// Weak so the channel closes once every engine handle and in-flight
    /// computation is gone; spawned runs get an upgraded clone.
    tx: WeakUnboundedSender<Command>,
}

impl Scheduler {
    pub(crate) fn new(
        shared: Arc<Shared>,
        rx: UnboundedReceiver<Command>,
        tx: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            shared,
            graph: DependencyGraph::new(),
            queue: HashMap::new(),
            waiters: HashMap::new(),
            backlog: VecDeque::new(),
            running: 0,
            rx,
            tx,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Demand(id) => self.on_demand(id),
                Command::Invalidate(id) => self.on_invalidate(id),
                Command::Settled {
                    id,
                    generation,
                    outcome,
                } => self.on_settled(id, generation, outcome),
                Command::Shutdown => break,
            }
        }
        trace!("scheduler stopped");
    }

    fn state(&self, id: CellId) -> QueueState {
        self.queue.get(&id).copied().unwrap_or(QueueState::Idle)
    }

    fn record(&self, id: CellId) -> Option<Arc<CellRecord>> {
        self.shared.cells.get(&id).map(|r| Arc::clone(&r))
    }

    fn on_demand(&mut self, id: CellId) {
        let Some(record) = self.record(id) else {
            warn!(%id, "demand for unknown cell ignored");
            return;
        };
        {
            let mut slot = record.slot.write();
            if slot.phase != Phase::NotStarted {
                return;
            }
            slot.phase = Phase::Pending;
        }
        record.notify.notify_waiters();
        self.queue.insert(id, QueueState::Queued);
        trace!(cell = %record.name, %id, "demanded");
        self.drain(vec![id]);
    }

    fn on_invalidate(&mut self, id: CellId) {
        let targets = self.graph.propagate_invalidation(id);
        let mut to_start = Vec::new();

        for &target in &targets {
            let Some(record) = self.record(target) else {
                continue;
            };
            match self.state(target) {
                QueueState::Idle => {
                    {
                        let mut slot = record.slot.write();
                        if slot.phase == Phase::NotStarted {
                            // Never demanded; nothing to recompute yet.
                            continue;
                        }
                        slot.phase = Phase::Pending;
                    }
                    record.notify.notify_waiters();
                    self.queue.insert(target, QueueState::Queued);
                    to_start.push(target);
                }
                QueueState::Queued => {
                    // Already scheduled; coalesce.
                }
                QueueState::Running { .. } => {
                    // Supersede the in-flight run: its result will be
                    // discarded when it settles and a fresh run scheduled.
                    self.queue.insert(target, QueueState::Running { rerun: true });
                    trace!(cell = %record.name, "in-flight run superseded");
                }
            }
        }

        debug!(%id, marked = targets.len(), "invalidation propagated");
        self.drain(to_start);
    }

    fn on_settled(&mut self, id: CellId, generation: u64, outcome: Result<ArcAny, CellError>) {
        self.running = self.running.saturating_sub(1);
        self.graph.end_evaluation(id);

        if let Some(record) = self.record(id) {
            let current_generation = record.slot.read().generation;
            match self.state(id) {
                QueueState::Running { rerun: false } if generation == current_generation => {
                    let mut work = Vec::new();
                    match outcome {
                        Ok(value) => {
                            {
                                let mut slot = record.slot.write();
                                slot.phase = Phase::Ready;
                                slot.value = Some(Arc::clone(&value));
                                slot.error = None;
                            }
                            if let Some(on_result) = &record.on_result {
                                on_result(&value);
                            }
                            record.notify.notify_waiters();
                            self.queue.insert(id, QueueState::Idle);
                            debug!(cell = %record.name, generation, "settled ready");
                            self.wake_waiters(id, &mut work);
                        }
                        Err(err) => self.apply_failure(id, &record, err, &mut work),
                    }
                    self.drain(work);
                }
                QueueState::Running { rerun: true } => {
                    debug!(cell = %record.name, generation, "stale result discarded");
                    self.queue.insert(id, QueueState::Queued);
                    self.drain(vec![id]);
                }
                _ => {
                    debug!(cell = %record.name, generation, "stale result discarded");
                }
            }
        }

        self.release_backlog();
    }

    /// Process cells whose start conditions may have changed. Each attempt
    /// may enqueue further cells (transitive demand, woken waiters).
    fn drain(&mut self, mut work: Vec<CellId>) {
        while let Some(id) = work.pop() {
            self.try_start(id, &mut work);
        }
    }

    fn try_start(&mut self, id: CellId, work: &mut Vec<CellId>) {
        if self.state(id) != QueueState::Queued {
            return;
        }
        let Some(record) = self.record(id) else {
            self.queue.remove(&id);
            return;
        };

        // Dependencies are re-declared on every attempt; the edge set is
        // replaced, never merged.
        let deps: DepList = (record.deps)().iter().map(|r| r.id()).collect();
        self.graph.replace_edges(id, &deps);

        if let Some(path) = self.graph.find_cycle(id) {
            self.fail_cycle(path, work);
            return;
        }

        let mut blocked = false;
        for &dep in &deps {
            let Some(dep_record) = self.record(dep) else {
                self.apply_failure(id, &record, CellError::UnknownDependency(dep), work);
                return;
            };
            let dep_phase = dep_record.slot.read().phase;
            match dep_phase {
                Phase::Failed => {
                    let cause = dep_record.slot.read().error.clone().unwrap_or_else(|| {
                        CellError::computation("dependency failed without recorded error".into())
                    });
                    let err = CellError::DependencyFailed {
                        dependency: dep,
                        cause: Arc::new(cause),
                    };
                    self.apply_failure(id, &record, err, work);
                    return;
                }
                Phase::Ready => {}
                Phase::NotStarted => {
                    {
                        let mut slot = dep_record.slot.write();
                        slot.phase = Phase::Pending;
                    }
                    dep_record.notify.notify_waiters();
                    self.queue.insert(dep, QueueState::Queued);
                    self.waiters.entry(dep).or_default().insert(id);
                    work.push(dep);
                    blocked = true;
                }
                Phase::Pending => {
                    self.waiters.entry(dep).or_default().insert(id);
                    blocked = true;
                }
            }
        }
        if blocked {
            trace!(cell = %record.name, "waiting for dependencies");
            return;
        }

        if let Some(max) = self.shared.config.max_concurrent_recomputations {
            if self.running >= max {
                self.backlog.push_back(id);
                trace!(cell = %record.name, "held back by concurrency bound");
                return;
            }
        }

        self.launch(id, record, &deps, work);
    }

    fn launch(&mut self, id: CellId, record: Arc<CellRecord>, deps: &[CellId], work: &mut Vec<CellId>) {
        if let Err(err) = self.graph.begin_evaluation(id) {
            self.apply_failure(id, &record, err, work);
            return;
        }

        let mut values = DepValues::new();
        for &dep in deps {
            if let Some(dep_record) = self.record(dep) {
                if let Some(value) = dep_record.slot.read().value.clone() {
                    values.insert(dep, value);
                }
            }
        }

        let generation = {
            let mut slot = record.slot.write();
            slot.generation += 1;
            slot.phase = Phase::Pending;
            slot.generation
        };
        record.notify.notify_waiters();

        let Some(tx) = self.tx.upgrade() else {
            // Engine torn down; start no new work.
            self.graph.end_evaluation(id);
            self.queue.insert(id, QueueState::Idle);
            return;
        };

        self.queue.insert(id, QueueState::Running { rerun: false });
        self.running += 1;
        debug!(cell = %record.name, %id, generation, "recomputation started");

        let fut = record.compute.compute(values);
        tokio::spawn(async move {
            let outcome = fut.await;
            let _ = tx.send(Command::Settled {
                id,
                generation,
                outcome,
            });
        });
    }

    fn apply_failure(
        &mut self,
        id: CellId,
        record: &Arc<CellRecord>,
        err: CellError,
        work: &mut Vec<CellId>,
    ) {
        {
            let mut slot = record.slot.write();
            slot.phase = Phase::Failed;
            slot.error = Some(err.clone());
        }
        record.notify.notify_waiters();
        self.queue.insert(id, QueueState::Idle);
        debug!(cell = %record.name, id = %record.id, error = %err, "cell failed");
        self.wake_waiters(id, work);
    }

    fn fail_cycle(&mut self, path: Vec<CellId>, work: &mut Vec<CellId>) {
        let mut members: Vec<CellId> = Vec::new();
        for &id in &path {
            if !members.contains(&id) {
                members.push(id);
            }
        }
        warn!(?path, "dependency cycle detected");
        for member in members {
            if let Some(record) = self.record(member) {
                let err = CellError::CyclicDependency { path: path.clone() };
                self.apply_failure(member, &record, err, work);
            }
        }
    }

    fn wake_waiters(&mut self, id: CellId, work: &mut Vec<CellId>) {
        if let Some(waiters) = self.waiters.remove(&id) {
            for waiter in waiters {
                work.push(waiter);
            }
        }
    }

    fn release_backlog(&mut self) {
        // A released cell may fail fast (cycle, failed dependency) without
        // launching anything; keep releasing until capacity is consumed or
        // the backlog is empty, so such cells never starve the rest.
        loop {
            let has_capacity = self
                .shared
                .config
                .max_concurrent_recomputations
                .map_or(true, |max| self.running < max);
            if !has_capacity {
                return;
            }
            let Some(next) = self.backlog.pop_front() else {
                return;
            };
            self.drain(vec![next]);
        }
    }
}
