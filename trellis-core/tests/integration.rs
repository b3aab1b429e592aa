//! Integration tests for the cell engine.
//!
//! These exercise the full path: declaration, demand-driven starts,
//! invalidation propagation, stale-result discard, failure propagation,
//! cycle detection, composite reads and stale-while-revalidate views.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, Notify};

use trellis_core::{
    BoxError, CellError, CellRef, CompositeState, DepValues, Engine, EngineConfig, Phase,
};

/// A freshly declared cell is never `Ready` before its computation settles.
#[tokio::test]
async fn read_is_never_ready_before_settlement() {
    let engine = Engine::new();
    let cell = engine.declare("fast", || vec![], |_| async { Ok(5u32) });

    let snapshot = engine.read(&cell);
    assert!(matches!(snapshot.phase, Phase::NotStarted | Phase::Pending));
    assert!(snapshot.value.is_none());

    let settled = engine.settled(&cell).await;
    assert!(settled.is_ready());
    assert_eq!(*settled.value.unwrap(), 5);
}

/// Two invalidations before the recomputation starts schedule exactly one
/// recomputation. A concurrency bound of one plus a gated blocker cell
/// keeps the target from starting until both invalidations have landed.
#[tokio::test]
async fn invalidations_before_restart_coalesce() {
    let engine = Engine::with_config(EngineConfig::new().max_concurrent_recomputations(1));

    let runs = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&runs);
    let target = engine.declare("target", || vec![], move |_| {
        let seen = Arc::clone(&seen);
        async move { Ok(seen.fetch_add(1, Ordering::SeqCst)) }
    });
    let first = engine.settled(&target).await;
    assert_eq!(*first.value.unwrap(), 0);

    // Occupy the only execution slot.
    let gate = Arc::new(Notify::new());
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let blocker_gate = Arc::clone(&gate);
    let blocker = engine.declare("blocker", || vec![], move |_| {
        let gate = Arc::clone(&blocker_gate);
        let entered = entered_tx.clone();
        async move {
            let _ = entered.send(());
            gate.notified().await;
            Ok(())
        }
    });
    let _ = engine.read(&blocker);
    entered_rx.recv().await.expect("blocker should start");

    engine.invalidate(target);
    engine.invalidate(target);
    while !engine.read(&target).is_pending() {
        tokio::task::yield_now().await;
    }

    gate.notify_one();
    let second = engine.settled(&target).await;
    assert_eq!(*second.value.unwrap(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// A cell released from the backlog that fails fast (its dependencies now
/// name a failed cell, so nothing is launched) must not strand the entries
/// queued behind it.
#[tokio::test]
async fn backlog_drains_past_fail_fast_cells() {
    let engine = Engine::with_config(EngineConfig::new().max_concurrent_recomputations(1));

    let good = engine.declare("good", || vec![], |_| async { Ok(1u32) });
    let failing = engine.declare("failing", || vec![], |_| async {
        Err::<u32, BoxError>("backend down".into())
    });

    let use_failing = Arc::new(AtomicBool::new(false));
    let picks = Arc::clone(&use_failing);
    let flipper = engine.declare(
        "flipper",
        move || {
            if picks.load(Ordering::SeqCst) {
                vec![failing.into()]
            } else {
                vec![good.into()]
            }
        },
        |_| async { Ok(0u32) },
    );

    let ticks = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&ticks);
    let independent = engine.declare("independent", || vec![], move |_| {
        let seen = Arc::clone(&seen);
        async move { Ok(seen.fetch_add(1, Ordering::SeqCst)) }
    });

    assert!(engine.settled(&good).await.is_ready());
    assert!(engine.settled(&failing).await.is_failed());
    assert!(engine.settled(&flipper).await.is_ready());
    assert_eq!(*engine.settled(&independent).await.value.unwrap(), 0);

    // Occupy the only execution slot.
    let gate = Arc::new(Notify::new());
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let blocker_gate = Arc::clone(&gate);
    let blocker = engine.declare("blocker", || vec![], move |_| {
        let gate = Arc::clone(&blocker_gate);
        let entered = entered_tx.clone();
        async move {
            let _ = entered.send(());
            gate.notified().await;
            Ok(())
        }
    });
    let _ = engine.read(&blocker);
    entered_rx.recv().await.expect("blocker should start");

    // Backlog the flipper while it still depends on the good cell, then
    // flip its dependency list to the failed cell before it is released.
    engine.invalidate(flipper);
    while !engine.read(&flipper).is_pending() {
        tokio::task::yield_now().await;
    }
    use_failing.store(true, Ordering::SeqCst);

    engine.invalidate(independent);
    while !engine.read(&independent).is_pending() {
        tokio::task::yield_now().await;
    }

    gate.notify_one();

    let flipped = engine.settled(&flipper).await;
    assert!(flipped.is_failed());
    assert!(matches!(
        flipped.error.unwrap(),
        CellError::DependencyFailed { .. }
    ));

    // The cell queued behind the fail-fast release still recomputes.
    let refreshed = engine.settled(&independent).await;
    assert_eq!(*refreshed.value.unwrap(), 1);
}

/// A result from a superseded run never becomes the cell's value; the next
/// generation's result does.
#[tokio::test]
async fn superseded_result_is_discarded() {
    let engine = Engine::new();
    let gate = Arc::new(Notify::new());
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let runs = Arc::new(AtomicUsize::new(0));

    let compute_gate = Arc::clone(&gate);
    let compute_runs = Arc::clone(&runs);
    let cell = engine.declare("versioned", || vec![], move |_| {
        let gate = Arc::clone(&compute_gate);
        let runs = Arc::clone(&compute_runs);
        let entered = entered_tx.clone();
        async move {
            let run = runs.fetch_add(1, Ordering::SeqCst);
            let _ = entered.send(());
            if run == 0 {
                // The first run stalls until released, like a slow fetch.
                gate.notified().await;
                Ok("old")
            } else {
                Ok("new")
            }
        }
    });

    let _ = engine.read(&cell);
    entered_rx.recv().await.expect("first run should start");

    // Queued before the first run can settle, so its result is stale.
    engine.invalidate(cell);
    gate.notify_one();

    entered_rx.recv().await.expect("second run should start");
    let settled = engine.settled(&cell).await;
    assert_eq!(*settled.value.unwrap(), "new");
    assert_eq!(settled.generation, 2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// A dependent of a failed cell fails with `DependencyFailed` and its own
/// compute function is never invoked.
#[tokio::test]
async fn failed_dependency_short_circuits_dependent() {
    let engine = Engine::new();
    let upstream = engine.declare("upstream", || vec![], |_| async {
        Err::<u32, BoxError>("upstream fetch failed".into())
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let dependent_calls = Arc::clone(&calls);
    let dependent = engine.declare("dependent", move || vec![upstream.into()], move |_| {
        let calls = Arc::clone(&dependent_calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(0u32)
        }
    });

    let settled = engine.settled(&dependent).await;
    assert!(settled.is_failed());

    let error = settled.error.unwrap();
    match &error {
        CellError::DependencyFailed { dependency, .. } => assert_eq!(*dependency, upstream.id()),
        other => panic!("expected DependencyFailed, got {other}"),
    }
    assert!(matches!(error.root_cause(), CellError::Computation(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Mutually dependent cells fail fast with `CyclicDependency` instead of
/// deadlocking.
#[tokio::test]
async fn mutual_dependency_fails_fast() {
    let engine = Engine::new();

    let late: Arc<OnceLock<CellRef>> = Arc::new(OnceLock::new());
    let late_for_a = Arc::clone(&late);
    let a = engine.declare(
        "a",
        move || vec![*late_for_a.get().expect("b is declared before a is read")],
        |_| async { Ok(0u32) },
    );
    let b = engine.declare("b", move || vec![a.into()], |_| async { Ok(0u32) });
    late.set(b.into()).unwrap();

    let settled_a = engine.settled(&a).await;
    assert!(settled_a.is_failed());
    assert!(matches!(
        settled_a.error.unwrap(),
        CellError::CyclicDependency { .. }
    ));

    let settled_b = engine.settled(&b).await;
    assert!(settled_b.is_failed());
}

/// Composite reads: pending while any input is unsettled; the first failure
/// in declaration order wins; ready yields every value.
#[tokio::test]
async fn composite_reads_follow_declaration_order() {
    let engine = Engine::new();

    let ready = engine.declare("ready", || vec![], |_| async { Ok(1u32) });
    let gate = Arc::new(Notify::new());
    let blocked_gate = Arc::clone(&gate);
    let blocked = engine.declare("blocked", || vec![], move |_| {
        let gate = Arc::clone(&blocked_gate);
        async move {
            gate.notified().await;
            Ok(2u32)
        }
    });

    engine.settled(&ready).await;
    let composite = engine.await_all(&[ready.into(), blocked.into()]);
    assert!(composite.is_pending());

    gate.notify_one();
    engine.settled(&blocked).await;

    let failed = engine.declare("failed", || vec![], |_| async {
        Err::<u32, BoxError>("bad gateway".into())
    });
    engine.settled(&failed).await;

    let composite = engine.await_all(&[failed.into(), ready.into()]);
    match composite {
        CompositeState::Failed { source, .. } => assert_eq!(source, failed.id()),
        other => panic!("expected failure, got {other:?}"),
    }

    // One failed cell does not stop the engine from serving the others.
    let composite = engine.await_all(&[ready.into(), blocked.into()]);
    assert!(composite.is_ready());
    let values = composite.values().unwrap();
    assert_eq!(*values.get(ready).unwrap(), 1);
    assert_eq!(*values.get(blocked).unwrap(), 2);
}

/// With the policy on, an invalidated cell keeps reporting its previous
/// result while the refresh is in flight, then switches to the new one.
#[tokio::test]
async fn stale_while_revalidate_keeps_last_result() {
    let engine =
        Engine::with_config(EngineConfig::new().show_last_result_while_recomputing(true));

    let gate = Arc::new(Notify::new());
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let runs = Arc::new(AtomicUsize::new(0));

    let compute_gate = Arc::clone(&gate);
    let compute_runs = Arc::clone(&runs);
    let cell = engine.declare("greeting", || vec![], move |_| {
        let gate = Arc::clone(&compute_gate);
        let runs = Arc::clone(&compute_runs);
        let entered = entered_tx.clone();
        async move {
            let run = runs.fetch_add(1, Ordering::SeqCst);
            let _ = entered.send(());
            if run == 0 {
                Ok("x".to_string())
            } else {
                gate.notified().await;
                Ok("y".to_string())
            }
        }
    });

    let first = engine.settled(&cell).await;
    assert_eq!(first.value.as_deref(), Some(&"x".to_string()));
    entered_rx.recv().await.expect("first run entered");

    engine.invalidate(cell);
    entered_rx.recv().await.expect("second run entered");

    let view = engine.view(cell);
    assert!(view.is_pending());
    assert_eq!(view.result().as_deref(), Some(&"x".to_string()));

    // Overriding the policy reverts to an empty pending display.
    let plain = engine.view(cell).show_last_result_while_recomputing(false);
    assert!(plain.result().is_none());

    gate.notify_one();
    let second = engine.settled(&cell).await;
    assert_eq!(second.value.as_deref(), Some(&"y".to_string()));
}

/// Invalidating a source recomputes the whole downstream chain.
#[tokio::test]
async fn invalidation_reaches_transitive_dependents() {
    let engine = Engine::new();

    let source_value = Arc::new(AtomicUsize::new(1));
    let read_value = Arc::clone(&source_value);
    let source = engine.declare("source", || vec![], move |_| {
        let value = Arc::clone(&read_value);
        async move { Ok(value.load(Ordering::SeqCst)) }
    });
    let doubled = engine.declare(
        "doubled",
        move || vec![source.into()],
        move |deps: DepValues| async move { Ok(*deps.get(source)? * 2) },
    );
    let plus_ten = engine.declare(
        "plus-ten",
        move || vec![doubled.into()],
        move |deps: DepValues| async move { Ok(*deps.get(doubled)? + 10) },
    );

    let settled = engine.settled(&plus_ten).await;
    assert_eq!(*settled.value.unwrap(), 12);

    source_value.store(5, Ordering::SeqCst);
    engine.invalidate(source);
    while !engine.read(&plus_ten).is_pending() {
        tokio::task::yield_now().await;
    }

    let settled = engine.settled(&plus_ten).await;
    assert_eq!(*settled.value.unwrap(), 20);
}

/// Independent cells recompute concurrently when unbounded.
#[tokio::test]
async fn independent_cells_recompute_concurrently() {
    let engine = Engine::new();
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let gates: Vec<Arc<Notify>> = (0..2).map(|_| Arc::new(Notify::new())).collect();

    let mut cells = Vec::new();
    for (i, gate) in gates.iter().enumerate() {
        let entered = entered_tx.clone();
        let gate = Arc::clone(gate);
        let cell = engine.declare(format!("worker-{i}"), || vec![], move |_| {
            let entered = entered.clone();
            let gate = Arc::clone(&gate);
            async move {
                let _ = entered.send(());
                gate.notified().await;
                Ok(())
            }
        });
        let _ = engine.read(&cell);
        cells.push(cell);
    }

    // Both computations are in flight at the same time.
    entered_rx.recv().await.expect("first worker entered");
    entered_rx.recv().await.expect("second worker entered");

    for gate in &gates {
        gate.notify_one();
    }
    for cell in &cells {
        assert!(engine.settled(cell).await.is_ready());
    }
}
