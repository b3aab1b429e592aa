//! Trellis Core
//!
//! A derived-async-value engine: declare values computed from asynchronous
//! sources, and the engine re-invokes them when their dependencies change,
//! deduplicates concurrent invocations, and exposes explicit
//! pending/ready/error state to consumers.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A cell is a named, memoized asynchronous computation with a declared
//! dependency list. Nothing runs until the cell is first read; after that,
//! invalidating the cell (or any of its transitive dependencies) schedules
//! a recomputation.
//!
//! ## Generations
//!
//! Each recomputation start increments the cell's generation. A result that
//! settles after its run has been superseded is discarded, never applied,
//! so the observed state always reflects the latest inputs even under
//! races.
//!
//! ## Views
//!
//! Consumers read cells through snapshots or [`CellView`]s, which expose
//! pending/result/error and optionally keep showing the last good value
//! while a refresh is in flight (stale-while-revalidate). Groups of cells
//! compose into a single pending/ready/failed state via
//! [`Engine::await_all`].
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{DepValues, Engine};
//!
//! let engine = Engine::new();
//!
//! let mutations = engine.declare("mutations", || vec![], |_| async {
//!     Ok(client.fetch_mutations().await?)
//! });
//!
//! let filtered = engine.declare(
//!     "filtered-mutations",
//!     move || vec![mutations.into()],
//!     move |deps: DepValues| async move {
//!         let all = deps.get(mutations)?;
//!         Ok(all.iter().filter(|m| m.is_somatic()).cloned().collect::<Vec<_>>())
//!     },
//! );
//!
//! // Non-blocking read drives rendering; settled() awaits the value.
//! let snapshot = engine.settled(&filtered).await;
//! ```

pub mod cell;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;

pub use cell::{CellHandle, CellId, CellRef, CellSnapshot, CellView, CompositeState, DepValues, Phase};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{BoxError, CellError, DepAccessError};
