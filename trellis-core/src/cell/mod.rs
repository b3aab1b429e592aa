//! Cell primitives.
//!
//! A cell is a single named, memoized asynchronous computation. This module
//! holds everything a cell consists of from the consumer's point of view:
//!
//! - identity ([`CellId`], [`CellHandle`], [`CellRef`])
//! - observable state ([`Phase`], [`CellSnapshot`])
//! - resolved dependency values handed to compute functions ([`DepValues`])
//! - render-oriented views ([`CellView`], [`CompositeState`])
//!
//! The engine-side storage (compute records, state slots) is internal;
//! scheduling lives in [`crate::graph`].

mod handle;
pub(crate) mod record;
mod state;
pub(crate) mod values;
pub(crate) mod view;

pub use handle::{CellHandle, CellId, CellRef};
pub use state::{CellSnapshot, Phase};
pub use values::DepValues;
pub use view::{CellView, CompositeState};
