//! Fine-grained reactive primitives.
//!
//! This module provides the core building blocks of the signal graph:
//! - Signals: versioned reactive cells
//! - Computed: lazily-memoized derived values
//! - Effects: side effects that rerun at most once per batch

mod computed;
mod effect;
mod signal;
mod store;

pub use computed::{computed, Computed};
pub use effect::{effect, effect_with_cleanup, Effect};
pub use signal::{create_signal, ReadSignal, Signal, WriteSignal};
pub use store::{create_signal_store, SignalStore};

use crate::runtime::ReactiveRuntime;

/// Run `f` with signal-effect runs deferred to the end of the batch.
///
/// Effects whose dependencies are written inside `f` run exactly once when
/// the outermost batch exits, after every write has been applied. Nested
/// calls merge into the outermost batch.
pub fn batch<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    ReactiveRuntime::current().batch(f)
}
