//! # Eddy
//!
//! Batched reactive state containers with fine-grained signals for Rust.
//!
//! Eddy provides two independent levels of reactivity:
//!
//! ## Containers (batched key-value state)
//!
//! A [`Container`] is a keyed record whose reads and writes are intercepted:
//! - writes apply immediately but notify once per flushed batch, with
//!   last-write-wins coalescing per key
//! - tracked consumers are notified only when a batch touches a key they
//!   read during their last tracking pass
//! - listeners get immutable prev/next snapshots plus the changed-key set
//! - containers restore to their initial snapshot on demand, or when the
//!   active-consumer count returns from zero
//!
//! ## Signals (fine-grained primitives)
//!
//! An independent reactive graph for derived values and side effects:
//! - `Signal<T>` - versioned reactive cells
//! - `Computed<T>` - lazily-memoized derived values
//! - `Effect` - side effects that run at most once per batch, glitch-free

pub mod container;
pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod signal;
pub mod subscribe;
mod track;
pub mod value;

// Re-export main types for convenience
pub use container::{
    create_container, Container, ContainerInit, ContainerOptions, ConsumerHandle, Subscription,
};
pub use error::StoreError;
pub use scheduler::FlushPolicy;
pub use signal::{
    batch, computed, create_signal, create_signal_store, effect, effect_with_cleanup, Computed,
    Effect, ReadSignal, Signal, SignalStore, WriteSignal,
};
pub use subscribe::ChangeSet;
pub use value::{Snapshot, Value};
