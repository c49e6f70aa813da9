//! Error taxonomy for the container engine and signal graph.

use thiserror::Error;

/// Errors surfaced by container construction, writes, and flushes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The container top level (or a write partial) was not a record.
    ///
    /// Raised synchronously, before any state is created or mutated.
    #[error("expected a record, got {kind}")]
    ExpectedRecord { kind: &'static str },

    /// One or more listeners or post-write callbacks panicked during a
    /// flush. Every remaining delivery still ran; scheduler state is intact.
    #[error("{failed} of {total} flush deliveries panicked (first: {first})")]
    ListenerPanic {
        failed: usize,
        total: usize,
        first: String,
    },
}
