use std::collections::BTreeSet;

use crate::value::Snapshot;

/// A post-write callback, run after the batch that carried its write has
/// been delivered. Receives the batch's next snapshot.
pub(crate) type Callback = Box<dyn FnOnce(&Snapshot) + Send>;

/// Decides when a top-level `write` flushes.
///
/// Rust has no ambient end-of-turn hook, so the flush point is an explicit
/// configuration seam: hosts with their own scheduling turn use `Deferred`
/// and call `flush()` (or a batch scope) at the turn boundary; hosts without
/// one use `Immediate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Writes accumulate until `flush()`, the end of a batch scope, or a
    /// `write_sync`.
    #[default]
    Deferred,
    /// Every top-level `write` flushes before returning.
    Immediate,
}

/// One coalesced round of writes.
pub(crate) struct Batch {
    /// Keys written since the batch opened (last write wins per key).
    pub changed: BTreeSet<String>,
    /// Snapshot captured when the batch opened, before its first write.
    pub prev: Snapshot,
    /// Post-write callbacks in write-issue order.
    pub callbacks: Vec<Callback>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Collecting,
    Flushing,
}

/// The per-container update scheduler: an explicit state machine, not a
/// module-level singleton, so containers stay independently testable.
///
/// idle → collecting (first write) → flushing (flush point) → idle, with
/// writes issued mid-flush landing in a `next` batch that is promoted after
/// the current one finishes. No write is ever merged into a batch whose
/// notifications are already being delivered, and none is dropped.
pub(crate) struct Scheduler {
    phase: Phase,
    current: Option<Batch>,
    next: Option<Batch>,
    /// Open explicit batch scopes; auto-flush is suppressed while non-zero.
    depth: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            current: None,
            next: None,
            depth: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn enter_scope(&mut self) {
        self.depth += 1;
    }

    /// Returns true when the outermost scope exited.
    pub fn exit_scope(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    pub fn in_scope(&self) -> bool {
        self.depth > 0
    }

    /// Whether the next `record` will open a fresh batch (and therefore
    /// needs a pre-write snapshot from the caller).
    pub fn needs_open(&self) -> bool {
        match self.phase {
            Phase::Idle => true,
            Phase::Collecting => self.current.is_none(),
            Phase::Flushing => self.next.is_none(),
        }
    }

    /// Merge written keys (and an optional callback) into the open batch.
    ///
    /// `prev` must be `Some` when [`needs_open`](Self::needs_open) reported
    /// true, captured before the caller applied the writes.
    pub fn record(
        &mut self,
        keys: BTreeSet<String>,
        callback: Option<Callback>,
        prev: Option<Snapshot>,
    ) {
        let slot = match self.phase {
            Phase::Flushing => &mut self.next,
            Phase::Idle | Phase::Collecting => &mut self.current,
        };
        match slot {
            Some(batch) => {
                batch.changed.extend(keys);
                if let Some(cb) = callback {
                    batch.callbacks.push(cb);
                }
            }
            None => {
                log::trace!("batch opened with {} key(s)", keys.len());
                *slot = Some(Batch {
                    changed: keys,
                    prev: prev.expect("opening a batch requires a prev snapshot"),
                    callbacks: callback.into_iter().collect(),
                });
            }
        }
        if self.phase == Phase::Idle {
            self.phase = Phase::Collecting;
        }
    }

    /// Begin flushing: take the collected batch, if any.
    ///
    /// Returns `None` while already flushing, so a re-entrant `flush()` from
    /// inside a listener is a no-op instead of a corruption.
    pub fn take_for_flush(&mut self) -> Option<Batch> {
        if self.phase != Phase::Collecting {
            return None;
        }
        self.phase = Phase::Flushing;
        self.current.take()
    }

    /// Finish a flush round, promoting any batch that accrued during it.
    pub fn finish_flush(&mut self) {
        match self.next.take() {
            Some(batch) => {
                self.current = Some(batch);
                self.phase = Phase::Collecting;
            }
            None => {
                self.phase = Phase::Idle;
            }
        }
    }
}
