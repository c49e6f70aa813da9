use std::collections::BTreeSet;
use std::sync::Arc;

use crate::value::Snapshot;

/// Notification payload delivered once per flushed batch.
///
/// Both snapshots are immutable point-in-time copies; listener logic cannot
/// observe tearing through them.
#[derive(Clone, Debug)]
pub struct ChangeSet {
    /// Keys written during the batch.
    pub keys: BTreeSet<String>,
    /// Container state when the batch opened.
    pub prev: Snapshot,
    /// Container state when the batch flushed.
    pub next: Snapshot,
}

pub(crate) type Listener = Arc<dyn Fn(&ChangeSet) + Send + Sync>;

struct Slot {
    id: usize,
    listener: Listener,
    /// `None` means whole-container interest: notified on every flush.
    filter: Option<BTreeSet<String>>,
}

/// External listener registrations with optional key filters.
pub(crate) struct Hub {
    slots: Vec<Slot>,
    next_id: usize,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 0,
        }
    }

    pub fn add(&mut self, listener: Listener, filter: Option<BTreeSet<String>>) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.push(Slot {
            id,
            listener,
            filter,
        });
        id
    }

    pub fn remove(&mut self, id: usize) {
        self.slots.retain(|slot| slot.id != id);
    }

    /// Listeners whose filter intersects the changed set, in registration
    /// order. The flush iterates this clone, so removal mid-flush never
    /// mutates a list being walked.
    pub fn matching(&self, changed: &BTreeSet<String>) -> Vec<Listener> {
        self.slots
            .iter()
            .filter(|slot| match &slot.filter {
                None => true,
                Some(filter) => filter.iter().any(|key| changed.contains(key)),
            })
            .map(|slot| Arc::clone(&slot.listener))
            .collect()
    }
}
