use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::subscribe::Listener;

/// Per-consumer dependency records built by read tracking.
///
/// A consumer's used-key set is REPLACED on every tracking pass, never
/// accumulated: conditional reads mean dependencies can shrink as well as
/// grow, and a stale union would over-notify forever.
pub(crate) struct Registry {
    notifiers: HashMap<usize, Listener>,
    used: HashMap<usize, BTreeSet<String>>,
    /// Open tracking scopes, innermost last.
    collecting: Vec<(usize, BTreeSet<String>)>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            notifiers: HashMap::new(),
            used: HashMap::new(),
            collecting: Vec::new(),
        }
    }

    pub fn add_consumer(&mut self, id: usize, notify: Listener) {
        self.notifiers.insert(id, notify);
        self.used.insert(id, BTreeSet::new());
    }

    pub fn remove_consumer(&mut self, id: usize) {
        self.notifiers.remove(&id);
        self.used.remove(&id);
        self.collecting.retain(|(scope_id, _)| *scope_id != id);
    }

    /// Open a collection scope for a consumer's tracking pass.
    pub fn open(&mut self, id: usize) {
        self.collecting.push((id, BTreeSet::new()));
    }

    /// Close the innermost scope, replacing the consumer's stored set.
    pub fn close(&mut self) {
        if let Some((id, set)) = self.collecting.pop() {
            if self.notifiers.contains_key(&id) {
                self.used.insert(id, set);
            }
        }
    }

    /// Record a key read into the innermost open scope, if any.
    pub fn note_read(&mut self, key: &str) {
        if let Some((_, set)) = self.collecting.last_mut() {
            set.insert(key.to_string());
        }
    }

    /// Consumers whose used-key set intersects the changed set.
    ///
    /// An empty used set means the consumer's last pass read nothing, so it
    /// is interested in nothing; whole-container interest goes through the
    /// subscription hub instead.
    pub fn matching(&self, changed: &BTreeSet<String>) -> Vec<Listener> {
        let mut ids: Vec<&usize> = self
            .used
            .iter()
            .filter(|(_, used)| used.iter().any(|key| changed.contains(key)))
            .map(|(id, _)| id)
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.notifiers.get(id).map(Arc::clone))
            .collect()
    }

    #[cfg(test)]
    pub fn used_keys(&self, id: usize) -> Option<&BTreeSet<String>> {
        self.used.get(&id)
    }
}
