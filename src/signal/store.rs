use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::signal::Signal;
use crate::value::Value;

/// A record of state exploded into one [`Signal`] per top-level key.
///
/// Each key gets its own reactive cell, so a computed or effect reading one
/// field is only invalidated by writes to that field.
pub struct SignalStore {
    signals: BTreeMap<String, Signal<Value>>,
}

impl std::fmt::Debug for SignalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalStore").finish_non_exhaustive()
    }
}

impl SignalStore {
    fn new(initial: BTreeMap<String, Value>) -> Self {
        let signals = initial
            .into_iter()
            .map(|(key, value)| (key, Signal::new(value)))
            .collect();
        Self { signals }
    }

    /// The per-key signal accessors.
    pub fn signals(&self) -> &BTreeMap<String, Signal<Value>> {
        &self.signals
    }

    /// The signal for a single key, if it exists.
    pub fn signal(&self, key: &str) -> Option<&Signal<Value>> {
        self.signals.get(key)
    }

    /// Read a key's current value, tracking the read.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.signals.get(key).map(|signal| signal.get())
    }

    /// Write a key directly. Returns false if the key is not part of the
    /// store's record.
    pub fn set(&self, key: &str, value: Value) -> bool {
        match self.signals.get(key) {
            Some(signal) => {
                signal.set(value);
                true
            }
            None => false,
        }
    }

    /// Iterate the store's keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.signals.keys().map(String::as_str)
    }
}

/// Create a [`SignalStore`] from an initial record.
///
/// Anything other than a record is rejected before any signal is created.
///
/// # Example
///
/// ```
/// use eddy::{computed, create_signal_store, record, Value};
///
/// let store = create_signal_store(record! { "count" => 0 }).unwrap();
/// let count = store.signal("count").unwrap().clone();
/// let doubled = computed(move || count.get().as_int().unwrap() * 2);
///
/// store.set("count", Value::Int(4));
/// assert_eq!(doubled.get(), 8);
/// ```
pub fn create_signal_store(initial: Value) -> Result<SignalStore, StoreError> {
    Ok(SignalStore::new(initial.expect_record()?))
}
