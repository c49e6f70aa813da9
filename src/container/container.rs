use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::StoreError;
use crate::scheduler::{Callback, FlushPolicy, Phase, Scheduler};
use crate::subscribe::{ChangeSet, Hub};
use crate::track::Registry;
use crate::value::{Snapshot, Value};

use super::lifecycle::Lifecycle;

type Producer = Arc<dyn Fn() -> Value + Send + Sync>;

/// Initial state for a container: a record, or a producer re-evaluated on
/// every restore (so non-deterministic initial values stay fresh).
pub enum ContainerInit {
    Record(Value),
    Producer(Producer),
}

impl ContainerInit {
    /// Build the initial state from a closure invoked now and on restores.
    pub fn from_producer<F>(producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        ContainerInit::Producer(Arc::new(producer))
    }
}

impl From<Value> for ContainerInit {
    fn from(value: Value) -> Self {
        ContainerInit::Record(value)
    }
}

/// Container behavior knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Restore to the initial snapshot whenever the active-consumer count
    /// goes from zero back to one (after the first mount).
    pub reset_on_zero_consumers: bool,
    /// When top-level writes flush. See [`FlushPolicy`].
    pub flush_policy: FlushPolicy,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            reset_on_zero_consumers: true,
            flush_policy: FlushPolicy::default(),
        }
    }
}

struct InitSource {
    producer: Option<Producer>,
    snapshot: BTreeMap<String, Value>,
}

pub(crate) struct Shared {
    values: RwLock<BTreeMap<String, Value>>,
    init: Mutex<InitSource>,
    sched: Mutex<Scheduler>,
    hub: Mutex<Hub>,
    registry: Mutex<Registry>,
    lifecycle: Mutex<Lifecycle>,
    options: Mutex<ContainerOptions>,
    next_consumer_id: AtomicUsize,
}

/// A reactive key-value state container.
///
/// Every write routes through the scheduler: the backing value updates
/// immediately (reads after a write observe the new value), notification is
/// deferred to the batch's flush point. Clones share the same state.
///
/// # Example
///
/// ```
/// use eddy::{create_container, record, ContainerOptions, Value};
///
/// let container = create_container(record! { "count" => 0 }, ContainerOptions::default()).unwrap();
/// container.write(record! { "count" => 1 }).unwrap();
/// container.write(record! { "count" => 2 }).unwrap();
/// assert_eq!(container.get("count"), Some(Value::Int(2)));
/// container.flush().unwrap(); // one notification round for both writes
/// ```
#[derive(Clone)]
pub struct Container {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container").finish_non_exhaustive()
    }
}

/// Create a container from an initial record or producer.
pub fn create_container(
    init: impl Into<ContainerInit>,
    options: ContainerOptions,
) -> Result<Container, StoreError> {
    Container::new(init, options)
}

impl Container {
    /// Create a container. Fails before any state exists if the initial
    /// value (or the producer's output) is not a record.
    pub fn new(
        init: impl Into<ContainerInit>,
        options: ContainerOptions,
    ) -> Result<Self, StoreError> {
        let (producer, snapshot) = match init.into() {
            ContainerInit::Record(value) => (None, value.expect_record()?),
            ContainerInit::Producer(producer) => {
                let initial = producer().expect_record()?;
                (Some(producer), initial)
            }
        };

        Ok(Self {
            shared: Arc::new(Shared {
                values: RwLock::new(snapshot.clone()),
                init: Mutex::new(InitSource { producer, snapshot }),
                sched: Mutex::new(Scheduler::new()),
                hub: Mutex::new(Hub::new()),
                registry: Mutex::new(Registry::new()),
                lifecycle: Mutex::new(Lifecycle::new()),
                options: Mutex::new(options),
                next_consumer_id: AtomicUsize::new(0),
            }),
        })
    }

    /// An untracked point-in-time copy of the whole container.
    pub fn read(&self) -> Snapshot {
        Arc::new(self.shared.values.read().clone())
    }

    /// Read one key, registering it with the open tracking scope (if any).
    ///
    /// Mid-batch this returns the latest written value, never the pre-batch
    /// one.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.shared.registry.lock().note_read(key);
        self.shared.values.read().get(key).cloned()
    }

    /// Merge a record of writes into the container.
    ///
    /// Participates in ambient batching: under `FlushPolicy::Deferred` the
    /// notification waits for the next flush point; under `Immediate` it is
    /// delivered before this call returns (unless a batch scope is open).
    pub fn write(&self, partial: Value) -> Result<(), StoreError> {
        let entries = partial.expect_record()?;
        self.apply(entries.into_iter().map(|(k, v)| (k, Some(v))).collect(), None);
        self.flush_after_write()
    }

    /// [`write`](Self::write) with a callback batched alongside the write:
    /// it runs once the carrying batch flushes, after consumer notification,
    /// in write-issue order with the batch's other callbacks.
    pub fn write_with<F>(&self, partial: Value, callback: F) -> Result<(), StoreError>
    where
        F: FnOnce(&Snapshot) + Send + 'static,
    {
        let entries = partial.expect_record()?;
        self.apply(
            entries.into_iter().map(|(k, v)| (k, Some(v))).collect(),
            Some(Box::new(callback)),
        );
        self.flush_after_write()
    }

    /// Write and force the flush before returning, regardless of policy.
    pub fn write_sync(&self, partial: Value) -> Result<(), StoreError> {
        let entries = partial.expect_record()?;
        self.apply(entries.into_iter().map(|(k, v)| (k, Some(v))).collect(), None);
        self.flush_now()
    }

    /// `write_sync` with a callback run once the carrying batch has been
    /// delivered, receiving the batch's next snapshot. Callbacks of one
    /// batch run in write-issue order, after consumer notification.
    pub fn write_sync_with<F>(&self, partial: Value, callback: F) -> Result<(), StoreError>
    where
        F: FnOnce(&Snapshot) + Send + 'static,
    {
        let entries = partial.expect_record()?;
        self.apply(
            entries.into_iter().map(|(k, v)| (k, Some(v))).collect(),
            Some(Box::new(callback)),
        );
        self.flush_now()
    }

    /// Delete a key: a write of "absent". The key appears in the batch's
    /// changed set like any other write.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.apply(vec![(key.to_string(), None)], None);
        self.flush_after_write()
    }

    /// Run `f` with writes coalescing into one batch, flushed at the end of
    /// the outermost scope.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R, StoreError> {
        self.shared.sched.lock().enter_scope();

        let result = catch_unwind(AssertUnwindSafe(f));

        let outermost = self.shared.sched.lock().exit_scope();
        let flushed = if outermost { self.flush() } else { Ok(()) };

        match result {
            Ok(r) => flushed.map(|_| r),
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Register an external listener, notified when `keys` intersects a
    /// batch's changed set, or on every flush when `keys` is `None`.
    ///
    /// Dropping the returned [`Subscription`] unregisters the listener. A
    /// flush already iterating is unaffected; the listener simply misses
    /// subsequent flushes.
    pub fn subscribe<F>(&self, listener: F, keys: Option<&[&str]>) -> Subscription
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        let filter = keys.map(|ks| ks.iter().map(|k| k.to_string()).collect::<BTreeSet<_>>());
        let id = self.shared.hub.lock().add(Arc::new(listener), filter);
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Register a tracked consumer. Its interest set comes from read
    /// tracking (see [`track`](Self::track)); until a tracking pass runs it
    /// is interested in nothing.
    pub fn register_consumer<F>(&self, notify: F) -> ConsumerHandle
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        let id = self.shared.next_consumer_id.fetch_add(1, Ordering::SeqCst);
        self.shared.registry.lock().add_consumer(id, Arc::new(notify));

        let zero_to_one = self.shared.lifecycle.lock().acquire();
        if zero_to_one && self.options().reset_on_zero_consumers {
            log::debug!("zero-to-one consumer transition, restoring container");
            if let Err(err) = self.restore() {
                log::warn!("restore on consumer mount failed: {err}");
            }
        }

        ConsumerHandle {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Run a tracking pass for a consumer: keys read through
    /// [`get`](Self::get) inside `f` become the consumer's used-key set,
    /// replacing the previous pass's set.
    pub fn track<R>(&self, consumer: &ConsumerHandle, f: impl FnOnce() -> R) -> R {
        self.shared.registry.lock().open(consumer.id);

        let result = catch_unwind(AssertUnwindSafe(f));

        self.shared.registry.lock().close();

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Reset the container to its initial snapshot.
    ///
    /// If the container was built from a producer, the producer is invoked
    /// again. The reset is routed through the scheduler as an ordinary write
    /// set, so a restore requested while a flush is running lands in the
    /// next batch instead of tearing the one in flight.
    pub fn restore(&self) -> Result<(), StoreError> {
        self.restore_inner(None)
    }

    /// [`restore`](Self::restore) with a callback invoked with the post-reset
    /// snapshot once the reset flush completes.
    pub fn restore_with<F>(&self, callback: F) -> Result<(), StoreError>
    where
        F: FnOnce(&Snapshot) + Send + 'static,
    {
        self.restore_inner(Some(Box::new(callback)))
    }

    fn restore_inner(&self, callback: Option<Callback>) -> Result<(), StoreError> {
        let producer = self.shared.init.lock().producer.clone();
        let target = match producer {
            Some(produce) => {
                let fresh = produce().expect_record()?;
                self.shared.init.lock().snapshot = fresh.clone();
                fresh
            }
            None => self.shared.init.lock().snapshot.clone(),
        };

        let mut ops: Vec<(String, Option<Value>)> = target
            .iter()
            .map(|(k, v)| (k.clone(), Some(v.clone())))
            .collect();
        for key in self.shared.values.read().keys() {
            if !target.contains_key(key) {
                ops.push((key.clone(), None));
            }
        }

        log::debug!("restore scheduled over {} key(s)", ops.len());
        self.apply(ops, callback);
        self.flush_now()
    }

    /// Current options.
    pub fn options(&self) -> ContainerOptions {
        *self.shared.options.lock()
    }

    /// Replace the options. Takes effect from the next write.
    pub fn set_options(&self, options: ContainerOptions) {
        *self.shared.options.lock() = options;
    }

    /// Number of registered consumers.
    pub fn active_consumers(&self) -> usize {
        self.shared.lifecycle.lock().active()
    }

    /// Apply writes to the backing map and record them with the scheduler.
    ///
    /// The backing map updates here, immediately; only notification is
    /// deferred. An empty write set never opens a batch; its callback (if
    /// any) runs at once with the current snapshot.
    fn apply(&self, ops: Vec<(String, Option<Value>)>, callback: Option<Callback>) {
        if ops.is_empty() {
            if let Some(cb) = callback {
                let snapshot = self.read();
                cb(&snapshot);
            }
            return;
        }

        let keys: BTreeSet<String> = ops.iter().map(|(k, _)| k.clone()).collect();

        // Lock order: scheduler, then values.
        let mut sched = self.shared.sched.lock();
        let prev = sched
            .needs_open()
            .then(|| Arc::new(self.shared.values.read().clone()));
        {
            let mut values = self.shared.values.write();
            for (key, value) in ops {
                match value {
                    Some(v) => {
                        values.insert(key, v);
                    }
                    None => {
                        values.remove(&key);
                    }
                }
            }
        }
        sched.record(keys, callback, prev);
    }

    /// Flush after a plain `write`/`remove` when the policy asks for it.
    fn flush_after_write(&self) -> Result<(), StoreError> {
        let immediate = self.options().flush_policy == FlushPolicy::Immediate;
        let ready = {
            let sched = self.shared.sched.lock();
            !sched.in_scope() && sched.phase() == Phase::Collecting
        };
        if immediate && ready {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Flush unless a flush is already in progress (in which case the write
    /// just recorded sits in the next batch and the running flush's drain
    /// loop will deliver it).
    fn flush_now(&self) -> Result<(), StoreError> {
        let collecting = self.shared.sched.lock().phase() == Phase::Collecting;
        if collecting {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Deliver notifications for every collected batch.
    ///
    /// Drains in rounds: writes issued by listeners during a round form the
    /// next batch and are delivered in a following round of the same call.
    /// A panicking listener never stops the remaining deliveries; the first
    /// failure is reported after the drain completes.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut failed = 0usize;
        let mut total = 0usize;
        let mut first: Option<String> = None;

        loop {
            let batch = match self.shared.sched.lock().take_for_flush() {
                Some(batch) => batch,
                None => break,
            };
            let next: Snapshot = Arc::new(self.shared.values.read().clone());
            let change = ChangeSet {
                keys: batch.changed,
                prev: batch.prev,
                next: Arc::clone(&next),
            };

            let consumers = self.shared.registry.lock().matching(&change.keys);
            let listeners = self.shared.hub.lock().matching(&change.keys);
            log::debug!(
                "flush round: {} key(s), {} consumer(s), {} listener(s), {} callback(s)",
                change.keys.len(),
                consumers.len(),
                listeners.len(),
                batch.callbacks.len()
            );

            // No engine lock is held here; listeners may freely re-enter.
            for notify in consumers.into_iter().chain(listeners) {
                total += 1;
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| notify(&change))) {
                    failed += 1;
                    let message = panic_message(payload);
                    log::warn!("listener panicked during flush: {message}");
                    first.get_or_insert(message);
                }
            }
            for callback in batch.callbacks {
                total += 1;
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&next))) {
                    failed += 1;
                    let message = panic_message(payload);
                    log::warn!("post-write callback panicked during flush: {message}");
                    first.get_or_insert(message);
                }
            }

            self.shared.sched.lock().finish_flush();
        }

        if failed > 0 {
            Err(StoreError::ListenerPanic {
                failed,
                total,
                first: first.unwrap_or_else(|| "unknown panic".to_string()),
            })
        } else {
            Ok(())
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// RAII guard for a hub listener; dropping it unsubscribes.
pub struct Subscription {
    id: usize,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Remove the listener from future flushes.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.hub.lock().remove(self.id);
        }
    }
}

/// RAII guard for a registered consumer; dropping it deregisters and
/// decrements the container's active-consumer count.
pub struct ConsumerHandle {
    id: usize,
    shared: Weak<Shared>,
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.registry.lock().remove_consumer(self.id);
            shared.lifecycle.lock().release();
        }
    }
}
