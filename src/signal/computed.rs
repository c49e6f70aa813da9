use std::sync::Arc;

use parking_lot::RwLock;

use crate::runtime::ReactiveRuntime;

struct Cached<T> {
    value: T,
    // (source, version) pairs the value was computed from
    deps: Vec<(usize, u64)>,
}

/// A lazily-memoized derived value.
///
/// `Computed` is pull-based: nothing recomputes on upstream writes, only the
/// dirty bit is set. The next [`get`](Computed::get) recomputes if the node
/// is dirty or the cached version vector no longer matches its dependencies,
/// re-tracking the dependency set in the process.
#[derive(Clone)]
pub struct Computed<T> {
    compute: Arc<dyn Fn() -> T + Send + Sync>,
    cached: Arc<RwLock<Option<Cached<T>>>>,
    id: usize,
}

impl<T: Clone + Send + Sync + 'static> Computed<T> {
    fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let runtime = ReactiveRuntime::current();
        let id = runtime.next_id();
        runtime.register_computed(id);

        Self {
            compute: Arc::new(compute),
            cached: Arc::new(RwLock::new(None)),
            id,
        }
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        let runtime = ReactiveRuntime::current();
        runtime.track_read(self.id);

        if !runtime.is_computed_dirty(self.id) {
            let cached = self.cached.read();
            if let Some(c) = cached.as_ref() {
                let valid = c
                    .deps
                    .iter()
                    .all(|(source, version)| runtime.version(*source) == *version);
                if valid {
                    return c.value.clone();
                }
            }
        }

        // Recompute inside our own observer context so the dependency set is
        // rebuilt from exactly the sources this run reads.
        runtime.retrack(self.id);
        let value = runtime.with_observer(self.id, || (self.compute)());
        let deps = runtime.dependency_versions(self.id);
        *self.cached.write() = Some(Cached {
            value: value.clone(),
            deps,
        });
        runtime.mark_computed_clean(self.id);
        runtime.bump_version(self.id);
        value
    }

    /// Get the computed node's unique ID.
    pub fn id(&self) -> usize {
        self.id
    }
}

/// Create a new memoized computation.
///
/// # Example
///
/// ```
/// use eddy::{computed, create_signal};
///
/// let (count, set_count) = create_signal(5);
/// let doubled = computed(move || count.get() * 2);
/// assert_eq!(doubled.get(), 10);
///
/// set_count.set(7);
/// assert_eq!(doubled.get(), 14);
/// ```
pub fn computed<T, F>(compute: F) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Computed::new(compute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ReactiveRuntime;
    use crate::signal::create_signal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn computed_basic() {
        ReactiveRuntime::scope(|| {
            let (count, set_count) = create_signal(5);
            let doubled = computed(move || count.get() * 2);

            assert_eq!(doubled.get(), 10);

            set_count.set(10);
            assert_eq!(doubled.get(), 20);
        });
    }

    #[test]
    fn computed_memoizes_between_changes() {
        ReactiveRuntime::scope(|| {
            let runs = Arc::new(AtomicUsize::new(0));
            let (count, set_count) = create_signal(1);

            let doubled = computed({
                let runs = runs.clone();
                move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    count.get() * 2
                }
            });

            assert_eq!(doubled.get(), 2);
            assert_eq!(doubled.get(), 2);
            assert_eq!(runs.load(Ordering::SeqCst), 1);

            set_count.set(3);
            assert_eq!(doubled.get(), 6);
            assert_eq!(doubled.get(), 6);
            assert_eq!(runs.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn computed_recomputes_once_for_batched_writes() {
        ReactiveRuntime::scope(|| {
            let runs = Arc::new(AtomicUsize::new(0));
            let (a, set_a) = create_signal(1);
            let (b, set_b) = create_signal(2);

            let sum = computed({
                let runs = runs.clone();
                move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    a.get() + b.get()
                }
            });
            assert_eq!(sum.get(), 3);

            crate::signal::batch(|| {
                set_a.set(10);
                set_b.set(20);
            });

            assert_eq!(sum.get(), 30);
            assert_eq!(runs.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn computed_chains_stay_fresh() {
        ReactiveRuntime::scope(|| {
            let (input, set_input) = create_signal(1);

            let doubled = computed(move || input.get() * 2);
            let quadrupled = computed({
                let doubled = doubled.clone();
                move || doubled.get() * 2
            });

            assert_eq!(quadrupled.get(), 4);

            set_input.set(5);
            assert_eq!(quadrupled.get(), 20);
        });
    }

    #[test]
    fn conditional_reads_shrink_dependencies() {
        ReactiveRuntime::scope(|| {
            let runs = Arc::new(AtomicUsize::new(0));
            let (gate, set_gate) = create_signal(true);
            let (a, set_a) = create_signal(1);
            let (b, _set_b) = create_signal(100);

            let pick = computed({
                let runs = runs.clone();
                move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    if gate.get() {
                        a.get()
                    } else {
                        b.get()
                    }
                }
            });

            assert_eq!(pick.get(), 1);
            set_gate.set(false);
            assert_eq!(pick.get(), 100);
            let runs_before = runs.load(Ordering::SeqCst);

            // `a` is no longer tracked; writing it must not dirty the node.
            set_a.set(2);
            assert_eq!(pick.get(), 100);
            assert_eq!(runs.load(Ordering::SeqCst), runs_before);
        });
    }
}
