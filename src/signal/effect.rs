use std::sync::Arc;

use parking_lot::RwLock;

use crate::runtime::{ReactiveRuntime, RuntimeInner};

type Cleanup = Arc<dyn Fn() + Send + Sync>;

/// A side effect that reruns when its dependencies change.
///
/// The effect runs immediately on creation. Afterwards it runs at most once
/// per batch of signal writes, after every write in the batch has been
/// applied, so it never observes a half-updated set of values. The
/// dependency set is recaptured on every run. Dropping the `Effect` runs its
/// cleanup (if any) and unregisters it.
pub struct Effect {
    id: usize,
    runtime: std::sync::Weak<RwLock<RuntimeInner>>,
    cleanup: Option<Cleanup>,
}

impl Effect {
    fn new<F>(run: F, cleanup: Option<Cleanup>) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runtime = ReactiveRuntime::current();
        let id = runtime.next_id();
        let run = Arc::new(run);

        // Rerun path: cleanup from the previous run, then re-track from
        // scratch so conditional reads shrink or grow the dependency set.
        let rerun_cleanup = cleanup.clone();
        let rerun = Arc::clone(&run);
        runtime.create_observer(id, move || {
            let runtime = ReactiveRuntime::current();
            if let Some(cleanup) = &rerun_cleanup {
                cleanup();
            }
            runtime.retrack(id);
            runtime.with_observer(id, || rerun());
        });

        // First run tracks dependencies but has no previous run to clean up.
        runtime.with_observer(id, || run());

        Self {
            id,
            runtime: Arc::downgrade(&runtime.inner()),
            cleanup,
        }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.write().remove_observer(self.id);
        }
    }
}

/// Create a new effect that reruns when any signal it reads changes.
///
/// # Example
///
/// ```
/// use eddy::{create_signal, effect};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let (count, set_count) = create_signal(0);
/// let runs = Arc::new(AtomicUsize::new(0));
///
/// let _effect = effect({
///     let runs = runs.clone();
///     move || {
///         let _ = count.get();
///         runs.fetch_add(1, Ordering::SeqCst);
///     }
/// });
///
/// assert_eq!(runs.load(Ordering::SeqCst), 1); // ran immediately
/// set_count.set(1);
/// assert_eq!(runs.load(Ordering::SeqCst), 2);
/// ```
pub fn effect<F>(run: F) -> Effect
where
    F: Fn() + Send + Sync + 'static,
{
    Effect::new(run, None)
}

/// Create an effect whose `cleanup` runs before every rerun and on drop.
pub fn effect_with_cleanup<F, C>(run: F, cleanup: C) -> Effect
where
    F: Fn() + Send + Sync + 'static,
    C: Fn() + Send + Sync + 'static,
{
    Effect::new(run, Some(Arc::new(cleanup)))
}
