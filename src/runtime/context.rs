use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

type Runner = Arc<dyn Fn() + Send + Sync>;

/// Reactive context for tracking the signal graph (one per runtime).
struct ReactiveContext {
    current_observer: Option<usize>,
    // Map from source ID (signal or computed) to the observer IDs depending on it
    dependencies: HashMap<usize, HashSet<usize>>,
    // Map from observer ID to the source IDs it read during its last run
    observer_deps: HashMap<usize, HashSet<usize>>,
    // Map from effect ID to its runner
    observers: HashMap<usize, Runner>,
    // IDs registered as computed nodes (propagation traverses them)
    computed_nodes: HashSet<usize>,
    // Dirty bits for computed nodes
    computed_dirty: HashMap<usize, bool>,
    // Version counter per source; bumped on every write / recompute
    versions: HashMap<usize, u64>,
    // Effects scheduled for the end of the open batch, in schedule order
    pending_effects: Vec<usize>,
    batch_depth: usize,
    draining: bool,
}

impl ReactiveContext {
    fn new() -> Self {
        Self {
            current_observer: None,
            dependencies: HashMap::new(),
            observer_deps: HashMap::new(),
            observers: HashMap::new(),
            computed_nodes: HashSet::new(),
            computed_dirty: HashMap::new(),
            versions: HashMap::new(),
            pending_effects: Vec::new(),
            batch_depth: 0,
            draining: false,
        }
    }

    fn clear(&mut self) {
        self.current_observer = None;
        self.dependencies.clear();
        self.observer_deps.clear();
        self.observers.clear();
        self.computed_nodes.clear();
        self.computed_dirty.clear();
        self.versions.clear();
        self.pending_effects.clear();
        self.batch_depth = 0;
        self.draining = false;
    }

    fn drop_observer_edges(&mut self, observer_id: usize) {
        if let Some(old_deps) = self.observer_deps.remove(&observer_id) {
            for source_id in old_deps {
                if let Some(deps) = self.dependencies.get_mut(&source_id) {
                    deps.remove(&observer_id);
                }
            }
        }
    }
}

/// Inner runtime state that can be shared.
pub struct RuntimeInner {
    context: Mutex<ReactiveContext>,
}

impl RuntimeInner {
    fn new() -> Self {
        Self {
            context: Mutex::new(ReactiveContext::new()),
        }
    }

    pub fn remove_observer(&mut self, observer_id: usize) {
        let mut ctx = self.context.lock();
        ctx.observers.remove(&observer_id);
        ctx.pending_effects.retain(|id| *id != observer_id);
        ctx.drop_observer_edges(observer_id);
    }

    fn clear(&mut self) {
        self.context.lock().clear();
    }
}

/// Hybrid reactive runtime for managing the signal graph.
///
/// Supports both a global runtime (default) and scoped runtimes for
/// isolation. The runtime tracks dependency edges between signals, computed
/// nodes, and effects, propagates invalidation on writes, and defers effect
/// runs to batch boundaries.
///
/// # Examples
///
/// Using the default global runtime:
///
/// ```
/// use eddy::Signal;
///
/// let signal = Signal::new(42);
/// assert_eq!(signal.get(), 42);
/// ```
///
/// Using scoped runtimes for isolation:
///
/// ```
/// use eddy::runtime::ReactiveRuntime;
/// use eddy::Signal;
///
/// ReactiveRuntime::scope(|| {
///     let signal = Signal::new(0);
///     assert_eq!(signal.get(), 0);
/// });
/// // Runtime and all its state is dropped here
/// ```
pub struct ReactiveRuntime {
    next_id: AtomicUsize,
    inner: Arc<RwLock<RuntimeInner>>,
}

// Thread-local stack for scoped runtimes
thread_local! {
    static RUNTIME_STACK: RefCell<Vec<Arc<ReactiveRuntime>>> = RefCell::new(vec![]);
}

impl ReactiveRuntime {
    fn new() -> Arc<Self> {
        Arc::new(ReactiveRuntime {
            next_id: AtomicUsize::new(0),
            inner: Arc::new(RwLock::new(RuntimeInner::new())),
        })
    }

    /// Run a function with a fresh isolated runtime.
    ///
    /// Useful for testing or creating isolated reactive contexts. The
    /// runtime and all its state is dropped when the function returns.
    pub fn scope<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let runtime = Self::new();
        Self::with_runtime(runtime, f)
    }

    /// Get or create the global runtime (fallback).
    pub fn global() -> Arc<Self> {
        use std::sync::OnceLock;
        static RUNTIME: OnceLock<Arc<ReactiveRuntime>> = OnceLock::new();
        Arc::clone(RUNTIME.get_or_init(Self::new))
    }

    /// Get the current reactive runtime (scoped or global fallback).
    pub fn current() -> Arc<Self> {
        RUNTIME_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .cloned()
                .unwrap_or_else(Self::global)
        })
    }

    /// Run a function with a specific runtime as the current context.
    ///
    /// Pushes the runtime onto the thread-local stack for the duration of
    /// the call; the stack is rebalanced even if `f` panics.
    pub fn with_runtime<F, R>(runtime: Arc<Self>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().push(runtime);
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Clear all observers, dependency edges, and versions from this runtime.
    pub fn clear(&self) {
        self.inner.write().clear();
        self.next_id.store(0, Ordering::SeqCst);
    }

    /// Get a reference to the inner runtime state.
    pub fn inner(&self) -> Arc<RwLock<RuntimeInner>> {
        Arc::clone(&self.inner)
    }

    /// Generate the next unique ID for a reactive node.
    pub fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Record a read of a source by the current observer, if any.
    pub fn track_read(&self, source_id: usize) {
        let inner = self.inner.read();
        let mut ctx = inner.context.lock();
        if let Some(current_observer) = ctx.current_observer {
            ctx.dependencies
                .entry(source_id)
                .or_default()
                .insert(current_observer);
            ctx.observer_deps
                .entry(current_observer)
                .or_default()
                .insert(source_id);
        }
    }

    /// Current version of a source (0 if it has never been written).
    pub fn version(&self, source_id: usize) -> u64 {
        let inner = self.inner.read();
        let ctx = inner.context.lock();
        ctx.versions.get(&source_id).copied().unwrap_or(0)
    }

    /// Bump a source's version without propagating (used by computed nodes
    /// after a recompute).
    pub fn bump_version(&self, source_id: usize) {
        let inner = self.inner.read();
        let mut ctx = inner.context.lock();
        *ctx.versions.entry(source_id).or_insert(0) += 1;
    }

    /// A signal was written: bump its version and invalidate dependents.
    ///
    /// Computed dependents are marked dirty transitively; effect dependents
    /// are scheduled once each, and run immediately unless a batch is open.
    pub fn signal_written(&self, signal_id: usize) {
        {
            let inner = self.inner.read();
            let mut ctx = inner.context.lock();
            *ctx.versions.entry(signal_id).or_insert(0) += 1;
        }
        self.propagate(signal_id);
    }

    /// Invalidate everything downstream of a source and schedule its effects.
    fn propagate(&self, source_id: usize) {
        let runners: Vec<Runner> = {
            let inner = self.inner.read();
            let mut ctx = inner.context.lock();

            let mut visited = HashSet::new();
            let mut stack = vec![source_id];
            let mut effect_ids: Vec<usize> = Vec::new();
            while let Some(id) = stack.pop() {
                let dependents: Vec<usize> = ctx
                    .dependencies
                    .get(&id)
                    .map(|deps| deps.iter().copied().collect())
                    .unwrap_or_default();
                for dep in dependents {
                    if ctx.computed_nodes.contains(&dep) {
                        if visited.insert(dep) {
                            ctx.computed_dirty.insert(dep, true);
                            stack.push(dep);
                        }
                    } else if ctx.observers.contains_key(&dep) && !effect_ids.contains(&dep) {
                        effect_ids.push(dep);
                    }
                }
            }

            if ctx.batch_depth > 0 || ctx.draining {
                for id in effect_ids {
                    if !ctx.pending_effects.contains(&id) {
                        ctx.pending_effects.push(id);
                    }
                }
                Vec::new()
            } else {
                log::trace!(
                    "source {source_id} written, running {} effect(s)",
                    effect_ids.len()
                );
                effect_ids
                    .into_iter()
                    .filter_map(|id| ctx.observers.get(&id).cloned())
                    .collect()
            }
        };

        for runner in runners {
            runner();
        }
    }

    /// Run `f` with effect runs deferred to the end of the outermost batch.
    ///
    /// Each effect runs at most once per batch no matter how many of its
    /// dependencies were written inside it.
    pub fn batch<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        {
            let inner = self.inner.read();
            inner.context.lock().batch_depth += 1;
        }

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        let outermost = {
            let inner = self.inner.read();
            let mut ctx = inner.context.lock();
            ctx.batch_depth -= 1;
            ctx.batch_depth == 0
        };
        if outermost {
            self.drain_pending_effects();
        }

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Run scheduled effects until the queue is empty.
    ///
    /// Effects scheduled while draining (an effect writing a signal) join
    /// the same pass rather than running nested.
    fn drain_pending_effects(&self) {
        loop {
            let next: Option<Runner> = {
                let inner = self.inner.read();
                let mut ctx = inner.context.lock();
                if ctx.pending_effects.is_empty() {
                    ctx.draining = false;
                    return;
                }
                ctx.draining = true;
                let id = ctx.pending_effects.remove(0);
                ctx.observers.get(&id).cloned()
            };
            if let Some(runner) = next {
                runner();
            }
        }
    }

    /// Register an effect runner for an observer ID.
    ///
    /// Clears any dependency edges left over from a previous registration.
    pub fn create_observer<F>(&self, observer_id: usize, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = self.inner.read();
        let mut ctx = inner.context.lock();
        ctx.drop_observer_edges(observer_id);
        ctx.observers.insert(observer_id, Arc::new(f));
    }

    /// Drop an observer's dependency edges ahead of a re-tracking run.
    ///
    /// Dependency sets are rebuilt from scratch on every run so conditional
    /// reads can shrink the tracked set.
    pub fn retrack(&self, observer_id: usize) {
        let inner = self.inner.read();
        let mut ctx = inner.context.lock();
        ctx.drop_observer_edges(observer_id);
    }

    /// Run a function with a specific observer as the current context.
    pub fn with_observer<F, R>(&self, observer_id: usize, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let prev = {
            let inner = self.inner.read();
            let mut ctx = inner.context.lock();
            ctx.current_observer.replace(observer_id)
        };

        let result = f();

        let inner = self.inner.read();
        inner.context.lock().current_observer = prev;

        result
    }

    /// Register a computed node; it starts dirty.
    pub fn register_computed(&self, computed_id: usize) {
        let inner = self.inner.read();
        let mut ctx = inner.context.lock();
        ctx.computed_nodes.insert(computed_id);
        ctx.computed_dirty.insert(computed_id, true);
    }

    /// Check if a computed node needs recomputation.
    pub fn is_computed_dirty(&self, computed_id: usize) -> bool {
        let inner = self.inner.read();
        let ctx = inner.context.lock();
        ctx.computed_dirty.get(&computed_id).copied().unwrap_or(true)
    }

    /// Mark a computed node clean (after recomputation).
    pub fn mark_computed_clean(&self, computed_id: usize) {
        let inner = self.inner.read();
        let mut ctx = inner.context.lock();
        ctx.computed_dirty.insert(computed_id, false);
    }

    /// The `(source, version)` vector an observer's last run depended on.
    pub fn dependency_versions(&self, observer_id: usize) -> Vec<(usize, u64)> {
        let inner = self.inner.read();
        let ctx = inner.context.lock();
        ctx.observer_deps
            .get(&observer_id)
            .map(|deps| {
                deps.iter()
                    .map(|id| (*id, ctx.versions.get(id).copied().unwrap_or(0)))
                    .collect()
            })
            .unwrap_or_default()
    }
}
