use std::sync::Arc;

use parking_lot::RwLock;

use crate::runtime::ReactiveRuntime;

/// A reactive cell that holds a value and notifies dependents when written.
///
/// Reading inside a computed or effect registers the signal as a dependency;
/// writing bumps the signal's version and invalidates dependents.
#[derive(Clone)]
pub struct Signal<T> {
    value: Arc<RwLock<T>>,
    id: usize,
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(initial: T) -> Self {
        let runtime = ReactiveRuntime::current();
        let id = runtime.next_id();

        Self {
            value: Arc::new(RwLock::new(initial)),
            id,
        }
    }

    /// Get the current value of the signal.
    pub fn get(&self) -> T {
        let runtime = ReactiveRuntime::current();
        runtime.track_read(self.id);
        self.value.read().clone()
    }

    /// Set a new value for the signal.
    pub fn set(&self, new_value: T) {
        *self.value.write() = new_value;
        let runtime = ReactiveRuntime::current();
        runtime.signal_written(self.id);
    }

    /// Update the value using a function.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.value.write();
        f(&mut *value);
        drop(value); // Release the write lock before propagating
        let runtime = ReactiveRuntime::current();
        runtime.signal_written(self.id);
    }

    /// Read the value with a function without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let runtime = ReactiveRuntime::current();
        runtime.track_read(self.id);
        let value = self.value.read();
        f(&value)
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> usize {
        self.id
    }
}

/// Read half of a signal, from [`create_signal`].
#[derive(Clone)]
pub struct ReadSignal<T> {
    inner: Signal<T>,
}

impl<T: Clone + Send + Sync + 'static> ReadSignal<T> {
    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Read the value with a function without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with(f)
    }

    pub fn id(&self) -> usize {
        self.inner.id()
    }
}

/// Write half of a signal, from [`create_signal`].
#[derive(Clone)]
pub struct WriteSignal<T> {
    inner: Signal<T>,
}

impl<T: Clone + Send + Sync + 'static> WriteSignal<T> {
    /// Set a new value, invalidating dependents.
    pub fn set(&self, new_value: T) {
        self.inner.set(new_value);
    }

    /// Update the value in place, invalidating dependents.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.inner.update(f);
    }
}

/// Create a signal split into read and write halves.
///
/// # Example
///
/// ```
/// use eddy::create_signal;
///
/// let (count, set_count) = create_signal(0);
/// set_count.set(42);
/// assert_eq!(count.get(), 42);
/// ```
pub fn create_signal<T: Clone + Send + Sync + 'static>(
    initial: T,
) -> (ReadSignal<T>, WriteSignal<T>) {
    let signal = Signal::new(initial);
    (
        ReadSignal {
            inner: signal.clone(),
        },
        WriteSignal { inner: signal },
    )
}
