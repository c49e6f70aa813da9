/// Consumer refcounting for a container.
///
/// The interesting transition is zero-to-one: when the last consumer left
/// and a new one arrives, the container may restore to its initial snapshot
/// per the `reset_on_zero_consumers` option. The very first registration is
/// exempt: nothing has consumed the container yet, so there is nothing to
/// reset.
pub(crate) struct Lifecycle {
    active: usize,
    ever_active: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            active: 0,
            ever_active: false,
        }
    }

    /// Register one consumer. Returns true when this is a zero-to-one
    /// transition that should trigger a policy restore.
    pub fn acquire(&mut self) -> bool {
        let reset = self.active == 0 && self.ever_active;
        self.active += 1;
        self.ever_active = true;
        reset
    }

    pub fn release(&mut self) {
        self.active = self.active.saturating_sub(1);
    }

    pub fn active(&self) -> usize {
        self.active
    }
}
