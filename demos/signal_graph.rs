//! Signals, computed values, and glitch-free effects.
//!
//! Run with: cargo run --example signal_graph

use eddy::{batch, computed, create_signal, effect};

fn main() {
    let (celsius, set_celsius) = create_signal(20.0_f64);
    let (offset, set_offset) = create_signal(0.0_f64);

    let fahrenheit = computed({
        let celsius = celsius.clone();
        let offset = offset.clone();
        move || (celsius.get() + offset.get()) * 9.0 / 5.0 + 32.0
    });

    let _logger = effect({
        let fahrenheit = fahrenheit.clone();
        move || {
            println!("fahrenheit is now {}", fahrenheit.get());
        }
    });

    set_celsius.set(25.0);

    // Both writes settle before the effect observes them: one rerun.
    batch(|| {
        set_celsius.set(30.0);
        set_offset.set(1.5);
    });
}
