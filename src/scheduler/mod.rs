//! The update scheduler: batch collection and flush sequencing.

mod scheduler;

pub use scheduler::FlushPolicy;
pub(crate) use scheduler::{Batch, Callback, Phase, Scheduler};
