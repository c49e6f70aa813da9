//! Runtime support for the signal graph.
//!
//! This module provides the infrastructure for dependency tracking,
//! version counters, invalidation propagation, and batch scheduling.

mod context;

pub use context::{ReactiveRuntime, RuntimeInner};
