//! The dependency registry: per-consumer used-key sets.

mod registry;

pub(crate) use registry::Registry;
