//! Batched state containers.
//!
//! Containers hold a keyed record of values behind an interception layer:
//! reads feed the dependency registry, writes feed the update scheduler, and
//! notifications are delivered once per flushed batch.

mod container;
mod lifecycle;

pub use container::{
    create_container, Container, ContainerInit, ContainerOptions, ConsumerHandle, Subscription,
};
