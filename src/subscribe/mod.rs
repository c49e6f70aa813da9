//! The subscription hub: listener registration and notification payloads.

mod hub;

pub use hub::ChangeSet;
pub(crate) use hub::{Hub, Listener};
