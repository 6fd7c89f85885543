//! Consistent hash ring implementation.
//!
//! The ring is published as an immutable [`RingSnapshot`]; the
//! [`NodeLocator`] owns the current snapshot and replaces it wholesale on
//! every membership change.

pub mod config;
pub mod locator;
pub mod replicated;
pub mod snapshot;

pub use config::LocatorConfig;
pub use locator::{LocatorBuilder, NodeLocator};
pub use replicated::ReplicatedNode;
pub use snapshot::RingSnapshot;
