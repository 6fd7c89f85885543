//! Core library for routing cache keys to nodes.
//!
//! This crate provides the routing half of the cache client:
//! - Tokens and partitioners (the hash calculator)
//! - Node and virtual node abstractions
//! - Immutable ring snapshots and the concurrent node locator
//! - Replicated node resolution

pub mod error;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;
pub mod vnode;

pub use error::{Error, Result};
pub use node::Node;
pub use partitioner::{Partitioner, SipPartitioner, Xxh3Partitioner};
pub use ring::{LocatorBuilder, LocatorConfig, NodeLocator, ReplicatedNode, RingSnapshot};
pub use token::Token;
pub use vnode::VirtualNode;
