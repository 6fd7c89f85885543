//! # Cache Cluster Client
//!
//! Purpose: Talk to a cluster of memcached-compatible nodes over the binary
//! protocol, spreading keys across nodes with a consistent hash ring.
//!
//! ## Layers
//! 1. **Connection Pool**: bounded, per-node pools of TCP connections
//!    behind an admission gate; connections that saw an I/O error are
//!    destroyed, never reused.
//! 2. **Command Execution Pipeline**: encodes a [`Command`], runs it over a
//!    pooled connection (authenticating first when required) and classifies
//!    the outcome.
//! 3. **Batching Orchestrator**: resolves keys to nodes, splits them into
//!    bounded batches, runs the batches with capped parallelism and merges
//!    partial results.
//!
//! [`CacheClient`] is the facade over all three.

mod batch;

pub mod auth;
pub mod cancel;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod key;
pub mod pipeline;
pub mod pool;
pub mod stats;
pub mod sync;

pub use auth::{Authenticator, SaslCredentials};
pub use cancel::CancelToken;
pub use client::{CacheClient, ClientBuilder, MultiResult, StoreOptions};
pub use command::{Command, CounterMode, Item, Operation, StoreMode};
pub use config::{BatchOptions, CircuitBreakerConfig, ClientConfig, PoolConfig};
pub use error::{AcquireError, ClientError, Result};
pub use key::WireKey;
pub use pipeline::{ExecutionResult, OperationResult, Outcome, Pipeline};
pub use pool::{ConnectionPool, PoolRegistry, PooledConnection};
pub use stats::{ErrorStatistics, WindowedErrorStatistics};
pub use sync::{CacheSync, SyncError, SyncRequest};

pub use corelib::Node;
