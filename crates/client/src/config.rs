//! Client configuration.
//!
//! Everything is plain data with serde defaults so a partial JSON document
//! is enough:
//!
//! ```json
//! {
//!   "nodes": ["cache-a=10.0.0.1:11211", "10.0.0.2:11211"],
//!   "pool": { "max_pool_size": 32 },
//!   "operation_timeout_ms": 500,
//!   "disabled_operations": ["flush"]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use corelib::LocatorConfig;
use serde::{Deserialize, Serialize};

use crate::command::Operation;
use crate::error::{ClientError, Result};

/// Per-node connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Hard cap on connections (idle + in use) per node.
    pub max_pool_size: usize,
    /// How long an acquire waits for a free slot.
    pub acquire_timeout_ms: u64,
    /// TCP connect timeout.
    pub connect_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 16,
            acquire_timeout_ms: 1_000,
            connect_timeout_ms: 1_000,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Per-call batching settings for multi-key operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Most keys sent to one node in one pipelined exchange.
    pub batch_size: usize,
    /// Most batches in flight at once across all nodes.
    pub max_parallelism: usize,
    /// Replicas written besides the primary (stores and deletes only).
    pub replication_factor: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            replication_factor: 0,
        }
    }
}

impl BatchOptions {
    pub fn new(batch_size: usize, max_parallelism: usize) -> Self {
        Self {
            batch_size,
            max_parallelism,
            replication_factor: 0,
        }
    }

    pub fn with_replication(mut self, replication_factor: usize) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub(crate) fn max_parallelism(&self) -> usize {
        self.max_parallelism.max(1)
    }
}

/// Per-node failure threshold consulted before each command.
///
/// Only takes effect when an [`ErrorStatistics`](crate::ErrorStatistics)
/// collaborator is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub max_errors: u32,
    pub window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_errors: 10,
            window_ms: 10_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Initial nodes as `key=host:port` or `host:port`.
    pub nodes: Vec<String>,
    pub locator: LocatorConfig,
    pub pool: PoolConfig,
    /// Defaults for multi-key calls that do not pass their own options.
    pub batch: BatchOptions,
    /// Bound on one request/response exchange once a connection is held.
    pub operation_timeout_ms: u64,
    /// Largest response body accepted from a node.
    pub max_body_len: u32,
    /// Operation families rejected locally without network I/O.
    pub disabled_operations: Vec<Operation>,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Most SASL round trips before authentication is abandoned.
    pub sasl_max_steps: usize,
    /// How long replica and sync fan-out may run after the primary write.
    pub fanout_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            locator: LocatorConfig::default(),
            pool: PoolConfig::default(),
            batch: BatchOptions::default(),
            operation_timeout_ms: 2_000,
            max_body_len: 20 * 1024 * 1024,
            disabled_operations: Vec::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
            sasl_max_steps: 8,
            fanout_timeout_ms: 1_000,
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.locator.validate()?;
        if self.pool.max_pool_size == 0 {
            return Err(ClientError::Config("pool.max_pool_size must be at least 1".into()));
        }
        if self.batch.batch_size == 0 {
            return Err(ClientError::Config("batch.batch_size must be at least 1".into()));
        }
        if self.batch.max_parallelism == 0 {
            return Err(ClientError::Config("batch.max_parallelism must be at least 1".into()));
        }
        if self.circuit_breaker.max_errors == 0 {
            return Err(ClientError::Config("circuit_breaker.max_errors must be at least 1".into()));
        }
        if self.circuit_breaker.window_ms == 0 {
            return Err(ClientError::Config("circuit_breaker.window_ms must be positive".into()));
        }
        if self.operation_timeout_ms == 0 {
            return Err(ClientError::Config("operation_timeout_ms must be positive".into()));
        }
        if self.max_body_len == 0 {
            return Err(ClientError::Config("max_body_len must be positive".into()));
        }
        if self.sasl_max_steps == 0 {
            return Err(ClientError::Config("sasl_max_steps must be at least 1".into()));
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.fanout_timeout_ms)
    }

    pub fn is_disabled(&self, operation: Operation) -> bool {
        operation != Operation::Auth && self.disabled_operations.contains(&operation)
    }
}
