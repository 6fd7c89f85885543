//! Error types for the client.

use std::time::Duration;

use thiserror::Error;

/// Result type for calls that fail as a whole.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that fail a whole client call.
///
/// Per-node failures (dead sockets, protocol status codes, pool timeouts)
/// are not errors at this level; they are reported as
/// [`ExecutionResult`](crate::ExecutionResult) values so one bad node never
/// fails a multi-key call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Key is empty.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    /// Reading a configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration file is not valid JSON for this schema.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Locator rejected its configuration or a node.
    #[error(transparent)]
    Locator(#[from] corelib::Error),
    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

/// Why a connection could not be taken from a pool.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("timed out after {0:?} waiting for a free connection")]
    Timeout(Duration),
    #[error("pool is closed")]
    Closed,
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}
