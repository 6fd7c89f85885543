//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Invalid node configuration
    #[error("Invalid node: {0}")]
    InvalidNode(String),
    /// Invalid locator configuration
    #[error("Invalid locator configuration: {0}")]
    InvalidConfig(String),
    /// Ring operation failed
    #[error("Ring operation failed: {0}")]
    RingOperation(String),
}
