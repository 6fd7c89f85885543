//! Secondary cache synchronization.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::command::StoreMode;

/// A write to mirror into a secondary cache after the primary succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    Store {
        mode: StoreMode,
        items: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
    },
    Delete {
        keys: Vec<String>,
    },
}

impl SyncRequest {
    pub fn len(&self) -> usize {
        match self {
            SyncRequest::Store { items, .. } => items.len(),
            SyncRequest::Delete { keys } => keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
#[error("sync to {target} failed: {message}")]
pub struct SyncError {
    pub target: String,
    pub message: String,
}

/// A secondary cache that mirrors successful writes.
///
/// Failures never fail the caller's write; they clear the `synced` flag of
/// the result.
#[async_trait]
pub trait CacheSync: Send + Sync {
    fn name(&self) -> &str;

    async fn replicate(&self, request: &SyncRequest) -> Result<(), SyncError>;
}
