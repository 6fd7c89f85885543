//! Node abstractions for the consistent hash ring.
//!
//! Nodes represent cache servers participating in the ring. They are
//! supplied by whoever manages membership and never created by the ring
//! itself.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// Physical cache server.
///
/// Identity is the `key` alone: two nodes with the same key are the same
/// node even if their endpoints differ. Keep this struct small and cheap to
/// clone; connections and other mutable state live in the client crate.
#[derive(Clone, Debug)]
pub struct Node {
    key: String,
    endpoint: String,
}

impl Node {
    /// Construct a node with a stable key and a transport endpoint.
    pub fn new(key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Construct a node whose key is its `host:port` endpoint.
    pub fn from_endpoint(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            key: endpoint.clone(),
            endpoint,
        }
    }

    /// Parse a `key=host:port` or `host:port` string.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (key, endpoint) = match text.split_once('=') {
            Some((key, endpoint)) => (key.trim(), endpoint.trim()),
            None => (text, text),
        };
        if key.is_empty() || endpoint.is_empty() {
            return Err(Error::InvalidNode(format!("empty key or endpoint in {:?}", text)));
        }
        if !endpoint.contains(':') {
            return Err(Error::InvalidNode(format!("endpoint {:?} has no port", endpoint)));
        }
        Ok(Self::new(key, endpoint))
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key == self.endpoint {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}({})", self.key, self.endpoint)
        }
    }
}
