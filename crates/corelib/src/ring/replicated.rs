//! Primary node plus its ordered replicas.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::node::Node;

/// A primary node and the distinct nodes that follow it clockwise.
///
/// Identity is the primary alone, so a key-to-node assignment keyed by
/// `ReplicatedNode` groups keys by primary. Replicas are walked from a
/// single key's token; two keys with the same primary can have different
/// replicas, so per-key writes resolve each key's own chain.
#[derive(Clone, Debug)]
pub struct ReplicatedNode {
    primary: Arc<Node>,
    replicas: Vec<Arc<Node>>,
}

impl ReplicatedNode {
    pub fn new(primary: Arc<Node>, replicas: Vec<Arc<Node>>) -> Self {
        Self { primary, replicas }
    }

    #[inline]
    pub fn primary(&self) -> &Arc<Node> {
        &self.primary
    }

    /// Replicas in ring order, never containing the primary.
    #[inline]
    pub fn replicas(&self) -> &[Arc<Node>] {
        &self.replicas
    }

    /// Primary first, then replicas.
    pub fn all(&self) -> impl Iterator<Item = &Arc<Node>> {
        std::iter::once(&self.primary).chain(self.replicas.iter())
    }
}

impl PartialEq for ReplicatedNode {
    fn eq(&self, other: &Self) -> bool {
        self.primary == other.primary
    }
}

impl Eq for ReplicatedNode {}

impl Hash for ReplicatedNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.primary.hash(state);
    }
}

impl fmt::Display for ReplicatedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if !self.replicas.is_empty() {
            let replicas: Vec<&str> = self.replicas.iter().map(|n| n.key()).collect();
            write!(f, " -> [{}]", replicas.join(", "))?;
        }
        Ok(())
    }
}
