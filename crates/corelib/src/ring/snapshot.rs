//! Immutable ring snapshot.
//!
//! A snapshot is a sorted arena of virtual nodes plus the list of physical
//! nodes they belong to. Snapshots are never edited: adding or removing a
//! node produces a new snapshot, so any reader holding an `Arc` to one sees
//! a consistent ring for as long as it keeps it.
//!
//! # Performance
//!
//! - **Lookup**: O(log n) binary search over n = nodes × virtual nodes
//! - **Replica walk**: O(r + skipped) after the lookup
//! - **Rebuild**: O(n log n), paid only by membership changes

use std::collections::HashSet;
use std::sync::Arc;

use crate::node::Node;
use crate::partitioner::Partitioner;
use crate::ring::replicated::ReplicatedNode;
use crate::token::Token;
use crate::vnode::VirtualNode;

/// Point-in-time view of the ring.
#[derive(Debug, Clone, Default)]
pub struct RingSnapshot {
    /// Virtual nodes sorted by `VirtualNode`'s total order.
    entries: Vec<VirtualNode>,
    /// Physical nodes sorted by key.
    nodes: Vec<Arc<Node>>,
}

impl RingSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot that adds every node in `added` not already present.
    ///
    /// Returns the new snapshot and the nodes that were actually added.
    pub(crate) fn with_nodes(
        &self,
        partitioner: &dyn Partitioner,
        virtual_nodes: u32,
        added: impl IntoIterator<Item = Node>,
    ) -> (Self, Vec<Arc<Node>>) {
        let mut nodes = self.nodes.clone();
        let mut entries = self.entries.clone();
        let mut inserted = Vec::new();

        for node in added {
            if let Err(pos) = nodes.binary_search_by(|n| n.key().cmp(node.key())) {
                let node = Arc::new(node);
                entries.extend(VirtualNode::for_node(partitioner, &node, virtual_nodes));
                nodes.insert(pos, Arc::clone(&node));
                inserted.push(node);
            }
        }

        if !inserted.is_empty() {
            entries.sort_unstable();
        }
        (Self { entries, nodes }, inserted)
    }

    /// Build a snapshot without any node whose key is in `removed`.
    ///
    /// Returns the new snapshot and the nodes that were actually removed.
    pub(crate) fn without_nodes(&self, removed: &HashSet<&str>) -> (Self, Vec<Arc<Node>>) {
        let (gone, nodes): (Vec<_>, Vec<_>) = self
            .nodes
            .iter()
            .cloned()
            .partition(|n| removed.contains(n.key()));
        let entries = if gone.is_empty() {
            self.entries.clone()
        } else {
            self.entries
                .iter()
                .filter(|e| !removed.contains(e.node.key()))
                .cloned()
                .collect()
        };
        (Self { entries, nodes }, gone)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of distinct physical nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of virtual node entries.
    #[inline]
    pub fn token_count(&self) -> usize {
        self.entries.len()
    }

    /// Physical nodes, sorted by key.
    #[inline]
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Virtual nodes in ring order.
    #[inline]
    pub fn entries(&self) -> &[VirtualNode] {
        &self.entries
    }

    pub fn contains(&self, node_key: &str) -> bool {
        self.nodes
            .binary_search_by(|n| n.key().cmp(node_key))
            .is_ok()
    }

    /// Index of the first entry at or after `token`, wrapping to 0.
    ///
    /// Returns `None` only for an empty ring.
    pub fn position(&self, token: Token) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self.entries.partition_point(|e| e.token < token);
        Some(if idx == self.entries.len() { 0 } else { idx })
    }

    /// Node owning `token`.
    pub fn node_for_token(&self, token: Token) -> Option<&Arc<Node>> {
        self.position(token).map(|idx| &self.entries[idx].node)
    }

    /// Primary plus up to `replication_factor` distinct successors.
    ///
    /// # Algorithm
    ///
    /// 1. Find the primary entry (clockwise search from the key's token)
    /// 2. Keep walking clockwise, skipping nodes already chosen
    /// 3. Stop after `min(replication_factor, node_count - 1)` replicas or
    ///    after one full turn of the ring
    ///
    /// Asking for more replicas than there are other nodes is not an error;
    /// the result simply holds every other node.
    pub fn replicas_for_token(&self, token: Token, replication_factor: usize) -> Option<ReplicatedNode> {
        let start = self.position(token)?;
        let primary = Arc::clone(&self.entries[start].node);
        let wanted = replication_factor.min(self.nodes.len() - 1);
        if wanted == 0 {
            return Some(ReplicatedNode::new(primary, Vec::new()));
        }

        let mut replicas = Vec::with_capacity(wanted);
        let mut seen: HashSet<&str> = HashSet::with_capacity(wanted + 1);
        seen.insert(primary.key());

        let len = self.entries.len();
        for offset in 1..len {
            let node = &self.entries[(start + offset) % len].node;
            if seen.insert(node.key()) {
                replicas.push(Arc::clone(node));
                if replicas.len() == wanted {
                    break;
                }
            }
        }

        Some(ReplicatedNode::new(primary, replicas))
    }
}
