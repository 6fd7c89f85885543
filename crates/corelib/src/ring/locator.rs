//! Concurrent node locator.
//!
//! # Concurrency Model
//!
//! The current ring is an `Arc<RingSnapshot>` behind a read/write lock. The
//! read lock is held only long enough to clone the `Arc`, so readers never
//! wait on a rebuild. Writers serialize on a separate mutex, build the next
//! snapshot without blocking readers, then swap the pointer. A reader sees
//! either the ring before a mutation or the ring after it, never a node with
//! only some of its virtual nodes.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::Result;
use crate::node::Node;
use crate::partitioner::{Partitioner, Xxh3Partitioner};
use crate::ring::config::LocatorConfig;
use crate::ring::replicated::ReplicatedNode;
use crate::ring::snapshot::RingSnapshot;
use crate::token::Token;

/// Maps keys to nodes on a consistent hash ring.
pub struct NodeLocator {
    partitioner: Arc<dyn Partitioner>,
    config: LocatorConfig,
    ring: RwLock<Arc<RingSnapshot>>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for NodeLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("NodeLocator")
            .field("partitioner", &self.partitioner.name())
            .field("nodes", &snapshot.node_count())
            .field("tokens", &snapshot.token_count())
            .finish()
    }
}

impl Default for NodeLocator {
    fn default() -> Self {
        Self::new(LocatorConfig::default(), Arc::new(Xxh3Partitioner))
    }
}

impl NodeLocator {
    pub fn new(config: LocatorConfig, partitioner: Arc<dyn Partitioner>) -> Self {
        Self {
            partitioner,
            config,
            ring: RwLock::new(Arc::new(RingSnapshot::empty())),
            writer: Mutex::new(()),
        }
    }

    /// Like [`new`](Self::new), rejecting an invalid configuration.
    pub fn try_new(config: LocatorConfig, partitioner: Arc<dyn Partitioner>) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config, partitioner))
    }

    pub fn builder() -> LocatorBuilder {
        LocatorBuilder::new()
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    pub fn partitioner(&self) -> &Arc<dyn Partitioner> {
        &self.partitioner
    }

    /// Current ring.
    #[inline]
    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        self.ring.read().clone()
    }

    #[inline]
    pub fn token_for(&self, key: &str) -> Token {
        self.partitioner.partition(key.as_bytes())
    }

    pub fn node_count(&self) -> usize {
        self.snapshot().node_count()
    }

    pub fn token_count(&self) -> usize {
        self.snapshot().token_count()
    }

    pub fn contains(&self, node_key: &str) -> bool {
        self.snapshot().contains(node_key)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Add a node. Returns false if a node with the same key is present.
    pub fn add_node(&self, node: Node) -> bool {
        self.add_nodes(std::iter::once(node)) == 1
    }

    /// Add several nodes in one ring rebuild. Returns how many were new.
    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = Node>) -> usize {
        let _guard = self.writer.lock();
        let current = self.snapshot();
        let (next, added) =
            current.with_nodes(&*self.partitioner, self.config.virtual_nodes, nodes);
        if added.is_empty() {
            return 0;
        }
        *self.ring.write() = Arc::new(next);
        for node in &added {
            info!(node = %node, vnodes = self.config.virtual_nodes, "node added to ring");
        }
        added.len()
    }

    /// Remove the node with `node_key`. Returns false if it was absent.
    pub fn remove_node(&self, node_key: &str) -> bool {
        self.remove_nodes(std::iter::once(node_key)) == 1
    }

    /// Remove several nodes in one ring rebuild. Returns how many were present.
    pub fn remove_nodes<'a>(&self, node_keys: impl IntoIterator<Item = &'a str>) -> usize {
        let removed: HashSet<&str> = node_keys.into_iter().collect();
        if removed.is_empty() {
            return 0;
        }
        let _guard = self.writer.lock();
        let current = self.snapshot();
        let (next, gone) = current.without_nodes(&removed);
        if gone.is_empty() {
            return 0;
        }
        *self.ring.write() = Arc::new(next);
        for node in &gone {
            info!(node = %node, "node removed from ring");
        }
        gone.len()
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Node owning `key`, or `None` when the ring is empty.
    pub fn get_node(&self, key: &str) -> Option<Arc<Node>> {
        let token = self.token_for(key);
        self.snapshot().node_for_token(token).cloned()
    }

    /// Group keys by owning node.
    ///
    /// With `replication_factor == 0` every key appears under exactly one
    /// node. Otherwise each key appears under its primary and under each of
    /// its own replicas.
    pub fn get_nodes<K>(&self, keys: &[K], replication_factor: usize) -> HashMap<Arc<Node>, HashSet<String>>
    where
        K: AsRef<str> + Sync,
    {
        if replication_factor == 0 {
            return self.group(keys, |snapshot, token| snapshot.node_for_token(token).cloned());
        }

        let mut flat: HashMap<Arc<Node>, HashSet<String>> = HashMap::new();
        for (key, replicated) in self.resolve(keys, |snapshot, token| {
            snapshot.replicas_for_token(token, replication_factor)
        }) {
            for node in replicated.all() {
                flat.entry(Arc::clone(node)).or_default().insert(key.clone());
            }
        }
        flat
    }

    /// Group keys by primary, carrying up to `replication_factor` replicas.
    ///
    /// Map keys compare by primary only, so the replicas carried by a map key
    /// are those of one of its keys. Keys sharing a primary can have
    /// different successors; use [`NodeLocator::route_keys`] when every key's
    /// own replicas matter.
    pub fn get_replicated_nodes<K>(
        &self,
        keys: &[K],
        replication_factor: usize,
    ) -> HashMap<ReplicatedNode, HashSet<String>>
    where
        K: AsRef<str> + Sync,
    {
        self.group(keys, move |snapshot, token| {
            snapshot.replicas_for_token(token, replication_factor)
        })
    }

    /// Primary and replicas of every key, resolved against one snapshot.
    ///
    /// Replicas are the distinct nodes met walking clockwise from the key's
    /// own token.
    pub fn route_keys<K>(&self, keys: &[K], replication_factor: usize) -> HashMap<String, ReplicatedNode>
    where
        K: AsRef<str> + Sync,
    {
        self.resolve(keys, move |snapshot, token| {
            snapshot.replicas_for_token(token, replication_factor)
        })
        .into_iter()
        .collect()
    }

    /// Distinct physical nodes currently on the ring.
    pub fn get_all_nodes(&self) -> Vec<Arc<Node>> {
        self.snapshot().nodes().to_vec()
    }

    fn group<K, T, F>(&self, keys: &[K], route: F) -> HashMap<T, HashSet<String>>
    where
        K: AsRef<str> + Sync,
        T: Eq + Hash + Send,
        F: Fn(&RingSnapshot, Token) -> Option<T> + Sync,
    {
        let mut grouped: HashMap<T, HashSet<String>> = HashMap::new();
        for (key, target) in self.resolve(keys, route) {
            grouped.entry(target).or_default().insert(key);
        }
        grouped
    }

    /// Route every key against one snapshot.
    ///
    /// Large batches are split across scoped threads. Callers build maps from
    /// the output, so the order in which chunks finish does not matter.
    fn resolve<K, T, F>(&self, keys: &[K], route: F) -> Vec<(String, T)>
    where
        K: AsRef<str> + Sync,
        T: Send,
        F: Fn(&RingSnapshot, Token) -> Option<T> + Sync,
    {
        let snapshot = self.snapshot();
        if snapshot.is_empty() || keys.is_empty() {
            return Vec::new();
        }

        let threads = self.config.resolve_parallelism.max(1);
        let partitioner = &*self.partitioner;
        if threads == 1 || keys.len() < self.config.parallel_threshold {
            return resolve_chunk(&snapshot, partitioner, keys, &route);
        }

        let chunk_size = (keys.len() + threads - 1) / threads;
        debug!(keys = keys.len(), threads, chunk_size, "resolving keys in parallel");
        let merged = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = keys
                .chunks(chunk_size)
                .map(|chunk| {
                    let snapshot = &*snapshot;
                    let route = &route;
                    scope.spawn(move |_| resolve_chunk(snapshot, partitioner, chunk, route))
                })
                .collect();

            let mut merged = Vec::with_capacity(keys.len());
            for handle in handles {
                match handle.join() {
                    Ok(partial) => merged.extend(partial),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            merged
        });

        match merged {
            Ok(merged) => merged,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

fn resolve_chunk<K, T, F>(
    snapshot: &RingSnapshot,
    partitioner: &dyn Partitioner,
    keys: &[K],
    route: &F,
) -> Vec<(String, T)>
where
    K: AsRef<str>,
    F: Fn(&RingSnapshot, Token) -> Option<T>,
{
    keys.iter()
        .filter_map(|key| {
            let key = key.as_ref();
            route(snapshot, partitioner.partition(key.as_bytes())).map(|target| (key.to_owned(), target))
        })
        .collect()
}

/// Builder for a [`NodeLocator`] with an initial set of nodes.
///
/// # Example
///
/// ```rust
/// use corelib::{LocatorBuilder, Node};
///
/// let locator = LocatorBuilder::new()
///     .with_vnodes(64)
///     .add_node(Node::from_endpoint("10.0.0.1:11211"))
///     .add_node(Node::from_endpoint("10.0.0.2:11211"))
///     .build();
/// assert_eq!(locator.token_count(), 128);
/// ```
pub struct LocatorBuilder {
    config: LocatorConfig,
    partitioner: Arc<dyn Partitioner>,
    nodes: Vec<Node>,
}

impl Default for LocatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocatorBuilder {
    pub fn new() -> Self {
        Self {
            config: LocatorConfig::default(),
            partitioner: Arc::new(Xxh3Partitioner),
            nodes: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: LocatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Virtual nodes per physical node (default 256).
    pub fn with_vnodes(mut self, virtual_nodes: u32) -> Self {
        self.config.virtual_nodes = virtual_nodes;
        self
    }

    pub fn with_partitioner(mut self, partitioner: Arc<dyn Partitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_nodes(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    pub fn build(self) -> NodeLocator {
        let locator = NodeLocator::new(self.config, self.partitioner);
        locator.add_nodes(self.nodes);
        locator
    }

    /// Like [`build`](Self::build), rejecting an invalid configuration.
    pub fn try_build(self) -> Result<NodeLocator> {
        self.config.validate()?;
        Ok(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_and_sequential_resolution_agree() {
        let nodes = (0..5).map(|i| Node::from_endpoint(format!("10.0.0.{}:11211", i)));
        let sequential = LocatorBuilder::new()
            .with_config(LocatorConfig {
                parallel_threshold: usize::MAX,
                ..LocatorConfig::default()
            })
            .add_nodes(nodes.clone())
            .build();
        let parallel = LocatorBuilder::new()
            .with_config(LocatorConfig {
                parallel_threshold: 1,
                resolve_parallelism: 4,
                ..LocatorConfig::default()
            })
            .add_nodes(nodes)
            .build();

        let keys: Vec<String> = (0..5000).map(|i| format!("key-{}", i)).collect();
        assert_eq!(sequential.get_nodes(&keys, 0), parallel.get_nodes(&keys, 0));
        assert_eq!(
            sequential.get_replicated_nodes(&keys, 2).len(),
            parallel.get_replicated_nodes(&keys, 2).len()
        );
        let chains = |locator: &NodeLocator| -> HashMap<String, Vec<String>> {
            locator
                .route_keys(&keys, 2)
                .into_iter()
                .map(|(key, route)| (key, route.all().map(|n| n.key().to_owned()).collect()))
                .collect()
        };
        assert_eq!(chains(&sequential), chains(&parallel));
    }

    #[test]
    fn test_get_nodes_with_replicas_flattens() {
        let locator = LocatorBuilder::new()
            .with_vnodes(32)
            .add_node(Node::from_endpoint("a:1"))
            .add_node(Node::from_endpoint("b:1"))
            .add_node(Node::from_endpoint("c:1"))
            .build();
        let assigned = locator.get_nodes(&["only-key"], 1);
        assert_eq!(assigned.len(), 2);
        assert!(assigned.values().all(|keys| keys.contains("only-key")));
    }

    #[test]
    fn test_route_keys_walks_from_each_key() {
        let locator = LocatorBuilder::new()
            .add_nodes((0..5).map(|i| Node::from_endpoint(format!("10.0.0.{}:11211", i))))
            .build();
        let keys: Vec<String> = (0..2000).map(|i| format!("key-{}", i)).collect();
        let snapshot = locator.snapshot();

        let routes = locator.route_keys(&keys, 1);
        assert_eq!(routes.len(), keys.len());
        for (key, route) in &routes {
            let expected = snapshot.replicas_for_token(locator.token_for(key), 1).unwrap();
            assert_eq!(route.primary(), expected.primary());
            assert_eq!(route.replicas(), expected.replicas(), "replicas of {}", key);
        }

        let flat = locator.get_nodes(&keys, 1);
        for (key, route) in &routes {
            for node in route.all() {
                assert!(flat[node].contains(key));
            }
        }
        let placements: usize = flat.values().map(HashSet::len).sum();
        assert_eq!(placements, keys.len() * 2);
    }

    #[test]
    fn test_try_build_rejects_zero_vnodes() {
        assert!(LocatorBuilder::new().with_vnodes(0).try_build().is_err());
    }
}
