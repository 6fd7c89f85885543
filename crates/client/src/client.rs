//! # Cache Client
//!
//! Purpose: The facade callers use. It owns the node locator and the
//! execution pipeline, routes single-key commands to the owning node and
//! drives multi-key commands through the batching orchestrator.
//!
//! ## Multi-key semantics
//! - Reads return the union of hits from batches that succeeded; keys on a
//!   failed node are simply absent.
//! - Writes succeed only if every batch succeeded. The first failure and
//!   the affected keys are reported.
//! - With a replication factor, the primary write decides success.
//!   Replica writes and secondary-cache sync run afterwards, concurrently
//!   and bounded by the fan-out timeout, and only set the `replicated` and
//!   `synced` flags.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use corelib::{Node, NodeLocator, Partitioner, Xxh3Partitioner};
use protocol::extras;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::batch;
use crate::cancel::CancelToken;
use crate::command::{
    Command, Counter, CounterMode, Delete, Flush, Get, Item, MultiDelete, MultiGet, MultiStore, SaslList, Store,
    StoreMode, Touch, Version,
};
use crate::config::{BatchOptions, ClientConfig};
use crate::error::{ClientError, Result};
use crate::key::WireKey;
use crate::pipeline::{ExecutionResult, OperationResult, Outcome, Pipeline};
use crate::stats::ErrorStatistics;
use crate::sync::{CacheSync, SyncRequest};

/// Options for a single store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub ttl: Option<Duration>,
    pub flags: u32,
    /// Compare-and-swap guard; 0 stores unconditionally.
    pub cas: u64,
}

impl StoreOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }
}

/// Merged outcome of a multi-key write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiResult {
    /// Every key was written on its primary.
    pub success: bool,
    pub first_failure: Option<ExecutionResult>,
    /// Keys whose primary write failed, in no particular order.
    pub failed_keys: Vec<String>,
    /// Primary batches sent.
    pub batches: usize,
    /// Replica fan-out outcome; `None` when no replication was requested.
    pub replicated: Option<bool>,
    /// Secondary-cache outcome; `None` when no sync target is installed.
    pub synced: Option<bool>,
}

impl MultiResult {
    fn empty() -> Self {
        Self {
            success: true,
            first_failure: None,
            failed_keys: Vec::new(),
            batches: 0,
            replicated: None,
            synced: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Store { mode: StoreMode, expiration: u32 },
    Delete,
}

type Entries = Arc<HashMap<String, (WireKey, Bytes)>>;

#[derive(Debug, Default)]
struct WriteSummary {
    first_failure: Option<ExecutionResult>,
    failed_keys: Vec<String>,
    batches: usize,
}

/// Client for a cluster of memcached-compatible nodes.
pub struct CacheClient {
    locator: Arc<NodeLocator>,
    pipeline: Arc<Pipeline>,
    config: Arc<ClientConfig>,
    sync_targets: Vec<Arc<dyn CacheSync>>,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("locator", &self.locator)
            .field("pipeline", &self.pipeline)
            .field("sync_targets", &self.sync_targets.len())
            .finish()
    }
}

impl CacheClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        ClientBuilder::new().with_config(config).build()
    }

    pub fn locator(&self) -> &Arc<NodeLocator> {
        &self.locator
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    pub fn add_node(&self, node: Node) -> bool {
        let added = self.locator.add_node(node);
        self.prune_pools();
        added
    }

    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = Node>) -> usize {
        let added = self.locator.add_nodes(nodes);
        self.prune_pools();
        added
    }

    /// Take a node off the ring and close its pool.
    ///
    /// Commands already routed to it finish or fail on their own.
    pub fn remove_node(&self, node_key: &str) -> bool {
        let removed = self.locator.remove_node(node_key);
        self.prune_pools();
        removed
    }

    pub fn remove_nodes<'a>(&self, node_keys: impl IntoIterator<Item = &'a str>) -> usize {
        let removed = self.locator.remove_nodes(node_keys);
        self.prune_pools();
        removed
    }

    /// Close pools of nodes no longer on the ring, including pools that a
    /// command routed before an earlier removal opened afterwards.
    fn prune_pools(&self) {
        let snapshot = self.locator.snapshot();
        self.pipeline.registry().retain(|key| snapshot.contains(key));
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.locator.get_all_nodes()
    }

    /// Close every pool. The client stays usable; pools are recreated on
    /// demand.
    pub fn shutdown(&self) {
        self.pipeline.registry().close_all();
        info!("closed all connection pools");
    }

    // ------------------------------------------------------------------
    // Single-key operations
    // ------------------------------------------------------------------

    fn wire_key(&self, key: &str) -> Result<WireKey> {
        WireKey::new(key, self.locator.partitioner().as_ref())
    }

    async fn run_on_owner(&self, key: &str, mut command: Command) -> (ExecutionResult, Command) {
        let Some(node) = self.locator.get_node(key) else {
            return (ExecutionResult::no_node(), command);
        };
        let result = self.pipeline.execute(&node, &mut command, &CancelToken::new()).await;
        (result, command)
    }

    pub async fn get(&self, key: &str) -> Result<OperationResult<Item>> {
        let command = Command::Get(Get::new(self.wire_key(key)?));
        let (result, command) = self.run_on_owner(key, command).await;
        let item = match command {
            Command::Get(mut get) => get.take_item(),
            _ => None,
        };
        Ok(OperationResult::new(result, item))
    }

    /// Store `value` under `key`; the returned value is the new CAS.
    pub async fn store(
        &self,
        mode: StoreMode,
        key: &str,
        value: impl Into<Bytes>,
        options: StoreOptions,
    ) -> Result<OperationResult<u64>> {
        let store = Store::new(mode, self.wire_key(key)?, value.into())
            .with_flags(options.flags)
            .with_expiration(extras::encode_expiry(options.ttl))
            .with_cas(options.cas);
        let (result, command) = self.run_on_owner(key, Command::Store(store)).await;
        let cas = match command {
            Command::Store(store) => store.stored_cas(),
            _ => None,
        };
        Ok(OperationResult::new(result, cas))
    }

    pub async fn set(&self, key: &str, value: impl Into<Bytes>, ttl: Option<Duration>) -> Result<OperationResult<u64>> {
        let options = StoreOptions { ttl, ..StoreOptions::default() };
        self.store(StoreMode::Set, key, value, options).await
    }

    pub async fn add(&self, key: &str, value: impl Into<Bytes>, ttl: Option<Duration>) -> Result<OperationResult<u64>> {
        let options = StoreOptions { ttl, ..StoreOptions::default() };
        self.store(StoreMode::Add, key, value, options).await
    }

    pub async fn replace(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> Result<OperationResult<u64>> {
        let options = StoreOptions { ttl, ..StoreOptions::default() };
        self.store(StoreMode::Replace, key, value, options).await
    }

    pub async fn append(&self, key: &str, value: impl Into<Bytes>) -> Result<OperationResult<u64>> {
        self.store(StoreMode::Append, key, value, StoreOptions::default()).await
    }

    pub async fn prepend(&self, key: &str, value: impl Into<Bytes>) -> Result<OperationResult<u64>> {
        self.store(StoreMode::Prepend, key, value, StoreOptions::default()).await
    }

    pub async fn delete(&self, key: &str) -> Result<ExecutionResult> {
        let command = Command::Delete(Delete::new(self.wire_key(key)?));
        Ok(self.run_on_owner(key, command).await.0)
    }

    /// Delete only if the item's CAS still matches.
    pub async fn delete_cas(&self, key: &str, cas: u64) -> Result<ExecutionResult> {
        let command = Command::Delete(Delete::new(self.wire_key(key)?).with_cas(cas));
        Ok(self.run_on_owner(key, command).await.0)
    }

    /// Add `delta` to a counter.
    ///
    /// A missing counter is created with `initial` when given; otherwise the
    /// call fails with key-not-found.
    pub async fn increment(
        &self,
        key: &str,
        delta: u64,
        initial: Option<u64>,
        ttl: Option<Duration>,
    ) -> Result<OperationResult<u64>> {
        self.counter(CounterMode::Increment, key, delta, initial, ttl).await
    }

    /// Subtract `delta` from a counter; servers clamp at zero.
    pub async fn decrement(
        &self,
        key: &str,
        delta: u64,
        initial: Option<u64>,
        ttl: Option<Duration>,
    ) -> Result<OperationResult<u64>> {
        self.counter(CounterMode::Decrement, key, delta, initial, ttl).await
    }

    async fn counter(
        &self,
        mode: CounterMode,
        key: &str,
        delta: u64,
        initial: Option<u64>,
        ttl: Option<Duration>,
    ) -> Result<OperationResult<u64>> {
        let counter = Counter::new(mode, self.wire_key(key)?, delta, initial)
            .with_expiration(extras::encode_expiry(ttl));
        let (result, command) = self.run_on_owner(key, Command::Counter(counter)).await;
        let value = match command {
            Command::Counter(counter) => counter.value(),
            _ => None,
        };
        Ok(OperationResult::new(result, value))
    }

    /// Reset the expiration of an existing item.
    pub async fn touch(&self, key: &str, ttl: Option<Duration>) -> Result<ExecutionResult> {
        let command = Command::Touch(Touch::new(self.wire_key(key)?, extras::encode_expiry(ttl)));
        Ok(self.run_on_owner(key, command).await.0)
    }

    // ------------------------------------------------------------------
    // Cluster-wide operations
    // ------------------------------------------------------------------

    async fn on_every_node(&self, make: impl Fn() -> Command) -> Vec<(Arc<Node>, ExecutionResult, Command)> {
        let nodes = self.locator.get_all_nodes();
        let parallelism = nodes.len();
        let batches = nodes.into_iter().map(|node| (node, vec![make()])).collect();
        let pipeline = Arc::clone(&self.pipeline);
        let mut results = batch::run(batches, parallelism, &CancelToken::new(), |node, commands| {
            let pipeline = Arc::clone(&pipeline);
            async move {
                let mut command = commands.into_iter().next().unwrap_or(Command::Noop);
                let result = pipeline.execute(&node, &mut command, &CancelToken::new()).await;
                (node, result, command)
            }
        })
        .await
        .unwrap_or_default();
        results.sort_by(|a, b| a.0.key().cmp(b.0.key()));
        results
    }

    /// Invalidate every item on every node, optionally after `delay`.
    pub async fn flush_all(&self, delay: Option<Duration>) -> Vec<(Arc<Node>, ExecutionResult)> {
        let delay = extras::encode_expiry(delay);
        self.on_every_node(|| Command::Flush(Flush::new(delay)))
            .await
            .into_iter()
            .map(|(node, result, _)| (node, result))
            .collect()
    }

    /// Server version of every node.
    pub async fn versions(&self) -> Vec<(Arc<Node>, OperationResult<String>)> {
        self.on_every_node(|| Command::Version(Version::default()))
            .await
            .into_iter()
            .map(|(node, result, command)| {
                let version = match command {
                    Command::Version(mut version) => version.take(),
                    _ => None,
                };
                (node, OperationResult::new(result, version))
            })
            .collect()
    }

    /// Round-trip a no-op to every node.
    pub async fn ping(&self) -> Vec<(Arc<Node>, ExecutionResult)> {
        self.on_every_node(|| Command::Noop)
            .await
            .into_iter()
            .map(|(node, result, _)| (node, result))
            .collect()
    }

    /// SASL mechanisms each node offers.
    pub async fn sasl_mechanisms(&self) -> Vec<(Arc<Node>, OperationResult<Vec<String>>)> {
        self.on_every_node(|| Command::SaslList(SaslList::default()))
            .await
            .into_iter()
            .map(|(node, result, command)| {
                let mechanisms = match command {
                    Command::SaslList(list) if result.is_success() => Some(list.mechanisms().to_vec()),
                    _ => None,
                };
                (node, OperationResult::new(result, mechanisms))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Multi-key operations
    // ------------------------------------------------------------------

    /// Fetch many keys. Keys that miss, or that live on a node that failed,
    /// are absent from the map.
    pub async fn multi_get<K>(
        &self,
        keys: &[K],
        options: &BatchOptions,
        cancel: &CancelToken,
    ) -> Result<HashMap<String, Item>>
    where
        K: AsRef<str> + Sync,
    {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let mut wire = HashMap::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref();
            match self.wire_key(key) {
                Ok(wire_key) => {
                    wire.insert(key.to_owned(), wire_key);
                }
                Err(err) => debug!(error = %err, "skipping key"),
            }
        }
        if wire.is_empty() {
            return Ok(HashMap::new());
        }

        let assignment = self.locator.get_nodes(keys, 0);
        if assignment.is_empty() {
            warn!(keys = wire.len(), "multi-get with no nodes on the ring");
            return Ok(HashMap::new());
        }
        let per_node = assignment.into_iter().map(|(node, assigned)| {
            let batch: Vec<WireKey> = assigned.iter().filter_map(|key| wire.get(key).cloned()).collect();
            (node, batch)
        });
        let batches = batch::split(per_node, options.batch_size());
        debug!(keys = wire.len(), batches = batches.len(), "multi-get");

        let pipeline = Arc::clone(&self.pipeline);
        let results = batch::run(batches, options.max_parallelism(), cancel, |node, keys| {
            let pipeline = Arc::clone(&pipeline);
            let cancel = cancel.clone();
            async move {
                let mut command = Command::MultiGet(MultiGet::new(keys));
                let result = pipeline.execute(&node, &mut command, &cancel).await;
                (node, result, command)
            }
        })
        .await?;

        let mut items = HashMap::with_capacity(wire.len());
        for (node, result, command) in results {
            if result.outcome == Outcome::Cancelled {
                return Err(ClientError::Cancelled);
            }
            if !result.is_success() {
                debug!(node = node.key(), %result, "multi-get batch failed; its keys are omitted");
                continue;
            }
            if let Command::MultiGet(mut get) = command {
                for (key, status) in get.errors() {
                    debug!(node = node.key(), key = %key, %status, "multi-get key failed");
                }
                items.extend(get.take_items());
            }
        }
        Ok(items)
    }

    /// Store many items with one mode and expiration.
    pub async fn multi_store(
        &self,
        mode: StoreMode,
        items: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
        options: &BatchOptions,
        cancel: &CancelToken,
    ) -> Result<MultiResult> {
        let kind = WriteKind::Store {
            mode,
            expiration: extras::encode_expiry(ttl),
        };
        let sync = |items: Vec<(String, Bytes)>| SyncRequest::Store { mode, items, ttl };
        self.multi_write(kind, items, options, cancel, sync).await
    }

    /// Delete many keys. Keys that are already absent count as deleted.
    pub async fn multi_delete<K>(&self, keys: &[K], options: &BatchOptions, cancel: &CancelToken) -> Result<MultiResult>
    where
        K: AsRef<str>,
    {
        let items = keys
            .iter()
            .map(|key| (key.as_ref().to_owned(), Bytes::new()))
            .collect();
        let sync = |items: Vec<(String, Bytes)>| SyncRequest::Delete {
            keys: items.into_iter().map(|(key, _)| key).collect(),
        };
        self.multi_write(WriteKind::Delete, items, options, cancel, sync).await
    }

    /// Store one item on its primary and `replication_factor` replicas.
    pub async fn store_replicated(
        &self,
        mode: StoreMode,
        key: &str,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
        replication_factor: usize,
    ) -> Result<MultiResult> {
        let options = BatchOptions {
            replication_factor,
            ..self.config.batch.clone()
        };
        let items = vec![(key.to_owned(), value.into())];
        self.multi_store(mode, items, ttl, &options, &CancelToken::new()).await
    }

    async fn multi_write(
        &self,
        kind: WriteKind,
        items: Vec<(String, Bytes)>,
        options: &BatchOptions,
        cancel: &CancelToken,
        to_sync: impl FnOnce(Vec<(String, Bytes)>) -> SyncRequest,
    ) -> Result<MultiResult> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let mut result = MultiResult::empty();
        let mut entries = HashMap::with_capacity(items.len());
        for (key, value) in items {
            match self.wire_key(&key) {
                Ok(wire) => {
                    entries.insert(key, (wire, value));
                }
                Err(err) => {
                    result.first_failure.get_or_insert_with(|| {
                        ExecutionResult::new(Outcome::Failed(protocol::Status::InvalidArguments), err.to_string())
                    });
                    result.failed_keys.push(key);
                }
            }
        }
        if entries.is_empty() {
            result.success = result.failed_keys.is_empty();
            return Ok(result);
        }

        let keys: Vec<String> = entries.keys().cloned().collect();
        let (primary, replicas) = self.assign(&keys, options.replication_factor);
        if primary.is_empty() {
            warn!(keys = keys.len(), "multi-key write with no nodes on the ring");
            result.success = false;
            result.first_failure.get_or_insert_with(ExecutionResult::no_node);
            result.failed_keys.extend(keys);
            return Ok(result);
        }

        let entries: Entries = Arc::new(entries);
        let summary = self.write_batches(kind, primary, &entries, options, cancel).await?;
        result.batches = summary.batches;
        if result.first_failure.is_none() {
            result.first_failure = summary.first_failure;
        }
        result.failed_keys.extend(summary.failed_keys);
        result.success = result.first_failure.is_none() && result.failed_keys.is_empty();

        // Fan-out only what the primaries accepted.
        let failed: HashSet<&str> = result.failed_keys.iter().map(String::as_str).collect();
        let written: Vec<(String, Bytes)> = entries
            .iter()
            .filter(|(key, _)| !failed.contains(key.as_str()))
            .map(|(key, (_, value))| (key.clone(), value.clone()))
            .collect();
        if written.is_empty() {
            return Ok(result);
        }
        let written_keys: HashSet<&str> = written.iter().map(|(key, _)| key.as_str()).collect();
        let replicas: HashMap<Arc<Node>, Vec<String>> = replicas
            .into_iter()
            .map(|(node, keys)| {
                let keys: Vec<String> = keys.into_iter().filter(|k| written_keys.contains(k.as_str())).collect();
                (node, keys)
            })
            .filter(|(_, keys)| !keys.is_empty())
            .collect();

        let replicate = async {
            if options.replication_factor == 0 {
                return None;
            }
            match self.write_batches(kind, replicas, &entries, options, cancel).await {
                Ok(summary) => {
                    if let Some(failure) = &summary.first_failure {
                        warn!(%failure, keys = summary.failed_keys.len(), "replica write failed");
                    }
                    Some(summary.first_failure.is_none())
                }
                Err(_) => Some(false),
            }
        };
        let sync_request = to_sync(written);
        let synchronize = async {
            if self.sync_targets.is_empty() {
                return None;
            }
            Some(self.sync_all(sync_request).await)
        };

        let fanout = async { tokio::join!(replicate, synchronize) };
        let (replicated, synced) = match tokio::time::timeout(self.config.fanout_timeout(), fanout).await {
            Ok(flags) => flags,
            Err(_) => {
                warn!(timeout = ?self.config.fanout_timeout(), "fan-out timed out");
                (
                    (options.replication_factor > 0).then_some(false),
                    (!self.sync_targets.is_empty()).then_some(false),
                )
            }
        };
        result.replicated = replicated;
        result.synced = synced;
        Ok(result)
    }

    /// Primary and replica key assignment for a write.
    fn assign(
        &self,
        keys: &[String],
        replication_factor: usize,
    ) -> (HashMap<Arc<Node>, Vec<String>>, HashMap<Arc<Node>, Vec<String>>) {
        if replication_factor == 0 {
            let primary = self
                .locator
                .get_nodes(keys, 0)
                .into_iter()
                .map(|(node, keys)| (node, keys.into_iter().collect()))
                .collect();
            return (primary, HashMap::new());
        }
        let mut primary: HashMap<Arc<Node>, Vec<String>> = HashMap::new();
        let mut replicas: HashMap<Arc<Node>, Vec<String>> = HashMap::new();
        for (key, route) in self.locator.route_keys(keys, replication_factor) {
            for replica in route.replicas() {
                replicas.entry(Arc::clone(replica)).or_default().push(key.clone());
            }
            primary.entry(Arc::clone(route.primary())).or_default().push(key);
        }
        (primary, replicas)
    }

    async fn write_batches(
        &self,
        kind: WriteKind,
        assignment: HashMap<Arc<Node>, Vec<String>>,
        entries: &Entries,
        options: &BatchOptions,
        cancel: &CancelToken,
    ) -> Result<WriteSummary> {
        let batches = batch::split(assignment, options.batch_size());
        let mut summary = WriteSummary {
            batches: batches.len(),
            ..WriteSummary::default()
        };
        let pipeline = Arc::clone(&self.pipeline);
        let results = batch::run(batches, options.max_parallelism(), cancel, |node, keys| {
            let pipeline = Arc::clone(&pipeline);
            let entries = Arc::clone(entries);
            let cancel = cancel.clone();
            async move {
                let mut command = write_command(kind, &keys, &entries);
                let result = pipeline.execute(&node, &mut command, &cancel).await;
                (node, keys, result, command)
            }
        })
        .await?;

        for (node, keys, result, command) in results {
            if result.outcome == Outcome::Cancelled {
                return Err(ClientError::Cancelled);
            }
            if result.is_success() {
                continue;
            }
            debug!(node = node.key(), %result, keys = keys.len(), "write batch failed");
            let rejected = match (&result.outcome, &command) {
                (Outcome::Failed(_), Command::MultiStore(store)) => Some(store.failures()),
                (Outcome::Failed(_), Command::MultiDelete(delete)) => Some(delete.failures()),
                _ => None,
            };
            match rejected {
                Some(failures) => summary
                    .failed_keys
                    .extend(failures.iter().map(|(key, _)| key.clone())),
                None => summary.failed_keys.extend(keys),
            }
            summary.first_failure.get_or_insert(result);
        }
        Ok(summary)
    }

    async fn sync_all(&self, request: SyncRequest) -> bool {
        let request = Arc::new(request);
        let mut tasks = JoinSet::new();
        for target in &self.sync_targets {
            let target = Arc::clone(target);
            let request = Arc::clone(&request);
            tasks.spawn(async move { target.replicate(&request).await });
        }
        let mut synced = true;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(error = %err, "secondary cache sync failed");
                    synced = false;
                }
                Err(err) => {
                    warn!(error = %err, "secondary cache sync task failed");
                    synced = false;
                }
            }
        }
        synced
    }
}

fn write_command(kind: WriteKind, keys: &[String], entries: &HashMap<String, (WireKey, Bytes)>) -> Command {
    match kind {
        WriteKind::Store { mode, expiration } => {
            let batch = keys
                .iter()
                .filter_map(|key| entries.get(key))
                .map(|(wire, value)| (wire.clone(), value.clone()))
                .collect();
            Command::MultiStore(MultiStore::new(mode, batch, expiration))
        }
        WriteKind::Delete => {
            let batch = keys
                .iter()
                .filter_map(|key| entries.get(key))
                .map(|(wire, _)| wire.clone())
                .collect();
            Command::MultiDelete(MultiDelete::new(batch))
        }
    }
}

/// Composition root for [`CacheClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    partitioner: Option<Arc<dyn Partitioner>>,
    nodes: Vec<Node>,
    authenticator: Option<Arc<dyn Authenticator>>,
    error_stats: Option<Arc<dyn ErrorStatistics>>,
    sync_targets: Vec<Arc<dyn CacheSync>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            partitioner: None,
            nodes: Vec::new(),
            authenticator: None,
            error_stats: None,
            sync_targets: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_partitioner(mut self, partitioner: Arc<dyn Partitioner>) -> Self {
        self.partitioner = Some(partitioner);
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

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_error_statistics(mut self, stats: Arc<dyn ErrorStatistics>) -> Self {
        self.error_stats = Some(stats);
        self
    }

    pub fn with_sync(mut self, target: Arc<dyn CacheSync>) -> Self {
        self.sync_targets.push(target);
        self
    }

    pub fn build(self) -> Result<CacheClient> {
        self.config.validate()?;
        let partitioner = self.partitioner.unwrap_or_else(|| Arc::new(Xxh3Partitioner));
        let locator = NodeLocator::try_new(self.config.locator.clone(), partitioner)?;

        let mut nodes = self
            .config
            .nodes
            .iter()
            .map(|entry| Node::parse(entry))
            .collect::<corelib::Result<Vec<_>>>()?;
        nodes.extend(self.nodes);
        locator.add_nodes(nodes);

        let config = Arc::new(self.config);
        let mut pipeline = Pipeline::new(Arc::clone(&config));
        if let Some(authenticator) = self.authenticator {
            pipeline = pipeline.with_authenticator(authenticator);
        }
        if let Some(stats) = self.error_stats {
            pipeline = pipeline.with_error_statistics(stats);
        }
        info!(nodes = locator.node_count(), "cache client ready");

        Ok(CacheClient {
            locator: Arc::new(locator),
            pipeline: Arc::new(pipeline),
            config,
            sync_targets: self.sync_targets,
        })
    }
}
