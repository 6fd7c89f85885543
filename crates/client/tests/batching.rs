mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use client::{
    BatchOptions, CacheClient, CacheSync, CancelToken, ClientConfig, ClientError, Node, PoolConfig, StoreMode,
    SyncError, SyncRequest,
};
use parking_lot::Mutex;
use protocol::MAX_KEY_LEN;
use support::{dead_endpoint, init_tracing, MockServer};

fn config() -> ClientConfig {
    ClientConfig {
        operation_timeout_ms: 2_000,
        pool: PoolConfig {
            max_pool_size: 8,
            acquire_timeout_ms: 1_000,
            connect_timeout_ms: 500,
        },
        ..ClientConfig::default()
    }
}

async fn cluster(count: usize) -> (Vec<MockServer>, CacheClient) {
    let mut servers = Vec::with_capacity(count);
    for _ in 0..count {
        servers.push(MockServer::start().await);
    }
    let client = CacheClient::builder()
        .with_config(config())
        .add_nodes(servers.iter().enumerate().map(|(i, s)| s.node(&format!("node-{i}"))))
        .build()
        .unwrap();
    (servers, client)
}

fn items(count: usize) -> Vec<(String, Bytes)> {
    (0..count)
        .map(|i| (format!("key:{i}"), Bytes::from(format!("value:{i}"))))
        .collect()
}

// ========================================================================
// Fan-out and merge
// ========================================================================

#[tokio::test]
async fn test_ten_thousand_keys_across_three_nodes() {
    init_tracing();
    let (servers, client) = cluster(3).await;
    let options = BatchOptions::new(1_000, 4);
    let cancel = CancelToken::new();

    let stored = client
        .multi_store(StoreMode::Set, items(10_000), None, &options, &cancel)
        .await
        .unwrap();
    assert!(stored.success, "{:?}", stored.first_failure);
    assert!(stored.failed_keys.is_empty());
    assert!(stored.batches >= 10);
    assert_eq!(stored.replicated, None);
    assert_eq!(stored.synced, None);

    let total: usize = servers.iter().map(MockServer::len).sum();
    assert_eq!(total, 10_000);
    assert!(servers.iter().all(|s| s.len() > 0));

    let keys: Vec<String> = (0..10_000).map(|i| format!("key:{i}")).collect();
    let fetched = client.multi_get(&keys, &options, &cancel).await.unwrap();
    assert_eq!(fetched.len(), 10_000);
    assert_eq!(fetched["key:1234"].value, Bytes::from_static(b"value:1234"));
}

#[tokio::test]
async fn test_keys_land_on_their_owner() {
    let (servers, client) = cluster(3).await;
    let options = BatchOptions::new(50, 2);
    client
        .multi_store(StoreMode::Set, items(300), None, &options, &CancelToken::new())
        .await
        .unwrap();

    for (i, server) in servers.iter().enumerate() {
        let owner = format!("node-{i}");
        for key in server.keys() {
            assert_eq!(client.locator().get_node(&key).unwrap().key(), owner);
        }
    }
}

#[tokio::test]
async fn test_multi_get_omits_misses() {
    let (_servers, client) = cluster(2).await;
    client.set("present", "yes", None).await.unwrap();

    let fetched = client
        .multi_get(&["present", "absent"], &BatchOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert!(fetched.contains_key("present"));
}

#[tokio::test]
async fn test_long_keys_come_back_under_original_key() {
    let (_servers, client) = cluster(2).await;
    let long = "x".repeat(MAX_KEY_LEN + 10);
    let stored = client
        .multi_store(
            StoreMode::Set,
            vec![(long.clone(), Bytes::from_static(b"big")), ("short".into(), Bytes::from_static(b"s"))],
            None,
            &BatchOptions::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap();
    assert!(stored.success);

    let fetched = client
        .multi_get(&[long.as_str(), "short"], &BatchOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(fetched[&long].value, Bytes::from_static(b"big"));
    assert_eq!(fetched["short"].value, Bytes::from_static(b"s"));
}

// ========================================================================
// Partial failure
// ========================================================================

#[tokio::test]
async fn test_down_node_keys_are_omitted_from_reads() {
    let (servers, client) = cluster(3).await;
    let options = BatchOptions::new(100, 4);
    let cancel = CancelToken::new();
    client
        .multi_store(StoreMode::Set, items(600), None, &options, &cancel)
        .await
        .unwrap();

    let dead: HashSet<String> = servers[1].keys().into_iter().collect();
    assert!(!dead.is_empty());
    servers[1].kill();

    let keys: Vec<String> = (0..600).map(|i| format!("key:{i}")).collect();
    let fetched = client.multi_get(&keys, &options, &cancel).await.unwrap();
    assert_eq!(fetched.len(), 600 - dead.len());
    assert!(fetched.keys().all(|k| !dead.contains(k)));
}

#[tokio::test]
async fn test_write_to_down_node_reports_failed_keys() {
    let live = MockServer::start().await;
    let endpoint = dead_endpoint().await;
    let client = CacheClient::builder()
        .with_config(config())
        .add_node(live.node("live"))
        .add_node(Node::new("down", endpoint))
        .build()
        .unwrap();

    let keys: Vec<String> = (0..200).map(|i| format!("key:{i}")).collect();
    let expected_failed: HashSet<String> = keys
        .iter()
        .filter(|k| client.locator().get_node(k).unwrap().key() == "down")
        .cloned()
        .collect();

    let result = client
        .multi_store(StoreMode::Set, items(200), None, &BatchOptions::new(30, 2), &CancelToken::new())
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.first_failure.as_ref().unwrap().is_transport_failure());
    let failed: HashSet<String> = result.failed_keys.into_iter().collect();
    assert_eq!(failed, expected_failed);
    assert_eq!(live.len(), 200 - expected_failed.len());
}

#[tokio::test]
async fn test_add_conflicts_are_reported_per_key() {
    let (_servers, client) = cluster(2).await;
    client.set("key:3", "taken", None).await.unwrap();

    let result = client
        .multi_store(StoreMode::Add, items(5), None, &BatchOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.failed_keys, vec!["key:3".to_owned()]);
    assert_eq!(
        result.first_failure.unwrap().status(),
        Some(protocol::Status::KeyExists)
    );
}

#[tokio::test]
async fn test_multi_delete() {
    let (servers, client) = cluster(3).await;
    let options = BatchOptions::new(25, 3);
    let cancel = CancelToken::new();
    client
        .multi_store(StoreMode::Set, items(100), None, &options, &cancel)
        .await
        .unwrap();

    let doomed: Vec<String> = (0..50).map(|i| format!("key:{i}")).collect();
    let mut with_missing = doomed.clone();
    with_missing.push("never-stored".into());
    let deleted = client.multi_delete(&with_missing, &options, &cancel).await.unwrap();
    assert!(deleted.success, "{:?}", deleted.first_failure);

    let total: usize = servers.iter().map(MockServer::len).sum();
    assert_eq!(total, 50);
    let remaining = client.multi_get(&doomed, &options, &cancel).await.unwrap();
    assert!(remaining.is_empty());
}

// ========================================================================
// Cancellation
// ========================================================================

#[tokio::test]
async fn test_cancel_stops_in_flight_multi_get() {
    let (servers, client) = cluster(2).await;
    for server in &servers {
        server.set_stall(true);
    }
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let keys: Vec<String> = (0..100).map(|i| format!("key:{i}")).collect();
    let started = std::time::Instant::now();
    let result = client.multi_get(&keys, &BatchOptions::new(10, 2), &cancel).await;
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert!(started.elapsed() < Duration::from_millis(1_500));
}

// ========================================================================
// Replication and secondary sync
// ========================================================================

#[tokio::test]
async fn test_replicated_store_writes_primary_and_replicas() {
    let (servers, client) = cluster(3).await;
    let options = BatchOptions::new(100, 4).with_replication(1);

    let result = client
        .multi_store(StoreMode::Set, items(300), None, &options, &CancelToken::new())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.replicated, Some(true));

    let total: usize = servers.iter().map(MockServer::len).sum();
    assert_eq!(total, 600);

    let single = client
        .store_replicated(StoreMode::Set, "solo", "v", None, 2)
        .await
        .unwrap();
    assert!(single.success);
    assert_eq!(single.replicated, Some(true));
    assert_eq!(servers.iter().filter(|s| s.contains(b"solo")).count(), 3);
}

#[tokio::test]
async fn test_each_key_replicates_to_its_own_successor() {
    let (servers, client) = cluster(5).await;
    let options = BatchOptions::new(100, 4).with_replication(1);

    let result = client
        .multi_store(StoreMode::Set, items(500), None, &options, &CancelToken::new())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.replicated, Some(true));

    let keys: Vec<String> = items(500).into_iter().map(|(key, _)| key).collect();
    let routes = client.locator().route_keys(&keys, 1);
    for key in &keys {
        let route = &routes[key];
        let expected: HashSet<String> = route.all().map(|n| n.key().to_owned()).collect();
        assert_eq!(expected.len(), 2);
        let holders: HashSet<String> = servers
            .iter()
            .enumerate()
            .filter(|(_, server)| server.contains(key.as_bytes()))
            .map(|(i, _)| format!("node-{i}"))
            .collect();
        assert_eq!(holders, expected, "placement of {key}");
    }
}

#[tokio::test]
async fn test_replica_failure_does_not_fail_primary() {
    let (servers, client) = cluster(3).await;
    let key = "replicated-key";
    let owner = client.locator().get_node(key).unwrap();
    // Kill every non-owner so whichever replica is chosen is down.
    for (i, server) in servers.iter().enumerate() {
        if format!("node-{i}") != owner.key() {
            server.kill();
        }
    }

    let result = client
        .store_replicated(StoreMode::Set, key, "v", None, 1)
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.replicated, Some(false));
}

#[derive(Default)]
struct RecordingSync {
    fail: bool,
    seen: Mutex<Vec<SyncRequest>>,
}

#[async_trait]
impl CacheSync for RecordingSync {
    fn name(&self) -> &str {
        "recording"
    }

    async fn replicate(&self, request: &SyncRequest) -> Result<(), SyncError> {
        self.seen.lock().push(request.clone());
        if self.fail {
            return Err(SyncError {
                target: self.name().to_owned(),
                message: "offline".into(),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_secondary_sync_receives_written_items() {
    let server = MockServer::start().await;
    let sync = Arc::new(RecordingSync::default());
    let client = CacheClient::builder()
        .with_config(config())
        .with_sync(sync.clone())
        .add_node(server.node("n1"))
        .build()
        .unwrap();

    let result = client
        .multi_store(StoreMode::Set, items(10), None, &BatchOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.synced, Some(true));

    let deleted = client
        .multi_delete(&["key:1", "key:2"], &BatchOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(deleted.synced, Some(true));

    let seen = sync.seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].len(), 10);
    match &seen[1] {
        SyncRequest::Delete { keys } => {
            let keys: HashSet<&str> = keys.iter().map(String::as_str).collect();
            assert_eq!(keys, HashSet::from(["key:1", "key:2"]));
        }
        other => panic!("unexpected sync request {other:?}"),
    }
}

#[tokio::test]
async fn test_sync_failure_only_clears_flag() {
    let server = MockServer::start().await;
    let client = CacheClient::builder()
        .with_config(config())
        .with_sync(Arc::new(RecordingSync {
            fail: true,
            ..RecordingSync::default()
        }))
        .add_node(server.node("n1"))
        .build()
        .unwrap();

    let result = client
        .multi_store(StoreMode::Set, items(3), None, &BatchOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.synced, Some(false));
    assert_eq!(server.len(), 3);
}

#[tokio::test]
async fn test_removed_node_stops_receiving_keys() {
    let (servers, client) = cluster(3).await;
    assert!(client.remove_node("node-2"));
    client
        .multi_store(StoreMode::Set, items(200), None, &BatchOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(servers[2].len(), 0);

    assert_eq!(client.nodes().len(), 2);
    assert!(client.pipeline().registry().get("node-2").is_none());
}

#[tokio::test]
async fn test_late_pool_for_removed_node_is_pruned() {
    let (servers, client) = cluster(3).await;
    let removed = Arc::new(servers[2].node("node-2"));
    assert!(client.remove_node("node-2"));

    // A command routed before the removal opens its pool afterwards.
    let late = client.pipeline().registry().pool_for(&removed);
    assert!(client.pipeline().registry().get("node-2").is_some());

    assert!(client.remove_node("node-1"));
    assert!(client.pipeline().registry().get("node-2").is_none());
    assert!(late.is_closed());

    assert!(client.add_node(servers[1].node("node-1")));
    assert_eq!(client.nodes().len(), 2);
}
