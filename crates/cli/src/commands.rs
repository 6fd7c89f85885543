//! Subcommands.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Subcommand, ValueEnum};
use client::{BatchOptions, CacheClient, CancelToken, ClientConfig, ExecutionResult, Item, StoreMode, StoreOptions};
use corelib::{Node, NodeLocator};
use serde_json::{json, Value};

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Show which node owns each key, without contacting any node.
    Locate {
        keys: Vec<String>,
        /// Also list this many replicas per key.
        #[arg(short, long, default_value_t = 0)]
        replicas: usize,
    },
    /// Show how sample keys spread across the nodes.
    Distribution {
        #[arg(short, long, default_value_t = 10_000)]
        samples: usize,
    },
    Get {
        key: String,
    },
    Set {
        key: String,
        value: String,
        /// Time to live in seconds.
        #[arg(long)]
        ttl: Option<u64>,
        #[arg(long, value_enum, default_value_t = Mode::Set)]
        mode: Mode,
    },
    Delete {
        key: String,
    },
    Incr {
        key: String,
        #[arg(default_value_t = 1)]
        delta: u64,
        /// Create a missing counter with this value.
        #[arg(long)]
        initial: Option<u64>,
    },
    Decr {
        key: String,
        #[arg(default_value_t = 1)]
        delta: u64,
        #[arg(long)]
        initial: Option<u64>,
    },
    /// Fetch many keys in batches.
    Mget {
        keys: Vec<String>,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Server version of every node.
    Version,
}

/// Store semantics for `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

impl From<Mode> for StoreMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Set => StoreMode::Set,
            Mode::Add => StoreMode::Add,
            Mode::Replace => StoreMode::Replace,
            Mode::Append => StoreMode::Append,
            Mode::Prepend => StoreMode::Prepend,
        }
    }
}

/// JSON document printed for a command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult(pub Value);

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(&self.0) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{}", self.0),
        }
    }
}

impl Command {
    pub async fn execute(&self, config: ClientConfig) -> anyhow::Result<CommandResult> {
        if config.nodes.is_empty() {
            bail!("no nodes configured; pass --node or --config");
        }
        let value = match self {
            Command::Locate { keys, replicas } => locate(&locator(&config)?, keys, *replicas),
            Command::Distribution { samples } => distribution(&locator(&config)?, *samples),
            _ => self.execute_remote(CacheClient::from_config(config)?).await?,
        };
        Ok(CommandResult(value))
    }

    async fn execute_remote(&self, client: CacheClient) -> anyhow::Result<Value> {
        let value = match self {
            Command::Get { key } => {
                let result = client.get(key).await?;
                json!({
                    "key": key,
                    "result": execution(&result.execution),
                    "item": result.value.as_ref().map(item),
                })
            }
            Command::Set { key, value, ttl, mode } => {
                let options = StoreOptions {
                    ttl: ttl.map(Duration::from_secs),
                    ..StoreOptions::default()
                };
                let result = client
                    .store((*mode).into(), key, Bytes::from(value.clone()), options)
                    .await?;
                json!({ "key": key, "result": execution(&result.execution), "cas": result.value })
            }
            Command::Delete { key } => {
                let result = client.delete(key).await?;
                json!({ "key": key, "result": execution(&result) })
            }
            Command::Incr { key, delta, initial } => {
                let result = client.increment(key, *delta, *initial, None).await?;
                json!({ "key": key, "result": execution(&result.execution), "value": result.value })
            }
            Command::Decr { key, delta, initial } => {
                let result = client.decrement(key, *delta, *initial, None).await?;
                json!({ "key": key, "result": execution(&result.execution), "value": result.value })
            }
            Command::Mget { keys, batch_size } => {
                let mut options = client.config().batch.clone();
                if let Some(batch_size) = batch_size {
                    options = BatchOptions {
                        batch_size: *batch_size,
                        ..options
                    };
                }
                let items = client
                    .multi_get(keys, &options, &CancelToken::new())
                    .await
                    .context("multi-get failed")?;
                let found: BTreeMap<&String, Value> = items.iter().map(|(k, v)| (k, item(v))).collect();
                json!({ "requested": keys.len(), "found": found })
            }
            Command::Version => {
                let versions: BTreeMap<String, Value> = client
                    .versions()
                    .await
                    .into_iter()
                    .map(|(node, result)| {
                        let value = match result.value {
                            Some(version) => json!(version),
                            None => execution(&result.execution),
                        };
                        (node.key().to_owned(), value)
                    })
                    .collect();
                json!(versions)
            }
            Command::Locate { .. } | Command::Distribution { .. } => {
                client.shutdown();
                bail!("{self:?} does not contact the cluster");
            }
        };
        client.shutdown();
        Ok(value)
    }
}

fn locator(config: &ClientConfig) -> anyhow::Result<NodeLocator> {
    let nodes = config
        .nodes
        .iter()
        .map(|entry| Node::parse(entry))
        .collect::<corelib::Result<Vec<_>>>()?;
    Ok(NodeLocator::builder()
        .with_config(config.locator.clone())
        .add_nodes(nodes)
        .try_build()?)
}

fn locate(locator: &NodeLocator, keys: &[String], replicas: usize) -> Value {
    let placements: BTreeMap<&String, Value> = keys
        .iter()
        .map(|key| {
            let routed = locator.get_replicated_nodes(std::slice::from_ref(key), replicas);
            let value = match routed.keys().next() {
                Some(node) => json!({
                    "token": locator.token_for(key).to_string(),
                    "primary": node.primary().key(),
                    "replicas": node.replicas().iter().map(|n| n.key()).collect::<Vec<_>>(),
                }),
                None => Value::Null,
            };
            (key, value)
        })
        .collect();
    json!(placements)
}

fn distribution(locator: &NodeLocator, samples: usize) -> Value {
    let keys: Vec<String> = (0..samples).map(|i| format!("sample:{i}")).collect();
    let mut counts: BTreeMap<String, usize> = locator
        .get_all_nodes()
        .iter()
        .map(|node| (node.key().to_owned(), 0))
        .collect();
    for (node, assigned) in locator.get_nodes(&keys, 0) {
        counts.insert(node.key().to_owned(), assigned.len());
    }
    json!({
        "samples": samples,
        "virtual_nodes": locator.config().virtual_nodes,
        "tokens": locator.token_count(),
        "nodes": counts,
    })
}

fn execution(result: &ExecutionResult) -> Value {
    json!({
        "success": result.is_success(),
        "outcome": format!("{:?}", result.outcome),
        "status": result.status().map(|s| s.code()),
        "message": result.message,
    })
}

fn item(item: &Item) -> Value {
    json!({
        "value": String::from_utf8_lossy(&item.value),
        "flags": item.flags,
        "cas": item.cas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(nodes: &[&str]) -> ClientConfig {
        ClientConfig {
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_locate_reports_primary_and_replicas() {
        let command = Command::Locate {
            keys: vec!["user:1".into()],
            replicas: 1,
        };
        let result = command
            .execute(config(&["a=127.0.0.1:1", "b=127.0.0.1:2"]))
            .await
            .unwrap();
        let placement = &result.0["user:1"];
        let primary = placement["primary"].as_str().unwrap();
        let replicas = placement["replicas"].as_array().unwrap();
        assert_eq!(replicas.len(), 1);
        assert_ne!(replicas[0].as_str().unwrap(), primary);
    }

    #[tokio::test]
    async fn test_distribution_counts_every_sample() {
        let command = Command::Distribution { samples: 1_000 };
        let result = command
            .execute(config(&["a=127.0.0.1:1", "b=127.0.0.1:2", "c=127.0.0.1:3"]))
            .await
            .unwrap();
        let nodes = result.0["nodes"].as_object().unwrap();
        assert_eq!(nodes.len(), 3);
        let total: u64 = nodes.values().map(|v| v.as_u64().unwrap()).sum();
        assert_eq!(total, 1_000);
        assert_eq!(result.0["tokens"], json!(768));
    }

    #[tokio::test]
    async fn test_requires_nodes() {
        assert!(Command::Version.execute(ClientConfig::default()).await.is_err());
    }
}
