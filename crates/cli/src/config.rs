//! Command-line arguments and configuration loading.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use client::ClientConfig;
use tracing::debug;

use crate::commands::Command;

#[derive(Debug, Parser)]
#[command(name = "cachectl", version, about = "Query and inspect a memcached cluster")]
pub struct CliConfig {
    /// Node as `key=host:port` or `host:port`; repeat for more nodes.
    #[arg(short, long = "node", global = true)]
    pub nodes: Vec<String>,

    /// JSON client configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Virtual nodes per node, overriding the configuration file.
    #[arg(long, global = true)]
    pub vnodes: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Merge the configuration file (if any) with command-line overrides.
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => ClientConfig::default(),
        };
        config.nodes.extend(self.nodes.iter().cloned());
        if let Some(vnodes) = self.vnodes {
            config.locator.virtual_nodes = vnodes;
        }
        config.validate()?;
        debug!(nodes = config.nodes.len(), "configuration loaded");
        Ok(config)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let config = self.client_config()?;
        let result = self.command.execute(config).await?;
        println!("{result}");
        Ok(())
    }
}
