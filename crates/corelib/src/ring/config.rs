//! Locator configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of virtual nodes generated per physical node.
pub const DEFAULT_VIRTUAL_NODES: u32 = 256;

/// Default key count at which resolution is split across threads.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

/// Tuning knobs for [`NodeLocator`](super::NodeLocator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Virtual nodes per physical node.
    pub virtual_nodes: u32,
    /// Key batches at least this large are resolved in parallel.
    pub parallel_threshold: usize,
    /// Upper bound on threads used for one parallel resolution.
    pub resolve_parallelism: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            resolve_parallelism: std::thread::available_parallelism()
                .map(|n| n.get().min(8))
                .unwrap_or(1),
        }
    }
}

impl LocatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.virtual_nodes == 0 {
            return Err(Error::InvalidConfig("virtual_nodes must be at least 1".into()));
        }
        if self.resolve_parallelism == 0 {
            return Err(Error::InvalidConfig("resolve_parallelism must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LocatorConfig::default();
        assert_eq!(config.virtual_nodes, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_vnodes() {
        let config = LocatorConfig {
            virtual_nodes: 0,
            ..LocatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
