//! Per-node failure accounting used as a circuit breaker.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Records transport failures per node and answers whether a node has
/// failed too often recently.
pub trait ErrorStatistics: Send + Sync {
    fn record_failure(&self, node_key: &str);

    fn is_over_threshold(&self, node_key: &str, max_errors: u32, window: Duration) -> bool;
}

/// Sliding-window failure counts kept in memory.
#[derive(Debug, Default)]
pub struct WindowedErrorStatistics {
    failures: DashMap<String, VecDeque<Instant>>,
}

impl WindowedErrorStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget a node's history, e.g. after it was replaced.
    pub fn reset(&self, node_key: &str) {
        self.failures.remove(node_key);
    }
}

impl ErrorStatistics for WindowedErrorStatistics {
    fn record_failure(&self, node_key: &str) {
        self.failures
            .entry(node_key.to_owned())
            .or_default()
            .push_back(Instant::now());
    }

    fn is_over_threshold(&self, node_key: &str, max_errors: u32, window: Duration) -> bool {
        let Some(mut recent) = self.failures.get_mut(node_key) else {
            return false;
        };
        let now = Instant::now();
        while recent
            .front()
            .is_some_and(|at| now.duration_since(*at) > window)
        {
            recent.pop_front();
        }
        recent.len() >= max_errors as usize
    }
}
