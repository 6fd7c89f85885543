//! Batch splitting and bounded-parallel batch execution.

use std::future::Future;
use std::sync::Arc;

use corelib::Node;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::CancelToken;
use crate::error::{ClientError, Result};

/// Items bound for one node in one exchange.
pub(crate) type NodeBatch<T> = (Arc<Node>, Vec<T>);

/// Split each node's items into batches of at most `batch_size`.
pub(crate) fn split<T>(assignment: impl IntoIterator<Item = (Arc<Node>, Vec<T>)>, batch_size: usize) -> Vec<NodeBatch<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    for (node, mut items) in assignment {
        while items.len() > batch_size {
            let rest = items.split_off(batch_size);
            batches.push((Arc::clone(&node), items));
            items = rest;
        }
        if !items.is_empty() {
            batches.push((node, items));
        }
    }
    batches
}

/// Run every batch with at most `max_parallelism` in flight.
///
/// Results come back in completion order. If `cancel` fires, batches not
/// yet finished are aborted and the call fails with
/// [`ClientError::Cancelled`]. A panicking batch re-raises its panic here.
pub(crate) async fn run<T, R, F, Fut>(
    batches: Vec<NodeBatch<T>>,
    max_parallelism: usize,
    cancel: &CancelToken,
    run_batch: F,
) -> Result<Vec<R>>
where
    F: Fn(Arc<Node>, Vec<T>) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(ClientError::Cancelled);
    }
    let gate = Arc::new(Semaphore::new(max_parallelism.max(1)));
    let mut tasks = JoinSet::new();
    for (node, items) in batches {
        let gate = Arc::clone(&gate);
        let work = run_batch(node, items);
        tasks.spawn(async move {
            // The gate is never closed.
            let _permit = gate.acquire_owned().await.ok();
            work.await
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            joined = tasks.join_next() => Some(joined),
        };
        match next {
            None => {
                tasks.abort_all();
                return Err(ClientError::Cancelled);
            }
            Some(None) => break,
            Some(Some(Ok(result))) => results.push(result),
            Some(Some(Err(err))) => {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }
    }
    Ok(results)
}
