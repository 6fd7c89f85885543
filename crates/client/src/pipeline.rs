//! Command execution pipeline.
//!
//! One [`Pipeline::execute`] call runs one [`Command`] against one node:
//!
//! 1. Local checks: cancellation, disabled operations, the per-node
//!    failure threshold.
//! 2. Acquire a pooled connection (racing the cancellation signal).
//! 3. Authenticate the connection if it has not been yet.
//! 4. Write the request frames and read replies until the command
//!    completes, all under the operation timeout.
//! 5. Classify the outcome. The connection goes back to its pool only if
//!    the exchange finished cleanly.

use std::fmt;
use std::sync::Arc;

use corelib::Node;
use protocol::{ProtocolError, Status};
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::cancel::CancelToken;
use crate::command::{Command, Completion, SaslAuth, Step};
use crate::config::ClientConfig;
use crate::connection::{Connection, FrameError};
use crate::error::AcquireError;
use crate::pool::PoolRegistry;
use crate::stats::ErrorStatistics;

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The server answered with a non-success status.
    Failed(Status),
    /// The key resolved to no node (empty ring).
    NoNode,
    /// No connection could be obtained, or the node is over its failure
    /// threshold.
    Unavailable,
    /// The connection broke, timed out or desynchronized mid-exchange.
    DeadSocket,
    AuthFailed,
    /// The operation family is switched off in configuration.
    Disabled,
    Cancelled,
}

/// Outcome of one execution plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub outcome: Outcome,
    pub message: Option<String>,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self {
            outcome: Outcome::Success,
            message: None,
        }
    }

    pub fn new(outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: Some(message.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(Outcome::Cancelled, "operation cancelled")
    }

    pub fn no_node() -> Self {
        Self::new(Outcome::NoNode, "no node available for key")
    }

    fn from_completion(completion: Completion) -> Self {
        if completion.status.is_success() {
            return Self::success();
        }
        Self {
            outcome: Outcome::Failed(completion.status),
            message: Some(
                completion
                    .message
                    .unwrap_or_else(|| completion.status.description().to_owned()),
            ),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Protocol status, when the server answered.
    pub fn status(&self) -> Option<Status> {
        match self.outcome {
            Outcome::Success => Some(Status::NoError),
            Outcome::Failed(status) => Some(status),
            _ => None,
        }
    }

    /// Failures caused by the node or the network rather than the request.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Unavailable | Outcome::DeadSocket)
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.outcome, &self.message) {
            (Outcome::Success, _) => f.write_str("success"),
            (outcome, Some(message)) => write!(f, "{outcome:?}: {message}"),
            (outcome, None) => write!(f, "{outcome:?}"),
        }
    }
}

/// An execution result with the value it produced, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult<T> {
    pub execution: ExecutionResult,
    pub value: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn new(execution: ExecutionResult, value: Option<T>) -> Self {
        Self { execution, value }
    }

    pub fn failed(execution: ExecutionResult) -> Self {
        Self {
            execution,
            value: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.execution.is_success()
    }
}

enum ExchangeError {
    Encode(ProtocolError),
    Frame(FrameError),
}

impl From<FrameError> for ExchangeError {
    fn from(err: FrameError) -> Self {
        ExchangeError::Frame(err)
    }
}

impl From<std::io::Error> for ExchangeError {
    fn from(err: std::io::Error) -> Self {
        ExchangeError::Frame(FrameError::Io(err))
    }
}

enum Exchange {
    Cancelled,
    TimedOut,
    Finished(Result<Completion, ExchangeError>),
}

/// Executes commands against nodes using per-node pools.
pub struct Pipeline {
    registry: PoolRegistry,
    config: Arc<ClientConfig>,
    authenticator: Option<Arc<dyn Authenticator>>,
    error_stats: Option<Arc<dyn ErrorStatistics>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("pools", &self.registry.len())
            .field("authenticated", &self.authenticator.is_some())
            .finish()
    }
}

impl Pipeline {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            registry: PoolRegistry::new(config.pool.clone()),
            config,
            authenticator: None,
            error_stats: None,
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_error_statistics(mut self, stats: Arc<dyn ErrorStatistics>) -> Self {
        self.error_stats = Some(stats);
        self
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run `command` on `node`. Never panics and never returns an error:
    /// every failure is classified into the returned result.
    pub async fn execute(&self, node: &Arc<Node>, command: &mut Command, cancel: &CancelToken) -> ExecutionResult {
        if cancel.is_cancelled() {
            return ExecutionResult::cancelled();
        }
        let operation = command.operation();
        if self.config.is_disabled(operation) {
            return ExecutionResult::new(Outcome::Disabled, format!("{operation:?} operations are disabled"));
        }
        if let Some(stats) = &self.error_stats {
            let breaker = &self.config.circuit_breaker;
            if stats.is_over_threshold(node.key(), breaker.max_errors, breaker.window()) {
                debug!(node = node.key(), "node over failure threshold");
                return ExecutionResult::new(Outcome::Unavailable, "node over failure threshold");
            }
        }

        let pool = self.registry.pool_for(node);
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExecutionResult::cancelled(),
            acquired = pool.acquire(self.config.pool.acquire_timeout()) => acquired,
        };
        let mut conn = match acquired {
            Ok(conn) => conn,
            Err(err) => {
                warn!(node = node.key(), error = %err, "could not acquire connection");
                if matches!(err, AcquireError::Connect { .. }) {
                    self.record_failure(node);
                }
                return ExecutionResult::new(Outcome::Unavailable, err.to_string());
            }
        };

        if let Some(authenticator) = &self.authenticator {
            if !conn.is_authenticated() {
                let result = self.authenticate(&mut conn, authenticator.as_ref(), cancel).await;
                if !result.is_success() {
                    conn.mark_dead();
                    if result.is_transport_failure() {
                        self.record_failure(node);
                    }
                    return result;
                }
                conn.mark_authenticated();
            }
        }

        let result = self.exchange(&mut conn, command, cancel).await;
        if result.is_transport_failure() {
            self.record_failure(node);
        }
        result
    }

    fn record_failure(&self, node: &Node) {
        if let Some(stats) = &self.error_stats {
            stats.record_failure(node.key());
        }
    }

    /// Run a SASL exchange on a fresh connection.
    async fn authenticate(
        &self,
        conn: &mut Connection,
        authenticator: &dyn Authenticator,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        let mechanism = authenticator.mechanism().to_owned();
        let mut command = Command::SaslAuth(SaslAuth::start(mechanism.clone(), authenticator.initial_response()));
        for _ in 0..self.config.sasl_max_steps {
            let result = self.exchange(conn, &mut command, cancel).await;
            match result.outcome {
                Outcome::Success => {
                    debug!(id = conn.id(), mechanism = %mechanism, "authenticated connection");
                    return result;
                }
                Outcome::Failed(Status::AuthContinue) => {
                    let next = match &command {
                        Command::SaslAuth(round) => authenticator.step(round.challenge()),
                        _ => None,
                    };
                    match next {
                        Some(payload) => command = Command::SaslAuth(SaslAuth::step(mechanism.clone(), payload)),
                        None => {
                            return ExecutionResult::new(Outcome::AuthFailed, "authenticator cannot continue")
                        }
                    }
                }
                Outcome::Failed(status) => {
                    warn!(id = conn.id(), %status, "authentication rejected");
                    return ExecutionResult::new(Outcome::AuthFailed, status.to_string());
                }
                _ => return result,
            }
        }
        ExecutionResult::new(Outcome::AuthFailed, "too many authentication steps")
    }

    async fn exchange(&self, conn: &mut Connection, command: &mut Command, cancel: &CancelToken) -> ExecutionResult {
        let max_body = self.config.max_body_len;
        conn.begin_exchange();
        let exchange = {
            let io = run_exchange(conn, command, max_body);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Exchange::Cancelled,
                finished = tokio::time::timeout(self.config.operation_timeout(), io) => match finished {
                    Ok(result) => Exchange::Finished(result),
                    Err(_) => Exchange::TimedOut,
                },
            }
        };

        match exchange {
            Exchange::Finished(Ok(completion)) => {
                conn.end_exchange();
                ExecutionResult::from_completion(completion)
            }
            Exchange::Finished(Err(ExchangeError::Encode(err))) => {
                // Nothing was written, so the connection is still in sync.
                conn.end_exchange();
                ExecutionResult::new(Outcome::Failed(Status::InvalidArguments), err.to_string())
            }
            Exchange::Finished(Err(ExchangeError::Frame(err))) => {
                conn.mark_dead();
                warn!(id = conn.id(), endpoint = conn.endpoint(), error = %err, "connection failed mid-exchange");
                ExecutionResult::new(Outcome::DeadSocket, err.to_string())
            }
            Exchange::TimedOut => {
                conn.mark_dead();
                warn!(id = conn.id(), endpoint = conn.endpoint(), "operation timed out");
                ExecutionResult::new(
                    Outcome::DeadSocket,
                    format!("timed out after {:?}", self.config.operation_timeout()),
                )
            }
            Exchange::Cancelled => {
                conn.mark_dead();
                ExecutionResult::cancelled()
            }
        }
    }
}

async fn run_exchange(conn: &mut Connection, command: &mut Command, max_body: u32) -> Result<Completion, ExchangeError> {
    let mut segments = Vec::new();
    command
        .encode(conn.scratch_mut(), &mut segments)
        .map_err(ExchangeError::Encode)?;
    conn.write(&segments).await?;
    loop {
        let response = conn.read_response(max_body).await?;
        match command.on_response(response) {
            Ok(Step::Pending) => continue,
            Ok(Step::Complete(completion)) => return Ok(completion),
            Err(err) => {
                conn.mark_dead();
                return Err(ExchangeError::Frame(FrameError::Protocol(err)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_maps_to_outcome() {
        let ok = ExecutionResult::from_completion(Completion {
            status: Status::NoError,
            message: None,
        });
        assert!(ok.is_success());
        assert_eq!(ok.status(), Some(Status::NoError));

        let miss = ExecutionResult::from_completion(Completion {
            status: Status::KeyNotFound,
            message: None,
        });
        assert_eq!(miss.outcome, Outcome::Failed(Status::KeyNotFound));
        assert_eq!(miss.message.as_deref(), Some("key not found"));
        assert!(!miss.is_transport_failure());
    }

    #[test]
    fn test_transport_failures() {
        assert!(ExecutionResult::new(Outcome::DeadSocket, "eof").is_transport_failure());
        assert!(ExecutionResult::new(Outcome::Unavailable, "timeout").is_transport_failure());
        assert!(!ExecutionResult::cancelled().is_transport_failure());
        assert_eq!(ExecutionResult::no_node().status(), None);
    }
}
