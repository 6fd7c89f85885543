//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to each node while enforcing a hard cap on
//! how many exist at once.
//!
//! ## Design Principles
//! 1. **Admission Gate**: A semaphore with `max_pool_size` permits bounds the
//!    connections in use; an idle connection holds no permit and a new one is
//!    only opened when the idle set is empty, so idle + in use never exceeds
//!    the cap.
//! 2. **Scoped Acquisition**: [`PooledConnection`] returns its connection on
//!    drop when it is still reusable and destroys it otherwise. Every exit
//!    path, including task cancellation, releases the permit.
//! 3. **Minimal Locking**: The idle-set mutex is held only to move a
//!    connection in or out.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corelib::Node;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::error::AcquireError;

struct PoolInner {
    node: Arc<Node>,
    config: PoolConfig,
    gate: Arc<Semaphore>,
    idle: Mutex<VecDeque<Connection>>,
    closed: AtomicBool,
    next_id: AtomicU64,
    open: AtomicUsize,
}

impl PoolInner {
    fn destroy(&self, conn: Connection) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        debug!(node = self.node.key(), id = conn.id(), alive = conn.is_alive(), "destroyed connection");
    }

    fn release(&self, conn: Connection) {
        if !conn.is_reusable() || self.closed.load(Ordering::Acquire) {
            self.destroy(conn);
            return;
        }
        self.idle.lock().push_back(conn);
    }
}

/// Bounded pool of connections to one node.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("node", &self.inner.node.key())
            .field("open", &self.open_count())
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(node: Arc<Node>, config: PoolConfig) -> Self {
        let permits = config.max_pool_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                node,
                gate: Arc::new(Semaphore::new(permits)),
                idle: Mutex::new(VecDeque::with_capacity(permits)),
                config,
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                open: AtomicUsize::new(0),
            }),
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.inner.node
    }

    /// Take a connection, waiting up to `timeout` for a free slot.
    ///
    /// Idle connections are reused most-recently-released first, after any
    /// stray bytes are drained; one whose peer has gone away is destroyed
    /// and the next is tried. With nothing idle a new connection is opened.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection, AcquireError> {
        if self.is_closed() {
            return Err(AcquireError::Closed);
        }
        let gate = Arc::clone(&self.inner.gate);
        let permit = match tokio::time::timeout(timeout, gate.acquire_owned()).await {
            Err(_) => return Err(AcquireError::Timeout(timeout)),
            Ok(Err(_)) => return Err(AcquireError::Closed),
            Ok(Ok(permit)) => permit,
        };

        loop {
            let candidate = self.inner.idle.lock().pop_back();
            let Some(mut conn) = candidate else { break };
            match conn.drain_stray() {
                Ok(_) => return Ok(PooledConnection::new(Arc::clone(&self.inner), conn, permit)),
                Err(err) => {
                    debug!(node = self.inner.node.key(), error = %err, "idle connection unusable");
                    self.inner.destroy(conn);
                }
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let endpoint = self.inner.node.endpoint();
        match Connection::connect(id, endpoint, self.inner.config.connect_timeout()).await {
            Ok(conn) => {
                self.inner.open.fetch_add(1, Ordering::AcqRel);
                Ok(PooledConnection::new(Arc::clone(&self.inner), conn, permit))
            }
            Err(source) => Err(AcquireError::Connect {
                endpoint: endpoint.to_owned(),
                source,
            }),
        }
    }

    /// Hand a connection back; same as dropping it.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Destroy up to `count` idle connections, oldest first.
    ///
    /// Gives up and returns 0 if the idle set cannot be locked within
    /// `timeout`.
    pub fn destroy_idle(&self, count: usize, timeout: Duration) -> usize {
        let drained: Vec<Connection> = match self.inner.idle.try_lock_for(timeout) {
            Some(mut idle) => {
                let n = count.min(idle.len());
                idle.drain(..n).collect()
            }
            None => return 0,
        };
        let n = drained.len();
        for conn in drained {
            self.inner.destroy(conn);
        }
        n
    }

    /// Refuse further acquisitions and destroy idle connections.
    ///
    /// Connections in use are destroyed when they are released.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.gate.close();
        let drained: Vec<Connection> = self.inner.idle.lock().drain(..).collect();
        for conn in drained {
            self.inner.destroy(conn);
        }
        info!(node = self.inner.node.key(), "closed connection pool");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Connections currently open, idle or in use.
    pub fn open_count(&self) -> usize {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Slots free for immediate acquisition.
    pub fn available(&self) -> usize {
        self.inner.gate.available_permits()
    }
}

/// A connection on loan from a [`ConnectionPool`].
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    // Dropped after `Drop::drop` has put the connection back.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            pool,
            _permit: permit,
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("node", &self.pool.node.key())
            .field("conn", &self.conn)
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Pools keyed by node key, created on first use.
#[derive(Debug)]
pub struct PoolRegistry {
    pools: DashMap<String, ConnectionPool>,
    config: PoolConfig,
}

impl PoolRegistry {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            pools: DashMap::new(),
            config,
        }
    }

    /// The pool for `node`, creating it if needed.
    ///
    /// A closed pool (its node was removed) is replaced, so a node that is
    /// added back gets fresh connections.
    pub fn pool_for(&self, node: &Arc<Node>) -> ConnectionPool {
        if let Some(pool) = self.pools.get(node.key()) {
            if !pool.is_closed() && pool.node().endpoint() == node.endpoint() {
                return pool.clone();
            }
        }
        let mut entry = self
            .pools
            .entry(node.key().to_owned())
            .or_insert_with(|| ConnectionPool::new(Arc::clone(node), self.config.clone()));
        if entry.is_closed() || entry.node().endpoint() != node.endpoint() {
            entry.close();
            *entry = ConnectionPool::new(Arc::clone(node), self.config.clone());
        }
        entry.clone()
    }

    pub fn get(&self, node_key: &str) -> Option<ConnectionPool> {
        self.pools.get(node_key).map(|pool| pool.clone())
    }

    /// Close and forget the pool for `node_key`.
    pub fn remove(&self, node_key: &str) -> bool {
        match self.pools.remove(node_key) {
            Some((_, pool)) => {
                pool.close();
                true
            }
            None => false,
        }
    }

    /// Close every pool whose node fails `keep`.
    pub fn retain(&self, keep: impl Fn(&str) -> bool) {
        self.pools.retain(|key, pool| {
            let kept = keep(key);
            if !kept {
                pool.close();
            }
            kept
        });
    }

    pub fn close_all(&self) {
        self.retain(|_| false);
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
