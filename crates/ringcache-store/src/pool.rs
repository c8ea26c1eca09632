//! Per-node connection pools.
//!
//! A [`ConnectionPool`] holds idle connections for one node address.
//! [`ConnectionPool::get`] hands out a [`PooledConnection`] guard. On drop
//! the guard returns the connection to the pool only if its last command
//! completed, reply included. A connection left mid-command (the caller's
//! future was cancelled) or one that failed is closed instead, so no unread
//! reply can reach the next user of the socket.
//!
//! [`PoolRegistry`] maps node addresses to pools, creating each pool on
//! first use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ringcache_types::{NodeUrl, PoolConfig};
use tracing::{debug, trace};

use crate::client::NodeClient;
use crate::command::{Command, Reply};
use crate::connection::{Connection, Connector, TcpConnector};
use crate::error::StoreError;

/// Idle connections for one node.
pub struct ConnectionPool {
    url: NodeUrl,
    connector: Arc<dyn Connector>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    max_idle: usize,
}

impl ConnectionPool {
    /// Create an empty pool for `url`.
    pub fn new(url: NodeUrl, connector: Arc<dyn Connector>, max_idle: usize) -> Self {
        Self {
            url,
            connector,
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// The node this pool serves.
    pub fn url(&self) -> &NodeUrl {
        &self.url
    }

    /// Take an idle connection or open a new one.
    pub fn get(self: &Arc<Self>) -> Result<PooledConnection, StoreError> {
        let reused = self.idle.lock().expect("lock poisoned").pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                trace!(node = ?self.url, "opening new connection");
                self.connector.open(&self.url)?
            }
        };
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            reusable: true,
        })
    }

    /// Number of idle connections currently held.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("lock poisoned").len()
    }

    fn release(&self, conn: Box<dyn Connection>) {
        let mut idle = self.idle.lock().expect("lock poisoned");
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Returned to the pool on drop if it is between commands; closed
/// otherwise.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<ConnectionPool>,
    reusable: bool,
}

impl PooledConnection {
    /// Send `cmd` and read its reply.
    ///
    /// The connection is only marked reusable again once the reply has been
    /// read in full. An error, or dropping this future before it finishes,
    /// leaves it marked for discard.
    pub async fn round_trip(&mut self, cmd: &Command) -> Result<Reply, StoreError> {
        self.reusable = false;
        let conn = self.conn_mut();
        conn.send_command(cmd).await?;
        let reply = conn.read_reply().await?;
        self.reusable = true;
        Ok(reply)
    }

    /// Drop the underlying socket. The next command reconnects.
    pub async fn disconnect(&mut self) {
        self.conn_mut().disconnect().await;
    }

    /// Whether a command that timed out may be resent once.
    pub fn retry_on_timeout(&self) -> bool {
        self.conn
            .as_deref()
            .is_some_and(|conn| conn.retry_on_timeout())
    }

    /// Whether the connection goes back to the pool when dropped.
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    fn conn_mut(&mut self) -> &mut dyn Connection {
        // Only `Drop` takes the connection out.
        self.conn
            .as_deref_mut()
            .expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.reusable {
            self.pool.release(conn);
        } else {
            // Dropping the connection closes its socket.
            debug!(node = ?self.pool.url, "discarding connection left mid-command");
        }
    }
}

/// Pools for every node address seen so far.
pub struct PoolRegistry {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    pools: Mutex<HashMap<NodeUrl, Arc<ConnectionPool>>>,
}

impl PoolRegistry {
    /// Registry opening TCP connections with the given settings.
    pub fn tcp(config: PoolConfig) -> Self {
        Self::with_connector(Arc::new(TcpConnector::new(config)), config)
    }

    /// Registry opening connections through a custom connector.
    pub fn with_connector(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// The pool for `url`, created on first use.
    pub fn pool(&self, url: &NodeUrl) -> Arc<ConnectionPool> {
        let mut pools = self.pools.lock().expect("lock poisoned");
        pools
            .entry(url.clone())
            .or_insert_with(|| {
                Arc::new(ConnectionPool::new(
                    url.clone(),
                    Arc::clone(&self.connector),
                    self.config.max_idle,
                ))
            })
            .clone()
    }

    /// A client for `url` backed by its pool.
    pub fn client(&self, url: &NodeUrl) -> NodeClient {
        NodeClient::new(self.pool(url))
    }

    /// Number of distinct node pools.
    pub fn len(&self) -> usize {
        self.pools.lock().expect("lock poisoned").len()
    }

    /// Whether no pool has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
