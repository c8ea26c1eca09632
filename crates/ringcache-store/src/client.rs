//! Single-node command execution.

use std::sync::Arc;

use bytes::Bytes;
use ringcache_types::{Expiry, NodeUrl};
use tracing::{debug, warn};

use crate::command::{Command, Reply, ToArg};
use crate::error::StoreError;
use crate::pool::ConnectionPool;

/// Executes commands against one node through its connection pool.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct NodeClient {
    pool: Arc<ConnectionPool>,
}

impl NodeClient {
    /// Client over an existing pool.
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// The node this client talks to.
    pub fn url(&self) -> &NodeUrl {
        self.pool.url()
    }

    /// Send one command and read its reply.
    ///
    /// On a connection or timeout failure the connection is dropped. If the
    /// failure was a timeout and the connection allows it, the command is
    /// sent once more on a fresh socket. An error reply from the node
    /// becomes [`StoreError::Server`]. The connection goes back to the pool
    /// only after a complete reply; a failed or cancelled call closes it.
    pub async fn execute(&self, cmd: &Command) -> Result<Reply, StoreError> {
        let mut conn = self.pool.get()?;

        let first = conn.round_trip(cmd).await;
        let reply = match first {
            Ok(reply) => reply,
            Err(e) if e.is_transient() => {
                conn.disconnect().await;
                if !(e.is_timeout() && conn.retry_on_timeout()) {
                    return Err(e);
                }
                warn!(node = ?self.url(), command = %cmd, "timed out, resending once");
                match conn.round_trip(cmd).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        conn.disconnect().await;
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                // Protocol errors leave the stream in an unknown state.
                conn.disconnect().await;
                return Err(e);
            }
        };

        match reply {
            Reply::Error(msg) => {
                debug!(node = ?self.url(), command = %cmd, error = %msg, "node returned error");
                Err(StoreError::Server(msg))
            }
            other => Ok(other),
        }
    }

    // ------------------------------------------------------------------
    // Typed helpers
    // ------------------------------------------------------------------

    /// `PING`.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.execute(&Command::new("PING")).await.map(|_| ())
    }

    /// `GET key`.
    pub async fn get(&self, key: impl ToArg) -> Result<Option<Bytes>, StoreError> {
        self.execute(&Command::new("GET").arg(key))
            .await?
            .into_bytes("GET")
    }

    /// `SET key value` or `SETEX key secs value` depending on `expiry`.
    pub async fn set(
        &self,
        key: impl ToArg,
        value: impl ToArg,
        expiry: Expiry,
    ) -> Result<(), StoreError> {
        let cmd = match expiry {
            Expiry::Persist => Command::new("SET").arg(key).arg(value),
            Expiry::Seconds(secs) => Command::new("SETEX").arg(key).arg(secs).arg(value),
        };
        self.execute(&cmd).await.map(|_| ())
    }

    /// `SET key value NX [EX secs]`. Returns whether the key was written.
    pub async fn set_nx(
        &self,
        key: impl ToArg,
        value: impl ToArg,
        expiry: Expiry,
    ) -> Result<bool, StoreError> {
        let mut cmd = Command::new("SET").arg(key).arg(value).arg("NX");
        if let Expiry::Seconds(secs) = expiry {
            cmd = cmd.arg("EX").arg(secs);
        }
        Ok(self.execute(&cmd).await?.is_ok())
    }

    /// `DEL key [key ...]`. Returns the number of keys removed.
    pub async fn del<I, K>(&self, keys: I) -> Result<i64, StoreError>
    where
        I: IntoIterator<Item = K>,
        K: ToArg,
    {
        let cmd = Command::new("DEL").args(keys);
        if cmd.len() == 1 {
            return Ok(0);
        }
        self.execute(&cmd).await?.into_int("DEL")
    }

    /// `EXISTS key`.
    pub async fn exists(&self, key: impl ToArg) -> Result<bool, StoreError> {
        Ok(self
            .execute(&Command::new("EXISTS").arg(key))
            .await?
            .into_int("EXISTS")?
            > 0)
    }

    /// `EXPIRE key secs`. Returns whether the key exists.
    pub async fn expire(&self, key: impl ToArg, secs: u64) -> Result<bool, StoreError> {
        Ok(self
            .execute(&Command::new("EXPIRE").arg(key).arg(secs))
            .await?
            .into_int("EXPIRE")?
            == 1)
    }

    /// `KEYS pattern`.
    pub async fn keys(&self, pattern: impl ToArg) -> Result<Vec<Bytes>, StoreError> {
        self.execute(&Command::new("KEYS").arg(pattern))
            .await?
            .into_bulk_list("KEYS")
    }

    /// `HGETALL key` as field/value pairs.
    pub async fn hgetall(&self, key: impl ToArg) -> Result<Vec<(Bytes, Bytes)>, StoreError> {
        self.execute(&Command::new("HGETALL").arg(key))
            .await?
            .into_pairs("HGETALL")
    }

    /// `HSET key field value [field value ...]`.
    pub async fn hset<I, F, V>(&self, key: impl ToArg, pairs: I) -> Result<i64, StoreError>
    where
        I: IntoIterator<Item = (F, V)>,
        F: ToArg,
        V: ToArg,
    {
        let mut cmd = Command::new("HSET").arg(key);
        for (field, value) in pairs {
            cmd = cmd.arg(field).arg(value);
        }
        self.execute(&cmd).await?.into_int("HSET")
    }

    /// `HDEL key field [field ...]`.
    pub async fn hdel<I, F>(&self, key: impl ToArg, fields: I) -> Result<i64, StoreError>
    where
        I: IntoIterator<Item = F>,
        F: ToArg,
    {
        self.execute(&Command::new("HDEL").arg(key).args(fields))
            .await?
            .into_int("HDEL")
    }

    /// `FLUSHDB`.
    pub async fn flushdb(&self) -> Result<(), StoreError> {
        self.execute(&Command::new("FLUSHDB")).await.map(|_| ())
    }
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient").field("url", self.url()).finish()
    }
}
