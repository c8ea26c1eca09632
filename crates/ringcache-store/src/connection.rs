//! Node connections.
//!
//! [`Connection`] is a single ordered request/reply channel to one node.
//! [`Connector`] opens connections for a node address; the pool layer calls
//! it whenever no idle connection is available.
//!
//! Connections are lazy: opening one performs no I/O, the first command
//! establishes the socket, and a disconnected connection reconnects on its
//! next command.

use std::time::Duration;

use bytes::BytesMut;
use ringcache_types::{NodeUrl, PoolConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::command::{Command, Reply};
use crate::error::StoreError;
use crate::resp::{encode_command, parse_reply};

/// An ordered request/reply channel to one node.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Write one command, connecting first if needed.
    async fn send_command(&mut self, cmd: &Command) -> Result<(), StoreError>;

    /// Read the next reply.
    async fn read_reply(&mut self) -> Result<Reply, StoreError>;

    /// Drop the underlying socket. The next command reconnects.
    async fn disconnect(&mut self);

    /// Whether a command that timed out may be resent once on a fresh socket.
    fn retry_on_timeout(&self) -> bool;
}

/// Opens connections to node addresses.
pub trait Connector: Send + Sync {
    /// Create a (not yet connected) connection for `url`.
    fn open(&self, url: &NodeUrl) -> Result<Box<dyn Connection>, StoreError>;
}

/// Connector for real nodes over TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: PoolConfig,
}

impl TcpConnector {
    /// Create a connector using the given timeouts and retry flag.
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }
}

impl Connector for TcpConnector {
    fn open(&self, url: &NodeUrl) -> Result<Box<dyn Connection>, StoreError> {
        Ok(Box::new(TcpConnection::new(url.clone(), self.config)))
    }
}

/// A TCP connection speaking RESP2.
///
/// On connect it authenticates (when the URL carries a password) and
/// selects the URL's database.
pub struct TcpConnection {
    url: NodeUrl,
    config: PoolConfig,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
}

impl TcpConnection {
    /// Create a connection for `url`. No I/O happens until the first command.
    pub fn new(url: NodeUrl, config: PoolConfig) -> Self {
        Self {
            url,
            config,
            stream: None,
            read_buf: BytesMut::with_capacity(4096),
        }
    }

    /// Whether a socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn ensure_connected(&mut self) -> Result<(), StoreError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.url.socket_addr();
        let connect_timeout = self.config.connect_timeout();
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))?
            .map_err(|e| StoreError::Connection(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;

        debug!(node = ?self.url, "connected");
        self.stream = Some(stream);
        self.read_buf.clear();

        if let Some(password) = self.url.password.clone() {
            self.handshake(&Command::new("AUTH").arg(password)).await?;
        }
        if self.url.db != 0 {
            let db = self.url.db;
            self.handshake(&Command::new("SELECT").arg(db)).await?;
        }
        Ok(())
    }

    async fn handshake(&mut self, cmd: &Command) -> Result<(), StoreError> {
        let result = async {
            self.write_frame(cmd).await?;
            match self.read_frame().await? {
                Reply::Error(e) => Err(StoreError::Server(e)),
                _ => Ok(()),
            }
        }
        .await;
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    async fn write_frame(&mut self, cmd: &Command) -> Result<(), StoreError> {
        let io_timeout = self.config.io_timeout();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| StoreError::Connection("not connected".into()))?;

        let mut buf = BytesMut::new();
        encode_command(cmd, &mut buf);
        with_timeout(io_timeout, stream.write_all(&buf)).await
    }

    async fn read_frame(&mut self) -> Result<Reply, StoreError> {
        let io_timeout = self.config.io_timeout();
        loop {
            if let Some(reply) = parse_reply(&mut self.read_buf)? {
                return Ok(reply);
            }
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| StoreError::Connection("not connected".into()))?;
            let n = with_timeout(io_timeout, stream.read_buf(&mut self.read_buf)).await?;
            if n == 0 {
                return Err(StoreError::Connection("connection closed by node".into()));
            }
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T, StoreError> {
    match timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[async_trait::async_trait]
impl Connection for TcpConnection {
    async fn send_command(&mut self, cmd: &Command) -> Result<(), StoreError> {
        self.ensure_connected().await?;
        self.write_frame(cmd).await
    }

    async fn read_reply(&mut self) -> Result<Reply, StoreError> {
        self.read_frame().await
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(node = ?self.url, "disconnected");
        }
        self.read_buf.clear();
    }

    fn retry_on_timeout(&self) -> bool {
        self.config.retry_on_timeout
    }
}
