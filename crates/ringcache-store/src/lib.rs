//! Store protocol, node connections and pooling.
//!
//! This crate talks to individual store nodes:
//!
//! - [`Command`] / [`Reply`] and the RESP2 codec in [`resp`].
//! - [`Connection`] and [`Connector`], with a TCP implementation
//!   ([`TcpConnector`]) and an in-memory one ([`MemoryConnector`]).
//! - [`ConnectionPool`] / [`PoolRegistry`]: per-address pools that take a
//!   connection back only between commands.
//! - [`NodeClient`]: execute a command on one node, with the single
//!   resend-after-timeout rule.
//! - [`RetryPolicy`]: bounded retry of transient failures.

mod client;
mod command;
mod connection;
mod error;
mod memory;
mod pool;
pub mod resp;
mod retry;

pub use client::NodeClient;
pub use command::{Command, Reply, ToArg};
pub use connection::{Connection, Connector, TcpConnection, TcpConnector};
pub use error::StoreError;
pub use memory::{Fault, MemoryConnection, MemoryConnector, MemoryNode, glob_match};
pub use pool::{ConnectionPool, PoolRegistry, PooledConnection};
pub use retry::{RetryPolicy, Transient};
