//! Error types for store operations.

use std::time::Duration;

use ringcache_types::ConfigError;

/// Errors that can occur while talking to a store node.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Could not reach the node, or the connection dropped mid-command.
    #[error("connection error: {0}")]
    Connection(String),

    /// The node did not answer within the configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// An I/O error on an established connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The node sent bytes that are not a valid reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The node answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// The reply had a different shape than the command implies.
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        /// The command that was sent.
        command: String,
        /// Debug rendering of what came back.
        reply: String,
    },

    /// Invalid node address or settings.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Connectivity and timeout failures, the only errors worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_) | Self::Io(_))
    }

    /// Whether this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
