//! Error types for command routing.

use ringcache_placement::PlacementError;
use ringcache_store::StoreError;

/// A command that cannot be sent through the sharded router.
///
/// These indicate caller misuse and are never retried. Commands without a
/// per-key target should go through a direct node client instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// Fewer than two parts: no key to hash.
    #[error("cannot determine shard without a key for {command:?}; use a direct node client")]
    MissingKey {
        /// The command name, if any.
        command: String,
    },

    /// The command is not in the command table.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// The command's first parameter is not a key.
    #[error(
        "{command} takes {parameter:?} as its first parameter, not a key; use a direct node client"
    )]
    Unroutable {
        /// The command name.
        command: String,
        /// Its declared first parameter, or `-` when it takes none.
        parameter: String,
    },

    /// The command acts on the whole server and is never routed.
    #[error("{0} has no per-key target; use a direct node client")]
    Excluded(String),

    /// The routing argument is not valid UTF-8.
    #[error("routing key for {command} is not valid UTF-8")]
    InvalidKey {
        /// The command name.
        command: String,
    },
}

/// Errors returned by [`crate::CommandRouter`].
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The command was rejected before any I/O.
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// The ring could not be loaded or is empty.
    #[error(transparent)]
    Placement(#[from] PlacementError),

    /// The shard failed to execute the command.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RouterError {
    /// Connectivity or timeout failure on the shard or control store.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Routing(_) => false,
            Self::Placement(e) => e.is_transient(),
            Self::Store(e) => e.is_transient(),
        }
    }
}

impl ringcache_store::Transient for RouterError {
    fn is_transient(&self) -> bool {
        RouterError::is_transient(self)
    }
}
