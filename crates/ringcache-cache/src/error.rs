//! Error types for the caching layer.

use ringcache_placement::PlacementError;
use ringcache_router::{RouterError, RoutingError};
use ringcache_store::StoreError;
use ringcache_types::ConfigError;

/// Errors returned by [`crate::ShardedCache`] and the call wrappers.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Invalid cache settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The ring could not be loaded or is empty.
    #[error(transparent)]
    Placement(#[from] PlacementError),

    /// A routed command was rejected or failed on its shard.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// A direct node command failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A value could not be serialized for storage.
    #[error("encode error: {0}")]
    Encode(String),

    /// Call arguments could not be converted for key derivation.
    #[error("invalid call arguments: {0}")]
    Arguments(String),
}

impl CacheError {
    /// Connectivity or timeout failure somewhere below the cache.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Placement(e) => e.is_transient(),
            Self::Router(e) => e.is_transient(),
            Self::Store(e) => e.is_transient(),
            Self::Config(_) | Self::Encode(_) | Self::Arguments(_) => false,
        }
    }

    /// The routing error, if the router refused the command.
    pub fn as_routing(&self) -> Option<&RoutingError> {
        match self {
            Self::Router(RouterError::Routing(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<postcard::Error> for CacheError {
    fn from(e: postcard::Error) -> Self {
        Self::Encode(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Arguments(e.to_string())
    }
}
