//! Error types for ring resolution.

use ringcache_store::StoreError;
use ringcache_types::ConfigError;

/// Errors that can occur while loading or using the ring.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// The ring has no virtual nodes; nothing can be routed.
    #[error("hash ring is empty: populate the {0} record before serving traffic")]
    EmptyRing(&'static str),

    /// A ring field is not a decimal unsigned integer.
    #[error("invalid virtual node hash {0:?}")]
    InvalidVnodeHash(String),

    /// A ring value is not a valid node URL.
    #[error("invalid node address: {0}")]
    InvalidNode(#[from] ConfigError),

    /// Reading or writing the control store failed.
    #[error("control store error: {0}")]
    Store(#[from] StoreError),
}

impl PlacementError {
    /// Whether the underlying failure is a transient store error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

impl ringcache_store::Transient for PlacementError {
    fn is_transient(&self) -> bool {
        PlacementError::is_transient(self)
    }
}
