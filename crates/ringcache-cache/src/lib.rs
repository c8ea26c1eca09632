//! Sharded caching on top of the command router.
//!
//! - [`ShardedCache`]: get/set/delete of encoded values, each on the node
//!   owning its key.
//! - [`Cached`]: caches request handlers by path (or path plus query).
//! - [`Memoized`]: caches functions and methods by normalized arguments,
//!   with version tokens for bulk invalidation.
//!
//! Values go through the codec in [`codec`]: integers as ASCII, everything
//! else as a tag byte plus a postcard body. Backend failures inside the
//! wrappers fall through to the wrapped function unless
//! [`ringcache_types::CacheSettings::debug`] is set.

mod args;
mod cached;
mod client;
pub mod codec;
mod error;
pub mod keys;
mod memoize;
mod options;
mod version;

pub use args::{BoundArgs, CacheIdentity, CallArgs, Param, Receiver, Signature};
pub use cached::{Cached, RequestContext};
pub use client::ShardedCache;
pub use codec::{CacheValue, Decoded};
pub use error::CacheError;
pub use keys::{HashMethod, KeyPrefix};
pub use memoize::Memoized;
pub use options::{Predicate, ResponseFilter};
pub use version::{MemoizeVersion, VersionInit, VersionOp, memoize_version};
