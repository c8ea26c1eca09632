//! Version tokens for memoized namespaces.
//!
//! Each function namespace, and each instance namespace below it, has a
//! short random token stored under `<prefix><namespace>_memver`. Tokens are
//! appended to every memoized key, so replacing a token invalidates every
//! entry of its namespace at once. Old entries are left to expire.

use tracing::{Instrument, debug, info};

use crate::client::ShardedCache;
use crate::error::CacheError;
use crate::keys::{new_version_token, version_key};

/// How a missing token is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionInit {
    /// Read, then write any missing token. Concurrent first callers may
    /// each write a token; the last write wins and costs one extra miss.
    #[default]
    ReadThenWrite,
    /// Create missing tokens with `SET .. NX` and read back the winner.
    SetIfAbsent,
}

/// What to do with a namespace's tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOp {
    /// Read the tokens, creating missing ones.
    Fetch,
    /// Replace the most specific token.
    Reset,
    /// Delete the most specific version key.
    Delete,
}

/// Namespace and current tokens of a memoized function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoizeVersion {
    /// The function namespace.
    pub namespace: String,
    /// Concatenated tokens; `None` after [`VersionOp::Delete`].
    pub version: Option<String>,
}

/// Run `op` on the tokens of `namespace` (and `instance`, the more
/// specific one, when present).
///
/// `forced_update` rewrites every token even when nothing changed,
/// refreshing its lifetime.
pub async fn memoize_version(
    cache: &ShardedCache,
    namespace: &str,
    instance: Option<&str>,
    op: VersionOp,
    timeout: Option<i64>,
    forced_update: bool,
) -> Result<MemoizeVersion, CacheError> {
    let keys: Vec<String> = std::iter::once(namespace)
        .chain(instance)
        .map(version_key)
        .collect();
    let last = keys.len() - 1;

    async {
        if op == VersionOp::Delete {
            cache.cache_delete(keys[last].as_str(), true).await?;
            info!(key = %keys[last], "deleted version key");
            return Ok(MemoizeVersion {
                namespace: namespace.to_string(),
                version: None,
            });
        }

        let mut tokens: Vec<Option<String>> = cache.get_many(keys.iter(), true).await?;
        let mut dirty = vec![forced_update; keys.len()];

        for (i, token) in tokens.iter_mut().enumerate() {
            if token.is_none() {
                *token = Some(create_token(cache, &keys[i], timeout).await?);
                dirty[i] = cache.version_init() == VersionInit::ReadThenWrite;
            }
        }
        if op == VersionOp::Reset {
            tokens[last] = Some(new_version_token());
            dirty[last] = true;
            info!(key = %keys[last], "reset version token");
        }

        let writes: Vec<(&String, String)> = keys
            .iter()
            .zip(tokens.iter())
            .zip(dirty.iter())
            .filter(|(_, dirty)| **dirty)
            .filter_map(|((key, token), _)| token.clone().map(|t| (key, t)))
            .collect();
        if !writes.is_empty() {
            debug!(count = writes.len(), "writing version tokens");
            cache.set_many(writes, timeout, true).await?;
        }

        Ok(MemoizeVersion {
            namespace: namespace.to_string(),
            version: Some(tokens.into_iter().flatten().collect()),
        })
    }
    .instrument(cache.span().clone())
    .await
}

/// A token for a key that had none.
///
/// In [`VersionInit::ReadThenWrite`] mode this is just a fresh token; the
/// caller writes it. Otherwise it is written here with `SET .. NX` and the
/// stored winner is returned.
async fn create_token(
    cache: &ShardedCache,
    key: &str,
    timeout: Option<i64>,
) -> Result<String, CacheError> {
    let token = new_version_token();
    if cache.version_init() == VersionInit::ReadThenWrite {
        return Ok(token);
    }

    let client = cache.client_for(key, true).await?;
    let full_key = cache.prefixed(key, true);
    let expiry = ringcache_types::Expiry::from_timeout(timeout, cache.settings().default_timeout());
    let written = client
        .set_nx(&full_key, crate::codec::encode(&token)?, expiry)
        .await?;
    if written {
        return Ok(token);
    }
    let winner: Option<String> = cache.cache_get(key, true).await?;
    debug!(key, "version token already created by another caller");
    Ok(winner.unwrap_or(token))
}
