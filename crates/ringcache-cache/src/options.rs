//! Call options and the lookup/compute/store path shared by the wrappers.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::client::ShardedCache;
use crate::codec::CacheValue;
use crate::error::CacheError;
use crate::keys::HashMethod;

/// A predicate over a call's inputs.
pub type Predicate<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;

/// A predicate deciding whether a computed value is stored.
pub type ResponseFilter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Options common to [`crate::Cached`] and [`crate::Memoized`].
///
/// `A` is what the predicates see, `T` the cached value.
pub(crate) struct CallOptions<A, T> {
    timeout: Mutex<Option<i64>>,
    pub(crate) unless: Option<Predicate<A>>,
    pub(crate) forced_update: Option<Predicate<A>>,
    pub(crate) response_filter: Option<ResponseFilter<T>>,
    pub(crate) hash_method: HashMethod,
    pub(crate) cache_none: bool,
}

impl<A, T> Default for CallOptions<A, T> {
    fn default() -> Self {
        Self {
            timeout: Mutex::new(None),
            unless: None,
            forced_update: None,
            response_filter: None,
            hash_method: HashMethod::default(),
            cache_none: false,
        }
    }
}

impl<A, T> CallOptions<A, T> {
    pub(crate) fn timeout(&self) -> Option<i64> {
        *self.timeout.lock().expect("lock poisoned")
    }

    pub(crate) fn set_timeout(&self, timeout: Option<i64>) {
        *self.timeout.lock().expect("lock poisoned") = timeout;
    }

    /// Whether the cache is skipped entirely for this call.
    pub(crate) fn bypass(&self, input: &A) -> bool {
        self.unless.as_ref().is_some_and(|f| f(input))
    }

    /// Whether the lookup is skipped and the value recomputed.
    pub(crate) fn forced(&self, input: &A) -> bool {
        self.forced_update.as_ref().is_some_and(|f| f(input))
    }

    fn accepts(&self, value: &T) -> bool {
        self.response_filter.as_ref().is_none_or(|f| f(value))
    }
}

/// Look up `key`, computing and storing the value on a miss.
///
/// `key` resolves the full (prefixed) key and may itself touch the store.
/// Backend errors in the lookup or the store fall through to `compute`
/// unless the cache runs in debug mode.
pub(crate) async fn cached_call<A, T, K, C, Fut>(
    cache: &ShardedCache,
    options: &CallOptions<A, T>,
    forced: bool,
    key: K,
    compute: C,
) -> Result<T, CacheError>
where
    T: CacheValue,
    K: Future<Output = Result<String, CacheError>>,
    C: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let found = async {
        let key = key.await?;
        if forced {
            return Ok((key, None));
        }
        let value = lookup::<T>(cache, &key, options.cache_none).await?;
        Ok::<_, CacheError>((key, value))
    }
    .await;

    let key = match found {
        Ok((key, Some(value))) => {
            debug!(parent: cache.span(), key = %key, "cache hit");
            return Ok(value);
        }
        Ok((key, None)) => key,
        Err(e) => {
            if cache.is_debug() {
                return Err(e);
            }
            error!(parent: cache.span(), error = %e, "cache lookup failed, calling through");
            return Ok(compute().await);
        }
    };

    debug!(parent: cache.span(), key = %key, forced, "cache miss");
    let value = compute().await;
    if options.accepts(&value) {
        if let Err(e) = cache.cache_set(key.as_str(), &value, options.timeout(), false).await {
            if cache.is_debug() {
                return Err(e);
            }
            error!(parent: cache.span(), error = %e, key = %key, "cache store failed");
        }
    }
    Ok(value)
}

/// Read `key`. A stored null counts as a miss unless `cache_none` is set,
/// in which case an existence check tells a stored null from nothing.
async fn lookup<T: CacheValue>(
    cache: &ShardedCache,
    key: &str,
    cache_none: bool,
) -> Result<Option<T>, CacheError> {
    match cache.cache_get::<T>(key, false).await? {
        Some(value) if !value.is_null() => Ok(Some(value)),
        value if cache_none => {
            // Racy against concurrent writers; opt-in only.
            if cache.has(key, false).await? {
                Ok(value.or_else(T::null))
            } else {
                Ok(None)
            }
        }
        _ => Ok(None),
    }
}
