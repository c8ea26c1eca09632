//! Memoization of functions and methods.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::info;

use crate::args::{BoundArgs, CacheIdentity, CallArgs, Receiver, Signature};
use crate::client::ShardedCache;
use crate::codec::CacheValue;
use crate::error::CacheError;
use crate::keys::{HashMethod, function_namespace, memoize_key};
use crate::options::{CallOptions, cached_call};
use crate::version::{MemoizeVersion, VersionOp, memoize_version};

type MakeName = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A function whose results are cached per argument tuple.
///
/// Keys combine the function namespace (from the [`Signature`]), the
/// normalized arguments and the namespace's version tokens. For methods
/// (`R` is the receiver type) the receiver's [`CacheIdentity`] adds an
/// instance namespace with its own token.
///
/// The wrapped function gets the receiver and the [`BoundArgs`]; the future
/// it returns must not borrow either.
pub struct Memoized<F, T, R = ()> {
    cache: Arc<ShardedCache>,
    signature: Signature,
    func: F,
    make_name: Option<MakeName>,
    options: CallOptions<BoundArgs, T>,
    _receiver: PhantomData<fn(&R)>,
}

impl<F, T: CacheValue, R: CacheIdentity> Memoized<F, T, R> {
    /// Memoize `func`, described by `signature`, through `cache`.
    pub fn new<Fut>(cache: Arc<ShardedCache>, signature: Signature, func: F) -> Self
    where
        F: Fn(&R, BoundArgs) -> Fut,
        Fut: Future<Output = T>,
    {
        Self {
            cache,
            signature,
            func,
            make_name: None,
            options: CallOptions::default(),
            _receiver: PhantomData,
        }
    }

    /// Lifetime of stored results and version tokens; `None` uses the
    /// cache default.
    pub fn timeout(self, timeout: Option<i64>) -> Self {
        self.options.set_timeout(timeout);
        self
    }

    /// Rename the function identifier used in keys.
    pub fn make_name<N>(mut self, f: N) -> Self
    where
        N: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.make_name = Some(Arc::new(f));
        self
    }

    /// Skip the cache entirely when `f` returns true.
    pub fn unless<P>(mut self, f: P) -> Self
    where
        P: Fn(&BoundArgs) -> bool + Send + Sync + 'static,
    {
        self.options.unless = Some(Arc::new(f));
        self
    }

    /// Recompute, and rewrite the version tokens, when `f` returns true.
    pub fn forced_update<P>(mut self, f: P) -> Self
    where
        P: Fn(&BoundArgs) -> bool + Send + Sync + 'static,
    {
        self.options.forced_update = Some(Arc::new(f));
        self
    }

    /// Store a computed result only when `f` approves it.
    pub fn response_filter<P>(mut self, f: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.options.response_filter = Some(Arc::new(f));
        self
    }

    /// Digest used for argument hashes.
    pub fn hash_method(mut self, method: HashMethod) -> Self {
        self.options.hash_method = method;
        self
    }

    /// Treat a stored null as a hit, confirmed by an existence check.
    pub fn cache_none(mut self, enabled: bool) -> Self {
        self.options.cache_none = enabled;
        self
    }

    /// The wrapped function.
    pub fn uncached(&self) -> &F {
        &self.func
    }

    /// The declared signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Current lifetime of memoized results.
    pub fn cache_timeout(&self) -> Option<i64> {
        self.options.timeout()
    }

    /// Change the lifetime for results stored from now on.
    pub fn set_cache_timeout(&self, timeout: Option<i64>) {
        self.options.set_timeout(timeout);
    }

    /// Call on `receiver`, from the cache when possible.
    pub async fn call_on<Fut>(&self, receiver: &R, args: CallArgs) -> Result<T, CacheError>
    where
        F: Fn(&R, BoundArgs) -> Fut,
        Fut: Future<Output = T>,
    {
        let bound = self.signature.bind(args);
        if self.options.bypass(&bound) {
            return Ok((self.func)(receiver, bound).await);
        }
        let forced = self.options.forced(&bound);
        let key = async {
            let key = self.key_for(receiver, &bound, forced).await?;
            Ok::<_, CacheError>(self.cache.prefixed(&key, true))
        };
        cached_call(&self.cache, &self.options, forced, key, || {
            (self.func)(receiver, bound.clone())
        })
        .await
    }

    /// Key of a call on `receiver`, without the global prefix.
    ///
    /// Creates the namespace's version tokens if they are missing.
    pub async fn make_cache_key_on(&self, receiver: &R, args: CallArgs) -> Result<String, CacheError> {
        let bound = self.signature.bind(args);
        self.key_for(receiver, &bound, false).await
    }

    /// Invalidate cached results for `receiver`.
    ///
    /// Without arguments the receiver's most specific version token is
    /// replaced, orphaning all its entries. With arguments only that call's
    /// entry is deleted.
    pub async fn delete_memoized_on(&self, receiver: &R, args: CallArgs) -> Result<(), CacheError> {
        if args.is_empty() {
            let instance = self.instance_token(receiver);
            self.version(instance.as_deref(), VersionOp::Reset).await?;
            return Ok(());
        }
        let key = self.make_cache_key_on(receiver, args).await?;
        self.cache.cache_delete(key.as_str(), true).await?;
        info!(parent: self.cache.span(), key = %key, "deleted memoized entry");
        Ok(())
    }

    /// Delete the version key of `receiver`'s namespace outright.
    pub async fn delete_memoized_verhash_on(&self, receiver: &R) -> Result<(), CacheError> {
        let instance = self.instance_token(receiver);
        self.version(instance.as_deref(), VersionOp::Delete).await?;
        Ok(())
    }

    /// Replace the function-level token, invalidating every entry of the
    /// function across all receivers.
    pub async fn delete_memoized_all(&self) -> Result<(), CacheError> {
        self.version(None, VersionOp::Reset).await?;
        Ok(())
    }

    /// Delete the function-level version key outright.
    pub async fn delete_memoized_verhash(&self) -> Result<(), CacheError> {
        self.version(None, VersionOp::Delete).await?;
        Ok(())
    }

    fn instance_token(&self, receiver: &R) -> Option<String> {
        match self.signature.receiver() {
            Receiver::Free => None,
            Receiver::Instance => Some(receiver.cache_identity()),
            Receiver::Class(class) => Some(class.clone()),
        }
    }

    async fn version(
        &self,
        instance: Option<&str>,
        op: VersionOp,
    ) -> Result<MemoizeVersion, CacheError> {
        let (namespace, instance_ns) = function_namespace(&self.signature, instance);
        memoize_version(
            &self.cache,
            &namespace,
            instance_ns.as_deref(),
            op,
            self.options.timeout(),
            false,
        )
        .await
    }

    async fn key_for(
        &self,
        receiver: &R,
        bound: &BoundArgs,
        forced: bool,
    ) -> Result<String, CacheError> {
        let identity = self.instance_token(receiver);
        let (namespace, instance_ns) = function_namespace(&self.signature, identity.as_deref());
        let version = memoize_version(
            &self.cache,
            &namespace,
            instance_ns.as_deref(),
            VersionOp::Fetch,
            self.options.timeout(),
            forced,
        )
        .await?;

        let name = match &self.make_name {
            Some(f) => f(&namespace),
            None => namespace,
        };
        Ok(memoize_key(
            &name,
            identity.as_deref(),
            bound,
            self.options.hash_method,
            version.version.as_deref().unwrap_or_default(),
        ))
    }
}

impl<F, T: CacheValue> Memoized<F, T, ()> {
    /// Call the free function, from the cache when possible.
    pub async fn call<Fut>(&self, args: CallArgs) -> Result<T, CacheError>
    where
        F: Fn(&(), BoundArgs) -> Fut,
        Fut: Future<Output = T>,
    {
        self.call_on(&(), args).await
    }

    /// Key of a call, without the global prefix.
    pub async fn make_cache_key(&self, args: CallArgs) -> Result<String, CacheError> {
        self.make_cache_key_on(&(), args).await
    }

    /// Without arguments, invalidate every cached result; with arguments,
    /// delete that call's entry.
    pub async fn delete_memoized(&self, args: CallArgs) -> Result<(), CacheError> {
        self.delete_memoized_on(&(), args).await
    }
}
