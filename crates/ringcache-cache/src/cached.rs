//! Caching of request handlers.

use std::future::Future;
use std::sync::Arc;

use crate::client::ShardedCache;
use crate::codec::CacheValue;
use crate::error::CacheError;
use crate::keys::{HashMethod, KeyPrefix, query_string_key};
use crate::options::{CallOptions, cached_call};

/// The request a cached handler is serving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Request path, without the query string.
    pub path: String,
    /// Query parameters in request order; repeated names allowed.
    pub query: Vec<(String, String)>,
}

impl RequestContext {
    /// A request for `path` with no query parameters.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Split a request target such as `/items?b=2&a=1`.
    ///
    /// Parameters without `=` get an empty value. No percent-decoding is done.
    pub fn from_target(target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let query = query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (k.to_string(), v.to_string())
            })
            .collect();
        Self {
            path: path.to_string(),
            query,
        }
    }

    /// Add a query parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// A request handler whose responses are cached.
///
/// Built with [`Cached::new`] and configured with the builder methods. The
/// handler receives the [`RequestContext`]; it must not borrow from it in
/// the returned future.
pub struct Cached<F, T> {
    cache: Arc<ShardedCache>,
    func: F,
    key_prefix: KeyPrefix,
    query_string: bool,
    options: CallOptions<RequestContext, T>,
}

impl<F, T: CacheValue> Cached<F, T> {
    /// Wrap `func` with the default key prefix `view/%s`.
    pub fn new<Fut>(cache: Arc<ShardedCache>, func: F) -> Self
    where
        F: Fn(&RequestContext) -> Fut,
        Fut: Future<Output = T>,
    {
        Self {
            cache,
            func,
            key_prefix: KeyPrefix::default(),
            query_string: false,
            options: CallOptions::default(),
        }
    }

    /// Lifetime of stored responses; `None` uses the cache default.
    pub fn timeout(self, timeout: Option<i64>) -> Self {
        self.options.set_timeout(timeout);
        self
    }

    /// Key template; `%s` is replaced by the request path.
    pub fn key_prefix(mut self, prefix: impl Into<KeyPrefix>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Key on the path plus a hash of the sorted query parameters.
    pub fn query_string(mut self, enabled: bool) -> Self {
        self.query_string = enabled;
        self
    }

    /// Skip the cache entirely when `f` returns true.
    pub fn unless<P>(mut self, f: P) -> Self
    where
        P: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        self.options.unless = Some(Arc::new(f));
        self
    }

    /// Recompute and overwrite the entry when `f` returns true.
    pub fn forced_update<P>(mut self, f: P) -> Self
    where
        P: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        self.options.forced_update = Some(Arc::new(f));
        self
    }

    /// Store a computed response only when `f` approves it.
    pub fn response_filter<P>(mut self, f: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.options.response_filter = Some(Arc::new(f));
        self
    }

    /// Digest used for query-string keys.
    pub fn hash_method(mut self, method: HashMethod) -> Self {
        self.options.hash_method = method;
        self
    }

    /// Treat a stored null as a hit, confirmed by an existence check.
    pub fn cache_none(mut self, enabled: bool) -> Self {
        self.options.cache_none = enabled;
        self
    }

    /// The wrapped handler.
    pub fn uncached(&self) -> &F {
        &self.func
    }

    /// Current lifetime of stored responses.
    pub fn cache_timeout(&self) -> Option<i64> {
        self.options.timeout()
    }

    /// Change the lifetime for responses stored from now on.
    pub fn set_cache_timeout(&self, timeout: Option<i64>) {
        self.options.set_timeout(timeout);
    }

    /// Key for a live request, without the global prefix.
    pub fn make_cache_key(&self, request: &RequestContext) -> String {
        if self.query_string {
            query_string_key(&request.path, &request.query, self.options.hash_method)
        } else {
            self.key_prefix.render(&request.path)
        }
    }

    /// Key the handler would use when serving `target_path`, for lookups
    /// or invalidation from outside a request.
    pub fn cache_key_for(&self, target_path: &str) -> String {
        self.key_prefix.render(target_path)
    }

    /// Serve `request` from the cache, calling the handler on a miss.
    pub async fn call<Fut>(&self, request: &RequestContext) -> Result<T, CacheError>
    where
        F: Fn(&RequestContext) -> Fut,
        Fut: Future<Output = T>,
    {
        if self.options.bypass(request) {
            return Ok((self.func)(request).await);
        }
        let forced = self.options.forced(request);
        let key = async { Ok::<_, CacheError>(self.cache.prefixed(&self.make_cache_key(request), true)) };
        cached_call(&self.cache, &self.options, forced, key, || (self.func)(request)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ringcache_placement::{HashRing, RingResolver};
    use ringcache_router::CommandRouter;
    use ringcache_store::{Fault, MemoryConnector, MemoryNode, PoolRegistry, RetryPolicy};
    use ringcache_types::{CacheSettings, NodeUrl, PoolConfig};

    use super::*;

    struct Fixture {
        node: Arc<MemoryNode>,
        cache: Arc<ShardedCache>,
        calls: Arc<AtomicUsize>,
    }

    async fn fixture(debug: bool) -> Fixture {
        let connector = Arc::new(MemoryConnector::new());
        let control = NodeUrl::new("control", 6379, 0, None);
        connector.add_node(control.clone());
        let url = NodeUrl::new("cache", 7001, 0, None);
        let node = connector.add_node(url.clone());
        let pools = Arc::new(PoolRegistry::with_connector(connector, PoolConfig::default()));
        let resolver = RingResolver::new(pools.client(&control), RetryPolicy::none());
        resolver.publish(&HashRing::build([&url], 8)).await.unwrap();
        let router = CommandRouter::new(resolver, pools, RetryPolicy::none());
        let settings = CacheSettings {
            debug,
            ..CacheSettings::with_prefix("app:")
        };
        Fixture {
            node,
            cache: Arc::new(ShardedCache::connect(router, settings).await.unwrap()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn counting(calls: &Arc<AtomicUsize>) -> impl Fn(&RequestContext) -> std::future::Ready<u64> {
        let calls = calls.clone();
        move |_: &RequestContext| std::future::ready(calls.fetch_add(1, Ordering::SeqCst) as u64 + 1)
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let f = fixture(false).await;
        let view = Cached::new(f.cache.clone(), counting(&f.calls));
        let req = RequestContext::new("/home");
        assert_eq!(view.call(&req).await.unwrap(), 1);
        assert_eq!(view.call(&req).await.unwrap(), 1);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert!(f.node.contains_key("app:view//home"));
        assert_eq!(view.call(&RequestContext::new("/other")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_query_string_keys_ignore_order() {
        let f = fixture(false).await;
        let view = Cached::new(f.cache.clone(), counting(&f.calls)).query_string(true);
        let a = RequestContext::from_target("/search?a=1&b=2");
        let b = RequestContext::from_target("/search?b=2&a=1");
        assert_eq!(view.make_cache_key(&a), view.make_cache_key(&b));
        view.call(&a).await.unwrap();
        view.call(&b).await.unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);

        view.call(&RequestContext::from_target("/search?a=2")).await.unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unless_and_forced_update() {
        let f = fixture(false).await;
        let view = Cached::new(f.cache.clone(), counting(&f.calls))
            .unless(|req| req.path.starts_with("/admin"))
            .forced_update(|req| req.query.iter().any(|(k, _)| k == "refresh"));

        let admin = RequestContext::new("/admin");
        view.call(&admin).await.unwrap();
        view.call(&admin).await.unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
        assert!(f.node.is_empty());

        let page = RequestContext::new("/page");
        assert_eq!(view.call(&page).await.unwrap(), 3);
        let refresh = RequestContext::new("/page").with_param("refresh", "1");
        assert_eq!(view.call(&refresh).await.unwrap(), 4);
        assert_eq!(view.call(&page).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_response_filter_prevents_store() {
        let f = fixture(false).await;
        let view = Cached::new(f.cache.clone(), counting(&f.calls)).response_filter(|v| v % 2 == 0);
        let req = RequestContext::new("/odd");
        assert_eq!(view.call(&req).await.unwrap(), 1);
        assert_eq!(view.call(&req).await.unwrap(), 2);
        assert_eq!(view.call(&req).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_prefix_forms_and_external_key() {
        let f = fixture(false).await;
        let view = Cached::new(f.cache.clone(), counting(&f.calls)).key_prefix("page:%s");
        assert_eq!(view.cache_key_for("/about"), "page:/about");
        view.call(&RequestContext::new("/about")).await.unwrap();
        assert!(f.cache.has(view.cache_key_for("/about"), true).await.unwrap());

        let fixed = Cached::new(f.cache.clone(), counting(&f.calls)).key_prefix("sidebar");
        assert_eq!(fixed.make_cache_key(&RequestContext::new("/x")), "sidebar");
    }

    #[tokio::test]
    async fn test_backend_failure_fails_open() {
        let f = fixture(false).await;
        let view = Cached::new(f.cache.clone(), counting(&f.calls));
        f.node.set_down(true);
        assert_eq!(view.call(&RequestContext::new("/a")).await.unwrap(), 1);
        assert_eq!(view.call(&RequestContext::new("/a")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces_in_debug() {
        let f = fixture(true).await;
        let view = Cached::new(f.cache.clone(), counting(&f.calls));
        f.node.fail_next(1, Fault::Disconnect);
        let err = view.call(&RequestContext::new("/a")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_none_uses_existence_check() {
        let f = fixture(false).await;
        let calls = f.calls.clone();
        let view = Cached::new(f.cache.clone(), move |_: &RequestContext| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Option::<String>::None)
        });
        let req = RequestContext::new("/empty");
        view.call(&req).await.unwrap();
        view.call(&req).await.unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);

        let view = view.cache_none(true);
        assert_eq!(view.call(&req).await.unwrap(), None);
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mutable_timeout() {
        let f = fixture(false).await;
        let view = Cached::new(f.cache.clone(), counting(&f.calls)).timeout(Some(30));
        assert_eq!(view.cache_timeout(), Some(30));
        view.set_cache_timeout(Some(0));
        assert_eq!(view.cache_timeout(), Some(0));
        assert_eq!(view.uncached()(&RequestContext::new("/")).await, 1);
    }
}
