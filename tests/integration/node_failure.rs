//! Integration test: node failures, retries and fail-open wrappers.

use std::future::{Ready, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ringcache_cache::{CacheError, Cached, CallArgs, Memoized, RequestContext, Signature};
use ringcache_integration_tests::{PREFIX, TestCluster};
use ringcache_router::{RouterError, RoutingError};
use ringcache_store::{Command, Fault, RetryPolicy};
use ringcache_types::CacheSettings;

fn render(calls: &Arc<AtomicUsize>) -> impl Fn(&RequestContext) -> Ready<usize> {
    let calls = calls.clone();
    move |_: &RequestContext| ready(calls.fetch_add(1, Ordering::SeqCst) + 1)
}

/// Index of the node that owns `key` under the published ring.
async fn owner(c: &TestCluster, key: &str) -> usize {
    let url = c.router().node_for(key).await.unwrap();
    c.urls().iter().position(|u| *u == url).unwrap()
}

/// With every shard down, cached handlers still answer (uncached).
#[tokio::test]
async fn test_cached_fails_open_when_nodes_down() {
    let c = TestCluster::new(3).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let view = Cached::new(c.cache().await, render(&calls));
    for i in 0..c.len() {
        c.kill_node(i);
    }

    let req = RequestContext::new("/status");
    assert_eq!(view.call(&req).await.unwrap(), 1);
    assert_eq!(view.call(&req).await.unwrap(), 2);

    for i in 0..c.len() {
        c.revive_node(i);
    }
    assert_eq!(view.call(&req).await.unwrap(), 3);
    assert_eq!(view.call(&req).await.unwrap(), 3);
}

/// Memoized functions fail open too, including when the version key's
/// node is the one that is down.
#[tokio::test]
async fn test_memoized_fails_open_on_version_node() {
    let c = TestCluster::new(3).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let memo = Memoized::new(
        c.cache().await,
        Signature::new("jobs", "report").param("day"),
        move |_: &(), _args| ready(counter.fetch_add(1, Ordering::SeqCst) + 1),
    );

    let version_node = owner(&c, &format!("{PREFIX}jobs.report_memver")).await;
    c.kill_node(version_node);
    assert_eq!(memo.call(CallArgs::new().arg("mon")).await.unwrap(), 1);
    assert_eq!(memo.call(CallArgs::new().arg("mon")).await.unwrap(), 2);

    c.revive_node(version_node);
    assert_eq!(memo.call(CallArgs::new().arg("mon")).await.unwrap(), 3);
    assert_eq!(memo.call(CallArgs::new().arg("mon")).await.unwrap(), 3);
}

/// In debug mode backend failures reach the caller.
#[tokio::test]
async fn test_debug_mode_surfaces_backend_errors() {
    let c = TestCluster::new(2).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = c
        .cache_with(CacheSettings {
            debug: true,
            ..CacheSettings::with_prefix(PREFIX)
        })
        .await;
    let view = Cached::new(cache, render(&calls));
    c.kill_node(0);
    c.kill_node(1);

    let err = view.call(&RequestContext::new("/x")).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Transient faults within the retry budget are invisible to callers.
#[tokio::test]
async fn test_retry_recovers_from_transient_faults() {
    let c = TestCluster::new(2).await;
    let router = c.router_with_retry(RetryPolicy::new(3, Duration::ZERO));
    let node = owner(&c, "greeting").await;

    c.node(node).fail_next(2, Fault::Disconnect);
    router
        .execute(&Command::new("SET").arg("greeting").arg("hi"))
        .await
        .unwrap();
    assert!(c.node(node).contains_key("greeting"));
}

/// Exhausted retries propagate the transient error.
#[tokio::test]
async fn test_retry_exhaustion_propagates() {
    let c = TestCluster::new(2).await;
    let router = c.router_with_retry(RetryPolicy::new(2, Duration::ZERO));
    let node = owner(&c, "greeting").await;

    c.node(node).fail_next(2, Fault::Timeout);
    let err = router
        .execute(&Command::new("GET").arg("greeting"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(c.node(node).command_count(), 0);
}

/// Routing errors are raised at once and never reach a node, even inside
/// the fail-open path of the cache client.
#[tokio::test]
async fn test_routing_errors_are_not_retried() {
    let c = TestCluster::new(2).await;
    let router = c.router_with_retry(RetryPolicy::new(5, Duration::ZERO));
    let before: u64 = (0..c.len()).map(|i| c.node(i).command_count()).sum();

    let err = router.execute(&Command::new("KEYS").arg("*")).await.unwrap_err();
    assert!(matches!(err, RouterError::Routing(_)));
    let err = router.execute(&Command::new("GET")).await.unwrap_err();
    assert!(matches!(err, RouterError::Routing(RoutingError::MissingKey { .. })));

    let after: u64 = (0..c.len()).map(|i| c.node(i).command_count()).sum();
    assert_eq!(before, after);

    let cache = c.cache().await;
    let err = cache.execute(&Command::new("FLUSHDB")).await.unwrap_err();
    assert!(matches!(err, CacheError::Router(RouterError::Routing(_))));
    assert!(err.as_routing().is_some());
}
