//! Integration test: cached request handlers.

use std::future::{Ready, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ringcache_cache::{Cached, KeyPrefix, RequestContext};
use ringcache_integration_tests::{PREFIX, TestCluster};

fn render(calls: &Arc<AtomicUsize>) -> impl Fn(&RequestContext) -> Ready<String> {
    let calls = calls.clone();
    move |req: &RequestContext| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        ready(format!("{} #{n}", req.path))
    }
}

/// `?a=1&b=2` and `?b=2&a=1` share one entry.
#[tokio::test]
async fn test_query_string_key_stability() {
    let c = TestCluster::new(3).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let view = Cached::new(c.cache().await, render(&calls)).query_string(true);

    let ab = RequestContext::from_target("/search?a=1&b=2");
    let ba = RequestContext::from_target("/search?b=2&a=1");
    assert_eq!(view.make_cache_key(&ab), view.make_cache_key(&ba));

    assert_eq!(view.call(&ab).await.unwrap(), "/search #1");
    assert_eq!(view.call(&ba).await.unwrap(), "/search #1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let key = format!("{PREFIX}{}", view.make_cache_key(&ab));
    assert!(c.holder_of(&key).is_some());
}

/// Handlers cached under different prefixes never collide.
#[tokio::test]
async fn test_views_with_distinct_prefixes() {
    let c = TestCluster::new(3).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = c.cache().await;
    let page = Cached::new(cache.clone(), render(&calls));
    let fragment = Cached::new(cache.clone(), render(&calls)).key_prefix("fragment/%s");

    let req = RequestContext::new("/home");
    assert_eq!(page.call(&req).await.unwrap(), "/home #1");
    assert_eq!(fragment.call(&req).await.unwrap(), "/home #2");
    assert_eq!(page.call(&req).await.unwrap(), "/home #1");
    assert_eq!(c.total_keys(), 2);
}

/// A key computed for another route lets callers invalidate it directly.
#[tokio::test]
async fn test_invalidate_by_external_key() {
    let c = TestCluster::new(2).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = c.cache().await;
    let view = Cached::new(cache.clone(), render(&calls));

    let req = RequestContext::new("/news");
    view.call(&req).await.unwrap();
    assert!(cache.cache_delete(view.cache_key_for("/news"), true).await.unwrap());
    assert_eq!(view.call(&req).await.unwrap(), "/news #2");
}

/// A dynamic prefix is evaluated per request.
#[tokio::test]
async fn test_dynamic_prefix() {
    let c = TestCluster::new(2).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let lang = Arc::new(std::sync::Mutex::new("en".to_string()));
    let current = lang.clone();
    let view = Cached::new(c.cache().await, render(&calls)).key_prefix(KeyPrefix::dynamic(
        move || format!("lang:{}", current.lock().unwrap()),
    ));

    let req = RequestContext::new("/");
    assert_eq!(view.call(&req).await.unwrap(), "/ #1");
    *lang.lock().unwrap() = "fr".to_string();
    assert_eq!(view.call(&req).await.unwrap(), "/ #2");
    *lang.lock().unwrap() = "en".to_string();
    assert_eq!(view.call(&req).await.unwrap(), "/ #1");
}
