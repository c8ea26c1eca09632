//! Integration test: memoized functions over a multi-node cluster.
//!
//! Version keys and entries of the same function usually live on different
//! nodes; invalidation must still be seen by every client.

use std::future::{Ready, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use ringcache_cache::{BoundArgs, CacheIdentity, CallArgs, Memoized, Signature, VersionInit};
use ringcache_integration_tests::{PREFIX, TestCluster};

/// Returns `x * 1000 + n` where `n` counts invocations.
fn counting<R>(calls: &Arc<AtomicI64>) -> impl Fn(&R, BoundArgs) -> Ready<i64> {
    let calls = calls.clone();
    move |_: &R, args: BoundArgs| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        let x: i64 = args.get_as("x").unwrap_or(0);
        ready(x * 1000 + n)
    }
}

fn price() -> Signature {
    Signature::new("shop.pricing", "price").param("x").param_default("currency", "EUR")
}

#[derive(Debug)]
struct Store {
    id: u32,
}

impl CacheIdentity for Store {}

/// Identical calls before expiry return the first result; after a reset
/// with no arguments the next call recomputes.
#[tokio::test]
async fn test_memoize_idempotence_and_reset() {
    let c = TestCluster::new(3).await;
    let calls = Arc::new(AtomicI64::new(0));
    let memo = Memoized::new(c.cache().await, price(), counting::<()>(&calls));

    let first = memo.call(CallArgs::new().arg(7)).await.unwrap();
    assert_eq!(first, 7001);
    assert_eq!(memo.call(CallArgs::new().arg(7)).await.unwrap(), first);
    assert_eq!(memo.call(CallArgs::new().arg(7).kwarg("currency", "EUR")).await.unwrap(), first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    memo.delete_memoized(CallArgs::new()).await.unwrap();
    let second = memo.call(CallArgs::new().arg(7)).await.unwrap();
    assert_eq!(second, 7002);
    assert_ne!(second, first);
}

/// A second client (another process) sees the reset made by the first.
#[tokio::test]
async fn test_reset_visible_to_other_clients() {
    let c = TestCluster::new(3).await;
    let calls = Arc::new(AtomicI64::new(0));
    let a = Memoized::new(c.cache().await, price(), counting::<()>(&calls));
    let b = Memoized::new(c.cache().await, price(), counting::<()>(&calls));

    assert_eq!(a.call(CallArgs::new().arg(1)).await.unwrap(), 1001);
    assert_eq!(b.call(CallArgs::new().arg(1)).await.unwrap(), 1001);

    a.delete_memoized(CallArgs::new()).await.unwrap();
    assert_eq!(b.call(CallArgs::new().arg(1)).await.unwrap(), 1002);
    assert_eq!(a.call(CallArgs::new().arg(1)).await.unwrap(), 1002);
}

/// Entries expire with the memoize timeout; version tokens share it.
#[tokio::test(start_paused = true)]
async fn test_memoized_entries_expire() {
    let c = TestCluster::new(2).await;
    let calls = Arc::new(AtomicI64::new(0));
    let memo = Memoized::new(c.cache().await, price(), counting::<()>(&calls)).timeout(Some(5));

    memo.call(CallArgs::new().arg(2)).await.unwrap();
    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(memo.call(CallArgs::new().arg(2)).await.unwrap(), 2001);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(memo.call(CallArgs::new().arg(2)).await.unwrap(), 2002);
    assert!(c.holder_of(&format!("{PREFIX}shop.pricing.price_memver")).is_some());
}

/// Resetting one instance leaves the others cached; resetting the
/// function drops every instance.
#[tokio::test]
async fn test_instance_and_function_invalidation() {
    let c = TestCluster::new(3).await;
    let calls = Arc::new(AtomicI64::new(0));
    let sig = Signature::new("shop", "Store.stock").param("x").method();
    let memo = Memoized::new(c.cache().await, sig, counting::<Store>(&calls));
    let north = Store { id: 1 };
    let south = Store { id: 2 };

    assert_eq!(memo.call_on(&north, CallArgs::new().arg(5)).await.unwrap(), 5001);
    assert_eq!(memo.call_on(&south, CallArgs::new().arg(5)).await.unwrap(), 5002);

    memo.delete_memoized_on(&north, CallArgs::new()).await.unwrap();
    assert_eq!(memo.call_on(&north, CallArgs::new().arg(5)).await.unwrap(), 5003);
    assert_eq!(memo.call_on(&south, CallArgs::new().arg(5)).await.unwrap(), 5002);

    memo.delete_memoized_all().await.unwrap();
    assert_eq!(memo.call_on(&north, CallArgs::new().arg(5)).await.unwrap(), 5004);
    assert_eq!(memo.call_on(&south, CallArgs::new().arg(5)).await.unwrap(), 5005);
}

/// Concurrent first calls in set-if-absent mode agree on one token.
#[tokio::test]
async fn test_set_if_absent_tokens_agree() {
    let c = TestCluster::new(3).await;
    let calls = Arc::new(AtomicI64::new(0));
    let a = Memoized::new(
        Arc::new(c.client().await.with_version_init(VersionInit::SetIfAbsent)),
        price(),
        counting::<()>(&calls),
    );
    let b = Memoized::new(
        Arc::new(c.client().await.with_version_init(VersionInit::SetIfAbsent)),
        price(),
        counting::<()>(&calls),
    );

    let (ka, kb) = tokio::join!(
        a.make_cache_key(CallArgs::new().arg(3)),
        b.make_cache_key(CallArgs::new().arg(3)),
    );
    assert_eq!(ka.unwrap(), kb.unwrap());
}
