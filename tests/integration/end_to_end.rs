//! Integration test: end-to-end cache client behaviour.
//!
//! 3-node cluster. Values written through one client are readable through
//! another, land on the node the ring picks, and expire on schedule.

use std::collections::BTreeMap;
use std::time::Duration;

use ringcache_cache::{CacheError, CacheValue, Decoded};
use ringcache_integration_tests::{PREFIX, TestCluster};
use ringcache_types::CacheSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    tags: Vec<String>,
    scores: BTreeMap<String, u32>,
}

impl CacheValue for Profile {}

/// Set `k` to 1 with a 1 s timeout, then with timeout 0.
#[tokio::test(start_paused = true)]
async fn test_ttl_scenario() {
    let c = TestCluster::new(3).await;
    let cache = c.cache().await;

    cache.cache_set("k", &1i64, Some(1), true).await.unwrap();
    assert_eq!(cache.cache_get::<i64>("k", true).await.unwrap(), Some(1));

    tokio::time::advance(Duration::from_millis(1200)).await;
    assert_eq!(cache.cache_get::<i64>("k", true).await.unwrap(), None);

    cache.cache_set("k", &1i64, Some(0), true).await.unwrap();
    tokio::time::advance(Duration::from_millis(200)).await;
    assert_eq!(cache.cache_get::<i64>("k", true).await.unwrap(), Some(1));

    // Still there long after any default lifetime would have passed.
    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(cache.cache_get::<i64>("k", true).await.unwrap(), Some(1));
}

/// Unset timeouts use the configured default.
#[tokio::test(start_paused = true)]
async fn test_default_timeout_from_settings() {
    let c = TestCluster::new(2).await;
    let cache = c
        .cache_with(CacheSettings {
            default_timeout: Some(10),
            ..CacheSettings::with_prefix(PREFIX)
        })
        .await;

    cache.cache_set("short", &"v".to_string(), None, true).await.unwrap();
    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(cache.has("short", true).await.unwrap());
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!cache.has("short", true).await.unwrap());
}

/// Values written by one client are read by another with the same ring.
#[tokio::test]
async fn test_clients_share_placement() {
    let c = TestCluster::new(3).await;
    let writer = c.cache().await;
    let reader = c.cache().await;

    let profile = Profile {
        name: "ada".into(),
        tags: vec!["admin".into(), "ops".into()],
        scores: BTreeMap::from([("q1".into(), 7), ("q2".into(), 9)]),
    };

    for i in 0..50 {
        let key = format!("profile:{i}");
        writer.cache_set(key.as_str(), &profile, None, true).await.unwrap();
    }
    for i in 0..50 {
        let key = format!("profile:{i}");
        let got: Option<Profile> = reader.cache_get(key.as_str(), true).await.unwrap();
        assert_eq!(got.as_ref(), Some(&profile), "{key} mismatch");

        let node = reader.node_for(key.as_str(), true).await.unwrap();
        let holder = c.holder_of(&format!("{PREFIX}{key}")).expect("key stored");
        assert_eq!(&node, c.url(holder));
    }
    assert_eq!(c.total_keys(), 50);
}

/// Integers are stored as plain ASCII so other clients can read them.
#[tokio::test]
async fn test_integers_stored_as_ascii() {
    let c = TestCluster::new(3).await;
    let cache = c.cache().await;
    cache.cache_set("hits", &41i64, Some(0), true).await.unwrap();

    let client = cache.client_for("hits", true).await.unwrap();
    let raw = client.get(&format!("{PREFIX}hits")).await.unwrap();
    assert_eq!(raw.as_deref(), Some(&b"41"[..]));

    // A type without an integer form sees the raw bytes.
    let decoded = cache.cache_get_decoded::<Profile>("hits", true).await.unwrap();
    assert!(matches!(decoded, Decoded::Raw(_)));
}

/// Many-key operations touch keys spread over every node.
#[tokio::test]
async fn test_many_ops_across_nodes() {
    let c = TestCluster::new(4).await;
    let cache = c.cache().await;

    let keys: Vec<String> = (0..40).map(|i| format!("m{i}")).collect();
    let pairs: Vec<(&String, u32)> = keys.iter().zip(0u32..).collect();
    cache.set_many(pairs, None, true).await.unwrap();

    let values: Vec<Option<u32>> = cache.get_many(keys.iter(), true).await.unwrap();
    assert_eq!(values, (0u32..40).map(Some).collect::<Vec<_>>());
    assert!((0..c.len()).all(|i| !c.node(i).is_empty()));

    let removed = cache.delete_many(keys.iter().take(10), true).await.unwrap();
    assert_eq!(removed, 10);
    assert_eq!(cache.clear(true).await.unwrap(), 30);
    assert_eq!(c.total_keys(), 0);
}

/// An empty ring is a fatal configuration error at connect time.
#[tokio::test]
async fn test_connect_with_empty_ring_fails() {
    let c = TestCluster::unpublished(2);
    let err = ringcache_cache::ShardedCache::connect(c.router(), CacheSettings::with_prefix(PREFIX))
        .await
        .err()
        .expect("connect should fail");
    assert!(matches!(err, CacheError::Placement(_)));
}
