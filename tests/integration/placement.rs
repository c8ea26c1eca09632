//! Integration test: key placement through the stored ring.

use ringcache_integration_tests::{TestCluster, VNODES};
use ringcache_placement::{HashRing, key_hash};
use ringcache_store::Command;
use ringcache_types::NodeUrl;

fn keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("user:{i}")).collect()
}

/// Repeated lookups with the same ring agree, across routers too.
#[tokio::test]
async fn test_resolution_is_deterministic() {
    let c = TestCluster::new(4).await;
    let a = c.router();
    let b = c.router();
    for key in keys(200) {
        let first = a.node_for(key.as_str()).await.unwrap();
        assert_eq!(a.node_for(key.as_str()).await.unwrap(), first);
        assert_eq!(b.node_for(key.as_str()).await.unwrap(), first);
    }
}

/// A key above the largest position lands on the smallest one.
#[tokio::test]
async fn test_wraparound_through_router() {
    let c = TestCluster::unpublished(2);
    let h = key_hash("abc");
    let ring = HashRing::from_pairs([
        ("5".to_string(), c.url(0).to_string()),
        ((h - 10).to_string(), c.url(1).to_string()),
    ])
    .unwrap();
    c.resolver().publish(&ring).await.unwrap();

    let router = c.router();
    assert_eq!(&router.node_for("abc").await.unwrap(), c.url(0));
    router
        .execute(&Command::new("SET").arg("abc").arg("v"))
        .await
        .unwrap();
    assert!(c.node(0).contains_key("abc"));
    assert!(!c.node(1).contains_key("abc"));
}

/// Commands land on the node owning their key, never elsewhere.
#[tokio::test]
async fn test_commands_follow_ring() {
    let c = TestCluster::new(3).await;
    let router = c.router();
    for key in keys(100) {
        router
            .execute(&Command::new("HSET").arg(key.as_str()).arg("f").arg("1"))
            .await
            .unwrap();
        let owner = router.node_for(key.as_str()).await.unwrap();
        let holder = c.holder_of(&key).expect("key stored");
        assert_eq!(c.url(holder), &owner);
    }
    assert_eq!(c.total_keys(), 100);
}

/// Adding a node only moves keys onto the new node.
#[tokio::test]
async fn test_adding_node_moves_keys_only_to_it() {
    let c = TestCluster::new(4).await;
    let resolver = c.resolver();

    // Start with three of the four nodes.
    resolver.remove_node(c.url(3)).await.unwrap();
    let router = c.router();
    let mut before = Vec::new();
    for key in keys(400) {
        before.push(router.node_for(key.as_str()).await.unwrap());
    }
    assert!(before.iter().all(|n| n != c.url(3)));

    resolver.add_node(c.url(3), VNODES).await.unwrap();
    let mut moved = 0;
    for (key, old) in keys(400).iter().zip(&before) {
        let new = router.node_for(key.as_str()).await.unwrap();
        if &new != old {
            assert_eq!(&new, c.url(3), "{key} moved between old nodes");
            moved += 1;
        }
    }
    assert!(moved > 0);
    assert!(moved < 400 / 2);
}

/// A ring change is picked up without reconnecting.
#[tokio::test]
async fn test_router_sees_republished_ring() {
    let c = TestCluster::new(2).await;
    let router = c.router();
    assert_eq!(router.all_nodes().await.unwrap().len(), 2);

    let only: Vec<&NodeUrl> = vec![c.url(1)];
    c.resolver().publish(&HashRing::build(only, 8)).await.unwrap();
    assert_eq!(router.all_nodes().await.unwrap(), vec![c.url(1).clone()]);
    for key in keys(20) {
        assert_eq!(&router.node_for(key.as_str()).await.unwrap(), c.url(1));
    }
}
