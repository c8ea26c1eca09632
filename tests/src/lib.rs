//! Shared test harness for ringcache integration tests.
//!
//! Provides [`TestCluster`]: N in-memory shard nodes plus a control node
//! holding a published ring, with failure injection per node.

use std::sync::Arc;

use ringcache_cache::ShardedCache;
use ringcache_placement::{HashRing, RingResolver};
use ringcache_router::CommandRouter;
use ringcache_store::{MemoryConnector, MemoryNode, PoolRegistry, RetryPolicy};
use ringcache_types::{CacheSettings, NodeUrl, PoolConfig};

/// Key prefix used by [`TestCluster::cache`].
pub const PREFIX: &str = "it:";

/// Virtual nodes placed per node.
pub const VNODES: u32 = 64;

/// A simulated cluster of in-memory store nodes.
pub struct TestCluster {
    connector: Arc<MemoryConnector>,
    control_url: NodeUrl,
    control: Arc<MemoryNode>,
    urls: Vec<NodeUrl>,
    nodes: Vec<Arc<MemoryNode>>,
}

impl TestCluster {
    /// Create `n` shard nodes and publish a ring over all of them.
    pub async fn new(n: usize) -> Self {
        let cluster = Self::unpublished(n);
        let ring = HashRing::build(&cluster.urls, VNODES);
        cluster
            .resolver()
            .publish(&ring)
            .await
            .expect("failed to publish test ring");
        cluster
    }

    /// Create `n` shard nodes without writing any ring record.
    pub fn unpublished(n: usize) -> Self {
        let connector = Arc::new(MemoryConnector::new());
        let control_url = NodeUrl::new("control", 6379, 0, None);
        let control = connector.add_node(control_url.clone());

        let urls: Vec<NodeUrl> = (0..n)
            .map(|i| NodeUrl::new(format!("shard-{i}"), 7000 + i as u16, 0, None))
            .collect();
        let nodes = urls.iter().map(|u| connector.add_node(u.clone())).collect();

        Self {
            connector,
            control_url,
            control,
            urls,
            nodes,
        }
    }

    /// A pool registry over the cluster's nodes.
    pub fn pools(&self) -> Arc<PoolRegistry> {
        Arc::new(PoolRegistry::with_connector(
            self.connector.clone(),
            PoolConfig::default(),
        ))
    }

    /// A resolver reading the control node, without retries.
    pub fn resolver(&self) -> RingResolver {
        RingResolver::new(self.pools().client(&self.control_url), RetryPolicy::none())
    }

    /// A router without retries.
    pub fn router(&self) -> CommandRouter {
        self.router_with_retry(RetryPolicy::none())
    }

    /// A router retrying transient failures per `retry`.
    pub fn router_with_retry(&self, retry: RetryPolicy) -> CommandRouter {
        let pools = self.pools();
        let resolver = RingResolver::new(pools.client(&self.control_url), retry);
        CommandRouter::new(resolver, pools, retry)
    }

    /// A shared cache client with prefix [`PREFIX`].
    pub async fn cache(&self) -> Arc<ShardedCache> {
        Arc::new(self.client().await)
    }

    /// An unshared cache client with prefix [`PREFIX`], for further
    /// configuration.
    pub async fn client(&self) -> ShardedCache {
        ShardedCache::connect(self.router(), CacheSettings::with_prefix(PREFIX))
            .await
            .expect("failed to connect test cache")
    }

    /// A cache client with custom settings.
    pub async fn cache_with(&self, settings: CacheSettings) -> Arc<ShardedCache> {
        Arc::new(
            ShardedCache::connect(self.router(), settings)
                .await
                .expect("failed to connect test cache"),
        )
    }

    /// The control node.
    pub fn control(&self) -> &Arc<MemoryNode> {
        &self.control
    }

    /// Shard node `i`.
    pub fn node(&self, i: usize) -> &Arc<MemoryNode> {
        &self.nodes[i]
    }

    /// URL of shard node `i`.
    pub fn url(&self, i: usize) -> &NodeUrl {
        &self.urls[i]
    }

    /// Every shard URL.
    pub fn urls(&self) -> &[NodeUrl] {
        &self.urls
    }

    /// Number of shard nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cluster has no shard nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the node currently holding `key`, if any.
    pub fn holder_of(&self, key: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.contains_key(key))
    }

    /// Keys stored across every shard node.
    pub fn total_keys(&self) -> usize {
        self.nodes.iter().map(|n| n.len()).sum()
    }

    /// Make node `i` refuse connections.
    pub fn kill_node(&self, i: usize) {
        self.nodes[i].set_down(true);
    }

    /// Bring node `i` back.
    pub fn revive_node(&self, i: usize) {
        self.nodes[i].set_down(false);
    }
}
