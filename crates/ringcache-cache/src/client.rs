//! Sharded cache client.

use std::sync::Arc;

use ringcache_placement::HashRing;
use ringcache_router::CommandRouter;
use ringcache_store::{Command, NodeClient, Reply};
use ringcache_types::{
    CacheSettings, ControlStoreConfig, Expiry, NodeUrl, PoolConfig, RetryConfig, RoutingKey,
};
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::codec::{self, CacheValue, Decoded};
use crate::error::CacheError;
use crate::version::VersionInit;

/// Cache client spreading entries over the ring's nodes.
///
/// Every operation is one routed round trip: the key picks the node, the
/// router retries transient failures. `use_prefix` prepends the configured
/// key prefix to the caller's key.
pub struct ShardedCache {
    router: CommandRouter,
    settings: CacheSettings,
    version_init: VersionInit,
    span: Span,
}

impl ShardedCache {
    /// Cache over `router`.
    ///
    /// Fails if the settings are invalid or the ring is empty; an
    /// application must not serve traffic without a ring.
    pub async fn connect(router: CommandRouter, settings: CacheSettings) -> Result<Self, CacheError> {
        settings.validate()?;
        let span = info_span!("sharded_cache", prefix = %settings.key_prefix);
        let ring = router.resolver().load_ring().instrument(span.clone()).await?;
        info!(parent: &span, nodes = ring.nodes().len(), vnodes = ring.len(), "cache connected");
        Ok(Self {
            router,
            settings,
            version_init: VersionInit::default(),
            span,
        })
    }

    /// Cache talking TCP to the control store and shards.
    pub async fn connect_tcp(
        control: &ControlStoreConfig,
        settings: CacheSettings,
        pool: PoolConfig,
        retry: RetryConfig,
    ) -> Result<Self, CacheError> {
        Self::connect(CommandRouter::connect(control, pool, retry), settings).await
    }

    /// Log under `span` instead of the default component span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// How missing version tokens are created.
    pub fn with_version_init(mut self, init: VersionInit) -> Self {
        self.version_init = init;
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn version_init(&self) -> VersionInit {
        self.version_init
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Whether decorated calls surface backend errors.
    pub fn is_debug(&self) -> bool {
        self.settings.debug
    }

    /// `key` with the configured prefix when `use_prefix` is set.
    pub fn prefixed(&self, key: &str, use_prefix: bool) -> String {
        if use_prefix {
            format!("{}{key}", self.settings.key_prefix)
        } else {
            key.to_string()
        }
    }

    /// Store `value` under `key`.
    ///
    /// `timeout`: `None` uses the default, `<= 0` never expires.
    pub async fn cache_set<T: CacheValue>(
        &self,
        key: impl Into<RoutingKey>,
        value: &T,
        timeout: Option<i64>,
        use_prefix: bool,
    ) -> Result<(), CacheError> {
        let key = self.prefixed(key.into().as_str(), use_prefix);
        let expiry = Expiry::from_timeout(timeout, self.settings.default_timeout());
        let body = codec::encode(value)?;
        let cmd = match expiry {
            Expiry::Persist => Command::new("SET").arg(&key).arg(body),
            Expiry::Seconds(secs) => Command::new("SETEX").arg(&key).arg(secs).arg(body),
        };
        self.execute(&cmd).await?;
        debug!(parent: &self.span, key = %key, ?expiry, "cache set");
        Ok(())
    }

    /// Stored bytes under `key`, decoded.
    pub async fn cache_get_decoded<T: CacheValue>(
        &self,
        key: impl Into<RoutingKey>,
        use_prefix: bool,
    ) -> Result<Decoded<T>, CacheError> {
        let key = self.prefixed(key.into().as_str(), use_prefix);
        let bytes = self
            .execute(&Command::new("GET").arg(&key))
            .await?
            .into_bytes("GET")?;
        Ok(codec::decode(bytes.as_deref()))
    }

    /// Value under `key`; `None` when absent or undecodable.
    pub async fn cache_get<T: CacheValue>(
        &self,
        key: impl Into<RoutingKey>,
        use_prefix: bool,
    ) -> Result<Option<T>, CacheError> {
        Ok(self.cache_get_decoded(key, use_prefix).await?.into_value())
    }

    /// Delete `key`. Returns whether it existed.
    pub async fn cache_delete(
        &self,
        key: impl Into<RoutingKey>,
        use_prefix: bool,
    ) -> Result<bool, CacheError> {
        let key = self.prefixed(key.into().as_str(), use_prefix);
        let removed = self.int_command(Command::new("DEL").arg(&key), "DEL").await?;
        debug!(parent: &self.span, key = %key, removed, "cache delete");
        Ok(removed > 0)
    }

    /// Whether `key` exists.
    pub async fn has(&self, key: impl Into<RoutingKey>, use_prefix: bool) -> Result<bool, CacheError> {
        let key = self.prefixed(key.into().as_str(), use_prefix);
        Ok(self.int_command(Command::new("EXISTS").arg(key), "EXISTS").await? > 0)
    }

    /// Store each pair; each key goes to its own node.
    pub async fn set_many<K, T, I>(
        &self,
        items: I,
        timeout: Option<i64>,
        use_prefix: bool,
    ) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<RoutingKey>,
        T: CacheValue,
    {
        for (key, value) in items {
            self.cache_set(key, &value, timeout, use_prefix).await?;
        }
        Ok(())
    }

    /// Values for `keys`, in order.
    pub async fn get_many<K, T, I>(&self, keys: I, use_prefix: bool) -> Result<Vec<Option<T>>, CacheError>
    where
        I: IntoIterator<Item = K>,
        K: Into<RoutingKey>,
        T: CacheValue,
    {
        let mut values = Vec::new();
        for key in keys {
            values.push(self.cache_get(key, use_prefix).await?);
        }
        Ok(values)
    }

    /// Delete `keys`. Returns how many existed.
    pub async fn delete_many<K, I>(&self, keys: I, use_prefix: bool) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = K>,
        K: Into<RoutingKey>,
    {
        let mut removed = 0;
        for key in keys {
            if self.cache_delete(key, use_prefix).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete every key on every node of the ring, or only prefixed keys
    /// when `use_prefix` is set.
    ///
    /// This lists keys with `KEYS` on each node and is meant for
    /// maintenance, not for serving paths. Returns how many keys were removed.
    pub async fn clear(&self, use_prefix: bool) -> Result<usize, CacheError> {
        let pattern = if use_prefix {
            format!("{}*", self.settings.key_prefix)
        } else {
            "*".to_string()
        };

        let mut removed = 0;
        for node in self.all_nodes().await? {
            let client = self.direct(&node);
            let keys = client.keys(&pattern).instrument(self.span.clone()).await?;
            if keys.is_empty() {
                continue;
            }
            let n = client.del(keys).instrument(self.span.clone()).await?;
            removed += n.max(0) as usize;
        }
        warn!(parent: &self.span, pattern = %pattern, removed, "cleared cache");
        Ok(removed)
    }

    /// Any routable command, sent to the shard owning its key.
    pub async fn execute(&self, cmd: &Command) -> Result<Reply, CacheError> {
        Ok(self.router.execute(cmd).instrument(self.span.clone()).await?)
    }

    /// Node owning `key`.
    pub async fn node_for(
        &self,
        key: impl Into<RoutingKey>,
        use_prefix: bool,
    ) -> Result<NodeUrl, CacheError> {
        let key = self.prefixed(key.into().as_str(), use_prefix);
        Ok(self.router.node_for(key).await?)
    }

    /// A direct client for the node owning `key`.
    pub async fn client_for(
        &self,
        key: impl Into<RoutingKey>,
        use_prefix: bool,
    ) -> Result<NodeClient, CacheError> {
        let node = self.node_for(key, use_prefix).await?;
        Ok(self.direct(&node))
    }

    /// A direct, unsharded client for `url`.
    pub fn direct(&self, url: &NodeUrl) -> NodeClient {
        self.router.direct(url)
    }

    /// Distinct nodes of the current ring.
    pub async fn all_nodes(&self) -> Result<Vec<NodeUrl>, CacheError> {
        Ok(self.router.all_nodes().await?)
    }

    /// The current ring.
    pub async fn ring(&self) -> Result<Arc<HashRing>, CacheError> {
        Ok(self.router.resolver().load_ring().await?)
    }

    async fn int_command(&self, cmd: Command, name: &str) -> Result<i64, CacheError> {
        Ok(self.execute(&cmd).await?.into_int(name)?)
    }
}
