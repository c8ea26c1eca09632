//! Sharded command execution.

use std::sync::Arc;

use ringcache_placement::{HashRing, RingResolver};
use ringcache_store::{Command, NodeClient, PoolRegistry, Reply, RetryPolicy};
use ringcache_types::{ControlStoreConfig, NodeUrl, PoolConfig, RetryConfig, RoutingKey};
use tracing::{Instrument, Span, debug, info, info_span};

use crate::commands::check_routable;
use crate::error::{RouterError, RoutingError};

/// Sends each command to the shard that owns its key.
///
/// The router holds a [`RingResolver`] and a [`PoolRegistry`]. For every
/// command it validates eligibility, resolves the second part (the key)
/// through the current ring, and executes on that node's pool. The whole
/// resolve-and-execute step is retried on transient failures.
pub struct CommandRouter {
    resolver: RingResolver,
    pools: Arc<PoolRegistry>,
    retry: RetryPolicy,
    span: Span,
}

impl CommandRouter {
    /// Router over an existing resolver and pool registry.
    pub fn new(resolver: RingResolver, pools: Arc<PoolRegistry>, retry: RetryPolicy) -> Self {
        Self {
            resolver,
            pools,
            retry,
            span: info_span!("command_router"),
        }
    }

    /// Router talking TCP to the control store described by `control`.
    pub fn connect(control: &ControlStoreConfig, pool: PoolConfig, retry: RetryConfig) -> Self {
        let pools = Arc::new(PoolRegistry::tcp(pool));
        let retry = RetryPolicy::from(retry);
        let resolver = RingResolver::new(pools.client(&control.url()), retry);
        Self::new(resolver, pools, retry)
    }

    /// Log under `span` instead of the default component span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The ring resolver.
    pub fn resolver(&self) -> &RingResolver {
        &self.resolver
    }

    /// The per-node pool registry.
    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    /// Check `cmd` and extract its routing key, without any I/O.
    pub fn validate(cmd: &Command) -> Result<RoutingKey, RoutingError> {
        let name = cmd.name().unwrap_or_default();
        if cmd.len() < 2 {
            return Err(RoutingError::MissingKey {
                command: name.to_string(),
            });
        }
        if cmd.name().is_none() {
            return Err(RoutingError::UnknownCommand(
                String::from_utf8_lossy(&cmd.parts()[0]).into_owned(),
            ));
        }
        check_routable(name)?;

        let key = cmd
            .part(1)
            .and_then(|k| std::str::from_utf8(k).ok())
            .ok_or_else(|| RoutingError::InvalidKey {
                command: name.to_string(),
            })?;
        Ok(RoutingKey::from(key))
    }

    /// Route `cmd` to its shard and return the parsed reply.
    pub async fn execute(&self, cmd: &Command) -> Result<Reply, RouterError> {
        let key = &Self::validate(cmd)?;
        let command = cmd.name().unwrap_or_default();

        self.retry
            .run(|| async move {
                let node = self.node_for(key.clone()).await?;
                info!(%node, key = %key, command, "routing command");
                let reply = self.pools.client(&node).execute(cmd).await?;
                Ok::<_, RouterError>(reply)
            })
            .instrument(self.span.clone())
            .await
    }

    /// The node that owns `key` under the current ring.
    pub async fn node_for(&self, key: impl Into<RoutingKey>) -> Result<NodeUrl, RouterError> {
        let key = key.into();
        let ring = self.load_ring().await?;
        Ok(ring.resolve(key.as_str())?.clone())
    }

    /// A direct client for the node that owns `key`.
    pub async fn client_for(&self, key: impl Into<RoutingKey>) -> Result<NodeClient, RouterError> {
        let node = self.node_for(key).await?;
        Ok(self.pools.client(&node))
    }

    /// A direct, unsharded client for `url`. Use it for commands the router
    /// refuses.
    pub fn direct(&self, url: &NodeUrl) -> NodeClient {
        self.pools.client(url)
    }

    /// Distinct nodes of the current ring.
    pub async fn all_nodes(&self) -> Result<Vec<NodeUrl>, RouterError> {
        Ok(self.load_ring().await?.nodes())
    }

    async fn load_ring(&self) -> Result<Arc<HashRing>, RouterError> {
        let ring = self.resolver.load_ring().await?;
        debug!(vnodes = ring.len(), "ring loaded for routing");
        Ok(ring)
    }
}
