//! Loading the ring from the control store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ringcache_store::{NodeClient, RetryPolicy};
use ringcache_types::{HASH_RING_KEY, NodeUrl};
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, info, info_span};

use crate::error::PlacementError;
use crate::ring::HashRing;

/// Reads the ring record from the control store.
///
/// By default the ring is fetched on every call so topology changes are
/// visible immediately. [`RingResolver::with_refresh_interval`] keeps the
/// last ring for a bounded time instead.
pub struct RingResolver {
    control: NodeClient,
    retry: RetryPolicy,
    cache: Option<RingCache>,
    span: Span,
}

struct RingCache {
    interval: Duration,
    slot: Mutex<Option<(Instant, Arc<HashRing>)>>,
}

impl RingResolver {
    /// Resolver reading from `control`, retrying transient failures with `retry`.
    pub fn new(control: NodeClient, retry: RetryPolicy) -> Self {
        let span = info_span!("ring_resolver", control = ?control.url());
        Self {
            control,
            retry,
            cache: None,
            span,
        }
    }

    /// Log under `span` instead of the default component span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Reuse a loaded ring for up to `interval` before fetching again.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.cache = Some(RingCache {
            interval,
            slot: Mutex::new(None),
        });
        self
    }

    /// The control store client.
    pub fn control(&self) -> &NodeClient {
        &self.control
    }

    /// Fetch the current ring.
    ///
    /// Fails with [`PlacementError::EmptyRing`] when the record is missing
    /// or empty; transient store errors are retried first.
    pub async fn load_ring(&self) -> Result<Arc<HashRing>, PlacementError> {
        if let Some(ring) = self.cached() {
            return Ok(ring);
        }

        async {
            let fields = self.fetch_fields().await?;
            if fields.is_empty() {
                return Err(PlacementError::EmptyRing(HASH_RING_KEY));
            }

            let ring = HashRing::from_pairs(fields)?;
            debug!(vnodes = ring.len(), "loaded ring");

            let ring = Arc::new(ring);
            self.store(&ring);
            Ok::<_, PlacementError>(ring)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Replace the ring record with `ring`.
    ///
    /// New and changed fields are written before stale ones are removed,
    /// so readers see either the old ring, the new one, or their union;
    /// never a missing record while `ring` has nodes.
    pub async fn publish(&self, ring: &HashRing) -> Result<(), PlacementError> {
        async {
            let current = self.fetch_fields().await?;
            self.rewrite(current, ring).await?;
            info!(vnodes = ring.len(), nodes = ring.nodes().len(), "published ring");
            Ok::<_, PlacementError>(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Add `node` with `vnodes` virtual nodes to the stored ring.
    ///
    /// Only the node's own fields are written.
    pub async fn add_node(&self, node: &NodeUrl, vnodes: u32) -> Result<HashRing, PlacementError> {
        async {
            let current = self.fetch_fields().await?;
            let mut ring = HashRing::from_pairs(current.iter().map(|(f, v)| (f, v)))?;
            ring.add_node(node, vnodes);
            self.rewrite(current, &ring).await?;
            info!(?node, vnodes, nodes = ring.nodes().len(), "added node to stored ring");
            Ok::<_, PlacementError>(ring)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Remove every virtual node of `node` from the stored ring.
    ///
    /// Keys that lived on the node become unreachable; nothing is migrated.
    pub async fn remove_node(&self, node: &NodeUrl) -> Result<HashRing, PlacementError> {
        async {
            let current = self.fetch_fields().await?;
            let mut ring = HashRing::from_pairs(current.iter().map(|(f, v)| (f, v)))?;
            if ring.remove_node(node) == 0 {
                return Ok::<_, PlacementError>(ring);
            }
            self.rewrite(current, &ring).await?;
            info!(?node, remaining = ring.nodes().len(), "removed node from stored ring");
            Ok(ring)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Raw fields of the ring record.
    async fn fetch_fields(&self) -> Result<Vec<(String, String)>, PlacementError> {
        let pairs = self
            .retry
            .run(|| self.control.hgetall(HASH_RING_KEY))
            .await?;
        Ok(pairs
            .iter()
            .map(|(field, value)| {
                (
                    String::from_utf8_lossy(field).into_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                )
            })
            .collect())
    }

    /// Bring the stored record from `current` to `ring`: HSET what is new
    /// or changed, then HDEL what is no longer present.
    async fn rewrite(
        &self,
        current: Vec<(String, String)>,
        ring: &HashRing,
    ) -> Result<(), PlacementError> {
        let target = ring.to_pairs();
        let current: HashMap<String, String> = current.into_iter().collect();
        let wanted: HashSet<&str> = target.iter().map(|(field, _)| field.as_str()).collect();

        let changed: Vec<(&str, &str)> = target
            .iter()
            .filter(|(field, url)| current.get(field) != Some(url))
            .map(|(field, url)| (field.as_str(), url.as_str()))
            .collect();
        let stale: Vec<&str> = current
            .keys()
            .map(String::as_str)
            .filter(|field| !wanted.contains(field))
            .collect();

        if !changed.is_empty() {
            self.control.hset(HASH_RING_KEY, changed.iter().copied()).await?;
        }
        if !stale.is_empty() {
            self.control.hdel(HASH_RING_KEY, stale.iter().copied()).await?;
        }
        debug!(written = changed.len(), removed = stale.len(), "rewrote ring record");
        self.invalidate();
        Ok(())
    }

    fn cached(&self) -> Option<Arc<HashRing>> {
        let cache = self.cache.as_ref()?;
        let slot = cache.slot.lock().expect("lock poisoned");
        match &*slot {
            Some((loaded, ring)) if loaded.elapsed() < cache.interval => Some(Arc::clone(ring)),
            _ => None,
        }
    }

    fn store(&self, ring: &Arc<HashRing>) {
        if let Some(cache) = &self.cache {
            *cache.slot.lock().expect("lock poisoned") = Some((Instant::now(), Arc::clone(ring)));
        }
    }

    fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            *cache.slot.lock().expect("lock poisoned") = None;
        }
    }
}
