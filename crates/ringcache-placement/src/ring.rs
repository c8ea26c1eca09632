//! Consistent hashing ring implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

use ringcache_types::{HASH_RING_KEY, NodeUrl};
use tracing::{debug, warn};

use crate::error::PlacementError;

/// Consistent hashing ring mapping keys to node addresses.
///
/// Virtual node positions are unsigned integers; a key is owned by the
/// first virtual node strictly clockwise of `crc32(key)`, wrapping to the
/// lowest position when the key hashes at or past the highest one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashRing {
    /// Virtual node positions: ring position -> physical node.
    vnodes: BTreeMap<u64, NodeUrl>,
}

impl HashRing {
    /// Create an empty ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring from the control-store record: decimal position -> node URL.
    pub fn from_pairs<I, H, U>(pairs: I) -> Result<Self, PlacementError>
    where
        I: IntoIterator<Item = (H, U)>,
        H: AsRef<str>,
        U: AsRef<str>,
    {
        let mut vnodes = BTreeMap::new();
        for (hash, url) in pairs {
            let hash = hash.as_ref();
            let pos = hash
                .trim()
                .parse::<u64>()
                .map_err(|_| PlacementError::InvalidVnodeHash(hash.to_string()))?;
            let node = url.as_ref().parse::<NodeUrl>()?;
            if let Some(prev) = vnodes.insert(pos, node) {
                warn!(field = hash, position = pos, ?prev, "duplicate ring position, later field wins");
            }
        }
        Ok(Self { vnodes })
    }

    /// Place `vnodes_per_node` virtual nodes for each node at
    /// `crc32("{url}#{i}")`.
    pub fn build<'a, I>(nodes: I, vnodes_per_node: u32) -> Self
    where
        I: IntoIterator<Item = &'a NodeUrl>,
    {
        let mut ring = Self::new();
        for node in nodes {
            ring.add_node(node, vnodes_per_node);
        }
        ring
    }

    /// Add (or re-add) a node with `vnodes` virtual nodes.
    pub fn add_node(&mut self, node: &NodeUrl, vnodes: u32) {
        self.remove_node(node);
        for i in 0..vnodes {
            let pos = vnode_position(node, i);
            if let Some(prev) = self.vnodes.insert(pos, node.clone()) {
                if &prev != node {
                    warn!(position = pos, ?prev, ?node, "virtual node collision, position taken over");
                }
            }
        }
        debug!(?node, vnodes, "added node to ring");
    }

    /// Remove every virtual node belonging to `node`. Returns how many were removed.
    pub fn remove_node(&mut self, node: &NodeUrl) -> usize {
        let before = self.vnodes.len();
        self.vnodes.retain(|_, owner| owner != node);
        let removed = before - self.vnodes.len();
        if removed > 0 {
            debug!(?node, removed, "removed node from ring");
        }
        removed
    }

    /// Resolve `key` to the node that owns it.
    pub fn resolve(&self, key: &str) -> Result<&NodeUrl, PlacementError> {
        let h = key_hash(key);
        self.vnodes
            .range((Excluded(h), Unbounded))
            .next()
            .or_else(|| self.vnodes.iter().next())
            .map(|(_, node)| node)
            .ok_or(PlacementError::EmptyRing(HASH_RING_KEY))
    }

    /// Distinct node addresses, sorted.
    pub fn nodes(&self) -> Vec<NodeUrl> {
        self.vnodes
            .values()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Virtual node positions with their owners, ascending.
    pub fn vnodes(&self) -> impl Iterator<Item = (u64, &NodeUrl)> {
        self.vnodes.iter().map(|(pos, node)| (*pos, node))
    }

    /// The ring as control-store fields: decimal position -> node URL.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.vnodes
            .iter()
            .map(|(pos, node)| (pos.to_string(), node.to_string()))
            .collect()
    }

    /// Number of virtual nodes.
    pub fn len(&self) -> usize {
        self.vnodes.len()
    }

    /// Whether the ring has no virtual nodes.
    pub fn is_empty(&self) -> bool {
        self.vnodes.is_empty()
    }
}

/// A key's position on the ring: unsigned CRC-32 of its UTF-8 bytes.
pub fn key_hash(key: &str) -> u64 {
    u64::from(crc32fast::hash(key.as_bytes()))
}

fn vnode_position(node: &NodeUrl, index: u32) -> u64 {
    key_hash(&format!("{node}#{index}"))
}
