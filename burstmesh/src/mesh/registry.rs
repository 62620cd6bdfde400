//! Node registry: which addresses belong to the mesh.
//!
//! Membership only ever grows. An evicted node stays in the registry as a
//! tombstone, which keeps eviction idempotent and stops a stale join replay
//! from resurrecting the node.
//!
//! ```text
//!            join                 evict
//!   (absent) ─────▶ Active ─────────────▶ Evicted
//!                    │  ▲                  │  ▲
//!                    └──┘ join: no-op      └──┘ join/evict: no-op
//! ```

use std::collections::HashMap;

/// Membership status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// Node is a live member and receives propagated control messages.
    Active,
    /// Node got an eviction notice; kept as a tombstone.
    Evicted,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Evicted => write!(f, "Evicted"),
        }
    }
}

/// A single mesh member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Network address; the identity of the node.
    pub address: String,
    /// Current membership status.
    pub status: NodeStatus,
}

/// Result of [`NodeRegistry::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The address was new and is now active.
    Joined,
    /// The address was already known (active or tombstoned); nothing changed.
    AlreadyKnown,
}

/// Result of [`NodeRegistry::evict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    /// The node was active and is now evicted.
    Evicted,
    /// The node was already evicted; nothing changed.
    AlreadyEvicted,
    /// The address was never a member.
    Unknown,
}

/// In-memory set of member addresses keyed by address.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, Node>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `address` as active unless it is already known.
    pub fn join(&mut self, address: &str) -> JoinOutcome {
        if self.nodes.contains_key(address) {
            return JoinOutcome::AlreadyKnown;
        }
        self.nodes.insert(
            address.to_string(),
            Node {
                address: address.to_string(),
                status: NodeStatus::Active,
            },
        );
        JoinOutcome::Joined
    }

    /// Mark `address` evicted.
    pub fn evict(&mut self, address: &str) -> EvictOutcome {
        match self.nodes.get_mut(address) {
            None => EvictOutcome::Unknown,
            Some(node) if node.status == NodeStatus::Evicted => EvictOutcome::AlreadyEvicted,
            Some(node) => {
                node.status = NodeStatus::Evicted;
                EvictOutcome::Evicted
            }
        }
    }

    /// Status of `address`, or `None` if it was never a member.
    pub fn status(&self, address: &str) -> Option<NodeStatus> {
        self.nodes.get(address).map(|node| node.status)
    }

    /// Active addresses that should receive a propagated control message,
    /// excluding `own_address`. Sorted for stable fan-out order.
    pub fn propagation_targets(&self, own_address: &str) -> Vec<String> {
        let mut targets: Vec<String> = self
            .nodes
            .values()
            .filter(|node| node.status == NodeStatus::Active && node.address != own_address)
            .map(|node| node.address.clone())
            .collect();
        targets.sort();
        targets
    }

    /// Number of known addresses, tombstones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no address was ever registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
