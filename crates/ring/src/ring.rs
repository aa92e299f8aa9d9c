//! Consistent-hash ring with virtual nodes.
//!
//! An immutable snapshot: membership changes build a new ring. Two nodes
//! that agree on the vnode count and the member set compute bitwise
//! identical rings, so key ownership is consistent everywhere.

use ringkv_common::{key_position, vnode_position, NodeId};
use std::collections::BTreeSet;

/// An immutable ring snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRing {
    vnode_count: u32,
    nodes: BTreeSet<NodeId>,
    /// Sorted ascending by position, ties broken by node id.
    positions: Vec<(u64, NodeId)>,
}

impl HashRing {
    /// An empty ring.
    pub fn new(vnode_count: u32) -> Self {
        Self {
            vnode_count,
            nodes: BTreeSet::new(),
            positions: Vec::new(),
        }
    }

    /// A ring with the given members.
    pub fn with_nodes<I: IntoIterator<Item = NodeId>>(vnode_count: u32, nodes: I) -> Self {
        let nodes: BTreeSet<NodeId> = nodes.into_iter().collect();
        let positions = build_positions(vnode_count, &nodes);
        Self {
            vnode_count,
            nodes,
            positions,
        }
    }

    /// A new ring with `node` added. Idempotent: adding a member returns an
    /// equal ring.
    pub fn add_node(&self, node: &NodeId) -> Self {
        if self.nodes.contains(node) {
            return self.clone();
        }
        let mut nodes = self.nodes.clone();
        nodes.insert(node.clone());
        let positions = build_positions(self.vnode_count, &nodes);
        Self {
            vnode_count: self.vnode_count,
            nodes,
            positions,
        }
    }

    /// A new ring with `node` removed. Idempotent.
    pub fn remove_node(&self, node: &NodeId) -> Self {
        if !self.nodes.contains(node) {
            return self.clone();
        }
        let mut nodes = self.nodes.clone();
        nodes.remove(node);
        let positions = build_positions(self.vnode_count, &nodes);
        Self {
            vnode_count: self.vnode_count,
            nodes,
            positions,
        }
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    /// Number of physical nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn vnode_count(&self) -> u32 {
        self.vnode_count
    }

    /// Total vnode positions: `vnode_count * len()`.
    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// The node owning `key`: the first node at or clockwise of the key's
    /// position. `None` iff the ring is empty.
    pub fn find_node(&self, key: &str) -> Option<&NodeId> {
        if self.positions.is_empty() {
            return None;
        }
        let p = key_position(key);
        let i = self.lower_bound(p);
        Some(&self.positions[i % self.positions.len()].1)
    }

    /// Up to `min(n, len())` distinct nodes, in ring order starting at the
    /// key's position. The first entry is the primary.
    pub fn successors(&self, key: &str, n: usize) -> Vec<NodeId> {
        if n == 0 || self.positions.is_empty() {
            return Vec::new();
        }
        let p = key_position(key);
        let start = self.lower_bound(p);

        let mut result: Vec<NodeId> = Vec::with_capacity(n.min(self.nodes.len()));
        for offset in 0..self.positions.len() {
            let owner = &self.positions[(start + offset) % self.positions.len()].1;
            if !result.contains(owner) {
                result.push(owner.clone());
                if result.len() == n {
                    break;
                }
            }
        }
        result
    }

    /// Index of the first position `>= p`, wrapping to 0 past the end.
    fn lower_bound(&self, p: u64) -> usize {
        self.positions.partition_point(|(pos, _)| *pos < p)
    }
}

fn build_positions(vnode_count: u32, nodes: &BTreeSet<NodeId>) -> Vec<(u64, NodeId)> {
    let mut positions: Vec<(u64, NodeId)> = Vec::with_capacity(nodes.len() * vnode_count as usize);
    for node in nodes {
        for i in 0..vnode_count {
            positions.push((vnode_position(node, i), node.clone()));
        }
    }
    // Sort by position; equal positions fall back to node-id order so every
    // process builds the identical sequence.
    positions.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    positions
}
