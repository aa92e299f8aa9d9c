//! ringkv-common: shared types for the ringkv project.
//!
//! Provides the `NodeId` / `NodeInfo` identity types and the 64-bit
//! ring hash shared by vnode placement and key lookup.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Stable identifier of a physical node.
///
/// Opaque to the ring: two processes that agree on the node-id strings and
/// the vnode count compute bitwise-identical rings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// NodeInfo
// ---------------------------------------------------------------------------

/// A node's identity plus the address peers dial to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl NodeInfo {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }

    /// A `NodeInfo` with a placeholder address, for tests that never dial.
    pub fn with_dummy_addr(id: NodeId) -> Self {
        Self {
            id,
            addr: "127.0.0.1:1".parse().expect("valid dummy address"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ring hash
// ---------------------------------------------------------------------------

/// 64-bit ring hash: the big-endian u64 of the first 8 bytes of SHA-256.
///
/// Both vnode positions and key positions go through this function, so key
/// ownership is consistent on every node.
pub fn hash64(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Canonical byte encoding of a vnode label.
///
/// Length-prefixed framing: `[id.len() as u32 BE][id bytes][index as u32 BE]`.
/// The prefix keeps `("n1", ...)` and `("n12", ...)` from ever encoding to
/// the same bytes.
pub fn vnode_label(node: &NodeId, index: u32) -> Vec<u8> {
    let id = node.as_str().as_bytes();
    let mut label = Vec::with_capacity(8 + id.len());
    label.extend_from_slice(&(id.len() as u32).to_be_bytes());
    label.extend_from_slice(id);
    label.extend_from_slice(&index.to_be_bytes());
    label
}

/// Ring position of vnode `index` of `node`.
pub fn vnode_position(node: &NodeId, index: u32) -> u64 {
    hash64(&vnode_label(node, index))
}

/// Ring position of a key.
pub fn key_position(key: &str) -> u64 {
    hash64(key.as_bytes())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash64_deterministic() {
        assert_eq!(hash64(b"hello"), hash64(b"hello"));
        assert_ne!(hash64(b"hello"), hash64(b"world"));
    }

    #[test]
    fn test_hash64_matches_sha256_prefix() {
        // SHA-256("") = e3b0c44298fc1c14...
        assert_eq!(hash64(b""), 0xe3b0c44298fc1c14);
    }

    #[test]
    fn test_vnode_label_framing_is_unambiguous() {
        let a = vnode_label(&NodeId::from("n1"), 0x32616263); // "2abc" as bytes
        let b = vnode_label(&NodeId::from("n12"), 0x61626364);
        assert_ne!(a, b, "length prefix must disambiguate id boundaries");
    }

    #[test]
    fn test_vnode_positions_spread() {
        let node = NodeId::from("node-a");
        let positions: std::collections::HashSet<u64> =
            (0..128).map(|i| vnode_position(&node, i)).collect();
        assert_eq!(positions.len(), 128, "vnode positions should not collide");
    }

    #[test]
    fn test_vnode_position_differs_per_node() {
        let a = NodeId::from("node-a");
        let b = NodeId::from("node-b");
        assert_ne!(vnode_position(&a, 0), vnode_position(&b, 0));
    }

    #[test]
    fn test_node_id_serde_transparent() {
        let id = NodeId::from("node-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"node-1\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_node_id_ordering() {
        let mut ids = vec![NodeId::from("c"), NodeId::from("a"), NodeId::from("b")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "a");
        assert_eq!(ids[2].as_str(), "c");
    }

    #[test]
    fn test_node_info_dummy_addr() {
        let info = NodeInfo::with_dummy_addr(NodeId::from("n"));
        assert_eq!(info.id.as_str(), "n");
    }
}
