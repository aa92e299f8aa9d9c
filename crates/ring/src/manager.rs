//! Ring membership manager.
//!
//! One `RingManager` per node owns the current [`HashRing`] snapshot plus a
//! directory resolving member ids to dialable addresses. Membership changes
//! serialize through the write lock and each produces exactly one new
//! snapshot; readers always observe a fully-applied ring. Topology-change
//! work (rebalancing) runs on a detached task so the membership ack never
//! waits on it.

use crate::ring::HashRing;
use ringkv_common::{NodeId, NodeInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Receiver of topology-change notifications. Implemented by the
/// rebalancer; the gRPC impl of membership wiring installs it at startup.
#[async_trait::async_trait]
pub trait TopologyListener: Send + Sync + 'static {
    /// A node joined; `ring` is the snapshot that includes it.
    async fn node_joined(&self, node: NodeInfo, ring: Arc<HashRing>);

    /// A node left; `ring` is the snapshot without it.
    async fn node_left(&self, node: NodeId, ring: Arc<HashRing>);
}

struct RingState {
    ring: Arc<HashRing>,
    directory: HashMap<NodeId, NodeInfo>,
}

/// Serialized owner of the ring snapshot on this node.
pub struct RingManager {
    local: NodeInfo,
    state: RwLock<RingState>,
    listener: std::sync::OnceLock<Arc<dyn TopologyListener>>,
}

impl std::fmt::Debug for RingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingManager")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl RingManager {
    /// A manager whose initial ring contains exactly the local node.
    pub fn new(local: NodeInfo, vnode_count: u32) -> Self {
        let ring = Arc::new(HashRing::with_nodes(
            vnode_count,
            std::iter::once(local.id.clone()),
        ));
        let mut directory = HashMap::new();
        directory.insert(local.id.clone(), local.clone());
        Self {
            local,
            state: RwLock::new(RingState { ring, directory }),
            listener: std::sync::OnceLock::new(),
        }
    }

    /// Install the topology listener. Later calls are ignored.
    pub fn set_listener(&self, listener: Arc<dyn TopologyListener>) {
        let _ = self.listener.set(listener);
    }

    pub fn local(&self) -> &NodeInfo {
        &self.local
    }

    /// Add a node. Idempotent; a genuine join dispatches the listener on a
    /// detached task.
    pub async fn add_node(&self, info: NodeInfo) {
        let new_ring = {
            let mut state = self.state.write().await;
            if state.ring.contains(&info.id) {
                // Refresh the address in case the node moved.
                state.directory.insert(info.id.clone(), info);
                return;
            }
            let new_ring = Arc::new(state.ring.add_node(&info.id));
            state.ring = new_ring.clone();
            state.directory.insert(info.id.clone(), info.clone());
            new_ring
        };

        tracing::info!("node {} joined the ring ({} members)", info.id, new_ring.len());

        if let Some(listener) = self.listener.get() {
            let listener = listener.clone();
            tokio::spawn(async move {
                listener.node_joined(info, new_ring).await;
            });
        }
    }

    /// Remove a node. Idempotent; a genuine leave dispatches the listener on
    /// a detached task.
    pub async fn remove_node(&self, id: &NodeId) {
        let new_ring = {
            let mut state = self.state.write().await;
            if !state.ring.contains(id) {
                return;
            }
            let new_ring = Arc::new(state.ring.remove_node(id));
            state.ring = new_ring.clone();
            state.directory.remove(id);
            new_ring
        };

        tracing::info!("node {} left the ring ({} members)", id, new_ring.len());

        if let Some(listener) = self.listener.get() {
            let listener = listener.clone();
            let id = id.clone();
            tokio::spawn(async move {
                listener.node_left(id, new_ring).await;
            });
        }
    }

    /// The node owning `key` under the current snapshot.
    pub async fn find_node(&self, key: &str) -> Option<NodeInfo> {
        let state = self.state.read().await;
        let owner = state.ring.find_node(key)?;
        state.directory.get(owner).cloned()
    }

    /// The replica set for `key`: up to `n` distinct members in ring order,
    /// resolved to dialable addresses.
    pub async fn successors(&self, key: &str, n: usize) -> Vec<NodeInfo> {
        let state = self.state.read().await;
        state
            .ring
            .successors(key, n)
            .into_iter()
            .filter_map(|id| {
                let info = state.directory.get(&id).cloned();
                if info.is_none() {
                    tracing::warn!("ring member {} missing from directory", id);
                }
                info
            })
            .collect()
    }

    /// All current members.
    pub async fn list_nodes(&self) -> Vec<NodeInfo> {
        let state = self.state.read().await;
        let mut nodes: Vec<NodeInfo> = state.directory.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// The current ring snapshot.
    pub async fn snapshot(&self) -> Arc<HashRing> {
        self.state.read().await.ring.clone()
    }
}
