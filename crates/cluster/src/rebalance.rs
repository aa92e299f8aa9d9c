//! Key redistribution after topology change.
//!
//! When a node joins, every existing node scans its local keys and streams
//! the ones the new ring assigns to the joiner. The source keeps its copy;
//! surplus replicas are left for a future GC pass. When a node leaves,
//! nothing happens synchronously: anti-entropy converges the new owners
//! from the surviving replicas.

use crate::replica_client::{with_timeout, ReplicaClient};
use ringkv_common::{NodeId, NodeInfo};
use ringkv_ring::manager::TopologyListener;
use ringkv_ring::ring::HashRing;
use ringkv_storage::engine::Engine;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// Streams keys to new ring members. Installed as the ring manager's
/// topology listener; runs on detached tasks so membership acks never
/// wait for it.
pub struct Rebalancer<R: ReplicaClient> {
    local: NodeInfo,
    storage: Arc<RwLock<Engine>>,
    client: Arc<R>,
    rpc_timeout: Duration,
}

impl<R: ReplicaClient> std::fmt::Debug for Rebalancer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rebalancer")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl<R: ReplicaClient> Rebalancer<R> {
    pub fn new(
        local: NodeInfo,
        storage: Arc<RwLock<Engine>>,
        client: Arc<R>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            local,
            storage,
            client,
            rpc_timeout,
        }
    }
}

#[async_trait::async_trait]
impl<R: ReplicaClient> TopologyListener for Rebalancer<R> {
    async fn node_joined(&self, node: NodeInfo, ring: Arc<HashRing>) {
        if node.id == self.local.id {
            return;
        }

        let keys = { self.storage.read().await.all_keys() };
        let mut moved = 0u64;
        let mut failed = 0u64;

        for key in keys {
            if ring.find_node(&key) != Some(&node.id) {
                continue;
            }
            let entry = { self.storage.read().await.get(&key) };
            let Some((value, _ts)) = entry else {
                continue; // deleted since the scan
            };
            match with_timeout(
                self.rpc_timeout,
                self.client.remote_put(&node, &key, &value),
            )
            .await
            {
                Ok(_ts) => moved += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!("rebalance of '{}' to {} failed: {}", key, node.id, e);
                }
            }
        }

        if moved > 0 || failed > 0 {
            tracing::info!(
                "rebalance for joined node {}: {} key(s) streamed, {} failed",
                node.id,
                moved,
                failed
            );
        }
        ringkv_metrics::metrics().rebalanced_keys.inc_by(moved);
    }

    async fn node_left(&self, node: NodeId, _ring: Arc<HashRing>) {
        // Surviving replicas converge the new owners via anti-entropy.
        tracing::info!("node {} left; relying on anti-entropy to re-replicate", node);
    }
}
