//! Chaos injection wrapper for [`ReplicaClient`].
//!
//! [`ChaosReplicaClient`] wraps any `R: ReplicaClient` and injects
//! configurable failures: random errors, per-node failures, and latency.
//! Used by the cluster integration tests to drive quorum-loss and
//! handoff scenarios without a network.

use crate::replica_client::{ReplicaClient, ReplicaError};
use rand::Rng;
use ringkv_common::{NodeId, NodeInfo};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// Configuration for replica chaos injection.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Probability of returning an error \[0.0, 1.0\].
    pub failure_rate: f64,
    /// Fixed latency injected before forwarding.
    pub latency: Duration,
    /// Random additional latency in \[0, jitter\].
    pub jitter: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// A [`ReplicaClient`] wrapper that injects chaos (failures, latency,
/// per-node blocks).
pub struct ChaosReplicaClient<R: ReplicaClient> {
    inner: Arc<R>,
    config: Arc<RwLock<ChaosConfig>>,
    /// Nodes that are explicitly marked as failed.
    failed_nodes: Arc<RwLock<HashSet<NodeId>>>,
}

impl<R: ReplicaClient> std::fmt::Debug for ChaosReplicaClient<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosReplicaClient").finish_non_exhaustive()
    }
}

impl<R: ReplicaClient> ChaosReplicaClient<R> {
    pub fn new(inner: R, config: ChaosConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            config: Arc::new(RwLock::new(config)),
            failed_nodes: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Mark a node as failed (until recovered).
    pub async fn kill_node(&self, node: NodeId) {
        self.failed_nodes.write().await.insert(node);
    }

    /// Recover a previously killed node.
    pub async fn recover_node(&self, node: &NodeId) {
        self.failed_nodes.write().await.remove(node);
    }

    /// Change the random failure rate.
    pub async fn set_failure_rate(&self, rate: f64) {
        self.config.write().await.failure_rate = rate;
    }

    /// Latency, then per-node block, then random failure.
    async fn preflight(&self, target: &NodeInfo) -> Result<(), ReplicaError> {
        let config = self.config.read().await.clone();

        let mut delay = config.latency;
        if config.jitter > Duration::ZERO {
            let jitter_ms = rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64);
            delay += Duration::from_millis(jitter_ms);
        }
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        if self.failed_nodes.read().await.contains(&target.id) {
            return Err(ReplicaError::RpcFailed(format!(
                "node {} marked failed",
                target.id
            )));
        }

        if config.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < config.failure_rate {
            return Err(ReplicaError::RpcFailed("injected random failure".into()));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<R: ReplicaClient> ReplicaClient for ChaosReplicaClient<R> {
    async fn remote_put(
        &self,
        target: &NodeInfo,
        key: &str,
        value: &[u8],
    ) -> Result<u64, ReplicaError> {
        self.preflight(target).await?;
        self.inner.remote_put(target, key, value).await
    }

    async fn remote_get(
        &self,
        target: &NodeInfo,
        key: &str,
    ) -> Result<Option<(Vec<u8>, u64)>, ReplicaError> {
        self.preflight(target).await?;
        self.inner.remote_get(target, key).await
    }

    async fn remote_delete(&self, target: &NodeInfo, key: &str) -> Result<(), ReplicaError> {
        self.preflight(target).await?;
        self.inner.remote_delete(target, key).await
    }

    async fn remote_get_all_meta(
        &self,
        target: &NodeInfo,
    ) -> Result<HashMap<String, u64>, ReplicaError> {
        self.preflight(target).await?;
        self.inner.remote_get_all_meta(target).await
    }

    async fn ping(&self, target: &NodeInfo) -> Result<(), ReplicaError> {
        self.preflight(target).await?;
        self.inner.ping(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;

    #[async_trait::async_trait]
    impl ReplicaClient for AlwaysOk {
        async fn remote_put(
            &self,
            _target: &NodeInfo,
            _key: &str,
            _value: &[u8],
        ) -> Result<u64, ReplicaError> {
            Ok(1)
        }

        async fn remote_get(
            &self,
            _target: &NodeInfo,
            _key: &str,
        ) -> Result<Option<(Vec<u8>, u64)>, ReplicaError> {
            Ok(None)
        }

        async fn remote_delete(&self, _target: &NodeInfo, _key: &str) -> Result<(), ReplicaError> {
            Ok(())
        }

        async fn remote_get_all_meta(
            &self,
            _target: &NodeInfo,
        ) -> Result<HashMap<String, u64>, ReplicaError> {
            Ok(HashMap::new())
        }

        async fn ping(&self, _target: &NodeInfo) -> Result<(), ReplicaError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_passthrough_with_no_chaos() {
        let client = ChaosReplicaClient::new(AlwaysOk, ChaosConfig::default());
        let target = NodeInfo::with_dummy_addr(NodeId::from("a"));
        assert!(client.remote_put(&target, "k", b"v").await.is_ok());
        assert!(client.ping(&target).await.is_ok());
    }

    #[tokio::test]
    async fn test_killed_node_fails_until_recovered() {
        let client = ChaosReplicaClient::new(AlwaysOk, ChaosConfig::default());
        let target = NodeInfo::with_dummy_addr(NodeId::from("a"));

        client.kill_node(target.id.clone()).await;
        assert!(client.remote_put(&target, "k", b"v").await.is_err());
        assert!(client.ping(&target).await.is_err());

        client.recover_node(&target.id).await;
        assert!(client.remote_put(&target, "k", b"v").await.is_ok());
    }

    #[tokio::test]
    async fn test_full_failure_rate_fails_everything() {
        let client = ChaosReplicaClient::new(
            AlwaysOk,
            ChaosConfig {
                failure_rate: 1.0,
                ..Default::default()
            },
        );
        let target = NodeInfo::with_dummy_addr(NodeId::from("a"));
        for _ in 0..10 {
            assert!(client.remote_get(&target, "k").await.is_err());
        }
    }

    #[tokio::test]
    async fn test_kill_affects_only_that_node() {
        let client = ChaosReplicaClient::new(AlwaysOk, ChaosConfig::default());
        let a = NodeInfo::with_dummy_addr(NodeId::from("a"));
        let b = NodeInfo::with_dummy_addr(NodeId::from("b"));

        client.kill_node(a.id.clone()).await;
        assert!(client.ping(&a).await.is_err());
        assert!(client.ping(&b).await.is_ok());
    }
}
