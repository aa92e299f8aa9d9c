//! Quorum coordinator: handles client PUT/GET/DELETE by fanning out to the
//! key's replica set.
//!
//! The coordinator:
//! 1. Asks the ring manager for the N successors of the key
//! 2. Sends replica RPCs in parallel (the local replica goes straight to
//!    the storage engine)
//! 3. Waits for W acks (writes) or R responses (reads), bounded by the
//!    aggregate deadline
//! 4. Reconciles read responses by last-writer-wins timestamp
//! 5. Parks a hint for every failed remote write (hinted handoff)
//!
//! The coordinator itself is stateless; any number of client requests may
//! be in flight at once.

use crate::handoff::{HandoffBuffer, Mutation};
use crate::replica_client::{with_timeout, ReplicaClient};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use ringkv_ring::manager::RingManager;
use ringkv_storage::engine::{Engine, StorageError};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// Quorum and replication configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Replication factor (N).
    pub replication: usize,
    /// Acks required for a successful write or delete (W).
    pub write_quorum: usize,
    /// Responses required for a successful read (R).
    pub read_quorum: usize,
    /// Per-RPC deadline.
    pub rpc_timeout: Duration,
    /// Quorum-wait deadline.
    pub aggregate_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            replication: 3,
            write_quorum: 2,
            read_quorum: 2,
            rpc_timeout: Duration::from_secs(5),
            aggregate_timeout: Duration::from_secs(6),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("write quorum not met: need {needed}, got {got}")]
    WriteQuorumNotMet { needed: usize, got: usize },
    #[error("read quorum not met: need {needed}, got {got}")]
    ReadQuorumNotMet { needed: usize, got: usize },
    #[error("key not found")]
    NotFound,
    #[error("no replicas available")]
    NoReplicas,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// One replica's answer to a read.
enum ReadReply {
    Found(Vec<u8>, u64),
    Absent,
    Failed,
}

/// Replicated request coordinator.
///
/// Generic over `R: ReplicaClient` for testability; real deployment uses
/// `GrpcReplicaClient`, unit tests use mocks.
pub struct Coordinator<R: ReplicaClient> {
    ring: Arc<RingManager>,
    storage: Arc<RwLock<Engine>>,
    handoff: Arc<HandoffBuffer>,
    client: Arc<R>,
    config: CoordinatorConfig,
}

impl<R: ReplicaClient> std::fmt::Debug for Coordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R: ReplicaClient> Coordinator<R> {
    pub fn new(
        ring: Arc<RingManager>,
        storage: Arc<RwLock<Engine>>,
        handoff: Arc<HandoffBuffer>,
        client: Arc<R>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            ring,
            storage,
            handoff,
            client,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // PUT / DELETE
    // -----------------------------------------------------------------------

    /// Replicated write. Returns the ack count on quorum.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<usize, KvError> {
        ringkv_metrics::metrics().kv_puts.inc();
        self.fan_out_write(key, Mutation::Put(value)).await
    }

    /// Replicated delete. Returns the ack count on quorum.
    pub async fn delete(&self, key: &str) -> Result<usize, KvError> {
        ringkv_metrics::metrics().kv_deletes.inc();
        self.fan_out_write(key, Mutation::Delete).await
    }

    /// Fan a mutation out to all N replicas and wait for W acks.
    ///
    /// Each remote task parks its own hint on failure, so a replica that
    /// fails after the quorum short-circuit still gets one.
    async fn fan_out_write(&self, key: &str, mutation: Mutation) -> Result<usize, KvError> {
        let targets = self.ring.successors(key, self.config.replication).await;
        if targets.is_empty() {
            return Err(KvError::NoReplicas);
        }
        let w = self.config.write_quorum.min(targets.len());

        let local_id = self.ring.local().id.clone();
        let deadline = tokio::time::Instant::now() + self.config.aggregate_timeout;
        let mut futs = FuturesUnordered::new();

        for target in targets {
            if target.id == local_id {
                let storage = self.storage.clone();
                let key = key.to_string();
                let mutation = mutation.clone();
                futs.push(tokio::spawn(async move {
                    let result = {
                        let mut engine = storage.write().await;
                        match mutation {
                            Mutation::Put(value) => engine.put(&key, value).map(|_ts| ()),
                            Mutation::Delete => engine.delete(&key),
                        }
                    };
                    match result {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::error!("local write of '{}' failed: {}", key, e);
                            false
                        }
                    }
                }));
            } else {
                let client = self.client.clone();
                let handoff = self.handoff.clone();
                let key = key.to_string();
                let mutation = mutation.clone();
                let rpc_timeout = self.config.rpc_timeout;
                futs.push(tokio::spawn(async move {
                    let result = match &mutation {
                        Mutation::Put(value) => {
                            with_timeout(rpc_timeout, client.remote_put(&target, &key, value))
                                .await
                                .map(|_ts| ())
                        }
                        Mutation::Delete => {
                            with_timeout(rpc_timeout, client.remote_delete(&target, &key)).await
                        }
                    };
                    match result {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::debug!(
                                "write of '{}' to {} failed: {}, parking hint",
                                key,
                                target.id,
                                e
                            );
                            handoff.store_hint(&target.id, &key, mutation).await;
                            false
                        }
                    }
                }));
            }
        }

        // Collect acks until quorum or the aggregate deadline. Tasks keep
        // running after the break; failed remotes park their hints there.
        let mut acks = 0usize;
        while let Some(result) = tokio::time::timeout_at(deadline, futs.next())
            .await
            .ok()
            .flatten()
        {
            if matches!(result, Ok(true)) {
                acks += 1;
                if acks >= w {
                    break;
                }
            }
        }

        if acks >= w {
            Ok(acks)
        } else {
            Err(KvError::WriteQuorumNotMet {
                needed: w,
                got: acks,
            })
        }
    }

    // -----------------------------------------------------------------------
    // GET
    // -----------------------------------------------------------------------

    /// Replicated read. Collects R non-error responses and returns the
    /// newest value by timestamp; ties break on the lexicographically
    /// smallest value so every coordinator picks the same winner.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        ringkv_metrics::metrics().kv_gets.inc();

        let targets = self.ring.successors(key, self.config.replication).await;
        if targets.is_empty() {
            return Err(KvError::NoReplicas);
        }
        let r = self.config.read_quorum.min(targets.len());

        let local_id = self.ring.local().id.clone();
        let deadline = tokio::time::Instant::now() + self.config.aggregate_timeout;
        let mut futs = FuturesUnordered::new();

        for target in targets {
            if target.id == local_id {
                let storage = self.storage.clone();
                let key = key.to_string();
                futs.push(tokio::spawn(async move {
                    match storage.read().await.get(&key) {
                        Some((value, ts)) => ReadReply::Found(value, ts),
                        None => ReadReply::Absent,
                    }
                }));
            } else {
                let client = self.client.clone();
                let key = key.to_string();
                let rpc_timeout = self.config.rpc_timeout;
                futs.push(tokio::spawn(async move {
                    match with_timeout(rpc_timeout, client.remote_get(&target, &key)).await {
                        Ok(Some((value, ts))) => ReadReply::Found(value, ts),
                        Ok(None) => ReadReply::Absent,
                        Err(e) => {
                            tracing::debug!("read of '{}' from {} failed: {}", key, target.id, e);
                            ReadReply::Failed
                        }
                    }
                }));
            }
        }

        let mut responses = 0usize;
        let mut best: Option<(Vec<u8>, u64)> = None;

        while let Some(result) = tokio::time::timeout_at(deadline, futs.next())
            .await
            .ok()
            .flatten()
        {
            match result {
                Ok(ReadReply::Found(value, ts)) => {
                    responses += 1;
                    let newer = match &best {
                        None => true,
                        Some((best_value, best_ts)) => {
                            ts > *best_ts || (ts == *best_ts && value < *best_value)
                        }
                    };
                    if newer {
                        best = Some((value, ts));
                    }
                }
                Ok(ReadReply::Absent) => responses += 1,
                Ok(ReadReply::Failed) | Err(_) => {}
            }
            if responses >= r {
                break;
            }
        }

        if responses < r {
            return Err(KvError::ReadQuorumNotMet {
                needed: r,
                got: responses,
            });
        }
        match best {
            Some((value, _ts)) => Ok(value),
            None => Err(KvError::NotFound),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica_client::ReplicaError;
    use ringkv_common::{NodeId, NodeInfo};
    use ringkv_storage::wal::FsyncPolicy;
    use std::collections::{HashMap, HashSet};
    use tempfile::TempDir;

    struct MockReplicaClient;

    #[async_trait::async_trait]
    impl ReplicaClient for MockReplicaClient {
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

    fn single_node_config() -> CoordinatorConfig {
        CoordinatorConfig {
            replication: 1,
            write_quorum: 1,
            read_quorum: 1,
            ..Default::default()
        }
    }

    async fn setup(
        config: CoordinatorConfig,
    ) -> (Coordinator<MockReplicaClient>, Arc<HandoffBuffer>, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), FsyncPolicy::None).unwrap();
        let storage = Arc::new(RwLock::new(engine));
        let local = NodeInfo::new(NodeId::from("local"), "127.0.0.1:7000".parse().unwrap());
        let ring = Arc::new(RingManager::new(local, 32));
        let handoff = Arc::new(HandoffBuffer::new());

        let coord = Coordinator::new(
            ring,
            storage,
            handoff.clone(),
            Arc::new(MockReplicaClient),
            config,
        );
        (coord, handoff, dir)
    }

    #[tokio::test]
    async fn test_single_node_round_trip() {
        let (coord, _handoff, _dir) = setup(single_node_config()).await;

        assert_eq!(coord.put("k", b"v1".to_vec()).await.unwrap(), 1);
        assert_eq!(coord.get("k").await.unwrap(), b"v1");
        assert_eq!(coord.delete("k").await.unwrap(), 1);
        assert!(matches!(coord.get("k").await, Err(KvError::NotFound)));
    }

    #[tokio::test]
    async fn test_overwrite_returns_latest() {
        let (coord, _handoff, _dir) = setup(single_node_config()).await;

        coord.put("k", b"v1".to_vec()).await.unwrap();
        coord.put("k", b"v2".to_vec()).await.unwrap();
        assert_eq!(coord.get("k").await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let (coord, _handoff, _dir) = setup(single_node_config()).await;
        assert!(matches!(
            coord.get("missing").await,
            Err(KvError::NotFound)
        ));
    }

    /// Fails RPCs to a chosen set of nodes.
    struct FailingMockClient {
        fail_nodes: HashSet<NodeId>,
    }

    #[async_trait::async_trait]
    impl ReplicaClient for FailingMockClient {
        async fn remote_put(
            &self,
            target: &NodeInfo,
            _key: &str,
            _value: &[u8],
        ) -> Result<u64, ReplicaError> {
            if self.fail_nodes.contains(&target.id) {
                Err(ReplicaError::RpcFailed("simulated failure".into()))
            } else {
                Ok(1)
            }
        }

        async fn remote_get(
            &self,
            target: &NodeInfo,
            _key: &str,
        ) -> Result<Option<(Vec<u8>, u64)>, ReplicaError> {
            if self.fail_nodes.contains(&target.id) {
                Err(ReplicaError::RpcFailed("simulated failure".into()))
            } else {
                Ok(None)
            }
        }

        async fn remote_delete(&self, target: &NodeInfo, _key: &str) -> Result<(), ReplicaError> {
            if self.fail_nodes.contains(&target.id) {
                Err(ReplicaError::RpcFailed("simulated failure".into()))
            } else {
                Ok(())
            }
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

    async fn setup_three_nodes(
        fail: &[&str],
        config: CoordinatorConfig,
    ) -> (Coordinator<FailingMockClient>, Arc<HandoffBuffer>, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), FsyncPolicy::None).unwrap();
        let storage = Arc::new(RwLock::new(engine));
        let local = NodeInfo::new(NodeId::from("a"), "127.0.0.1:7000".parse().unwrap());
        let ring = Arc::new(RingManager::new(local, 32));
        ring.add_node(NodeInfo::new(
            NodeId::from("b"),
            "127.0.0.1:7001".parse().unwrap(),
        ))
        .await;
        ring.add_node(NodeInfo::new(
            NodeId::from("c"),
            "127.0.0.1:7002".parse().unwrap(),
        ))
        .await;

        let handoff = Arc::new(HandoffBuffer::new());
        let client = FailingMockClient {
            fail_nodes: fail.iter().map(|s| NodeId::from(*s)).collect(),
        };
        let coord = Coordinator::new(ring, storage, handoff.clone(), Arc::new(client), config);
        (coord, handoff, dir)
    }

    #[tokio::test]
    async fn test_put_reaches_quorum_with_one_replica_down() {
        let (coord, handoff, _dir) = setup_three_nodes(&["b"], CoordinatorConfig::default()).await;

        let acks = coord.put("k", b"v".to_vec()).await.unwrap();
        assert!(acks >= 2);

        // The failed replica gets a hint even though quorum was met.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handoff.pending_for(&NodeId::from("b")).await, 1);
        assert_eq!(handoff.pending_for(&NodeId::from("c")).await, 0);
    }

    #[tokio::test]
    async fn test_put_fails_without_quorum() {
        let (coord, handoff, _dir) =
            setup_three_nodes(&["b", "c"], CoordinatorConfig::default()).await;

        let result = coord.put("k", b"v".to_vec()).await;
        assert!(matches!(
            result,
            Err(KvError::WriteQuorumNotMet { needed: 2, got: 1 })
        ));

        // Both unreachable replicas get hints.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handoff.pending_total().await, 2);
    }

    #[tokio::test]
    async fn test_delete_parks_delete_hints() {
        let (coord, handoff, _dir) = setup_three_nodes(&["c"], CoordinatorConfig::default()).await;

        coord.put("k", b"v".to_vec()).await.unwrap();
        coord.delete("k").await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handoff.pending_for(&NodeId::from("c")).await, 2);
    }

    #[tokio::test]
    async fn test_read_quorum_not_met_when_two_down() {
        let (coord, _handoff, _dir) =
            setup_three_nodes(&["b", "c"], CoordinatorConfig::default()).await;

        // Only the local replica can answer: 1 < R=2.
        let result = coord.get("k").await;
        assert!(matches!(
            result,
            Err(KvError::ReadQuorumNotMet { needed: 2, got: 1 })
        ));
    }

    /// Returns preset read responses per node.
    struct StaticReadClient {
        responses: HashMap<NodeId, (Vec<u8>, u64)>,
    }

    #[async_trait::async_trait]
    impl ReplicaClient for StaticReadClient {
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
            target: &NodeInfo,
            _key: &str,
        ) -> Result<Option<(Vec<u8>, u64)>, ReplicaError> {
            Ok(self.responses.get(&target.id).cloned())
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

    async fn setup_static_reads(
        responses: HashMap<NodeId, (Vec<u8>, u64)>,
    ) -> (Coordinator<StaticReadClient>, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), FsyncPolicy::None).unwrap();
        let storage = Arc::new(RwLock::new(engine));
        let local = NodeInfo::new(NodeId::from("a"), "127.0.0.1:7000".parse().unwrap());
        let ring = Arc::new(RingManager::new(local, 32));
        ring.add_node(NodeInfo::new(
            NodeId::from("b"),
            "127.0.0.1:7001".parse().unwrap(),
        ))
        .await;
        ring.add_node(NodeInfo::new(
            NodeId::from("c"),
            "127.0.0.1:7002".parse().unwrap(),
        ))
        .await;

        let config = CoordinatorConfig {
            // All three replicas must answer so the newest version is seen
            // regardless of arrival order.
            read_quorum: 3,
            ..Default::default()
        };
        let coord = Coordinator::new(
            ring,
            storage,
            Arc::new(HandoffBuffer::new()),
            Arc::new(StaticReadClient { responses }),
            config,
        );
        (coord, dir)
    }

    #[tokio::test]
    async fn test_get_picks_newest_timestamp() {
        let mut responses = HashMap::new();
        responses.insert(NodeId::from("b"), (b"old".to_vec(), 100));
        responses.insert(NodeId::from("c"), (b"new".to_vec(), 200));
        let (coord, _dir) = setup_static_reads(responses).await;

        assert_eq!(coord.get("k").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_get_breaks_ties_deterministically() {
        let mut responses = HashMap::new();
        responses.insert(NodeId::from("b"), (b"zebra".to_vec(), 100));
        responses.insert(NodeId::from("c"), (b"apple".to_vec(), 100));
        let (coord, _dir) = setup_static_reads(responses).await;

        // Equal timestamps: lexicographically smallest value wins.
        assert_eq!(coord.get("k").await.unwrap(), b"apple");
    }
}
