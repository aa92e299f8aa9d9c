//! Anti-entropy reconciler.
//!
//! Periodically exchanges `key -> ts` metadata with every reachable peer
//! and repairs divergence in both directions: pull what the peer has seen
//! more recently, push what this node has seen more recently. Each round
//! ends by flushing any parked hints for the peer.
//!
//! A deleted key leaves no trace in the local store, so a peer that still
//! holds it will re-replicate it here on a later round. That resurrection
//! is an accepted consequence of storing no tombstones.

use crate::handoff::HandoffBuffer;
use crate::replica_client::{with_timeout, ReplicaClient};
use ringkv_common::NodeInfo;
use ringkv_ring::manager::RingManager;
use ringkv_storage::engine::Engine;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

/// Configuration for the anti-entropy background task.
#[derive(Debug, Clone)]
pub struct AntiEntropyConfig {
    /// Pause between reconciliation rounds.
    pub sync_interval: Duration,
    /// Per-RPC deadline during a round.
    pub rpc_timeout: Duration,
}

impl Default for AntiEntropyConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            rpc_timeout: Duration::from_secs(5),
        }
    }
}

/// Spawn the anti-entropy background task.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_anti_entropy_task<R: ReplicaClient>(
    ring: Arc<RingManager>,
    storage: Arc<RwLock<Engine>>,
    handoff: Arc<HandoffBuffer>,
    client: Arc<R>,
    config: AntiEntropyConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(config.sync_interval);
        loop {
            tick.tick().await;
            run_round(&ring, &storage, &handoff, &client, config.rpc_timeout).await;
        }
    })
}

/// One reconciliation round: sync with every reachable peer, one
/// independent task per peer. A failure against one peer never affects
/// the others.
pub async fn run_round<R: ReplicaClient>(
    ring: &Arc<RingManager>,
    storage: &Arc<RwLock<Engine>>,
    handoff: &Arc<HandoffBuffer>,
    client: &Arc<R>,
    rpc_timeout: Duration,
) {
    let local_id = ring.local().id.clone();
    let peers: Vec<NodeInfo> = ring
        .list_nodes()
        .await
        .into_iter()
        .filter(|n| n.id != local_id)
        .collect();

    let mut tasks = Vec::new();
    for peer in peers {
        match with_timeout(rpc_timeout, client.ping(&peer)).await {
            Ok(()) => {
                let storage = storage.clone();
                let handoff = handoff.clone();
                let client = client.clone();
                tasks.push(tokio::spawn(async move {
                    sync_with(&storage, &handoff, &*client, &peer, rpc_timeout).await;
                }));
            }
            Err(e) => {
                tracing::debug!("peer {} unreachable, skipping sync: {}", peer.id, e);
            }
        }
    }

    for task in tasks {
        let _ = task.await;
    }
    ringkv_metrics::metrics().sync_rounds.inc();
}

/// Reconcile with a single peer: metadata exchange, pull, push, then
/// flush parked hints.
pub async fn sync_with<R: ReplicaClient>(
    storage: &Arc<RwLock<Engine>>,
    handoff: &Arc<HandoffBuffer>,
    client: &R,
    peer: &NodeInfo,
    rpc_timeout: Duration,
) {
    let peer_meta = match with_timeout(rpc_timeout, client.remote_get_all_meta(peer)).await {
        Ok(meta) => meta,
        Err(e) => {
            tracing::debug!("metadata exchange with {} failed: {}", peer.id, e);
            return;
        }
    };
    let local_meta = { storage.read().await.all_meta() };

    // Pull phase: fetch keys the peer has seen more recently.
    let mut pulled = 0u64;
    for (key, peer_ts) in &peer_meta {
        let stale = local_meta.get(key).map_or(true, |local_ts| local_ts < peer_ts);
        if !stale {
            continue;
        }
        match with_timeout(rpc_timeout, client.remote_get(peer, key)).await {
            // The local store re-stamps the entry; ts means "last write
            // observed here", not the originating write time.
            Ok(Some((value, _peer_ts))) => {
                let result = { storage.write().await.put(key, value) };
                match result {
                    Ok(_ts) => pulled += 1,
                    Err(e) => tracing::warn!("storing pulled key '{}' failed: {}", key, e),
                }
            }
            Ok(None) => {} // raced with a delete on the peer
            Err(e) => {
                tracing::debug!("pull of '{}' from {} failed: {}", key, peer.id, e);
            }
        }
    }

    // Push phase: send keys this node has seen more recently.
    let mut pushed = 0u64;
    for (key, local_ts) in &local_meta {
        let stale = peer_meta.get(key).map_or(true, |peer_ts| peer_ts < local_ts);
        if !stale {
            continue;
        }
        let entry = { storage.read().await.get(key) };
        if let Some((value, _ts)) = entry {
            match with_timeout(rpc_timeout, client.remote_put(peer, key, &value)).await {
                Ok(_ts) => pushed += 1,
                Err(e) => {
                    tracing::debug!("push of '{}' to {} failed: {}", key, peer.id, e);
                }
            }
        }
    }

    if pulled > 0 || pushed > 0 {
        tracing::info!(
            "synced with {}: pulled {}, pushed {}",
            peer.id,
            pulled,
            pushed
        );
    }
    let m = ringkv_metrics::metrics();
    m.sync_keys_pulled.inc_by(pulled);
    m.sync_keys_pushed.inc_by(pushed);

    handoff.flush(peer, client, rpc_timeout).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica_client::ReplicaError;
    use ringkv_common::NodeId;
    use ringkv_storage::wal::FsyncPolicy;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    const T: Duration = Duration::from_secs(1);

    /// A fake peer: a `key -> (value, ts)` map plus a record of writes it
    /// received.
    struct FakePeer {
        data: StdMutex<HashMap<String, (Vec<u8>, u64)>>,
        received: StdMutex<Vec<String>>,
    }

    impl FakePeer {
        fn new(entries: &[(&str, &[u8], u64)]) -> Self {
            Self {
                data: StdMutex::new(
                    entries
                        .iter()
                        .map(|(k, v, ts)| (k.to_string(), (v.to_vec(), *ts)))
                        .collect(),
                ),
                received: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ReplicaClient for FakePeer {
        async fn remote_put(
            &self,
            _target: &NodeInfo,
            key: &str,
            value: &[u8],
        ) -> Result<u64, ReplicaError> {
            self.received.lock().unwrap().push(key.to_string());
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_vec(), 999));
            Ok(999)
        }

        async fn remote_get(
            &self,
            _target: &NodeInfo,
            key: &str,
        ) -> Result<Option<(Vec<u8>, u64)>, ReplicaError> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn remote_delete(&self, _target: &NodeInfo, key: &str) -> Result<(), ReplicaError> {
            self.data.lock().unwrap().remove(key);
            Ok(())
        }

        async fn remote_get_all_meta(
            &self,
            _target: &NodeInfo,
        ) -> Result<HashMap<String, u64>, ReplicaError> {
            Ok(self
                .data
                .lock()
                .unwrap()
                .iter()
                .map(|(k, (_v, ts))| (k.clone(), *ts))
                .collect())
        }

        async fn ping(&self, _target: &NodeInfo) -> Result<(), ReplicaError> {
            Ok(())
        }
    }

    async fn storage_with(entries: &[(&str, &[u8])]) -> (Arc<RwLock<Engine>>, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut engine = Engine::open(dir.path(), FsyncPolicy::None).unwrap();
        for (key, value) in entries {
            engine.put(key, value.to_vec()).unwrap();
        }
        (Arc::new(RwLock::new(engine)), dir)
    }

    #[tokio::test]
    async fn test_pull_fetches_missing_keys() {
        let (storage, _dir) = storage_with(&[]).await;
        let handoff = Arc::new(HandoffBuffer::new());
        let peer_node = NodeInfo::with_dummy_addr(NodeId::from("peer"));
        let peer = FakePeer::new(&[("k1", b"v1", 100), ("k2", b"v2", 100)]);

        sync_with(&storage, &handoff, &peer, &peer_node, T).await;

        let engine = storage.read().await;
        assert_eq!(engine.get("k1").unwrap().0, b"v1");
        assert_eq!(engine.get("k2").unwrap().0, b"v2");
    }

    #[tokio::test]
    async fn test_pull_skips_keys_this_node_has_newer() {
        let (storage, _dir) = storage_with(&[("k1", b"local-newer")]).await;
        let handoff = Arc::new(HandoffBuffer::new());
        let peer_node = NodeInfo::with_dummy_addr(NodeId::from("peer"));
        // Peer's copy is ancient: local put stamped a current wall-clock ts.
        let peer = FakePeer::new(&[("k1", b"peer-older", 100)]);

        sync_with(&storage, &handoff, &peer, &peer_node, T).await;

        assert_eq!(storage.read().await.get("k1").unwrap().0, b"local-newer");
    }

    #[tokio::test]
    async fn test_push_sends_missing_keys() {
        let (storage, _dir) = storage_with(&[("k1", b"v1"), ("k2", b"v2")]).await;
        let handoff = Arc::new(HandoffBuffer::new());
        let peer_node = NodeInfo::with_dummy_addr(NodeId::from("peer"));
        let peer = FakePeer::new(&[]);

        sync_with(&storage, &handoff, &peer, &peer_node, T).await;

        let mut received = peer.received.lock().unwrap().clone();
        received.sort();
        assert_eq!(received, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_sync_flushes_hints() {
        let (storage, _dir) = storage_with(&[]).await;
        let handoff = Arc::new(HandoffBuffer::new());
        let peer_node = NodeInfo::with_dummy_addr(NodeId::from("peer"));
        let peer = FakePeer::new(&[]);

        handoff
            .store_hint(
                &peer_node.id,
                "hinted",
                crate::handoff::Mutation::Put(b"hv".to_vec()),
            )
            .await;

        sync_with(&storage, &handoff, &peer, &peer_node, T).await;

        assert_eq!(handoff.pending_for(&peer_node.id).await, 0);
        assert!(peer.received.lock().unwrap().contains(&"hinted".to_string()));
    }

    /// A peer whose metadata RPC fails.
    struct UnreachablePeer;

    #[async_trait::async_trait]
    impl ReplicaClient for UnreachablePeer {
        async fn remote_put(
            &self,
            _target: &NodeInfo,
            _key: &str,
            _value: &[u8],
        ) -> Result<u64, ReplicaError> {
            Err(ReplicaError::RpcFailed("down".into()))
        }

        async fn remote_get(
            &self,
            _target: &NodeInfo,
            _key: &str,
        ) -> Result<Option<(Vec<u8>, u64)>, ReplicaError> {
            Err(ReplicaError::RpcFailed("down".into()))
        }

        async fn remote_delete(&self, _target: &NodeInfo, _key: &str) -> Result<(), ReplicaError> {
            Err(ReplicaError::RpcFailed("down".into()))
        }

        async fn remote_get_all_meta(
            &self,
            _target: &NodeInfo,
        ) -> Result<HashMap<String, u64>, ReplicaError> {
            Err(ReplicaError::RpcFailed("down".into()))
        }

        async fn ping(&self, _target: &NodeInfo) -> Result<(), ReplicaError> {
            Err(ReplicaError::RpcFailed("down".into()))
        }
    }

    #[tokio::test]
    async fn test_sync_with_unreachable_peer_is_noop() {
        let (storage, _dir) = storage_with(&[("k1", b"v1")]).await;
        let handoff = Arc::new(HandoffBuffer::new());
        let peer_node = NodeInfo::with_dummy_addr(NodeId::from("peer"));

        sync_with(&storage, &handoff, &UnreachablePeer, &peer_node, T).await;

        // Local state untouched.
        assert_eq!(storage.read().await.key_count(), 1);
    }
}
