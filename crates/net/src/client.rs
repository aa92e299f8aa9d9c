//! gRPC client implementing [`ReplicaClient`].
//!
//! `GrpcReplicaClient` connects to remote nodes via tonic and translates
//! between proto types and the domain `ReplicaClient` contract. Channels
//! are pooled per node id and reused across RPCs.

use ringkv_cluster::replica_client::{ReplicaClient, ReplicaError};
use ringkv_common::{NodeId, NodeInfo};
use ringkv_proto::kv::replica_service_client::ReplicaServiceClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tonic::transport::Channel;

/// A gRPC-based replica transport with a per-node channel pool.
#[derive(Debug, Default)]
pub struct GrpcReplicaClient {
    channels: Arc<RwLock<HashMap<NodeId, Channel>>>,
}

impl GrpcReplicaClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_channel(&self, target: &NodeInfo) -> Result<Channel, ReplicaError> {
        // Check cache first
        {
            let cache = self.channels.read().await;
            if let Some(channel) = cache.get(&target.id) {
                return Ok(channel.clone());
            }
        }

        // Create a new connection
        let endpoint = format!("http://{}", target.addr);
        let channel = Channel::from_shared(endpoint)
            .map_err(|e| ReplicaError::RpcFailed(format!("invalid endpoint: {}", e)))?
            .connect()
            .await
            .map_err(|e| ReplicaError::RpcFailed(format!("connect failed: {}", e)))?;

        // Cache it
        {
            let mut cache = self.channels.write().await;
            cache.insert(target.id.clone(), channel.clone());
        }

        Ok(channel)
    }

    /// Drop the cached channel for a node (e.g. after its address changed).
    pub async fn evict(&self, id: &NodeId) {
        self.channels.write().await.remove(id);
    }
}

#[async_trait::async_trait]
impl ReplicaClient for GrpcReplicaClient {
    async fn remote_put(
        &self,
        target: &NodeInfo,
        key: &str,
        value: &[u8],
    ) -> Result<u64, ReplicaError> {
        let m = ringkv_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type.with_label_values(&["remote_put"]).inc();
        let _timer = ringkv_metrics::start_rpc_timer("remote_put", "outbound");

        let channel = self.get_channel(target).await?;
        let mut client = ReplicaServiceClient::new(channel);

        let response = client
            .remote_put(ringkv_proto::kv::RemotePutRequest {
                key: key.to_string(),
                value: value.to_vec(),
            })
            .await
            .map_err(|e| ReplicaError::RpcFailed(e.message().to_string()))?;

        Ok(response.into_inner().ts_ms)
    }

    async fn remote_get(
        &self,
        target: &NodeInfo,
        key: &str,
    ) -> Result<Option<(Vec<u8>, u64)>, ReplicaError> {
        let m = ringkv_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type.with_label_values(&["remote_get"]).inc();
        let _timer = ringkv_metrics::start_rpc_timer("remote_get", "outbound");

        let channel = self.get_channel(target).await?;
        let mut client = ReplicaServiceClient::new(channel);

        let response = client
            .remote_get(ringkv_proto::kv::RemoteGetRequest {
                key: key.to_string(),
            })
            .await
            .map_err(|e| ReplicaError::RpcFailed(e.message().to_string()))?
            .into_inner();

        if response.found {
            Ok(Some((response.value, response.ts_ms)))
        } else {
            Ok(None)
        }
    }

    async fn remote_delete(&self, target: &NodeInfo, key: &str) -> Result<(), ReplicaError> {
        let m = ringkv_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type
            .with_label_values(&["remote_delete"])
            .inc();
        let _timer = ringkv_metrics::start_rpc_timer("remote_delete", "outbound");

        let channel = self.get_channel(target).await?;
        let mut client = ReplicaServiceClient::new(channel);

        client
            .remote_delete(ringkv_proto::kv::RemoteDeleteRequest {
                key: key.to_string(),
            })
            .await
            .map_err(|e| ReplicaError::RpcFailed(e.message().to_string()))?;

        Ok(())
    }

    async fn remote_get_all_meta(
        &self,
        target: &NodeInfo,
    ) -> Result<HashMap<String, u64>, ReplicaError> {
        let m = ringkv_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type
            .with_label_values(&["remote_get_all_meta"])
            .inc();
        let _timer = ringkv_metrics::start_rpc_timer("remote_get_all_meta", "outbound");

        let channel = self.get_channel(target).await?;
        let mut client = ReplicaServiceClient::new(channel);

        let response = client
            .remote_get_all_meta(ringkv_proto::kv::RemoteGetAllMetaRequest {})
            .await
            .map_err(|e| ReplicaError::RpcFailed(e.message().to_string()))?;

        Ok(response.into_inner().meta)
    }

    async fn ping(&self, target: &NodeInfo) -> Result<(), ReplicaError> {
        let m = ringkv_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type.with_label_values(&["ping"]).inc();
        let _timer = ringkv_metrics::start_rpc_timer("ping", "outbound");

        let channel = self.get_channel(target).await?;
        let mut client = ReplicaServiceClient::new(channel);

        client
            .ping(ringkv_proto::kv::PingRequest {})
            .await
            .map_err(|e| ReplicaError::RpcFailed(e.message().to_string()))?;

        Ok(())
    }
}
