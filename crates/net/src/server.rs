//! gRPC service implementations.
//!
//! Bridges the tonic-generated service traits to the domain logic in the
//! `ring`, `cluster`, and `storage` crates.

use crate::convert;
use ringkv_cluster::coordinator::{Coordinator, KvError};
use ringkv_cluster::handoff::HandoffBuffer;
use ringkv_cluster::replica_client::ReplicaClient;
use ringkv_common::NodeId;
use ringkv_ring::manager::RingManager;
use ringkv_storage::engine::Engine;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Client KV service
// ---------------------------------------------------------------------------

pub struct KvService<R: ReplicaClient> {
    pub coordinator: Arc<Coordinator<R>>,
}

impl<R: ReplicaClient> std::fmt::Debug for KvService<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvService").finish_non_exhaustive()
    }
}

fn kv_error_to_status(e: KvError) -> tonic::Status {
    match e {
        KvError::NotFound => tonic::Status::not_found("key not found"),
        KvError::WriteQuorumNotMet { .. }
        | KvError::ReadQuorumNotMet { .. }
        | KvError::NoReplicas => tonic::Status::unavailable(e.to_string()),
        KvError::Storage(e) => tonic::Status::internal(e.to_string()),
    }
}

#[tonic::async_trait]
impl<R: ReplicaClient> ringkv_proto::kv::kv_service_server::KvService for KvService<R> {
    async fn put(
        &self,
        request: tonic::Request<ringkv_proto::kv::PutRequest>,
    ) -> Result<tonic::Response<ringkv_proto::kv::PutResponse>, tonic::Status> {
        let m = ringkv_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type.with_label_values(&["put"]).inc();
        let _timer = ringkv_metrics::start_kv_timer("put");

        let req = request.into_inner();
        let acks = self
            .coordinator
            .put(&req.key, req.value)
            .await
            .map_err(kv_error_to_status)?;

        Ok(tonic::Response::new(ringkv_proto::kv::PutResponse {
            acks: acks as u32,
        }))
    }

    async fn get(
        &self,
        request: tonic::Request<ringkv_proto::kv::GetRequest>,
    ) -> Result<tonic::Response<ringkv_proto::kv::GetResponse>, tonic::Status> {
        let m = ringkv_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type.with_label_values(&["get"]).inc();
        let _timer = ringkv_metrics::start_kv_timer("get");

        let req = request.into_inner();
        let value = self
            .coordinator
            .get(&req.key)
            .await
            .map_err(kv_error_to_status)?;

        Ok(tonic::Response::new(ringkv_proto::kv::GetResponse {
            value,
        }))
    }

    async fn delete(
        &self,
        request: tonic::Request<ringkv_proto::kv::DeleteRequest>,
    ) -> Result<tonic::Response<ringkv_proto::kv::DeleteResponse>, tonic::Status> {
        let m = ringkv_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type.with_label_values(&["delete"]).inc();
        let _timer = ringkv_metrics::start_kv_timer("delete");

        let req = request.into_inner();
        let acks = self
            .coordinator
            .delete(&req.key)
            .await
            .map_err(kv_error_to_status)?;

        Ok(tonic::Response::new(ringkv_proto::kv::DeleteResponse {
            acks: acks as u32,
        }))
    }
}

// ---------------------------------------------------------------------------
// Replica service
// ---------------------------------------------------------------------------

/// Node-to-node verbs: direct access to the local store.
#[derive(Debug)]
pub struct ReplicaServiceImpl {
    pub storage: Arc<RwLock<Engine>>,
}

#[tonic::async_trait]
impl ringkv_proto::kv::replica_service_server::ReplicaService for ReplicaServiceImpl {
    async fn remote_put(
        &self,
        request: tonic::Request<ringkv_proto::kv::RemotePutRequest>,
    ) -> Result<tonic::Response<ringkv_proto::kv::RemotePutResponse>, tonic::Status> {
        let m = ringkv_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["remote_put"])
            .inc();
        let _timer = ringkv_metrics::start_rpc_timer("remote_put", "inbound");

        let req = request.into_inner();
        let ts_ms = {
            let mut engine = self.storage.write().await;
            engine
                .put(&req.key, req.value)
                .map_err(|e| tonic::Status::internal(e.to_string()))?
        };

        Ok(tonic::Response::new(ringkv_proto::kv::RemotePutResponse {
            ts_ms,
        }))
    }

    async fn remote_get(
        &self,
        request: tonic::Request<ringkv_proto::kv::RemoteGetRequest>,
    ) -> Result<tonic::Response<ringkv_proto::kv::RemoteGetResponse>, tonic::Status> {
        let m = ringkv_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["remote_get"])
            .inc();
        let _timer = ringkv_metrics::start_rpc_timer("remote_get", "inbound");

        let req = request.into_inner();
        let entry = { self.storage.read().await.get(&req.key) };

        let response = match entry {
            Some((value, ts_ms)) => ringkv_proto::kv::RemoteGetResponse {
                found: true,
                value,
                ts_ms,
            },
            None => ringkv_proto::kv::RemoteGetResponse {
                found: false,
                value: Vec::new(),
                ts_ms: 0,
            },
        };
        Ok(tonic::Response::new(response))
    }

    async fn remote_delete(
        &self,
        request: tonic::Request<ringkv_proto::kv::RemoteDeleteRequest>,
    ) -> Result<tonic::Response<ringkv_proto::kv::RemoteDeleteResponse>, tonic::Status> {
        let m = ringkv_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["remote_delete"])
            .inc();
        let _timer = ringkv_metrics::start_rpc_timer("remote_delete", "inbound");

        let req = request.into_inner();
        {
            let mut engine = self.storage.write().await;
            engine
                .delete(&req.key)
                .map_err(|e| tonic::Status::internal(e.to_string()))?;
        }

        Ok(tonic::Response::new(
            ringkv_proto::kv::RemoteDeleteResponse {},
        ))
    }

    async fn remote_get_all_meta(
        &self,
        _request: tonic::Request<ringkv_proto::kv::RemoteGetAllMetaRequest>,
    ) -> Result<tonic::Response<ringkv_proto::kv::RemoteGetAllMetaResponse>, tonic::Status> {
        let m = ringkv_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["remote_get_all_meta"])
            .inc();
        let _timer = ringkv_metrics::start_rpc_timer("remote_get_all_meta", "inbound");

        let meta = { self.storage.read().await.all_meta() };
        Ok(tonic::Response::new(
            ringkv_proto::kv::RemoteGetAllMetaResponse { meta },
        ))
    }

    async fn ping(
        &self,
        _request: tonic::Request<ringkv_proto::kv::PingRequest>,
    ) -> Result<tonic::Response<ringkv_proto::kv::PingResponse>, tonic::Status> {
        let m = ringkv_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type.with_label_values(&["ping"]).inc();

        Ok(tonic::Response::new(ringkv_proto::kv::PingResponse {}))
    }
}

// ---------------------------------------------------------------------------
// Admin service
// ---------------------------------------------------------------------------

/// Membership and introspection.
pub struct AdminService {
    pub ring: Arc<RingManager>,
    pub storage: Arc<RwLock<Engine>>,
    pub handoff: Arc<HandoffBuffer>,
    pub start_time: Instant,
}

impl std::fmt::Debug for AdminService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminService").finish_non_exhaustive()
    }
}

#[tonic::async_trait]
impl ringkv_proto::admin::admin_service_server::AdminService for AdminService {
    async fn add_node(
        &self,
        request: tonic::Request<ringkv_proto::admin::AddNodeRequest>,
    ) -> Result<tonic::Response<ringkv_proto::admin::AddNodeResponse>, tonic::Status> {
        let req = request.into_inner();
        let node = convert::node_info_from_proto(
            req.node
                .as_ref()
                .ok_or_else(|| tonic::Status::invalid_argument("missing node"))?,
        )?;

        self.ring.add_node(node).await;
        Ok(tonic::Response::new(
            ringkv_proto::admin::AddNodeResponse {},
        ))
    }

    async fn remove_node(
        &self,
        request: tonic::Request<ringkv_proto::admin::RemoveNodeRequest>,
    ) -> Result<tonic::Response<ringkv_proto::admin::RemoveNodeResponse>, tonic::Status> {
        let req = request.into_inner();
        if req.node_id.is_empty() {
            return Err(tonic::Status::invalid_argument("missing node id"));
        }

        self.ring.remove_node(&NodeId::from(req.node_id)).await;
        Ok(tonic::Response::new(
            ringkv_proto::admin::RemoveNodeResponse {},
        ))
    }

    async fn list_nodes(
        &self,
        _request: tonic::Request<ringkv_proto::admin::ListNodesRequest>,
    ) -> Result<tonic::Response<ringkv_proto::admin::ListNodesResponse>, tonic::Status> {
        let nodes = self
            .ring
            .list_nodes()
            .await
            .iter()
            .map(convert::node_info_to_proto)
            .collect();

        Ok(tonic::Response::new(
            ringkv_proto::admin::ListNodesResponse { nodes },
        ))
    }

    async fn health(
        &self,
        _request: tonic::Request<ringkv_proto::admin::HealthRequest>,
    ) -> Result<tonic::Response<ringkv_proto::admin::HealthResponse>, tonic::Status> {
        Ok(tonic::Response::new(
            ringkv_proto::admin::HealthResponse {
                node_id: self.ring.local().id.as_str().to_string(),
                uptime_ms: self.start_time.elapsed().as_millis() as u64,
                healthy: true,
            },
        ))
    }

    async fn stats(
        &self,
        _request: tonic::Request<ringkv_proto::admin::StatsRequest>,
    ) -> Result<tonic::Response<ringkv_proto::admin::StatsResponse>, tonic::Status> {
        let key_count = { self.storage.read().await.key_count() as u64 };
        let pending_hints = self.handoff.pending_total().await as u64;
        let snapshot = self.ring.snapshot().await;
        let m = ringkv_metrics::metrics();

        Ok(tonic::Response::new(ringkv_proto::admin::StatsResponse {
            key_count,
            pending_hints,
            ring_nodes: snapshot.len() as u32,
            ring_positions: snapshot.position_count() as u32,
            rpcs_sent: m.rpcs_sent.get(),
            rpcs_received: m.rpcs_received.get(),
        }))
    }
}
