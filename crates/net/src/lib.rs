//! gRPC networking layer for ringkv.
//!
//! Provides:
//! - `GrpcReplicaClient`: implements `ReplicaClient` over tonic
//! - `KvService`: bridges the client KV proto to the `Coordinator`
//! - `ReplicaServiceImpl`: bridges the replica proto to direct storage access
//! - `AdminService`: membership changes, health checks, stats
//! - `build_server`: assembles all services into a tonic `Router`

pub mod client;
pub mod convert;
pub mod server;

pub use client::GrpcReplicaClient;
pub use server::{AdminService, KvService, ReplicaServiceImpl};

use ringkv_cluster::coordinator::Coordinator;
use ringkv_cluster::handoff::HandoffBuffer;
use ringkv_ring::manager::RingManager;
use ringkv_storage::engine::Engine;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Build a tonic `Router` with all gRPC services.
pub fn build_server(
    coordinator: Arc<Coordinator<GrpcReplicaClient>>,
    ring: Arc<RingManager>,
    storage: Arc<RwLock<Engine>>,
    handoff: Arc<HandoffBuffer>,
) -> tonic::transport::server::Router {
    let kv_svc = KvService { coordinator };
    let replica_svc = ReplicaServiceImpl {
        storage: storage.clone(),
    };
    let admin_svc = AdminService {
        ring,
        storage,
        handoff,
        start_time: Instant::now(),
    };

    tonic::transport::Server::builder()
        .add_service(ringkv_proto::kv::kv_service_server::KvServiceServer::new(
            kv_svc,
        ))
        .add_service(
            ringkv_proto::kv::replica_service_server::ReplicaServiceServer::new(replica_svc),
        )
        .add_service(ringkv_proto::admin::admin_service_server::AdminServiceServer::new(admin_svc))
}
