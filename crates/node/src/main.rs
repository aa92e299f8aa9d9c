//! ringkv-node: entry point for a ringkv cluster node.
//!
//! Loads config, opens the storage engine, builds the ring manager (seeded
//! with the local node only), wires the coordinator, rebalancer, handoff
//! buffer, and anti-entropy reconciler, then serves all gRPC services on
//! the configured listen address.

use ringkv_cluster::anti_entropy::{spawn_anti_entropy_task, AntiEntropyConfig};
use ringkv_cluster::coordinator::{Coordinator, CoordinatorConfig};
use ringkv_cluster::handoff::HandoffBuffer;
use ringkv_cluster::rebalance::Rebalancer;
use ringkv_common::{NodeId, NodeInfo};
use ringkv_net::{build_server, GrpcReplicaClient};
use ringkv_ring::manager::RingManager;
use ringkv_storage::engine::Engine;
use ringkv_storage::wal::FsyncPolicy;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ringkv_metrics::init_tracing();

    // Load config: first CLI arg is the YAML config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    // A missing file falls back to defaults; an invalid config is fatal.
    let config = match ringkv_config::load_from_file(std::path::Path::new(&config_path)) {
        Ok(config) => config,
        Err(ringkv_config::ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("config file {} not found, using defaults", config_path);
            // Minimal default: listen on 127.0.0.1:7000
            ringkv_config::load_from_str("listen: \"127.0.0.1:7000\"\n")
                .expect("hardcoded default config must parse")
        }
        Err(e) => {
            tracing::error!("refusing to start: {}", e);
            return Err(e.into());
        }
    };

    let node_id = NodeId::from(config.effective_node_id());
    let local_info = NodeInfo::new(node_id, config.listen);
    tracing::info!("node {} listening on {}", local_info.id, config.listen);

    // Open storage engine
    let fsync = FsyncPolicy::from_str_config(&config.storage.fsync);
    let engine = Engine::open(&config.storage.data_dir, fsync)?;
    let storage = Arc::new(RwLock::new(engine));

    // Ring manager: starts with the local node only
    let ring = Arc::new(RingManager::new(local_info.clone(), config.ring.vnode_count));

    // Replica client (shared channel pool) and handoff buffer
    let replica_client = Arc::new(GrpcReplicaClient::new());
    let handoff = Arc::new(HandoffBuffer::new());

    let rpc_timeout = Duration::from_millis(config.kv.rpc_timeout_ms);

    // Rebalancer reacts to topology changes
    let rebalancer = Arc::new(Rebalancer::new(
        local_info.clone(),
        storage.clone(),
        replica_client.clone(),
        rpc_timeout,
    ));
    ring.set_listener(rebalancer);

    // Coordinator for client operations
    let coordinator_config = CoordinatorConfig {
        replication: config.kv.replication,
        write_quorum: config.kv.write_quorum,
        read_quorum: config.kv.read_quorum,
        rpc_timeout,
        aggregate_timeout: Duration::from_millis(config.kv.aggregate_timeout_ms),
    };
    let coordinator = Arc::new(Coordinator::new(
        ring.clone(),
        storage.clone(),
        handoff.clone(),
        replica_client.clone(),
        coordinator_config,
    ));

    // Build gRPC server
    let router = build_server(
        coordinator,
        ring.clone(),
        storage.clone(),
        handoff.clone(),
    );

    // Spawn the anti-entropy reconciler
    spawn_anti_entropy_task(
        ring.clone(),
        storage,
        handoff,
        replica_client,
        AntiEntropyConfig {
            sync_interval: Duration::from_millis(config.sync.sync_interval_ms),
            rpc_timeout,
        },
    );

    // Spawn metrics HTTP server if configured
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr: std::net::SocketAddr = format!("0.0.0.0:{}", metrics_port)
            .parse()
            .expect("valid metrics address");
        tokio::spawn(async move {
            if let Err(e) = ringkv_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    // Add seed peers to the ring (in background after the server starts)
    let ring_seeds = ring.clone();
    let seeds = config.seeds.clone();
    tokio::spawn(async move {
        if seeds.is_empty() {
            tracing::info!("no seeds configured, running as standalone node");
            return;
        }

        tracing::info!("joining {} seed peer(s) into the ring...", seeds.len());
        for seed in seeds {
            match seed.addr.parse() {
                Ok(addr) => {
                    ring_seeds
                        .add_node(NodeInfo::new(NodeId::from(seed.id), addr))
                        .await;
                }
                Err(e) => {
                    tracing::warn!("invalid seed address '{}': {}", seed.addr, e);
                }
            }
        }
    });

    // Serve with graceful shutdown on Ctrl+C
    tracing::info!("serving gRPC on {}", config.listen);
    tokio::select! {
        result = router.serve(config.listen) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
