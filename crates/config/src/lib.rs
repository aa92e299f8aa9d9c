//! Configuration schema and loader for ringkv nodes.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's listen address.
    pub listen: SocketAddr,

    /// Stable node identifier. Defaults to the listen address string, which
    /// is stable across restarts as long as the address is.
    #[serde(default)]
    pub node_id: Option<String>,

    /// Hash ring settings.
    #[serde(default)]
    pub ring: RingConfig,

    /// Replication / quorum settings.
    #[serde(default)]
    pub kv: KvConfig,

    /// Anti-entropy and hinted-handoff settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Peers added to the ring after startup.
    #[serde(default)]
    pub seeds: Vec<SeedPeer>,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// A seed peer: identity plus dialable address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedPeer {
    pub id: String,
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    /// Virtual nodes per physical node.
    #[serde(default = "default_vnode_count")]
    pub vnode_count: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            vnode_count: default_vnode_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// Replication factor (N).
    #[serde(default = "default_replication")]
    pub replication: usize,

    /// Write quorum (W): acks required for a successful write or delete.
    #[serde(default = "default_quorum")]
    pub write_quorum: usize,

    /// Read quorum (R): responses required for a successful read.
    #[serde(default = "default_quorum")]
    pub read_quorum: usize,

    /// Per-RPC deadline in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Quorum-wait deadline in milliseconds.
    #[serde(default = "default_aggregate_timeout_ms")]
    pub aggregate_timeout_ms: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            replication: default_replication(),
            write_quorum: default_quorum(),
            read_quorum: default_quorum(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            aggregate_timeout_ms: default_aggregate_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Anti-entropy tick period in milliseconds.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// Reserved: hints currently never expire.
    #[serde(default = "default_handoff_ttl_ms")]
    pub handoff_ttl_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: default_sync_interval_ms(),
            handoff_ttl_ms: default_handoff_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the WAL and data files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fsync policy: "always", "batch", "none".
    #[serde(default = "default_fsync")]
    pub fsync: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fsync: default_fsync(),
        }
    }
}

// --- Defaults ---

fn default_vnode_count() -> u32 {
    128
}
fn default_replication() -> usize {
    3
}
fn default_quorum() -> usize {
    2
}
fn default_rpc_timeout_ms() -> u64 {
    5000
}
fn default_aggregate_timeout_ms() -> u64 {
    6000
}
fn default_sync_interval_ms() -> u64 {
    30_000
}
fn default_handoff_ttl_ms() -> u64 {
    60_000
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_fsync() -> String {
    "batch".to_string()
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl NodeConfig {
    /// The effective node id: configured, or derived from the listen address.
    pub fn effective_node_id(&self) -> String {
        self.node_id
            .clone()
            .unwrap_or_else(|| self.listen.to_string())
    }

    /// Validate that configuration values are consistent. A node with an
    /// invalid config must refuse to serve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring.vnode_count == 0 {
            return Err(ConfigError::Invalid("ring.vnode_count must be >= 1".into()));
        }
        if self.kv.replication == 0 {
            return Err(ConfigError::Invalid("kv.replication must be > 0".into()));
        }
        if self.kv.write_quorum == 0 || self.kv.write_quorum > self.kv.replication {
            return Err(ConfigError::Invalid(format!(
                "kv.write_quorum ({}) must be in 1..=kv.replication ({})",
                self.kv.write_quorum, self.kv.replication
            )));
        }
        if self.kv.read_quorum == 0 || self.kv.read_quorum > self.kv.replication {
            return Err(ConfigError::Invalid(format!(
                "kv.read_quorum ({}) must be in 1..=kv.replication ({})",
                self.kv.read_quorum, self.kv.replication
            )));
        }
        Ok(())
    }
}

/// Load a `NodeConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<NodeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: NodeConfig = serde_yaml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

/// Load a `NodeConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    let config: NodeConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
