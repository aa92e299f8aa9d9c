//! Abstraction over node-to-node replica RPCs.
//!
//! A trait in the domain crate with the gRPC implementation in
//! `ringkv-net`; unit tests use mocks, cluster tests use an in-memory
//! registry client.

use ringkv_common::NodeInfo;
use std::collections::HashMap;
use std::future::Future;
use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("RPC failed: {0}")]
    RpcFailed(String),
    #[error("RPC timed out")]
    Timeout,
}

/// Transport for the five inter-node verbs.
#[async_trait::async_trait]
pub trait ReplicaClient: Send + Sync + 'static {
    /// Write a value on the target's local store. Returns the timestamp the
    /// target assigned.
    async fn remote_put(
        &self,
        target: &NodeInfo,
        key: &str,
        value: &[u8],
    ) -> Result<u64, ReplicaError>;

    /// Read a key from the target's local store.
    async fn remote_get(
        &self,
        target: &NodeInfo,
        key: &str,
    ) -> Result<Option<(Vec<u8>, u64)>, ReplicaError>;

    /// Delete a key on the target's local store.
    async fn remote_delete(&self, target: &NodeInfo, key: &str) -> Result<(), ReplicaError>;

    /// Fetch the target's `key -> ts` map.
    async fn remote_get_all_meta(
        &self,
        target: &NodeInfo,
    ) -> Result<HashMap<String, u64>, ReplicaError>;

    /// Liveness probe.
    async fn ping(&self, target: &NodeInfo) -> Result<(), ReplicaError>;
}

/// Bound an RPC future by the per-RPC deadline. Elapsing counts as a
/// transport failure.
pub async fn with_timeout<T, F>(deadline: Duration, fut: F) -> Result<T, ReplicaError>
where
    F: Future<Output = Result<T, ReplicaError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ReplicaError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, ReplicaError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ReplicaError>(())
        })
        .await;
        assert!(matches!(result, Err(ReplicaError::Timeout)));
    }
}
