//! Hinted-handoff buffer.
//!
//! Writes that could not reach a replica are parked here, one FIFO queue
//! per target node, and re-delivered when the target is reachable again.
//! Delivery halts at the first failure and new hints append at the tail,
//! so a recovering node observes hinted updates in their original order.

use crate::replica_client::{with_timeout, ReplicaClient};
use ringkv_common::{NodeId, NodeInfo};
use ringkv_storage::record::now_ms;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tokio::time::Duration;

/// A buffered write: a value or a delete marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Put(Vec<u8>),
    Delete,
}

/// One undelivered write destined for a specific node.
#[derive(Debug, Clone)]
pub struct Hint {
    pub key: String,
    pub mutation: Mutation,
    pub enqueued_at_ms: u64,
}

#[derive(Debug, Default)]
struct TargetQueue {
    hints: VecDeque<Hint>,
    /// Set while a flush is draining this queue, so concurrent flushes
    /// cannot interleave deliveries and break FIFO order.
    flushing: bool,
}

/// Per-target FIFO buffer of undelivered hints.
#[derive(Debug, Default)]
pub struct HandoffBuffer {
    queues: Mutex<HashMap<NodeId, TargetQueue>>,
}

impl HandoffBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a write for `target`. Never fails.
    pub async fn store_hint(&self, target: &NodeId, key: &str, mutation: Mutation) {
        let mut queues = self.queues.lock().await;
        queues
            .entry(target.clone())
            .or_default()
            .hints
            .push_back(Hint {
                key: key.to_string(),
                mutation,
                enqueued_at_ms: now_ms(),
            });
        ringkv_metrics::metrics().hints_stored.inc();
    }

    /// Pending hints for one target.
    pub async fn pending_for(&self, target: &NodeId) -> usize {
        let queues = self.queues.lock().await;
        queues.get(target).map_or(0, |q| q.hints.len())
    }

    /// Total pending hints across all targets.
    pub async fn pending_total(&self) -> usize {
        let queues = self.queues.lock().await;
        queues.values().map(|q| q.hints.len()).sum()
    }

    /// Targets with pending hints.
    pub async fn targets(&self) -> Vec<NodeId> {
        let queues = self.queues.lock().await;
        queues
            .iter()
            .filter(|(_, q)| !q.hints.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Deliver hints to `target` in FIFO order. Stops at the first failure,
    /// returning the failed hint to the front of the queue. Returns the
    /// number delivered.
    pub async fn flush<R: ReplicaClient>(
        &self,
        target: &NodeInfo,
        client: &R,
        rpc_timeout: Duration,
    ) -> usize {
        {
            let mut queues = self.queues.lock().await;
            match queues.get_mut(&target.id) {
                Some(q) if !q.flushing && !q.hints.is_empty() => q.flushing = true,
                _ => return 0,
            }
        }

        let mut delivered = 0usize;
        loop {
            let hint = {
                let mut queues = self.queues.lock().await;
                queues.get_mut(&target.id).and_then(|q| q.hints.pop_front())
            };
            let Some(hint) = hint else { break };

            let result = match &hint.mutation {
                Mutation::Put(value) => {
                    with_timeout(rpc_timeout, client.remote_put(target, &hint.key, value))
                        .await
                        .map(|_ts| ())
                }
                Mutation::Delete => {
                    with_timeout(rpc_timeout, client.remote_delete(target, &hint.key)).await
                }
            };

            match result {
                Ok(()) => {
                    delivered += 1;
                    ringkv_metrics::metrics().hints_delivered.inc();
                    tracing::debug!("delivered hint for '{}' to {}", hint.key, target.id);
                }
                Err(e) => {
                    tracing::debug!(
                        "hint delivery to {} failed at '{}': {}, will retry later",
                        target.id,
                        hint.key,
                        e
                    );
                    let mut queues = self.queues.lock().await;
                    queues
                        .entry(target.id.clone())
                        .or_default()
                        .hints
                        .push_front(hint);
                    break;
                }
            }
        }

        let mut queues = self.queues.lock().await;
        if let Some(q) = queues.get_mut(&target.id) {
            q.flushing = false;
            if q.hints.is_empty() {
                queues.remove(&target.id);
            }
        }

        delivered
    }
}
