//! ringkv-cluster: the distributed coordination core.
//!
//! Provides: the quorum coordinator (fan-out, LWW reconciliation), the
//! hinted-handoff buffer, the anti-entropy reconciler, and the rebalancer
//! that streams keys to new ring members.

pub mod anti_entropy;
pub mod chaos;
pub mod coordinator;
pub mod handoff;
pub mod rebalance;
pub mod replica_client;
