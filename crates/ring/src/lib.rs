//! ringkv-ring: consistent hashing and ring membership.
//!
//! [`ring::HashRing`] is the pure data structure: vnode positions mapping
//! keys to ordered replica lists. [`manager::RingManager`] owns the current
//! snapshot, serializes membership changes, and notifies a
//! [`manager::TopologyListener`] (the rebalancer) off the update path.

pub mod manager;
pub mod ring;
