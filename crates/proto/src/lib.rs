//! Generated gRPC code for the ringkv protobuf definitions.

/// Common types (NodeInfo).
pub mod common {
    tonic::include_proto!("ringkv.common");
}

/// Client KV service (Put, Get, Delete) and node-to-node Replica service.
pub mod kv {
    tonic::include_proto!("ringkv.kv");
}

/// Admin service (AddNode, RemoveNode, ListNodes, Health, Stats).
pub mod admin {
    tonic::include_proto!("ringkv.admin");
}
