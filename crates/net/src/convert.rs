//! Conversions between proto types and domain types.

use ringkv_common::{NodeId, NodeInfo};
use ringkv_proto::common as pb;
use std::net::SocketAddr;

pub fn node_info_to_proto(info: &NodeInfo) -> pb::NodeInfo {
    pb::NodeInfo {
        id: info.id.as_str().to_string(),
        address: info.addr.to_string(),
    }
}

pub fn node_info_from_proto(proto: &pb::NodeInfo) -> Result<NodeInfo, tonic::Status> {
    if proto.id.is_empty() {
        return Err(tonic::Status::invalid_argument("missing node id"));
    }
    let addr: SocketAddr = proto
        .address
        .parse()
        .map_err(|e| tonic::Status::invalid_argument(format!("invalid address: {}", e)))?;
    Ok(NodeInfo::new(NodeId::from(proto.id.as_str()), addr))
}
