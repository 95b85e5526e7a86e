use serde::Deserialize;
use serde::Serialize;

use crate::PartitionRange;

pub type NodeId = String;

/// Role the connector reports for the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    Master,
    Member,
}

/// One node of a membership snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: NodeId,
    /// Key/value partitions the master expects this node to own
    #[serde(default)]
    pub kv_parts: Option<PartitionRange>,
}

/// Membership snapshot delivered on every cluster change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub local_id: NodeId,
    pub nodes: Vec<ClusterNode>,
}

impl ClusterInfo {
    /// Partitions the local node is expected to own, if any
    pub fn local_parts(&self) -> Option<PartitionRange> {
        self.nodes.iter().find(|n| n.id == self.local_id).and_then(|n| n.kv_parts)
    }
}
