use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::ClusterInfo;
use crate::NodeId;
use crate::PARTITIONS;

pub type PartitionId = u32;

/// Map a key onto one of [`PARTITIONS`] buckets.
///
/// Sums the UTF-16 code units of the key, so every node (and every client
/// library) agrees on the bucket without sharing a hasher.
pub fn partition_of(key: &str) -> PartitionId {
    key.encode_utf16().fold(0u32, |sum, unit| sum.wrapping_add(unit as u32)) & (PARTITIONS - 1)
}

/// Half-open range `[begin, end)` of partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionRange {
    pub begin: PartitionId,
    pub end: PartitionId,
}

impl PartitionRange {
    pub fn new(
        begin: PartitionId,
        end: PartitionId,
    ) -> Self {
        Self { begin, end }
    }

    /// Range covering every partition
    pub fn all() -> Self {
        Self::new(0, PARTITIONS)
    }

    pub fn contains(
        &self,
        part: PartitionId,
    ) -> bool {
        part >= self.begin && part < self.end
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition ranges the master expects each node to own
pub type PartitionAssignment = BTreeMap<NodeId, PartitionRange>;

/// Master-side assignment of the key/value partitions to cluster nodes.
#[derive(Debug, Default, Clone)]
pub struct ClusterPartitioner;

impl ClusterPartitioner {
    pub fn new() -> Self {
        Self
    }

    /// Split `[0, PARTITIONS)` into contiguous ranges over the node ids in
    /// ascending order; the first `PARTITIONS % n` nodes take one extra partition.
    pub fn assign(nodes: &[NodeId]) -> PartitionAssignment {
        let mut ids: Vec<&NodeId> = nodes.iter().collect();
        ids.sort();
        ids.dedup();

        let mut assignment = PartitionAssignment::new();
        if ids.is_empty() {
            return assignment;
        }

        let count = ids.len() as u32;
        let base = PARTITIONS / count;
        let extra = PARTITIONS % count;
        let mut begin = 0;
        for (i, id) in ids.into_iter().enumerate() {
            let len = base + u32::from((i as u32) < extra);
            assignment.insert(id.clone(), PartitionRange::new(begin, begin + len));
            begin += len;
        }
        assignment
    }

    /// Compute the assignment for the current membership.
    ///
    /// Returns `None` when every node already expects exactly its computed range,
    /// so an unchanged cluster is not republished.
    pub fn partition(
        &self,
        info: &ClusterInfo,
    ) -> Option<PartitionAssignment> {
        let ids: Vec<NodeId> = info.nodes.iter().map(|n| n.id.clone()).collect();
        let assignment = Self::assign(&ids);
        let unchanged = info
            .nodes
            .iter()
            .all(|node| node.kv_parts.as_ref() == assignment.get(&node.id));
        if unchanged {
            None
        } else {
            Some(assignment)
        }
    }
}
