use crate::ClusterInfo;
use crate::NodeId;
use crate::PartitionId;
use crate::PartitionRange;

/// Partition → owning node lookup built from one cluster snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionMap {
    /// Sorted by range start
    ranges: Vec<(PartitionRange, NodeId)>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the expected key/value ranges of every node in the snapshot.
    /// Nodes without an expectation own nothing yet.
    pub fn from_cluster(info: &ClusterInfo) -> Self {
        let mut ranges: Vec<(PartitionRange, NodeId)> = info
            .nodes
            .iter()
            .filter_map(|node| {
                node.kv_parts
                    .filter(|range| !range.is_empty())
                    .map(|range| (range, node.id.clone()))
            })
            .collect();
        ranges.sort_by_key(|(range, _)| range.begin);
        Self { ranges }
    }

    pub fn find(
        &self,
        part: PartitionId,
    ) -> Option<&NodeId> {
        // ranges are sorted by begin; the candidate is the last range starting at or before `part`
        let idx = self.ranges.partition_point(|(range, _)| range.begin <= part);
        if idx == 0 {
            return None;
        }
        let (range, node) = &self.ranges[idx - 1];
        range.contains(part).then_some(node)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
