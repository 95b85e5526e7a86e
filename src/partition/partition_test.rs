use super::*;
use crate::ClusterInfo;
use crate::ClusterNode;
use crate::PARTITIONS;

fn node(
    id: &str,
    range: Option<(u32, u32)>,
) -> ClusterNode {
    ClusterNode {
        id: id.to_string(),
        kv_parts: range.map(|(b, e)| PartitionRange::new(b, e)),
    }
}

fn two_node_cluster() -> ClusterInfo {
    ClusterInfo {
        local_id: "n1".to_string(),
        nodes: vec![node("n1", Some((0, 2048))), node("n2", Some((2048, 4096)))],
    }
}

#[test]
fn test_partition_of_sums_code_units() {
    assert_eq!(partition_of(""), 0);
    assert_eq!(partition_of("a"), 97);
    assert_eq!(partition_of("ab"), 97 + 98);
    // Same characters in another order land in the same bucket
    assert_eq!(partition_of("ab"), partition_of("ba"));
}

#[test]
fn test_partition_of_wraps_at_partition_count() {
    // 'é' is one UTF-16 unit (0xE9); 18 of them sum to 4194 = 4096 + 98
    let key: String = std::iter::repeat('\u{e9}').take(18).collect();
    assert_eq!(partition_of(&key), 98);
    assert!(partition_of(&"z".repeat(1000)) < PARTITIONS);
}

#[test]
fn test_partition_range_is_half_open() {
    let range = PartitionRange::new(10, 20);
    assert!(range.contains(10));
    assert!(range.contains(19));
    assert!(!range.contains(20));
    assert!(!range.contains(9));
    assert_eq!(range.len(), 10);
    assert!(PartitionRange::new(5, 5).is_empty());
}

#[test]
fn test_assign_splits_all_partitions_contiguously() {
    let nodes = vec!["n3".to_string(), "n1".to_string(), "n2".to_string()];
    let assignment = ClusterPartitioner::assign(&nodes);

    assert_eq!(assignment.len(), 3);
    // 4096 = 3 * 1365 + 1: the first node absorbs the remainder
    assert_eq!(assignment["n1"], PartitionRange::new(0, 1366));
    assert_eq!(assignment["n2"], PartitionRange::new(1366, 2731));
    assert_eq!(assignment["n3"], PartitionRange::new(2731, PARTITIONS));
}

#[test]
fn test_partition_returns_none_when_expectations_match() {
    let partitioner = ClusterPartitioner::new();

    assert_eq!(partitioner.partition(&two_node_cluster()), None);

    let mut grown = two_node_cluster();
    grown.nodes.push(node("n3", None));
    let assignment = partitioner.partition(&grown).expect("membership changed");
    assert_eq!(assignment.len(), 3);
}

#[test]
fn test_partition_map_finds_owner() {
    let map = PartitionMap::from_cluster(&two_node_cluster());

    assert_eq!(map.find(0).map(String::as_str), Some("n1"));
    assert_eq!(map.find(2047).map(String::as_str), Some("n1"));
    assert_eq!(map.find(2048).map(String::as_str), Some("n2"));
    assert_eq!(map.find(4095).map(String::as_str), Some("n2"));
    assert_eq!(map.find(4096), None);
}

#[test]
fn test_partition_map_leaves_gaps_unowned() {
    let info = ClusterInfo {
        local_id: "n1".to_string(),
        nodes: vec![node("n1", Some((100, 200))), node("n2", None)],
    };
    let map = PartitionMap::from_cluster(&info);

    assert_eq!(map.find(50), None);
    assert_eq!(map.find(150).map(String::as_str), Some("n1"));
    assert_eq!(map.find(250), None);
}

#[test]
fn test_mapper_groups_unmapped_keys_by_owner() {
    let mut mapper = PartitionMapper::new();
    mapper.add("a".to_string(), 1); // partition 97
    mapper.add("\u{fff}".to_string(), 2); // partition 4095

    assert_eq!(mapper.unmapped_by_nodes().unmapped, vec!["a", "\u{fff}"]);

    mapper.cluster_update(&two_node_cluster());
    let pending = mapper.unmapped_by_nodes();
    assert!(pending.unmapped.is_empty());
    assert_eq!(pending.nodes["n1"], vec!["a"]);
    assert_eq!(pending.nodes["n2"], vec!["\u{fff}"]);

    mapper.mark_mapped(&["a".to_string()]);
    assert!(mapper.is_mapped("a"));
    assert!(!mapper.unmapped_by_nodes().nodes.contains_key("n1"));
}

#[test]
fn test_mapper_add_requeues_entry() {
    let mut mapper = PartitionMapper::new();
    mapper.cluster_update(&two_node_cluster());
    mapper.add("a".to_string(), 1);
    mapper.mark_mapped(&["a".to_string()]);

    mapper.add("a".to_string(), 2);

    assert!(!mapper.is_mapped("a"));
    assert_eq!(mapper.get("a"), Some(&2));
}

#[test]
fn test_mapper_remap_marks_delivered_entries() {
    let mut mapper = PartitionMapper::new();
    mapper.cluster_update(&two_node_cluster());
    mapper.add("a".to_string(), 1);
    mapper.add("\u{fff}".to_string(), 2);

    let mut delivered = Vec::new();
    mapper.remap(|node, entries| {
        delivered.push((node.clone(), entries.len()));
        node == "n1"
    });

    assert_eq!(delivered, vec![("n1".to_string(), 1), ("n2".to_string(), 1)]);
    assert!(mapper.is_mapped("a"));
    assert!(!mapper.is_mapped("\u{fff}"));
}

#[test]
fn test_mapper_cluster_update_unmaps_moved_partitions() {
    let mut mapper = PartitionMapper::new();
    mapper.cluster_update(&two_node_cluster());
    mapper.add("a".to_string(), 1); // partition 97, owned by n1
    mapper.add("\u{fff}".to_string(), 2); // partition 4095, owned by n2
    mapper.mark_mapped(&["a".to_string(), "\u{fff}".to_string()]);

    // n1 hands partition 97 over to n2, n2 keeps 4095
    let moved = ClusterInfo {
        local_id: "n1".to_string(),
        nodes: vec![node("n1", Some((0, 50))), node("n2", Some((50, 4096)))],
    };
    mapper.cluster_update(&moved);

    assert!(!mapper.is_mapped("a"));
    assert!(mapper.is_mapped("\u{fff}"));
    assert_eq!(mapper.unmapped_by_nodes().nodes["n2"], vec!["a"]);
}
