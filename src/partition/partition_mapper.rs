use std::collections::BTreeMap;

use crate::partition_of;
use crate::ClusterInfo;
use crate::NodeId;
use crate::PartitionId;
use crate::PartitionMap;

#[derive(Debug, Clone)]
struct MappedEntry<V> {
    part: PartitionId,
    value: V,
    /// Node this entry was last delivered to; `None` while it still has to be sent
    mapped_to: Option<NodeId>,
}

/// Keys that still have to be delivered to their partition owners
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnmappedKeys {
    /// Owner node → keys to send it
    pub nodes: BTreeMap<NodeId, Vec<String>>,
    /// Keys whose partition currently has no owner
    pub unmapped: Vec<String>,
}

/// Keyed entries routed to the node that owns each key's partition.
///
/// An entry is *unmapped* until it has been delivered to the current owner of
/// its partition. Replacing an entry or moving its partition to another node
/// makes it unmapped again.
#[derive(Debug, Clone)]
pub struct PartitionMapper<V> {
    entries: BTreeMap<String, MappedEntry<V>>,
    map: PartitionMap,
}

impl<V> Default for PartitionMapper<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            map: PartitionMap::new(),
        }
    }
}

impl<V> PartitionMapper<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry; it is (re)queued for delivery
    pub fn add(
        &mut self,
        key: String,
        value: V,
    ) {
        let part = partition_of(&key);
        self.entries.insert(
            key,
            MappedEntry {
                part,
                value,
                mapped_to: None,
            },
        );
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&V> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn get_mut(
        &mut self,
        key: &str,
    ) -> Option<&mut V> {
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    pub fn remove(
        &mut self,
        key: &str,
    ) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn owner_of(
        &self,
        part: PartitionId,
    ) -> Option<&NodeId> {
        self.map.find(part)
    }

    pub fn is_mapped(
        &self,
        key: &str,
    ) -> bool {
        self.entries.get(key).is_some_and(|e| e.mapped_to.is_some())
    }

    /// Record that the current owners acknowledged these keys
    pub fn mark_mapped<'a, I>(
        &mut self,
        keys: I,
    ) where
        I: IntoIterator<Item = &'a String>,
    {
        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.mapped_to = self.map.find(entry.part).cloned();
            }
        }
    }

    /// Group the undelivered keys by owner
    pub fn unmapped_by_nodes(&self) -> UnmappedKeys {
        let mut result = UnmappedKeys::default();
        for (key, entry) in self.entries.iter().filter(|(_, e)| e.mapped_to.is_none()) {
            match self.map.find(entry.part) {
                Some(node) => result.nodes.entry(node.clone()).or_default().push(key.clone()),
                None => result.unmapped.push(key.clone()),
            }
        }
        result
    }

    /// Hand the undelivered entries of every known owner to `deliver`.
    /// Entries are marked mapped when `deliver` reports success.
    pub fn remap<F>(
        &mut self,
        mut deliver: F,
    ) where
        F: FnMut(&NodeId, Vec<(&String, &V)>) -> bool,
    {
        let UnmappedKeys { nodes, .. } = self.unmapped_by_nodes();
        for (node, keys) in nodes {
            let batch: Vec<(&String, &V)> = keys
                .iter()
                .filter_map(|k| self.entries.get_key_value(k).map(|(k, e)| (k, &e.value)))
                .collect();
            if deliver(&node, batch) {
                for key in &keys {
                    if let Some(entry) = self.entries.get_mut(key) {
                        entry.mapped_to = Some(node.clone());
                    }
                }
            }
        }
    }

    /// Adopt the ownership of a new cluster snapshot. Entries whose owner
    /// changed are queued for delivery to the new owner.
    pub fn cluster_update(
        &mut self,
        info: &ClusterInfo,
    ) {
        self.map = PartitionMap::from_cluster(info);
        for entry in self.entries.values_mut() {
            if entry.mapped_to.as_ref() != self.map.find(entry.part) {
                entry.mapped_to = None;
            }
        }
    }
}
