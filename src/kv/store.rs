use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde_json::Value as JsonValue;

use crate::NodeId;
use crate::PartitionId;
use crate::PartitionRange;

/// Authoritative entry of one key held by its owning node
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub key: String,
    pub value: Option<JsonValue>,
    pub expire_in: Option<u64>,
    /// Remote nodes to notify on change
    pub watchers: BTreeSet<NodeId>,
}

impl Value {
    fn new(key: String) -> Self {
        Self {
            key,
            value: None,
            expire_in: None,
            watchers: BTreeSet::new(),
        }
    }
}

/// Server-side values grouped by partition, so a partition hand-off drops
/// whole groups at once.
#[derive(Debug, Default, Clone)]
pub struct KeyValueStore {
    parts: BTreeMap<PartitionId, BTreeMap<String, Value>>,
}

impl KeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing entry of `key`, or a fresh empty one
    pub fn add_value(
        &mut self,
        key: &str,
        part: PartitionId,
    ) -> &mut Value {
        self.parts
            .entry(part)
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| Value::new(key.to_string()))
    }

    pub fn get(
        &self,
        key: &str,
        part: PartitionId,
    ) -> Option<&Value> {
        self.parts.get(&part).and_then(|values| values.get(key))
    }

    pub fn get_mut(
        &mut self,
        key: &str,
        part: PartitionId,
    ) -> Option<&mut Value> {
        self.parts.get_mut(&part).and_then(|values| values.get_mut(key))
    }

    /// Keep only the partitions inside `range`; `None` clears everything.
    /// Returns the number of values dropped.
    pub fn retain_range(
        &mut self,
        range: Option<PartitionRange>,
    ) -> usize {
        let mut purged = 0;
        self.parts.retain(|part, values| {
            let keep = range.is_some_and(|r| r.contains(*part));
            if !keep {
                purged += values.len();
            }
            keep
        });
        purged
    }

    pub fn len(&self) -> usize {
        self.parts.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
