use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::partition_of;
use crate::ClientId;
use crate::PartitionId;

/// Local interest in one remote key
#[derive(Debug, Clone, PartialEq)]
pub struct Watcher {
    pub key: String,
    pub part: PartitionId,
    /// Last value pushed by the owning node
    pub value: Option<JsonValue>,
}

impl Watcher {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            part: partition_of(key),
            value: None,
        }
    }
}

/// Value a local client keeps published to the owning node
#[derive(Debug, Clone, PartialEq)]
pub struct Publisher {
    pub value: JsonValue,
    pub expire_in: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOptions {
    /// Keep the value published across ownership changes
    #[serde(default)]
    pub publisher: bool,
    #[serde(default)]
    pub expire_in: Option<u64>,
}

/// Key change to deliver to local clients (`kv.changed`)
#[derive(Debug, Clone, PartialEq)]
pub struct KvNotification {
    pub key: String,
    pub value: JsonValue,
    pub clients: Vec<ClientId>,
}
