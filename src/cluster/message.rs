use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::Result;
use crate::KV_EVENT_PREFIX;

/// Envelope of every message exchanged over the cluster fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMessage {
    pub event: String,
    #[serde(default)]
    pub data: JsonValue,
}

/// Body of `cubes.kv.watch`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unwatch: Vec<String>,
}

/// One published value inside `cubes.kv.update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedValue {
    pub value: JsonValue,
    #[serde(rename = "expireIn", default, skip_serializing_if = "Option::is_none")]
    pub expire_in: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvMessageKind {
    Watch,
    Update,
    Changed,
}

impl KvMessageKind {
    pub fn event(self) -> &'static str {
        match self {
            KvMessageKind::Watch => "cubes.kv.watch",
            KvMessageKind::Update => "cubes.kv.update",
            KvMessageKind::Changed => "cubes.kv.changed",
        }
    }

    pub fn as_str(self) -> &'static str {
        &self.event()[KV_EVENT_PREFIX.len()..]
    }

    /// Resolve a full event name; `None` for other namespaces or unknown kinds
    pub fn from_event(event: &str) -> Option<Self> {
        match event.strip_prefix(KV_EVENT_PREFIX)? {
            "watch" => Some(KvMessageKind::Watch),
            "update" => Some(KvMessageKind::Update),
            "changed" => Some(KvMessageKind::Changed),
            _ => None,
        }
    }
}

/// Typed key/value cluster messages
#[derive(Debug, Clone, PartialEq)]
pub enum KvMessage {
    Watch(WatchRequest),
    Update(BTreeMap<String, PublishedValue>),
    Changed(BTreeMap<String, JsonValue>),
}

impl KvMessage {
    pub fn kind(&self) -> KvMessageKind {
        match self {
            KvMessage::Watch(_) => KvMessageKind::Watch,
            KvMessage::Update(_) => KvMessageKind::Update,
            KvMessage::Changed(_) => KvMessageKind::Changed,
        }
    }

    /// Decode a cluster message. `None` when it is not a key/value message.
    pub fn decode(msg: &ClusterMessage) -> Option<Result<Self>> {
        let kind = KvMessageKind::from_event(&msg.event)?;
        let data = msg.data.clone();
        let decoded = match kind {
            KvMessageKind::Watch => serde_json::from_value(data).map(KvMessage::Watch),
            KvMessageKind::Update => serde_json::from_value(data).map(KvMessage::Update),
            KvMessageKind::Changed => serde_json::from_value(data).map(KvMessage::Changed),
        };
        Some(decoded.map_err(Into::into))
    }

    pub fn encode(&self) -> ClusterMessage {
        let data = match self {
            KvMessage::Watch(req) => serde_json::to_value(req),
            KvMessage::Update(values) => serde_json::to_value(values),
            KvMessage::Changed(values) => serde_json::to_value(values),
        };
        ClusterMessage {
            event: self.kind().event().to_string(),
            // string keys and plain structs always serialize
            data: data.unwrap_or(JsonValue::Null),
        }
    }
}
