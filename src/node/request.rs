use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::BlobId;
use crate::ClientId;
use crate::Error;
use crate::OpId;
use crate::Result;

/// Client RPC, deserialised from `{"event": ..., "data": {...}}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Request {
    #[serde(rename = "blob.upload")]
    BlobUpload { path: PathBuf },

    #[serde(rename = "blob.info")]
    BlobInfo { ids: Vec<BlobId> },

    #[serde(rename = "blob.request")]
    BlobRequest { id: BlobId },

    #[serde(rename = "blob.release")]
    BlobRelease { id: BlobId },

    #[serde(rename = "blob.remove")]
    BlobRemove { ids: Vec<BlobId> },

    /// `delay` in milliseconds; the configured delay when omitted
    #[serde(rename = "blob.cleanup")]
    BlobCleanup {
        #[serde(default)]
        delay: Option<u64>,
    },

    #[serde(rename = "op.list")]
    OpList,

    #[serde(rename = "op.abort")]
    OpAbort {
        #[serde(rename = "opId")]
        op_id: OpId,
    },

    #[serde(rename = "entity.create")]
    EntityCreate {
        #[serde(rename = "type")]
        entity_type: String,
        id: String,
        #[serde(default)]
        data: Option<JsonValue>,
    },

    #[serde(rename = "entity.update")]
    EntityUpdate {
        #[serde(rename = "type")]
        entity_type: String,
        id: String,
        rev: String,
        #[serde(default)]
        data: Option<JsonValue>,
    },

    #[serde(rename = "entity.select")]
    EntitySelect {
        #[serde(rename = "type")]
        entity_type: String,
        method: String,
        #[serde(default)]
        keys: Vec<JsonValue>,
        #[serde(default)]
        attrs: Option<Vec<String>>,
    },

    #[serde(rename = "entity.remove")]
    EntityRemove {
        #[serde(rename = "type")]
        entity_type: String,
        ids: OneOrMany,
    },

    #[serde(rename = "kv.watch")]
    KvWatch { keys: Vec<String> },

    #[serde(rename = "kv.publish")]
    KvPublish {
        key: String,
        value: JsonValue,
        #[serde(default)]
        publisher: bool,
        #[serde(default, rename = "expireIn")]
        expire_in: Option<u64>,
    },

    /// Prometheus text exposition of the node metrics
    #[serde(rename = "node.metrics")]
    Metrics,
}

impl Request {
    /// Build a request from its event name and payload; `null` data stands
    /// for no payload.
    pub fn decode(
        event: &str,
        data: JsonValue,
    ) -> Result<Self> {
        let mut envelope = serde_json::Map::new();
        envelope.insert("event".to_string(), JsonValue::from(event));
        if !data.is_null() {
            envelope.insert("data".to_string(), data);
        }
        serde_json::from_value(JsonValue::Object(envelope))
            .map_err(|e| Error::BadParameter(format!("{event}: {e}")))
    }

    pub fn event(&self) -> &'static str {
        match self {
            Request::BlobUpload { .. } => "blob.upload",
            Request::BlobInfo { .. } => "blob.info",
            Request::BlobRequest { .. } => "blob.request",
            Request::BlobRelease { .. } => "blob.release",
            Request::BlobRemove { .. } => "blob.remove",
            Request::BlobCleanup { .. } => "blob.cleanup",
            Request::OpList => "op.list",
            Request::OpAbort { .. } => "op.abort",
            Request::EntityCreate { .. } => "entity.create",
            Request::EntityUpdate { .. } => "entity.update",
            Request::EntitySelect { .. } => "entity.select",
            Request::EntityRemove { .. } => "entity.remove",
            Request::KvWatch { .. } => "kv.watch",
            Request::KvPublish { .. } => "kv.publish",
            Request::Metrics => "node.metrics",
        }
    }
}

/// A single id or a list of ids
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(id) => vec![id],
            OneOrMany::Many(ids) => ids,
        }
    }
}

/// Line-oriented host input: `{"client": ..., "event": ..., "data": ...}`
#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    pub client: ClientId,
    pub event: String,
    #[serde(default)]
    pub data: JsonValue,
    /// Echoed back on the response
    #[serde(default)]
    pub seq: Option<u64>,
}

/// Line-oriented host output: responses and client notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Response {
        client: ClientId,
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<JsonValue>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<JsonValue>,
    },
    Event {
        clients: Vec<ClientId>,
        event: String,
        data: JsonValue,
    },
}
