use std::collections::BTreeSet;

use nanoid::nanoid;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value as JsonValue;

use crate::constants::HEX_ALPHABET;
use crate::partition_of;
use crate::PartitionId;

/// A stored document with its revision bookkeeping.
///
/// `rev` changes on every write; `ctime`/`mtime` are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub part: PartitionId,
    pub rev: String,
    pub ctime: u64,
    pub mtime: u64,
    pub data: Option<JsonValue>,
}

impl Entity {
    /// Unsaved entity; the engine stamps revision and times on insert
    pub fn new(
        id: impl Into<String>,
        data: Option<JsonValue>,
    ) -> Self {
        let id = id.into();
        Self {
            part: partition_of(&id),
            id,
            rev: String::new(),
            ctime: 0,
            mtime: 0,
            data,
        }
    }

    /// JSON object holding only the attributes in `attrs`
    pub fn project(
        &self,
        attrs: &AttrFilter,
    ) -> JsonValue {
        let mut obj = Map::new();
        for attr in attrs.iter() {
            let value = match attr {
                EntityAttr::Id => JsonValue::from(self.id.as_str()),
                EntityAttr::Part => JsonValue::from(self.part),
                EntityAttr::Rev => JsonValue::from(self.rev.as_str()),
                EntityAttr::Ctime => JsonValue::from(self.ctime),
                EntityAttr::Mtime => JsonValue::from(self.mtime),
                EntityAttr::Data => self.data.clone().unwrap_or(JsonValue::Null),
            };
            obj.insert(attr.as_str().to_string(), value);
        }
        JsonValue::Object(obj)
    }
}

/// Outcome of a successful update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRevision {
    pub rev: String,
    pub mtime: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityAttr {
    Id,
    Part,
    Rev,
    Ctime,
    Mtime,
    Data,
}

impl EntityAttr {
    pub const ALL: [EntityAttr; 6] = [
        EntityAttr::Id,
        EntityAttr::Part,
        EntityAttr::Rev,
        EntityAttr::Ctime,
        EntityAttr::Mtime,
        EntityAttr::Data,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityAttr::Id => "id",
            EntityAttr::Part => "part",
            EntityAttr::Rev => "rev",
            EntityAttr::Ctime => "ctime",
            EntityAttr::Mtime => "mtime",
            EntityAttr::Data => "data",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attr| attr.as_str() == name)
    }
}

/// Attributes a query returns; `id` is always part of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrFilter(BTreeSet<EntityAttr>);

impl Default for AttrFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl AttrFilter {
    pub fn all() -> Self {
        Self(EntityAttr::ALL.into_iter().collect())
    }

    /// Keeps the known names and silently drops the rest
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut attrs: BTreeSet<EntityAttr> =
            names.iter().filter_map(|name| EntityAttr::parse(name.as_ref())).collect();
        attrs.insert(EntityAttr::Id);
        Self(attrs)
    }

    pub fn contains(
        &self,
        attr: EntityAttr,
    ) -> bool {
        self.0.contains(&attr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityAttr> {
        self.0.iter()
    }
}

pub(crate) fn new_rev() -> String {
    nanoid!(32, &HEX_ALPHABET)
}
