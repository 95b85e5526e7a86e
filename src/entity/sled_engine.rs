use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sled::Batch;
use sled::IVec;
use sled::Tree;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use super::new_rev;
use super::AttrFilter;
use super::Entity;
use super::EntityAttr;
use super::EntityEngine;
use super::EntityRevision;
use crate::constants::PARTITION_INDEX_SUFFIX;
use crate::utils::time::now_millis;
use crate::EntityError;
use crate::Error;
use crate::PartitionId;
use crate::Result;
use crate::ENTITY_CONFLICTS;
use crate::PARTITIONS;

/// On-disk record; the id is the tree key.
///
/// `data` is kept as JSON text since bincode cannot decode self-describing values.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntity {
    part: PartitionId,
    rev: String,
    ctime: u64,
    mtime: u64,
    data: Option<String>,
}

impl StoredEntity {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn into_entity(
        self,
        id: String,
        attrs: &AttrFilter,
    ) -> Result<Entity> {
        let data = match self.data {
            Some(text) if attrs.contains(EntityAttr::Data) => Some(serde_json::from_str(&text)?),
            _ => None,
        };
        Ok(Entity {
            id,
            part: self.part,
            rev: self.rev,
            ctime: self.ctime,
            mtime: self.mtime,
            data,
        })
    }
}

fn encode_data(data: &Option<JsonValue>) -> Result<Option<String>> {
    data.as_ref().map(serde_json::to_string).transpose().map_err(Error::from)
}

/// Embedded entity engine: one sled tree per entity type plus a
/// `<type>.part` index tree keyed by big-endian partition followed by the id.
pub struct SledEntityEngine {
    db: sled::Db,
}

impl SledEntityEngine {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::Config::default().path(path).use_compression(true).open()?;
        info!("entity db opened at {:?}", path);
        Ok(Self { db })
    }

    /// Data tree and partition index tree of `entity_type`
    fn trees(
        &self,
        entity_type: &str,
    ) -> Result<(Tree, Tree)> {
        if entity_type.is_empty() || entity_type.ends_with(PARTITION_INDEX_SUFFIX) {
            return Err(Error::BadParameter(format!("entity type {:?}", entity_type)));
        }
        let data = self.db.open_tree(entity_type)?;
        let index = self.db.open_tree(format!("{entity_type}{PARTITION_INDEX_SUFFIX}"))?;
        Ok((data, index))
    }

    fn index_key(
        part: PartitionId,
        id: &str,
    ) -> Vec<u8> {
        let mut key = part.to_be_bytes().to_vec();
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn load(
        tree: &Tree,
        id: &str,
    ) -> Result<Option<(IVec, StoredEntity)>> {
        match tree.get(id.as_bytes())? {
            Some(bytes) => {
                let stored = StoredEntity::decode(&bytes)?;
                Ok(Some((bytes, stored)))
            }
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl EntityEngine for SledEntityEngine {
    #[instrument(skip(self, entity), fields(id = %entity.id))]
    async fn insert(
        &self,
        entity_type: &str,
        mut entity: Entity,
    ) -> Result<Entity> {
        let (tree, index) = self.trees(entity_type)?;
        let now = now_millis();
        entity.rev = new_rev();
        entity.ctime = now;
        entity.mtime = now;

        let stored = StoredEntity {
            part: entity.part,
            rev: entity.rev.clone(),
            ctime: now,
            mtime: now,
            data: encode_data(&entity.data)?,
        };
        if tree
            .compare_and_swap(entity.id.as_bytes(), None as Option<&[u8]>, Some(stored.encode()?))?
            .is_err()
        {
            return Err(EntityError::Exists { id: entity.id }.into());
        }
        index.insert(Self::index_key(entity.part, &entity.id), IVec::default())?;

        trace!("inserted {}/{} rev {}", entity_type, entity.id, entity.rev);
        Ok(entity)
    }

    #[instrument(skip(self, data))]
    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        expected_rev: &str,
        data: Option<JsonValue>,
    ) -> Result<EntityRevision> {
        let (tree, _) = self.trees(entity_type)?;
        let Some((current, stored)) = Self::load(&tree, id)? else {
            return Err(EntityError::NotFound { id: id.to_string() }.into());
        };

        let conflict = || {
            ENTITY_CONFLICTS.inc();
            Error::from(EntityError::Conflict {
                id: id.to_string(),
                expected_rev: expected_rev.to_string(),
            })
        };
        if stored.rev != expected_rev {
            debug!("revision of {}/{} is {}", entity_type, id, stored.rev);
            return Err(conflict());
        }

        let revision = EntityRevision {
            rev: new_rev(),
            mtime: now_millis(),
        };
        let updated = StoredEntity {
            part: stored.part,
            rev: revision.rev.clone(),
            ctime: stored.ctime,
            mtime: revision.mtime,
            data: encode_data(&data)?,
        };
        // a concurrent writer swapped the record after our read
        if tree.compare_and_swap(id.as_bytes(), Some(current), Some(updated.encode()?))?.is_err() {
            warn!("concurrent update of {}/{}", entity_type, id);
            return Err(conflict());
        }
        Ok(revision)
    }

    async fn fetch(
        &self,
        entity_type: &str,
        ids: &[String],
        attrs: &AttrFilter,
    ) -> Result<Vec<Entity>> {
        let (tree, _) = self.trees(entity_type)?;
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, stored)) = Self::load(&tree, id)? {
                entities.push(stored.into_entity(id.clone(), attrs)?);
            }
        }
        Ok(entities)
    }

    async fn query_partitions(
        &self,
        entity_type: &str,
        start: PartitionId,
        count: u32,
        attrs: &AttrFilter,
    ) -> Result<Vec<Entity>> {
        let end = start.saturating_add(count).min(PARTITIONS);
        if start >= end {
            return Ok(Vec::new());
        }
        let (tree, index) = self.trees(entity_type)?;

        let mut entities = Vec::new();
        for item in index.range(start.to_be_bytes()..end.to_be_bytes()) {
            let (key, _) = item?;
            let id = String::from_utf8_lossy(&key[4..]).into_owned();
            // index entries may briefly outlive a removed record
            if let Some((_, stored)) = Self::load(&tree, &id)? {
                entities.push(stored.into_entity(id, attrs)?);
            }
        }
        Ok(entities)
    }

    async fn remove(
        &self,
        entity_type: &str,
        ids: &[String],
    ) -> Result<()> {
        let (tree, index) = self.trees(entity_type)?;
        let mut batch = Batch::default();
        for id in ids {
            if let Some(bytes) = tree.remove(id.as_bytes())? {
                let stored = StoredEntity::decode(&bytes)?;
                batch.remove(Self::index_key(stored.part, id));
            }
        }
        index.apply_batch(batch)?;
        Ok(())
    }
}
