use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use super::AttrFilter;
use super::Entity;
use super::EntityEngine;
use super::EntityRevision;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackoffPolicy;
use crate::EntityError;
use crate::Error;
use crate::PartitionId;
use crate::Result;

/// Thin CRUD facade over an [`EntityEngine`]
#[derive(Clone)]
pub struct EntityStore {
    engine: Arc<dyn EntityEngine>,
}

impl EntityStore {
    pub fn new(engine: Arc<dyn EntityEngine>) -> Self {
        Self { engine }
    }

    /// Stores a new entity and returns it with every attribute
    pub async fn create(
        &self,
        entity_type: &str,
        id: &str,
        data: Option<JsonValue>,
    ) -> Result<JsonValue> {
        let entity = self.engine.insert(entity_type, Entity::new(id, data)).await?;
        Ok(entity.project(&AttrFilter::all()))
    }

    pub async fn update(
        &self,
        entity_type: &str,
        id: &str,
        rev: &str,
        data: Option<JsonValue>,
    ) -> Result<EntityRevision> {
        self.engine.update(entity_type, id, rev, data).await
    }

    /// Queries by `method`:
    /// - `id`: `keys` are entity ids
    /// - `part`: `keys` are `[start, count]`
    ///
    /// `attrs` restricts the returned attributes (`id` is always returned);
    /// `None` returns all of them.
    pub async fn select(
        &self,
        entity_type: &str,
        method: &str,
        keys: &[JsonValue],
        attrs: Option<&[String]>,
    ) -> Result<Vec<JsonValue>> {
        let filter = attrs.map(AttrFilter::from_names).unwrap_or_default();
        let entities = match method {
            "id" => {
                let ids: Vec<String> = keys.iter().map(key_string).collect();
                self.engine.fetch(entity_type, &ids, &filter).await?
            }
            "part" => {
                let start = key_number(keys.first(), "keys[0]")?;
                let count = key_number(keys.get(1), "keys[1]")?;
                self.engine.query_partitions(entity_type, start, count, &filter).await?
            }
            _ => return Err(Error::BadParameter("method".to_string())),
        };
        Ok(entities.iter().map(|entity| entity.project(&filter)).collect())
    }

    pub async fn remove(
        &self,
        entity_type: &str,
        ids: &[String],
    ) -> Result<()> {
        self.engine.remove(entity_type, ids).await
    }

    /// Read-modify-write of the data of `id`.
    ///
    /// `mutate` receives the current data and returns the replacement; the
    /// cycle restarts with a fresh read whenever the revision moved on in
    /// between, backing off as `policy` prescribes.
    pub async fn update_with_retry<F>(
        &self,
        entity_type: &str,
        id: &str,
        mutate: F,
        policy: BackoffPolicy,
    ) -> Result<EntityRevision>
    where
        F: Fn(Option<&JsonValue>) -> Option<JsonValue> + Send + Sync,
    {
        let store = self;
        let mutate = &mutate;
        task_with_timeout_and_exponential_backoff(
            move || async move { store.read_modify_write(entity_type, id, mutate).await },
            policy,
            |e| matches!(e, Error::Entity(EntityError::Conflict { .. })),
        )
        .await
    }

    async fn read_modify_write<F>(
        &self,
        entity_type: &str,
        id: &str,
        mutate: &F,
    ) -> Result<EntityRevision>
    where
        F: Fn(Option<&JsonValue>) -> Option<JsonValue>,
    {
        let ids = [id.to_string()];
        let current = self
            .engine
            .fetch(entity_type, &ids, &AttrFilter::all())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EntityError::NotFound { id: id.to_string() })?;

        debug!("updating {}/{} from rev {}", entity_type, id, current.rev);
        let data = mutate(current.data.as_ref());
        self.engine.update(entity_type, id, &current.rev, data).await
    }
}

fn key_string(key: &JsonValue) -> String {
    match key {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accepts numbers and numeric strings
fn key_number(
    key: Option<&JsonValue>,
    name: &str,
) -> Result<PartitionId> {
    let number = match key {
        Some(JsonValue::Number(n)) => n.as_u64(),
        Some(JsonValue::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    number
        .map(|n| n.min(u32::MAX as u64) as PartitionId)
        .ok_or_else(|| Error::BadParameter(name.to_string()))
}
