use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value as JsonValue;

use super::AttrFilter;
use super::Entity;
use super::EntityRevision;
use crate::PartitionId;
use crate::Result;

/// Persistence backend of the [`EntityStore`](super::EntityStore).
///
/// Every write produces a fresh revision; `update` only applies when the
/// caller's `expected_rev` is still current.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EntityEngine: Send + Sync + 'static {
    /// Stores a new entity, stamping `rev`, `ctime` and `mtime`.
    ///
    /// Fails with `EntityError::Exists` when the id is taken.
    async fn insert(
        &self,
        entity_type: &str,
        entity: Entity,
    ) -> Result<Entity>;

    /// Replaces the data of `id` if its revision is `expected_rev`.
    ///
    /// Fails with `EntityError::NotFound` for an unknown id and with
    /// `EntityError::Conflict` when the revision moved on.
    async fn update(
        &self,
        entity_type: &str,
        id: &str,
        expected_rev: &str,
        data: Option<JsonValue>,
    ) -> Result<EntityRevision>;

    /// Entities among `ids` that exist, in request order
    async fn fetch(
        &self,
        entity_type: &str,
        ids: &[String],
        attrs: &AttrFilter,
    ) -> Result<Vec<Entity>>;

    /// Entities whose partition lies in `[start, start + count)`
    async fn query_partitions(
        &self,
        entity_type: &str,
        start: PartitionId,
        count: u32,
        attrs: &AttrFilter,
    ) -> Result<Vec<Entity>>;

    /// Unknown ids are ignored
    async fn remove(
        &self,
        entity_type: &str,
        ids: &[String],
    ) -> Result<()>;
}
