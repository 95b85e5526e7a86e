//! The node glue between clients, the core services and the cluster.
//!
//! ## Key Responsibilities
//! - Dispatches client [`Request`]s 1:1 onto [`BlobStore`], [`EntityStore`] and [`KeyWatcher`]
//! - Keeps the [`OpTracker`] in step with operation lifecycles
//! - Fans operation and key/value notifications out to clients
//! - Loops messages addressed to the local node back into the [`KeyWatcher`]
//!
//! ## Example Usage
//! ```ignore
//! let (node, mut outbound) = NodeBuilder::new(config, shutdown_rx).build()?;
//! tokio::spawn({
//!     let node = node.clone();
//!     async move { node.run().await }
//! });
//! let result = node.handle("client-1", Request::OpList).await?;
//! ```

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use super::Outbound;
use super::OpTracker;
use super::Request;
use super::TrackedOp;
use crate::gather_metrics;
use crate::BlobError;
use crate::BlobStatus;
use crate::BlobStore;
use crate::ClientId;
use crate::ClusterInfo;
use crate::ClusterMessage;
use crate::ClusterNode;
use crate::ClusterRole;
use crate::ConnectorEvent;
use crate::CubesConfig;
use crate::EntityRevision;
use crate::EntityStore;
use crate::Error;
use crate::KeyWatcher;
use crate::KvNotification;
use crate::NodeId;
use crate::OpId;
use crate::OpKind;
use crate::OpNotification;
use crate::PartitionAssignment;
use crate::PublishOptions;
use crate::Result;

/// Receivers drained by [`Node::run`]
pub(crate) struct NodeChannels {
    pub(crate) op_events: mpsc::UnboundedReceiver<OpNotification>,
    pub(crate) kv_events: mpsc::UnboundedReceiver<KvNotification>,
    /// Present when the node runs on its own [`ChannelConnector`](crate::ChannelConnector)
    pub(crate) connector_events: Option<mpsc::UnboundedReceiver<ConnectorEvent>>,
    pub(crate) shutdown_signal: watch::Receiver<()>,
}

pub struct Node {
    pub(crate) node_id: NodeId,
    pub(crate) config: Arc<CubesConfig>,
    pub(crate) blobs: BlobStore,
    pub(crate) entities: EntityStore,
    pub(crate) kv: KeyWatcher,
    pub(crate) ops: Mutex<OpTracker>,
    pub(crate) outbound: mpsc::UnboundedSender<Outbound>,
    pub(crate) channels: Mutex<Option<NodeChannels>>,
}

impl Node {
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &CubesConfig {
        &self.config
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn kv(&self) -> &KeyWatcher {
        &self.kv
    }

    /// Sender of the client fan-out channel, for hosts that interleave
    /// their own responses with node notifications
    pub fn outbound(&self) -> mpsc::UnboundedSender<Outbound> {
        self.outbound.clone()
    }

    /// Execute one client request and return its result payload
    #[instrument(skip(self, request), fields(event = request.event()))]
    pub async fn handle(
        &self,
        client_id: &str,
        request: Request,
    ) -> Result<JsonValue> {
        match request {
            Request::BlobUpload { path } => {
                let ticket = self.blobs.upload(client_id, &path).await?;
                self.track(ticket.op_id, client_id, OpKind::Upload);
                to_json(&ticket)
            }
            Request::BlobInfo { ids } => to_json(&self.blobs.info(&ids).await?),
            Request::BlobRequest { id } => {
                let state = self.blobs.request(client_id, &id).await?;
                if let BlobStatus::Downloading { op_id, .. } = state.status {
                    self.track(op_id, client_id, OpKind::Download(id));
                }
                to_json(&state)
            }
            Request::BlobRelease { id } => {
                if let Some(op_id) = self.blobs.release(client_id, &id) {
                    self.ops.lock().remove(op_id, client_id);
                }
                Ok(JsonValue::Null)
            }
            Request::BlobRemove { ids } => {
                self.blobs.remove(&ids).await?;
                Ok(JsonValue::Null)
            }
            Request::BlobCleanup { delay } => {
                let delay = delay.unwrap_or(self.config.blob.cleanup_delay_ms);
                self.blobs.cleanup(Duration::from_millis(delay));
                Ok(JsonValue::Null)
            }
            Request::OpList => to_json(&self.blobs.list_ops(client_id)),
            Request::OpAbort { op_id } => {
                if self.ops.lock().find(op_id, client_id).is_none() {
                    return Err(Error::OpNotFound(op_id));
                }
                if !self.blobs.abort(op_id) {
                    // completed in the meantime
                    self.ops.lock().complete(op_id);
                    return Err(Error::OpNotFound(op_id));
                }
                Ok(JsonValue::Null)
            }
            Request::EntityCreate { entity_type, id, data } => self.entities.create(&entity_type, &id, data).await,
            Request::EntityUpdate {
                entity_type,
                id,
                rev,
                data,
            } => to_json(&self.entities.update(&entity_type, &id, &rev, data).await?),
            Request::EntitySelect {
                entity_type,
                method,
                keys,
                attrs,
            } => {
                let entities = self
                    .entities
                    .select(&entity_type, &method, &keys, attrs.as_deref())
                    .await?;
                Ok(JsonValue::Array(entities))
            }
            Request::EntityRemove { entity_type, ids } => {
                self.entities.remove(&entity_type, &ids.into_vec()).await?;
                Ok(JsonValue::Null)
            }
            Request::KvWatch { keys } => {
                self.kv.watch(&keys, client_id);
                Ok(JsonValue::Null)
            }
            Request::KvPublish {
                key,
                value,
                publisher,
                expire_in,
            } => {
                let options = PublishOptions { publisher, expire_in };
                Ok(JsonValue::Bool(self.kv.publish(&key, value, options, client_id)))
            }
            Request::Metrics => Ok(JsonValue::String(gather_metrics())),
        }
    }

    /// Read-modify-write of an entity under the configured conflict retry policy
    pub async fn modify_entity<F>(
        &self,
        entity_type: &str,
        id: &str,
        mutate: F,
    ) -> Result<EntityRevision>
    where
        F: Fn(Option<&JsonValue>) -> Option<JsonValue> + Send + Sync,
    {
        self.entities
            .update_with_retry(entity_type, id, mutate, self.config.retry.entity_update)
            .await
    }

    /// Drop everything a departed client held
    pub fn disconnect(
        &self,
        client_id: &str,
    ) {
        debug!(client_id, "client disconnected");
        self.blobs.disconnect(client_id);
        self.kv.disconnect(client_id);
        self.ops.lock().disconnect(client_id);
    }

    /// Entry point for a cluster transport delivering a message from `src`
    pub fn on_cluster_message(
        &self,
        msg: &ClusterMessage,
        src: &NodeId,
    ) -> bool {
        self.kv.on_message(msg, src)
    }

    /// Entry point for a cluster transport reporting a membership change
    pub fn cluster_updated(
        &self,
        role: ClusterRole,
        info: &ClusterInfo,
    ) {
        self.kv.cluster_updated(role, info);
    }

    /// Main event loop; returns once the shutdown signal fires.
    ///
    /// A node running on its own channel connector forms a one-node cluster
    /// at startup: it is master and ends up owning every partition.
    pub async fn run(&self) -> Result<()> {
        let Some(mut channels) = self.channels.lock().take() else {
            return Err(Error::Fatal(format!("node {} is already running", self.node_id)));
        };

        if channels.connector_events.is_some() {
            info!(node_id = %self.node_id, "starting as a single node cluster");
            self.cluster_updated(ClusterRole::Master, &self.single_node_cluster(None));
        }

        loop {
            tokio::select! {
                _ = channels.shutdown_signal.changed() => {
                    info!(node_id = %self.node_id, "shutdown signal received");
                    break;
                }
                Some(notification) = channels.op_events.recv() => {
                    self.on_op_notification(notification);
                }
                Some(notification) = channels.kv_events.recv() => {
                    self.on_kv_notification(notification);
                }
                Some(event) = next_connector_event(&mut channels.connector_events) => {
                    self.on_connector_event(event);
                }
            }
        }
        Ok(())
    }

    /// Record the client on an operation it may abort.
    ///
    /// The operation may have completed before this runs; the entry is
    /// dropped again when the store no longer lists it for the client.
    fn track(
        &self,
        op_id: OpId,
        client_id: &str,
        kind: OpKind,
    ) {
        self.ops.lock().add(op_id, client_id, TrackedOp { kind });
        let live = self.blobs.list_ops(client_id).iter().any(|op| op.id == op_id);
        if !live {
            self.ops.lock().remove(op_id, client_id);
        }
    }

    fn on_op_notification(
        &self,
        notification: OpNotification,
    ) {
        match notification {
            OpNotification::Progress {
                op_id,
                progress,
                clients,
            } => {
                self.emit(clients, "op.progress", json!({ "opId": op_id, "progress": progress }));
            }
            OpNotification::Complete { op_id, error, clients } => {
                self.ops.lock().complete(op_id);
                let error = error.map(|e: BlobError| Error::Blob(e).to_payload());
                self.emit(clients, "op.complete", json!({ "opId": op_id, "error": error }));
            }
        }
    }

    fn on_kv_notification(
        &self,
        notification: KvNotification,
    ) {
        let KvNotification { key, value, clients } = notification;
        self.emit(clients, "kv.changed", json!({ "key": key, "value": value }));
    }

    fn on_connector_event(
        &self,
        event: ConnectorEvent,
    ) {
        match event {
            ConnectorEvent::Send { msg, dest } if dest == self.node_id => {
                trace!(event = %msg.event, "delivering message to the local node");
                if !self.kv.on_message(&msg, &self.node_id) {
                    warn!(event = %msg.event, "unhandled cluster message");
                }
            }
            ConnectorEvent::Send { msg, dest } => {
                warn!(event = %msg.event, %dest, "no transport to remote node, message dropped");
            }
            ConnectorEvent::Expects(assignment) => {
                debug!(?assignment, "applying partition expectations");
                self.cluster_updated(ClusterRole::Master, &self.single_node_cluster(Some(&assignment)));
            }
        }
    }

    fn single_node_cluster(
        &self,
        assignment: Option<&PartitionAssignment>,
    ) -> ClusterInfo {
        ClusterInfo {
            local_id: self.node_id.clone(),
            nodes: vec![ClusterNode {
                id: self.node_id.clone(),
                kv_parts: assignment.and_then(|a| a.get(&self.node_id).copied()),
            }],
        }
    }

    fn emit(
        &self,
        clients: Vec<ClientId>,
        event: &str,
        data: JsonValue,
    ) {
        if clients.is_empty() {
            return;
        }
        let outbound = Outbound::Event {
            clients,
            event: event.to_string(),
            data,
        };
        if self.outbound.send(outbound).is_err() {
            trace!(event, "outbound receiver dropped");
        }
    }
}

async fn next_connector_event(rx: &mut Option<mpsc::UnboundedReceiver<ConnectorEvent>>) -> Option<ConnectorEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue> {
    Ok(serde_json::to_value(value)?)
}
