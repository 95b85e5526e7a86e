//! A builder for assembling a [`Node`] from its configuration.
//!
//! Components default to the embedded backends ([`FsBlobEngine`],
//! [`SledEntityEngine`]) and to a [`ChannelConnector`] whose events the node
//! loop drains itself, which makes the node a one-node cluster. Hosts with a
//! real transport pass their own [`ClusterConnector`] and feed
//! [`Node::on_cluster_message`] / [`Node::cluster_updated`].
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let (node, outbound) = NodeBuilder::new(config, shutdown_rx)
//!     .blob_engine(custom_engine) // Optional override
//!     .build()?;
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::info;

use super::Node;
use super::NodeChannels;
use super::OpTracker;
use super::Outbound;
use crate::BlobEngine;
use crate::BlobStore;
use crate::ChannelConnector;
use crate::ClusterConnector;
use crate::CubesConfig;
use crate::EntityEngine;
use crate::EntityStore;
use crate::FsBlobEngine;
use crate::KeyWatcher;
use crate::OpIdAllocator;
use crate::Result;
use crate::SledEntityEngine;

pub struct NodeBuilder {
    config: CubesConfig,
    blob_engine: Option<Arc<dyn BlobEngine>>,
    entity_engine: Option<Arc<dyn EntityEngine>>,
    connector: Option<Arc<dyn ClusterConnector>>,
    op_ids: Option<Arc<OpIdAllocator>>,
    shutdown_signal: watch::Receiver<()>,
}

impl NodeBuilder {
    pub fn new(
        config: CubesConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            blob_engine: None,
            entity_engine: None,
            connector: None,
            op_ids: None,
            shutdown_signal,
        }
    }

    /// Sets a custom blob storage backend
    pub fn blob_engine(
        mut self,
        engine: Arc<dyn BlobEngine>,
    ) -> Self {
        self.blob_engine = Some(engine);
        self
    }

    /// Sets a custom entity storage backend
    pub fn entity_engine(
        mut self,
        engine: Arc<dyn EntityEngine>,
    ) -> Self {
        self.entity_engine = Some(engine);
        self
    }

    /// Joins a cluster through `connector` instead of running single-node
    pub fn connector(
        mut self,
        connector: Arc<dyn ClusterConnector>,
    ) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Shares an operation id space with other stores of the process
    pub fn op_ids(
        mut self,
        op_ids: Arc<OpIdAllocator>,
    ) -> Self {
        self.op_ids = Some(op_ids);
        self
    }

    /// Assembles the node; the receiver carries client notifications
    /// (`op.progress`, `op.complete`, `kv.changed`) once [`Node::run`] is
    /// polled.
    pub fn build(self) -> Result<(Arc<Node>, mpsc::UnboundedReceiver<Outbound>)> {
        let config = self.config;
        let node_id = config.cluster.node_id.clone();

        let blob_engine = match self.blob_engine {
            Some(engine) => engine,
            None => Arc::new(FsBlobEngine::new(&config.blob.store_dir)),
        };
        let entity_engine = match self.entity_engine {
            Some(engine) => engine,
            None => Arc::new(SledEntityEngine::open(&config.entity.db_path)?),
        };
        let (connector, connector_events) = match self.connector {
            Some(connector) => (connector, None),
            None => {
                let (connector, events) = ChannelConnector::new();
                (Arc::new(connector) as Arc<dyn ClusterConnector>, Some(events))
            }
        };
        let op_ids = self.op_ids.unwrap_or_default();

        let (blobs, op_events) = BlobStore::new(blob_engine, &config.blob.cache_dir, op_ids);
        let (kv, kv_events) = KeyWatcher::new(connector, &config.kv);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        info!(%node_id, cache_dir = ?config.blob.cache_dir, "node assembled");
        let node = Node {
            node_id,
            config: Arc::new(config),
            blobs,
            entities: EntityStore::new(entity_engine),
            kv,
            ops: Mutex::new(OpTracker::new()),
            outbound,
            channels: Mutex::new(Some(NodeChannels {
                op_events,
                kv_events,
                connector_events,
                shutdown_signal: self.shutdown_signal,
            })),
        };
        Ok((Arc::new(node), outbound_rx))
    }
}
