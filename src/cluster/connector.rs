#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tracing::warn;

use crate::ClusterMessage;
use crate::NodeId;
use crate::PartitionAssignment;

/// Outbound side of the cluster-messaging fabric consumed by the core.
///
/// Both calls are fire-and-forget: delivery failures are the transport's
/// concern and never reach the caller.
#[cfg_attr(test, automock)]
pub trait ClusterConnector: Send + Sync + 'static {
    fn send(
        &self,
        msg: ClusterMessage,
        dest: &NodeId,
    );

    /// Publish the partition ranges every node is expected to own (master only)
    fn expects(
        &self,
        assignment: PartitionAssignment,
    );
}

/// What a [`ChannelConnector`] hands to the transport loop
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    Send { msg: ClusterMessage, dest: NodeId },
    Expects(PartitionAssignment),
}

/// Connector that queues everything on a channel drained by the host loop.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    tx: mpsc::UnboundedSender<ConnectorEvent>,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ClusterConnector for ChannelConnector {
    fn send(
        &self,
        msg: ClusterMessage,
        dest: &NodeId,
    ) {
        if self
            .tx
            .send(ConnectorEvent::Send {
                msg,
                dest: dest.clone(),
            })
            .is_err()
        {
            warn!(%dest, "connector channel closed, message dropped");
        }
    }

    fn expects(
        &self,
        assignment: PartitionAssignment,
    ) {
        if self.tx.send(ConnectorEvent::Expects(assignment)).is_err() {
            warn!("connector channel closed, partition expectation dropped");
        }
    }
}
