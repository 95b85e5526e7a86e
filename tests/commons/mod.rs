use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cubes::ClusterConnector;
use cubes::ClusterInfo;
use cubes::ClusterMessage;
use cubes::ClusterNode;
use cubes::ClusterRole;
use cubes::ConnectorEvent;
use cubes::KeyWatcher;
use cubes::KvConfig;
use cubes::KvNotification;
use cubes::NodeId;
use cubes::PartitionAssignment;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds, panicking after `limit`
pub async fn wait_until<F, Fut>(
    limit: Duration,
    mut condition: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while !condition().await {
        if Instant::now() >= deadline {
            panic!("condition not reached within {:?}", limit);
        }
        sleep(Duration::from_millis(5)).await;
    }
}

/// Next notification whose value satisfies `accept`, skipping the others
pub async fn next_matching<F>(
    rx: &mut mpsc::UnboundedReceiver<KvNotification>,
    accept: F,
) -> KvNotification
where
    F: Fn(&KvNotification) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, rx.recv()).await {
            Ok(Some(notification)) if accept(&notification) => return notification,
            Ok(Some(notification)) => debug!(?notification, "skipping notification"),
            other => panic!("no matching notification: {:?}", other),
        }
    }
}

/// Connector of one router member; tags everything with its sender
struct RouterConnector {
    src: NodeId,
    tx: mpsc::UnboundedSender<(NodeId, ConnectorEvent)>,
}

impl ClusterConnector for RouterConnector {
    fn send(
        &self,
        msg: ClusterMessage,
        dest: &NodeId,
    ) {
        let event = ConnectorEvent::Send {
            msg,
            dest: dest.clone(),
        };
        if self.tx.send((self.src.clone(), event)).is_err() {
            warn!("router stopped");
        }
    }

    fn expects(
        &self,
        assignment: PartitionAssignment,
    ) {
        if self.tx.send((self.src.clone(), ConnectorEvent::Expects(assignment))).is_err() {
            warn!("router stopped");
        }
    }
}

#[derive(Default)]
struct RouterState {
    members: BTreeMap<NodeId, KeyWatcher>,
    assignment: PartitionAssignment,
}

/// In-memory cluster transport for key watchers.
///
/// The member with the smallest id is master. Every membership or
/// assignment change is broadcast to all members as a fresh [`ClusterInfo`].
#[derive(Clone)]
pub struct Router {
    state: Arc<Mutex<RouterState>>,
    tx: mpsc::UnboundedSender<(NodeId, ConnectorEvent)>,
}

impl Router {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(NodeId, ConnectorEvent)>();
        let router = Self {
            state: Arc::new(Mutex::new(RouterState::default())),
            tx,
        };
        let delivery = router.clone();
        tokio::spawn(async move {
            while let Some((src, event)) = rx.recv().await {
                delivery.deliver(src, event);
            }
        });
        router
    }

    pub fn join(
        &self,
        node_id: &str,
    ) -> (KeyWatcher, mpsc::UnboundedReceiver<KvNotification>) {
        let connector = RouterConnector {
            src: node_id.to_string(),
            tx: self.tx.clone(),
        };
        let (watcher, rx) = KeyWatcher::new(Arc::new(connector), &KvConfig::default());
        self.state.lock().members.insert(node_id.to_string(), watcher.clone());
        self.broadcast();
        (watcher, rx)
    }

    pub fn leave(
        &self,
        node_id: &str,
    ) {
        self.state.lock().members.remove(node_id);
        self.broadcast();
    }

    fn deliver(
        &self,
        src: NodeId,
        event: ConnectorEvent,
    ) {
        match event {
            ConnectorEvent::Send { msg, dest } => {
                let target = self.state.lock().members.get(&dest).cloned();
                match target {
                    Some(watcher) => {
                        watcher.on_message(&msg, &src);
                    }
                    None => debug!(%dest, "message to a departed node dropped"),
                }
            }
            ConnectorEvent::Expects(assignment) => {
                self.state.lock().assignment = assignment;
                self.broadcast();
            }
        }
    }

    fn broadcast(&self) {
        let (members, nodes) = {
            let state = self.state.lock();
            let nodes: Vec<ClusterNode> = state
                .members
                .keys()
                .map(|id| ClusterNode {
                    id: id.clone(),
                    kv_parts: state.assignment.get(id).copied(),
                })
                .collect();
            let members: Vec<(NodeId, KeyWatcher)> =
                state.members.iter().map(|(id, w)| (id.clone(), w.clone())).collect();
            (members, nodes)
        };

        for (i, (id, watcher)) in members.iter().enumerate() {
            let role = if i == 0 { ClusterRole::Master } else { ClusterRole::Member };
            let info = ClusterInfo {
                local_id: id.clone(),
                nodes: nodes.clone(),
            };
            watcher.cluster_updated(role, &info);
        }
    }
}
