use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::KeyValueStore;
use super::KvNotification;
use super::PublishOptions;
use super::Publisher;
use super::Watcher;
use crate::partition_of;
use crate::BiMap;
use crate::ClientId;
use crate::ClusterConnector;
use crate::ClusterInfo;
use crate::ClusterMessage;
use crate::ClusterPartitioner;
use crate::ClusterRole;
use crate::CoalescingTimer;
use crate::KvConfig;
use crate::KvMessage;
use crate::NodeId;
use crate::PartitionId;
use crate::PartitionMapper;
use crate::PartitionRange;
use crate::PublishedValue;
use crate::UnmappedKeys;
use crate::WatchRequest;
use crate::KV_MESSAGES_SENT;
use crate::KV_VALUES_PURGED;

/// Messages produced under the state lock, sent once it is released
type Outbox = Vec<(NodeId, KvMessage)>;

#[derive(Default)]
struct WatcherState {
    /// Partitions this node currently owns
    part: Option<PartitionRange>,

    watchers: PartitionMapper<Watcher>,
    /// key ↔ watching clients
    watching: BiMap<String, ClientId, ()>,
    /// Keys to unwatch remotely, by partition, until the owner is known
    removed_watchers: BTreeMap<PartitionId, BTreeSet<String>>,

    publishers: PartitionMapper<Publisher>,
    /// key ↔ publishing clients
    publishing: BiMap<String, ClientId, ()>,

    store: KeyValueStore,
    partitioner: ClusterPartitioner,
}

impl WatcherState {
    /// Returns `true` when a new watcher has to be requested remotely
    fn client_watch(
        &mut self,
        key: &str,
        client_id: &ClientId,
        events: &mpsc::UnboundedSender<KvNotification>,
    ) -> bool {
        let created = !self.watchers.contains(key);
        if created {
            self.watchers.add(key.to_string(), Watcher::new(key));
        }
        self.watching.add(key.to_string(), client_id.clone(), ());
        if let Some(value) = self.watchers.get(key).and_then(|w| w.value.clone()) {
            notify(
                events,
                KvNotification {
                    key: key.to_string(),
                    value,
                    clients: vec![client_id.clone()],
                },
            );
        }
        created
    }

    /// Returns `true` when the last local interest went and a remote unwatch
    /// was queued
    fn client_unwatch(
        &mut self,
        key: &str,
        client_id: &ClientId,
    ) -> bool {
        let key = key.to_string();
        self.watching.remove(&key, client_id);
        if self.watching.contains_left(&key) {
            return false;
        }
        match self.watchers.remove(&key) {
            Some(watcher) => {
                self.removed_watchers.entry(watcher.part).or_default().insert(key);
                true
            }
            None => false,
        }
    }

    fn client_pub(
        &mut self,
        key: &str,
        client_id: &ClientId,
        publisher: Publisher,
    ) {
        self.publishers.add(key.to_string(), publisher);
        self.publishing.add(key.to_string(), client_id.clone(), ());
    }

    fn client_unpub(
        &mut self,
        key: &str,
        client_id: &ClientId,
    ) {
        let key = key.to_string();
        self.publishing.remove(&key, client_id);
        if !self.publishing.contains_left(&key) {
            self.publishers.remove(&key);
        }
    }

    fn owns(
        &self,
        part: PartitionId,
    ) -> bool {
        self.part.is_some_and(|range| range.contains(part))
    }

    /// Direct one-shot update to the owner of the key's partition
    fn send_update(
        &self,
        key: &str,
        published: PublishedValue,
        outbox: &mut Outbox,
    ) -> bool {
        let Some(node) = self.publishers.owner_of(partition_of(key)) else {
            return false;
        };
        let mut values = BTreeMap::new();
        values.insert(key.to_string(), published);
        outbox.push((node.clone(), KvMessage::Update(values)));
        true
    }

    fn msg_watch(
        &mut self,
        request: WatchRequest,
        src: &NodeId,
        outbox: &mut Outbox,
    ) {
        if self.part.is_none() {
            return;
        }
        for key in &request.unwatch {
            if let Some(value) = self.store.get_mut(key, partition_of(key)) {
                value.watchers.remove(src);
            }
        }

        let mut changes = BTreeMap::new();
        for key in request.watch {
            let part = partition_of(&key);
            if !self.owns(part) {
                continue;
            }
            let value = self.store.add_value(&key, part);
            value.watchers.insert(src.clone());
            // null acknowledges a key nobody published yet
            let current = value.value.clone().unwrap_or(JsonValue::Null);
            changes.insert(key, current);
        }
        if !changes.is_empty() {
            outbox.push((src.clone(), KvMessage::Changed(changes)));
        }
    }

    fn msg_update(
        &mut self,
        values: BTreeMap<String, PublishedValue>,
        outbox: &mut Outbox,
    ) {
        if self.part.is_none() {
            return;
        }
        let mut nodes: BTreeMap<NodeId, BTreeMap<String, JsonValue>> = BTreeMap::new();
        for (key, published) in values {
            let part = partition_of(&key);
            if !self.owns(part) {
                trace!(%key, part, "update for a partition not owned here, dropped");
                continue;
            }
            let value = self.store.add_value(&key, part);
            value.value = Some(published.value.clone());
            value.expire_in = published.expire_in;
            for node in &value.watchers {
                nodes
                    .entry(node.clone())
                    .or_default()
                    .insert(key.clone(), published.value.clone());
            }
        }
        for (node, changes) in nodes {
            outbox.push((node, KvMessage::Changed(changes)));
        }
    }

    fn msg_changed(
        &mut self,
        values: BTreeMap<String, JsonValue>,
        src: &NodeId,
        events: &mpsc::UnboundedSender<KvNotification>,
        outbox: &mut Outbox,
    ) {
        let mut watched = Vec::new();
        let mut unwatched = Vec::new();
        for (key, value) in values {
            let Some(watcher) = self.watchers.get_mut(&key) else {
                unwatched.push(key);
                continue;
            };
            if value.is_null() && watcher.value.is_none() {
                watched.push(key);
                continue;
            }
            watcher.value = Some(value.clone());
            let clients = self.watching.rights_of(&key);
            if !clients.is_empty() {
                notify(
                    events,
                    KvNotification {
                        key: key.clone(),
                        value,
                        clients,
                    },
                );
            }
            watched.push(key);
        }
        self.watchers.mark_mapped(&watched);
        if !unwatched.is_empty() {
            debug!(%src, ?unwatched, "stale keys pushed, sending unwatch");
            outbox.push((
                src.clone(),
                KvMessage::Watch(WatchRequest {
                    watch: Vec::new(),
                    unwatch: unwatched,
                }),
            ));
        }
    }

    /// Build the watch requests of the unmapped watchers and the pending
    /// removals whose owner is known. Returns whether to run again.
    fn request_watchers(
        &mut self,
        outbox: &mut Outbox,
    ) -> bool {
        let mut removals: BTreeMap<NodeId, BTreeSet<String>> = BTreeMap::new();
        let parts: Vec<PartitionId> = self.removed_watchers.keys().copied().collect();
        for part in parts {
            let Some(node) = self.watchers.owner_of(part).cloned() else {
                continue;
            };
            if let Some(keys) = self.removed_watchers.remove(&part) {
                removals.entry(node).or_default().extend(keys);
            }
        }

        let UnmappedKeys { nodes, unmapped } = self.watchers.unmapped_by_nodes();
        let sent = !nodes.is_empty() || !removals.is_empty();
        for (node, watch) in nodes {
            let unwatch = removals
                .remove(&node)
                .map(|keys| keys.into_iter().collect())
                .unwrap_or_default();
            outbox.push((node, KvMessage::Watch(WatchRequest { watch, unwatch })));
        }
        for (node, keys) in removals {
            outbox.push((
                node,
                KvMessage::Watch(WatchRequest {
                    watch: Vec::new(),
                    unwatch: keys.into_iter().collect(),
                }),
            ));
        }

        sent || !unmapped.is_empty() || !self.removed_watchers.is_empty()
    }

    fn send_publishes(
        &mut self,
        outbox: &mut Outbox,
    ) {
        self.publishers.remap(|node, entries| {
            let values = entries
                .into_iter()
                .map(|(key, publisher)| {
                    (
                        key.clone(),
                        PublishedValue {
                            value: publisher.value.clone(),
                            expire_in: publisher.expire_in,
                        },
                    )
                })
                .collect();
            outbox.push((node.clone(), KvMessage::Update(values)));
            true
        });
    }
}

fn notify(
    events: &mpsc::UnboundedSender<KvNotification>,
    notification: KvNotification,
) {
    if events.send(notification).is_err() {
        trace!("kv notification receiver dropped");
    }
}

struct WatcherShared {
    connector: Arc<dyn ClusterConnector>,
    state: Mutex<WatcherState>,
    events: mpsc::UnboundedSender<KvNotification>,
    watch_job: CoalescingTimer,
    publish_job: CoalescingTimer,
}

/// Distributed key/value watch and publish.
///
/// Tracks which local clients watch or publish which keys, routes the
/// interest to the node owning each key's partition, and serves the keys
/// of the partitions this node owns. Remote requests are batched per node
/// by two debounced jobs that rerun whenever ownership changes.
///
/// Change notifications for local clients arrive on the channel returned by
/// [`KeyWatcher::new`].
#[derive(Clone)]
pub struct KeyWatcher {
    shared: Arc<WatcherShared>,
}

impl KeyWatcher {
    pub fn new(
        connector: Arc<dyn ClusterConnector>,
        config: &KvConfig,
    ) -> (Self, mpsc::UnboundedReceiver<KvNotification>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new_cyclic(|weak: &Weak<WatcherShared>| {
            let watch = weak.clone();
            let publish = weak.clone();
            WatcherShared {
                connector,
                state: Mutex::new(WatcherState::default()),
                events,
                watch_job: CoalescingTimer::new("kv-watch", config.watcher_retry(), move || {
                    watch
                        .upgrade()
                        .is_some_and(|shared| KeyWatcher { shared }.request_watchers())
                }),
                publish_job: CoalescingTimer::new("kv-publish", config.publish_delay(), move || {
                    if let Some(shared) = publish.upgrade() {
                        KeyWatcher { shared }.send_publishes();
                    }
                    false
                }),
            }
        });
        (Self { shared }, rx)
    }

    /// Replace the set of keys a client watches
    pub fn watch(
        &self,
        keys: &[String],
        client_id: &str,
    ) {
        let client_id = client_id.to_string();
        let wanted: BTreeSet<String> = keys.iter().cloned().collect();
        let reschedule = {
            let mut state = self.shared.state.lock();
            let current: BTreeSet<String> = state.watching.lefts_of(&client_id).into_iter().collect();
            let mut reschedule = false;
            for key in current.difference(&wanted) {
                reschedule |= state.client_unwatch(key, &client_id);
            }
            for key in wanted.difference(&current) {
                reschedule |= state.client_watch(key, &client_id, &self.shared.events);
            }
            reschedule
        };
        if reschedule {
            self.shared.watch_job.reschedule(Duration::ZERO);
        }
    }

    /// Publish a value for `key`.
    ///
    /// A publisher keeps the value delivered to whichever node owns the key.
    /// Otherwise it is a one-shot update, dropped when no owner is known;
    /// the return value tells whether it was sent.
    pub fn publish(
        &self,
        key: &str,
        value: JsonValue,
        options: PublishOptions,
        client_id: &str,
    ) -> bool {
        if options.publisher {
            self.shared.state.lock().client_pub(
                key,
                &client_id.to_string(),
                Publisher {
                    value,
                    expire_in: options.expire_in,
                },
            );
            self.shared.publish_job.reschedule(Duration::ZERO);
            return true;
        }

        let mut outbox = Outbox::new();
        let sent = self.shared.state.lock().send_update(
            key,
            PublishedValue {
                value,
                expire_in: options.expire_in,
            },
            &mut outbox,
        );
        if !sent {
            debug!(key, "no owner known, update dropped");
        }
        self.dispatch(outbox);
        sent
    }

    /// Drop every watch and publication of a client
    pub fn disconnect(
        &self,
        client_id: &str,
    ) {
        let client_id = client_id.to_string();
        let reschedule = {
            let mut state = self.shared.state.lock();
            let mut reschedule = false;
            for key in state.watching.lefts_of(&client_id) {
                reschedule |= state.client_unwatch(&key, &client_id);
            }
            for key in state.publishing.lefts_of(&client_id) {
                state.client_unpub(&key, &client_id);
            }
            reschedule
        };
        if reschedule {
            self.shared.watch_job.reschedule(Duration::ZERO);
        }
    }

    /// Handle an inbound cluster message. Returns `false` for messages
    /// outside the key/value namespace.
    pub fn on_message(
        &self,
        msg: &ClusterMessage,
        src: &NodeId,
    ) -> bool {
        let decoded = match KvMessage::decode(msg) {
            None => return false,
            Some(Ok(decoded)) => decoded,
            Some(Err(e)) => {
                warn!(%src, event = %msg.event, "malformed kv message: {:?}", e);
                return true;
            }
        };
        trace!(%src, kind = decoded.kind().as_str(), "kv message");

        let mut outbox = Outbox::new();
        {
            let mut state = self.shared.state.lock();
            match decoded {
                KvMessage::Watch(request) => state.msg_watch(request, src, &mut outbox),
                KvMessage::Update(values) => state.msg_update(values, &mut outbox),
                KvMessage::Changed(values) => state.msg_changed(values, src, &self.shared.events, &mut outbox),
            }
        }
        self.dispatch(outbox);
        true
    }

    /// Adopt a cluster membership snapshot.
    ///
    /// The master first republishes the partition assignment when it
    /// changed. Then the local range is recomputed, values outside it are
    /// purged, and both batch jobs rerun against the new owners.
    pub fn cluster_updated(
        &self,
        role: ClusterRole,
        info: &ClusterInfo,
    ) {
        let assignment = {
            let mut state = self.shared.state.lock();
            let assignment = match role {
                ClusterRole::Master => state.partitioner.partition(info),
                ClusterRole::Member => None,
            };

            state.part = info.local_parts();
            let part = state.part;
            let purged = state.store.retain_range(part);
            if purged > 0 {
                info!(purged, ?part, "dropped values of partitions handed off");
                KV_VALUES_PURGED.inc_by(purged as u64);
            }
            state.watchers.cluster_update(info);
            state.publishers.cluster_update(info);
            assignment
        };

        if let Some(assignment) = assignment {
            debug!(?assignment, "publishing partition expectations");
            self.shared.connector.expects(assignment);
        }
        self.shared.watch_job.reschedule(Duration::ZERO);
        self.shared.publish_job.reschedule(Duration::ZERO);
    }

    /// Watch-request job body; also usable to flush pending requests now
    pub fn request_watchers(&self) -> bool {
        let mut outbox = Outbox::new();
        let again = self.shared.state.lock().request_watchers(&mut outbox);
        self.dispatch(outbox);
        again
    }

    /// Publish job body; also usable to flush pending publications now
    pub fn send_publishes(&self) {
        let mut outbox = Outbox::new();
        self.shared.state.lock().send_publishes(&mut outbox);
        self.dispatch(outbox);
    }

    /// Partitions currently owned by this node
    pub fn local_parts(&self) -> Option<PartitionRange> {
        self.shared.state.lock().part
    }

    /// Keys a client watches, sorted
    pub fn watched_keys(
        &self,
        client_id: &str,
    ) -> Vec<String> {
        self.shared.state.lock().watching.lefts_of(&client_id.to_string())
    }

    /// Authoritative value held for a key owned by this node
    pub fn stored_value(
        &self,
        key: &str,
    ) -> Option<JsonValue> {
        self.shared
            .state
            .lock()
            .store
            .get(key, partition_of(key))
            .and_then(|v| v.value.clone())
    }

    /// Remote nodes watching a key owned by this node
    pub fn remote_watchers(
        &self,
        key: &str,
    ) -> Vec<NodeId> {
        self.shared
            .state
            .lock()
            .store
            .get(key, partition_of(key))
            .map(|v| v.watchers.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn dispatch(
        &self,
        outbox: Outbox,
    ) {
        for (node, msg) in outbox {
            KV_MESSAGES_SENT.with_label_values(&[msg.kind().as_str()]).inc();
            trace!(%node, kind = msg.kind().as_str(), "sending kv message");
            self.shared.connector.send(msg.encode(), &node);
        }
    }
}
