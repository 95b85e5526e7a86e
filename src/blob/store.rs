use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use super::BlobEngine;
use super::BlobId;
use super::BlobInfo;
use super::BlobRef;
use super::BlobState;
use super::BlobStatus;
use super::ClientId;
use super::EngineOp;
use super::Op;
use super::OpEvent;
use super::OpEventSink;
use super::OpId;
use super::OpIdAllocator;
use super::OpKind;
use super::OpReporter;
use super::OpSummary;
use crate::BiMap;
use crate::BlobError;
use crate::Result;
use crate::BUCKET_MARK;
use crate::BUCKET_PREFIX_LEN;
use crate::CACHE_FILES_SWEPT;
use crate::OPS_COMPLETED;
use crate::OPS_STARTED;
use crate::READY_SUFFIX;

/// Delivered to the host for fan-out to the listed clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpNotification {
    Progress {
        op_id: OpId,
        progress: u8,
        clients: Vec<ClientId>,
    },
    Complete {
        op_id: OpId,
        error: Option<BlobError>,
        clients: Vec<ClientId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub blob_id: BlobId,
    pub op_id: OpId,
}

#[derive(Default)]
struct StoreState {
    ops: BTreeMap<OpId, Op>,
    /// op ↔ subscribed clients
    subs: BiMap<OpId, ClientId, ()>,
    blobs: BTreeMap<BlobId, BlobRef>,
    /// blob ↔ referencing clients, valued by reference count
    refs: BiMap<BlobId, ClientId, u32>,
    /// Sweep requests seen since the running sweep started; 0 when idle
    cleaning: u32,
    /// Sweeps run so far
    sweeps: u64,
}

impl StoreState {
    fn blob_state(
        &self,
        blob_id: &str,
    ) -> Option<BlobState> {
        let blob = self.blobs.get(blob_id)?;
        let progress = blob
            .op
            .and_then(|op_id| self.ops.get(&op_id))
            .map(|op| op.progress)
            .unwrap_or_default();
        Some(blob.state(progress))
    }

    /// Take one reference of a loaded blob; `None` when it is not loaded
    fn ref_blob(
        &mut self,
        blob_id: &BlobId,
        client_id: &ClientId,
    ) -> Option<BlobState> {
        let op = self.blobs.get(blob_id)?.op;
        match self.refs.get_mut(blob_id, client_id) {
            Some(count) => *count += 1,
            None => {
                self.refs.add(blob_id.clone(), client_id.clone(), 1);
                if let Some(op_id) = op {
                    self.subs.add(op_id, client_id.clone(), ());
                }
            }
        }
        self.blob_state(blob_id)
    }

    /// Drop the in-memory entry of a settled blob nobody references
    fn evict_if_unreferenced(
        &mut self,
        blob_id: &str,
    ) {
        let settled = self.blobs.get(blob_id).is_some_and(|b| b.op.is_none() && !b.marking);
        if settled && !self.refs.contains_left(&blob_id.to_string()) {
            trace!(blob_id, "evicting unreferenced blob");
            self.blobs.remove(blob_id);
        }
    }

    fn unload_blob(
        &mut self,
        blob_id: &str,
    ) {
        self.refs.remove_left(&blob_id.to_string());
        self.blobs.remove(blob_id);
    }
}

struct StoreShared {
    engine: Arc<dyn BlobEngine>,
    cache_dir: PathBuf,
    ids: Arc<OpIdAllocator>,
    state: Mutex<StoreState>,
    events: mpsc::UnboundedSender<OpNotification>,
}

/// Routes engine events back into the store without keeping it alive
struct StoreEvents {
    shared: Weak<StoreShared>,
}

impl OpEventSink for StoreEvents {
    fn on_op_event(
        &self,
        op_id: OpId,
        event: OpEvent,
    ) {
        if let Some(shared) = self.shared.upgrade() {
            BlobStore { shared }.on_op_event(op_id, event);
        }
    }
}

/// Local blob cache with multi-client reference counting.
///
/// All clients requesting the same blob share one download. Progress and
/// completion of every tracked operation are pushed on the notification
/// channel returned by [`BlobStore::new`], together with the ids of the
/// clients subscribed at that moment.
#[derive(Clone)]
pub struct BlobStore {
    shared: Arc<StoreShared>,
}

impl BlobStore {
    pub fn new(
        engine: Arc<dyn BlobEngine>,
        cache_dir: impl Into<PathBuf>,
        ids: Arc<OpIdAllocator>,
    ) -> (Self, mpsc::UnboundedReceiver<OpNotification>) {
        let (events, rx) = mpsc::unbounded_channel();
        let store = Self {
            shared: Arc::new(StoreShared {
                engine,
                cache_dir: cache_dir.into(),
                ids,
                state: Mutex::new(StoreState::default()),
                events,
            }),
        };
        (store, rx)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.shared.cache_dir
    }

    /// `<cache_dir>/<first two chars>#/#<rest>`; marker names always contain a
    /// `.`, cache files never do.
    pub fn cache_file(
        &self,
        blob_id: &str,
    ) -> PathBuf {
        let split = blob_id
            .char_indices()
            .nth(BUCKET_PREFIX_LEN)
            .map(|(i, _)| i)
            .unwrap_or(blob_id.len());
        let (bucket, rest) = blob_id.split_at(split);
        self.shared
            .cache_dir
            .join(format!("{}{}", bucket, BUCKET_MARK))
            .join(format!("{}{}", BUCKET_MARK, rest))
    }

    fn reporter(
        &self,
        op_id: OpId,
    ) -> OpReporter {
        OpReporter::new(
            op_id,
            Arc::new(StoreEvents {
                shared: Arc::downgrade(&self.shared),
            }),
        )
    }

    /// Start storing `local_file` as a new blob. Progress and completion are
    /// reported to `client_id` through the notification channel.
    #[instrument(skip(self))]
    pub async fn upload(
        &self,
        client_id: &str,
        local_file: &Path,
    ) -> Result<UploadTicket> {
        let op_id = self.shared.ids.next_id();
        {
            let mut state = self.shared.state.lock();
            state.ops.insert(op_id, Op::new(op_id, OpKind::Upload));
            state.subs.add(op_id, client_id.to_string(), ());
        }
        OPS_STARTED.with_label_values(&[OpKind::Upload.as_str()]).inc();

        match self.shared.engine.upload(local_file, self.reporter(op_id)).await {
            Ok((blob_id, handle)) => {
                debug!(op_id, %blob_id, "upload started");
                self.attach(op_id, handle);
                Ok(UploadTicket { blob_id, op_id })
            }
            Err(e) => {
                warn!(op_id, "upload failed to start: {:?}", e);
                let mut state = self.shared.state.lock();
                state.ops.remove(&op_id);
                state.subs.remove_left(&op_id);
                Err(e)
            }
        }
    }

    pub async fn info(
        &self,
        blob_ids: &[BlobId],
    ) -> Result<Vec<Option<BlobInfo>>> {
        self.shared.engine.info(blob_ids).await
    }

    pub async fn remove(
        &self,
        blob_ids: &[BlobId],
    ) -> Result<()> {
        self.shared.engine.remove(blob_ids).await
    }

    /// Reference a blob on behalf of a client, downloading it into the cache
    /// if it is neither loaded nor marked ready on disk.
    ///
    /// A client joining an in-flight download is subscribed to its operation.
    #[instrument(skip(self))]
    pub async fn request(
        &self,
        client_id: &str,
        blob_id: &str,
    ) -> Result<BlobState> {
        let client_id = client_id.to_string();
        let blob_id = blob_id.to_string();
        let loaded = self.shared.state.lock().ref_blob(&blob_id, &client_id);
        if let Some(state) = loaded {
            return Ok(state);
        }

        let cache_file = self.cache_file(&blob_id);
        let ready = fs::try_exists(ready_marker(&cache_file)).await.unwrap_or(false);

        let op_id = {
            let mut state = self.shared.state.lock();
            // another request may have loaded it while the marker was checked
            if let Some(blob_state) = state.ref_blob(&blob_id, &client_id) {
                return Ok(blob_state);
            }
            if ready {
                state
                    .blobs
                    .insert(blob_id.clone(), BlobRef::ready(blob_id.clone(), cache_file));
                return state.ref_blob(&blob_id, &client_id).ok_or_else(|| {
                    BlobError::Engine(format!("blob {} vanished while loading", blob_id)).into()
                });
            }

            let op_id = self.shared.ids.next_id();
            state
                .ops
                .insert(op_id, Op::new(op_id, OpKind::Download(blob_id.clone())));
            state.blobs.insert(
                blob_id.clone(),
                BlobRef::in_flight(blob_id.clone(), cache_file.clone(), op_id),
            );
            state.ref_blob(&blob_id, &client_id);
            op_id
        };
        OPS_STARTED.with_label_values(&["download"]).inc();
        debug!(op_id, "download started");

        match self
            .shared
            .engine
            .download(&blob_id, &cache_file, self.reporter(op_id))
            .await
        {
            Ok(handle) => {
                self.attach(op_id, handle);
                let state = self.shared.state.lock();
                Ok(state.blob_state(&blob_id).unwrap_or(BlobState {
                    file: cache_file,
                    status: BlobStatus::Error,
                }))
            }
            Err(e) => {
                let error = e.into_blob_error();
                warn!(op_id, "download failed to start: {}", error);
                self.on_op_event(op_id, OpEvent::Complete(Some(error.clone())));
                Err(error.into())
            }
        }
    }

    /// Drop one reference. Returns the operation the client was unsubscribed
    /// from when this released its last reference to an in-flight blob.
    pub fn release(
        &self,
        client_id: &str,
        blob_id: &str,
    ) -> Option<OpId> {
        let client_id = client_id.to_string();
        let blob_id = blob_id.to_string();
        let mut state = self.shared.state.lock();
        let count = state.refs.get_mut(&blob_id, &client_id)?;
        *count -= 1;
        if *count > 0 {
            return None;
        }
        state.refs.remove(&blob_id, &client_id);
        let op = state.blobs.get(&blob_id).and_then(|b| b.op);
        if let Some(op_id) = op {
            state.subs.remove(&op_id, &client_id);
        }
        state.evict_if_unreferenced(&blob_id);
        op
    }

    pub fn list_ops(
        &self,
        client_id: &str,
    ) -> Vec<OpSummary> {
        let state = self.shared.state.lock();
        state
            .subs
            .lefts_of(&client_id.to_string())
            .into_iter()
            .filter_map(|op_id| state.ops.get(&op_id).map(Op::summary))
            .collect()
    }

    /// Ask the engine to cancel an operation. Returns `false` for unknown ids.
    pub fn abort(
        &self,
        op_id: OpId,
    ) -> bool {
        let handle = {
            let mut state = self.shared.state.lock();
            let Some(op) = state.ops.get_mut(&op_id) else {
                return false;
            };
            op.abort_requested = true;
            op.handle.clone()
        };
        debug!(op_id, attached = handle.is_some(), "abort requested");
        if let Some(handle) = handle {
            handle.abort();
        }
        true
    }

    /// Drop every subscription and reference of a client
    pub fn disconnect(
        &self,
        client_id: &str,
    ) {
        let client_id = client_id.to_string();
        let mut state = self.shared.state.lock();
        state.subs.remove_right(&client_id);
        for (blob_id, _) in state.refs.remove_right(&client_id) {
            state.evict_if_unreferenced(&blob_id);
        }
    }

    /// Sweep unreferenced ready files from the cache after `delay`
    pub fn cleanup(
        &self,
        delay: Duration,
    ) {
        let store = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            store.clean().await;
        });
    }

    /// Run the sweep, or record the request for the sweep already running.
    /// All requests recorded during one sweep are served by one follow-up.
    pub(crate) async fn clean(&self) {
        if !self.begin_clean() {
            return;
        }
        loop {
            match self.sweep().await {
                Ok(removed) => debug!(removed, "cache sweep finished"),
                Err(e) => warn!("cache sweep failed: {:?}", e),
            }
            if !self.finish_sweep() {
                return;
            }
        }
    }

    /// Record a sweep request; `true` when the caller has to run the sweep
    pub(crate) fn begin_clean(&self) -> bool {
        let mut state = self.shared.state.lock();
        state.cleaning += 1;
        state.cleaning == 1
    }

    /// End of one sweep; `true` when requests arrived meanwhile and one
    /// follow-up sweep is due
    pub(crate) fn finish_sweep(&self) -> bool {
        let mut state = self.shared.state.lock();
        state.sweeps += 1;
        if state.cleaning > 1 {
            trace!(requests = state.cleaning - 1, sweeps = state.sweeps, "chaining one follow-up sweep");
            state.cleaning = 1;
            true
        } else {
            state.cleaning = 0;
            false
        }
    }

    #[cfg(test)]
    pub(crate) fn sweeps(&self) -> u64 {
        self.shared.state.lock().sweeps
    }

    pub(crate) async fn sweep(&self) -> Result<usize> {
        let candidates = self.ready_cache_entries().await?;
        let mut removed = 0;
        for blob_id in candidates {
            if self.sweep_entry(&blob_id).await {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete one swept candidate unless it is referenced or loaded right now.
    /// The listing may predate the reference, so the check runs here.
    pub(crate) async fn sweep_entry(
        &self,
        blob_id: &str,
    ) -> bool {
        {
            let state = self.shared.state.lock();
            if state.refs.contains_left(&blob_id.to_string()) || state.blobs.contains_key(blob_id) {
                trace!(%blob_id, "in use, kept");
                return false;
            }
        }
        let file = self.cache_file(blob_id);
        if let Err(e) = fs::remove_file(ready_marker(&file)).await {
            warn!(%blob_id, "failed to remove ready marker: {}", e);
            return false;
        }
        if let Err(e) = fs::remove_file(&file).await {
            warn!(%blob_id, "failed to remove cache file: {}", e);
            return false;
        }
        CACHE_FILES_SWEPT.inc();
        true
    }

    /// Ids of every cached file that has a ready marker
    pub(crate) async fn ready_cache_entries(&self) -> Result<Vec<BlobId>> {
        let mut buckets = match fs::read_dir(&self.shared.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(bucket) = buckets.next_entry().await? {
            let Ok(bucket_name) = bucket.file_name().into_string() else {
                continue;
            };
            let Some(prefix) = bucket_name.strip_suffix(BUCKET_MARK) else {
                continue;
            };
            if prefix.chars().count() != BUCKET_PREFIX_LEN {
                continue;
            }

            let mut files = match fs::read_dir(bucket.path()).await {
                Ok(dir) => dir,
                Err(e) => {
                    warn!(bucket = %bucket_name, "unreadable cache bucket: {}", e);
                    continue;
                }
            };
            while let Some(file) = files.next_entry().await? {
                let Ok(name) = file.file_name().into_string() else {
                    continue;
                };
                let Some(rest) = name.strip_prefix(BUCKET_MARK) else {
                    continue;
                };
                if rest.contains('.') {
                    continue;
                }
                let is_file = file.metadata().await.map(|m| m.is_file()).unwrap_or(false);
                if is_file && fs::try_exists(ready_marker(&file.path())).await.unwrap_or(false) {
                    ids.push(format!("{}{}", prefix, rest));
                }
            }
        }
        Ok(ids)
    }

    fn attach(
        &self,
        op_id: OpId,
        handle: Box<dyn EngineOp>,
    ) {
        let handle: Arc<dyn EngineOp> = Arc::from(handle);
        let abort = {
            let mut state = self.shared.state.lock();
            match state.ops.get_mut(&op_id) {
                Some(op) => {
                    op.handle = Some(handle.clone());
                    op.abort_requested
                }
                None => false,
            }
        };
        if abort {
            debug!(op_id, "applying abort requested before attach");
            handle.abort();
        }
    }

    fn on_op_event(
        &self,
        op_id: OpId,
        event: OpEvent,
    ) {
        match event {
            OpEvent::Progress(progress) => self.op_progress(op_id, progress),
            OpEvent::Complete(error) => self.op_complete(op_id, error),
        }
    }

    fn op_progress(
        &self,
        op_id: OpId,
        progress: u8,
    ) {
        let mut state = self.shared.state.lock();
        let Some(op) = state.ops.get_mut(&op_id) else {
            return;
        };
        op.progress = progress;
        let clients = state.subs.rights_of(&op_id);
        self.notify(OpNotification::Progress {
            op_id,
            progress,
            clients,
        });
    }

    fn op_complete(
        &self,
        op_id: OpId,
        error: Option<BlobError>,
    ) {
        let mut state = self.shared.state.lock();
        let Some(op) = state.ops.remove(&op_id) else {
            trace!(op_id, "completion of unknown op ignored");
            return;
        };
        let clients: Vec<ClientId> = state
            .subs
            .remove_left(&op_id)
            .into_iter()
            .map(|(client_id, _)| client_id)
            .collect();

        if let OpKind::Download(blob_id) = &op.kind {
            let bound = state
                .blobs
                .get_mut(blob_id)
                .is_some_and(|blob| blob.complete(op_id, error.clone()));
            if bound && error.is_some() {
                state.unload_blob(blob_id);
            } else if bound {
                self.mark_ready(blob_id.clone());
            }
        }

        let outcome = match &error {
            None => "success",
            Some(e) => match e {
                BlobError::Aborted => "aborted",
                _ => "failure",
            },
        };
        OPS_COMPLETED.with_label_values(&[outcome]).inc();
        debug!(op_id, outcome, "op complete");

        self.notify(OpNotification::Complete {
            op_id,
            error,
            clients,
        });
    }

    /// Persist the ready marker, then let the entry go if nobody holds it.
    /// Until then the entry stays loaded, so a release cannot evict it early.
    fn mark_ready(
        &self,
        blob_id: BlobId,
    ) {
        let store = self.clone();
        tokio::spawn(async move {
            let file = store.cache_file(&blob_id);
            if let Err(e) = fs::write(ready_marker(&file), b"").await {
                warn!(%blob_id, "failed to write ready marker: {}", e);
            }
            let mut state = store.shared.state.lock();
            let Some(blob) = state.blobs.get_mut(&blob_id) else {
                return;
            };
            blob.marking = false;
            if blob.is_ready() {
                state.evict_if_unreferenced(&blob_id);
            }
        });
    }

    fn notify(
        &self,
        notification: OpNotification,
    ) {
        if self.shared.events.send(notification).is_err() {
            trace!("op notification receiver dropped");
        }
    }
}

pub(crate) fn ready_marker(file: &Path) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(READY_SUFFIX);
    PathBuf::from(name)
}
