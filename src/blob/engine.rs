use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use async_trait::async_trait;

use crate::BlobError;
use crate::Result;

pub type BlobId = String;
pub type ClientId = String;
pub type OpId = u64;

/// Event raised by a running engine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpEvent {
    /// Percentage done, `0..=100`
    Progress(u8),
    /// Terminal outcome; raised once
    Complete(Option<BlobError>),
}

/// Receiver of the events of every operation started with a reporter it owns
pub trait OpEventSink: Send + Sync + 'static {
    fn on_op_event(
        &self,
        op_id: OpId,
        event: OpEvent,
    );
}

/// Handle an engine uses to report progress and completion of one operation.
///
/// The engine must call [`OpReporter::complete`] exactly once; later calls are
/// ignored by the receiving store.
#[derive(Clone)]
pub struct OpReporter {
    op_id: OpId,
    sink: Arc<dyn OpEventSink>,
}

impl fmt::Debug for OpReporter {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("OpReporter").field("op_id", &self.op_id).finish()
    }
}

impl OpReporter {
    pub fn new(
        op_id: OpId,
        sink: Arc<dyn OpEventSink>,
    ) -> Self {
        Self { op_id, sink }
    }

    pub fn op_id(&self) -> OpId {
        self.op_id
    }

    pub fn progress(
        &self,
        percentage: u8,
    ) {
        self.sink.on_op_event(self.op_id, OpEvent::Progress(percentage.min(100)));
    }

    pub fn complete(
        &self,
        error: Option<BlobError>,
    ) {
        self.sink.on_op_event(self.op_id, OpEvent::Complete(error));
    }
}

/// Cancellation capability of a started engine operation
pub trait EngineOp: Send + Sync + 'static {
    /// Request termination. The outcome still arrives through the reporter,
    /// normally as [`BlobError::Aborted`].
    fn abort(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobInfo {
    pub size: u64,
    pub mtime_ms: u64,
    pub ctime_ms: u64,
}

/// Central blob storage backend
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlobEngine: Send + Sync + 'static {
    /// Allocate a new blob id and start copying `local_file` into the store
    async fn upload(
        &self,
        local_file: &Path,
        reporter: OpReporter,
    ) -> Result<(BlobId, Box<dyn EngineOp>)>;

    /// Start copying a stored blob to `dest`.
    ///
    /// # Errors
    /// [`BlobError::NotFound`] when the id is unknown to the store.
    async fn download(
        &self,
        blob_id: &str,
        dest: &Path,
        reporter: OpReporter,
    ) -> Result<Box<dyn EngineOp>>;

    /// Metadata of each id, `None` for unknown ones
    async fn info(
        &self,
        blob_ids: &[BlobId],
    ) -> Result<Vec<Option<BlobInfo>>>;

    async fn remove(
        &self,
        blob_ids: &[BlobId],
    ) -> Result<()>;
}
