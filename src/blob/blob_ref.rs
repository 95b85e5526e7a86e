use std::path::PathBuf;

use serde::Serialize;
use tracing::trace;

use super::BlobId;
use super::OpId;
use crate::BlobError;

/// Cache state of one blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BlobStatus {
    Downloading {
        #[serde(rename = "opId")]
        op_id: OpId,
        progress: u8,
    },
    Ready,
    Error,
}

/// Snapshot returned to a requesting client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobState {
    pub file: PathBuf,
    #[serde(flatten)]
    pub status: BlobStatus,
}

/// In-memory cache entry of one blob
#[derive(Debug, Clone)]
pub(crate) struct BlobRef {
    pub(crate) id: BlobId,
    pub(crate) file: PathBuf,
    /// Download in flight
    pub(crate) op: Option<OpId>,
    pub(crate) error: Option<BlobError>,
    /// Ready marker not yet on disk
    pub(crate) marking: bool,
}

impl BlobRef {
    /// Entry for a file already complete on disk
    pub(crate) fn ready(
        id: BlobId,
        file: PathBuf,
    ) -> Self {
        Self {
            id,
            file,
            op: None,
            error: None,
            marking: false,
        }
    }

    pub(crate) fn in_flight(
        id: BlobId,
        file: PathBuf,
        op_id: OpId,
    ) -> Self {
        Self {
            id,
            file,
            op: Some(op_id),
            error: None,
            marking: false,
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.op.is_none() && self.error.is_none()
    }

    /// `progress` is the current progress of the bound operation
    pub(crate) fn state(
        &self,
        progress: u8,
    ) -> BlobState {
        let status = match (self.op, &self.error) {
            (Some(op_id), _) => BlobStatus::Downloading { op_id, progress },
            (None, Some(_)) => BlobStatus::Error,
            (None, None) => BlobStatus::Ready,
        };
        BlobState {
            file: self.file.clone(),
            status,
        }
    }

    /// Unbind the finished operation. Returns `false` if `op_id` is not the bound one.
    pub(crate) fn complete(
        &mut self,
        op_id: OpId,
        error: Option<BlobError>,
    ) -> bool {
        if self.op != Some(op_id) {
            return false;
        }
        trace!(blob_id = %self.id, op_id, failed = error.is_some(), "download settled");
        self.op = None;
        self.marking = error.is_none();
        self.error = error;
        true
    }
}
