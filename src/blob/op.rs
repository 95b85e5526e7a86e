use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;

use super::BlobId;
use super::EngineOp;
use super::OpId;

/// Process-wide operation id factory. Ids start at 1 and never repeat.
#[derive(Debug, Default)]
pub struct OpIdAllocator {
    last: AtomicU64,
}

impl OpIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> OpId {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    Upload,
    Download(BlobId),
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Upload => "upload",
            OpKind::Download(_) => "download",
        }
    }
}

/// A tracked engine operation
pub(crate) struct Op {
    pub(crate) id: OpId,
    pub(crate) kind: OpKind,
    pub(crate) progress: u8,
    /// Attached once the engine call returns
    pub(crate) handle: Option<Arc<dyn EngineOp>>,
    /// `abort` arrived before the handle was attached
    pub(crate) abort_requested: bool,
}

impl fmt::Debug for Op {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Op")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("progress", &self.progress)
            .field("attached", &self.handle.is_some())
            .field("abort_requested", &self.abort_requested)
            .finish()
    }
}

impl Op {
    pub(crate) fn new(
        id: OpId,
        kind: OpKind,
    ) -> Self {
        Self {
            id,
            kind,
            progress: 0,
            handle: None,
            abort_requested: false,
        }
    }

    pub(crate) fn summary(&self) -> OpSummary {
        OpSummary {
            id: self.id,
            progress: self.progress,
        }
    }
}

/// Entry of `list_ops`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpSummary {
    pub id: OpId,
    pub progress: u8,
}
