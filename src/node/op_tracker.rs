use crate::BiMap;
use crate::ClientId;
use crate::OpId;
use crate::OpKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedOp {
    pub kind: OpKind,
}

/// Which client may act on which operation.
///
/// `op.abort` is only honoured for pairs recorded here; entries go away when
/// the operation completes or the client disconnects.
#[derive(Debug, Default)]
pub struct OpTracker {
    ops: BiMap<OpId, ClientId, TrackedOp>,
}

impl OpTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        op_id: OpId,
        client_id: &str,
        op: TrackedOp,
    ) {
        self.ops.add(op_id, client_id.to_string(), op);
    }

    pub fn find(
        &self,
        op_id: OpId,
        client_id: &str,
    ) -> Option<&TrackedOp> {
        self.ops.get(&op_id, &client_id.to_string())
    }

    pub fn remove(
        &mut self,
        op_id: OpId,
        client_id: &str,
    ) -> Option<TrackedOp> {
        self.ops.remove(&op_id, &client_id.to_string())
    }

    /// Forget every client of a finished operation
    pub fn complete(
        &mut self,
        op_id: OpId,
    ) {
        self.ops.remove_left(&op_id);
    }

    pub fn disconnect(
        &mut self,
        client_id: &str,
    ) {
        self.ops.remove_right(&client_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
