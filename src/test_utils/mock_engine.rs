use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::EngineOp;
use crate::OpEvent;
use crate::OpEventSink;
use crate::OpId;
use crate::OpReporter;

/// Engine operation that only records abort calls
#[derive(Debug, Default, Clone)]
pub struct TestOp {
    pub aborts: Arc<AtomicUsize>,
}

impl TestOp {
    pub fn boxed(&self) -> Box<dyn EngineOp> {
        Box::new(self.clone())
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

impl EngineOp for TestOp {
    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reporters handed to a mocked engine, kept so tests can drive the operation
#[derive(Debug, Default, Clone)]
pub struct ReporterSlot {
    reporters: Arc<Mutex<Vec<OpReporter>>>,
}

impl ReporterSlot {
    pub fn push(
        &self,
        reporter: OpReporter,
    ) {
        self.reporters.lock().push(reporter);
    }

    pub fn get(
        &self,
        index: usize,
    ) -> OpReporter {
        self.reporters.lock()[index].clone()
    }

    pub fn len(&self) -> usize {
        self.reporters.lock().len()
    }
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<(OpId, OpEvent)>,
}

impl OpEventSink for ChannelSink {
    fn on_op_event(
        &self,
        op_id: OpId,
        event: OpEvent,
    ) {
        let _ = self.tx.send((op_id, event));
    }
}

/// Reporter whose events land on the returned channel
pub fn channel_reporter(op_id: OpId) -> (OpReporter, mpsc::UnboundedReceiver<(OpId, OpEvent)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OpReporter::new(op_id, Arc::new(ChannelSink { tx })), rx)
}
