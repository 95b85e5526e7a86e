use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::error;

lazy_static! {
    pub static ref OPS_STARTED: IntCounterVec = IntCounterVec::new(
        Opts::new("blob_ops_started", "Blob operations started"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref OPS_COMPLETED: IntCounterVec = IntCounterVec::new(
        Opts::new("blob_ops_completed", "Blob operations completed"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref CACHE_FILES_SWEPT: IntCounter =
        IntCounter::new("blob_cache_files_swept", "Cache files removed by the cleanup sweep")
            .expect("metric can not be created");

    pub static ref KV_MESSAGES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("kv_messages_sent", "Key/value cluster messages sent"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref KV_VALUES_PURGED: IntCounter =
        IntCounter::new("kv_values_purged", "Server-side values dropped on partition hand-off")
            .expect("metric can not be created");

    pub static ref ENTITY_CONFLICTS: IntCounter =
        IntCounter::new("entity_conflicts", "Entity updates rejected by a revision mismatch")
            .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(OPS_STARTED.clone()),
        Box::new(OPS_COMPLETED.clone()),
        Box::new(CACHE_FILES_SWEPT.clone()),
        Box::new(KV_MESSAGES_SENT.clone()),
        Box::new(KV_VALUES_PURGED.clone()),
        Box::new(ENTITY_CONFLICTS.clone()),
    ];
    for collector in collectors {
        // re-registration is harmless, e.g. several nodes in one test process
        if let Err(e) = registry.register(collector) {
            tracing::debug!("collector not registered: {}", e);
        }
    }
}

/// Register the node metrics in the process registry
pub fn init_metrics() {
    register_custom_metrics(&REGISTRY);
}

/// Render the registry in the Prometheus text exposition format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}

#[cfg(test)]
mod metrics_test;
