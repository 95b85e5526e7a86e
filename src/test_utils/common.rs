use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::Instant;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Poll `condition` until it holds, panicking after `timeout`.
///
/// Spawned filesystem work (markers, sweeps, copy processes) completes on
/// other tasks, so tests wait for its effect instead of sleeping blindly.
pub async fn wait_until<F, Fut>(
    timeout: Duration,
    mut condition: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while !condition().await {
        if Instant::now() >= deadline {
            panic!("condition not reached within {:?}", timeout);
        }
        sleep(Duration::from_millis(5)).await;
    }
}
