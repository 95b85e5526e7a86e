use std::path::Path;
use std::sync::Arc;

use cubes::init_metrics;
use cubes::CubesConfig;
use cubes::Error;
use cubes::Inbound;
use cubes::Node;
use cubes::NodeBuilder;
use cubes::NodeId;
use cubes::Outbound;
use cubes::Request;
use cubes::Result;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

/// Host event detaching a client from everything it holds
const DISCONNECT_EVENT: &str = "disconnect";

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let mut config = CubesConfig::new()?;
    if let Some(path) = std::env::args().nth(1) {
        config = config.with_override_config(&path)?;
    }
    let config = config.validate()?;

    // Initializing Logs
    let _guard = init_observability(&config.cluster.node_id, &config.cluster.log_dir)?;
    init_metrics();

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    let (node, outbound) = NodeBuilder::new(config, graceful_rx.clone()).build()?;
    let writer = tokio::spawn(write_outbound(outbound));

    let runner = {
        let node = node.clone();
        tokio::spawn(async move { node.run().await })
    };

    info!(node_id = %node.node_id(), "node started, reading requests from stdin");
    tokio::select! {
        _ = read_requests(node.clone()) => {
            info!("stdin closed");
        }
        result = wait_for_signal() => {
            if let Err(e) = result {
                error!("signal handling failed: {:?}", e);
            }
        }
    }

    if graceful_tx.send(()).is_err() {
        warn!("node loop already stopped");
    }
    match runner.await {
        Ok(Err(e)) => error!("node stops: {:?}", e),
        Err(e) => error!("node task failed: {:?}", e),
        Ok(Ok(())) => {}
    }

    // the writer ends once every sender is gone
    drop(node);
    if let Err(e) = writer.await {
        error!("writer task failed: {:?}", e);
    }

    info!("Shutdown completed");
    Ok(())
}

/// Serve JSON lines until stdin closes
async fn read_requests(node: Arc<Node>) {
    let outbound = node.outbound();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                error!("failed to read stdin: {:?}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let inbound: Inbound = match serde_json::from_str(&line) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("malformed request line: {}", e);
                continue;
            }
        };

        if inbound.event == DISCONNECT_EVENT {
            node.disconnect(&inbound.client);
            continue;
        }

        let result = match Request::decode(&inbound.event, inbound.data) {
            Ok(request) => node.handle(&inbound.client, request).await,
            Err(e) => Err(e),
        };
        let (result, error) = match result {
            Ok(value) => (Some(value), None),
            Err(e) => {
                debug!(client = %inbound.client, event = %inbound.event, "request failed: {}", e);
                (None, Some(e.to_payload()))
            }
        };
        let response = Outbound::Response {
            client: inbound.client,
            event: inbound.event,
            seq: inbound.seq,
            result,
            error,
        };
        if outbound.send(response).is_err() {
            return;
        }
    }
}

async fn write_outbound(mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = outbound.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                error!("failed to encode {:?}: {}", message, e);
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = stdout.write_all(&line).await {
            error!("failed to write stdout: {:?}", e);
            return;
        }
        if let Err(e) = stdout.flush().await {
            error!("failed to flush stdout: {:?}", e);
            return;
        }
    }
}

async fn wait_for_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }
    Ok(())
}

pub fn init_observability(
    node_id: &NodeId,
    log_dir: &Path,
) -> Result<WorkerGuard> {
    let dir = log_dir.join(node_id);
    std::fs::create_dir_all(&dir)
        .map_err(|e| Error::Fatal(format!("cannot create log dir {}: {}", dir.display(), e)))?;
    let log_file = tracing_appender::rolling::never(&dir, "cubes.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
