use std::sync::Arc;

use cubes::CubesConfig;
use cubes::ErrorKind;
use cubes::Node;
use cubes::NodeBuilder;
use cubes::Outbound;
use cubes::PartitionRange;
use cubes::Request;
use cubes::Result;
use serde_json::json;
use serde_json::Value as JsonValue;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::commons::wait_until;
use crate::commons::WAIT;
use crate::enable_logger;

struct TestNode {
    node: Arc<Node>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    shutdown_tx: watch::Sender<()>,
    runner: JoinHandle<Result<()>>,
    dir: TempDir,
}

impl TestNode {
    fn start() -> Self {
        enable_logger();
        let dir = TempDir::new().unwrap();
        let mut config = CubesConfig::default();
        config.cluster.node_id = "solo".to_string();
        config.blob.store_dir = dir.path().join("blobs");
        config.blob.cache_dir = dir.path().join("cache");
        config.entity.db_path = dir.path().join("entities");
        let config = config.validate().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (node, outbound) = NodeBuilder::new(config, shutdown_rx).build().unwrap();
        let runner = {
            let node = node.clone();
            tokio::spawn(async move { node.run().await })
        };
        Self {
            node,
            outbound,
            shutdown_tx,
            runner,
            dir,
        }
    }

    async fn call(
        &self,
        client_id: &str,
        event: &str,
        data: JsonValue,
    ) -> cubes::Result<JsonValue> {
        self.node.handle(client_id, Request::decode(event, data)?).await
    }

    /// Next client event named `name`
    async fn event(
        &mut self,
        name: &str,
    ) -> (Vec<String>, JsonValue) {
        loop {
            match timeout(WAIT, self.outbound.recv()).await {
                Ok(Some(Outbound::Event { clients, event, data })) if event == name => return (clients, data),
                Ok(Some(_)) => continue,
                other => panic!("no {} event: {:?}", name, other),
            }
        }
    }

    async fn stop(self) {
        self.shutdown_tx.send(()).unwrap();
        timeout(WAIT, self.runner).await.unwrap().unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_blob_requests_end_to_end() {
    let mut node = TestNode::start();
    let src = node.dir.path().join("file.bin");
    tokio::fs::write(&src, b"0123456789").await.unwrap();

    let ticket = node.call("c1", "blob.upload", json!({ "path": src })).await.unwrap();
    let blob_id = ticket["blobId"].as_str().unwrap().to_string();
    let (clients, data) = node.event("op.complete").await;
    assert_eq!(clients, vec!["c1".to_string()]);
    assert_eq!(data, json!({ "opId": ticket["opId"], "error": null }));

    let info = node.call("c1", "blob.info", json!({ "ids": [blob_id, "ffff"] })).await.unwrap();
    assert_eq!(info[0]["size"], json!(10));
    assert_eq!(info[1], JsonValue::Null);

    let state = node.call("c2", "blob.request", json!({ "id": blob_id })).await.unwrap();
    assert_eq!(state["status"], json!("downloading"));
    let (clients, _) = node.event("op.complete").await;
    assert_eq!(clients, vec!["c2".to_string()]);

    let state = node.call("c2", "blob.request", json!({ "id": blob_id })).await.unwrap();
    assert_eq!(state["status"], json!("ready"));
    let cached = state["file"].as_str().unwrap().to_string();
    assert_eq!(tokio::fs::read(&cached).await.unwrap(), b"0123456789");

    node.call("c2", "blob.release", json!({ "id": blob_id })).await.unwrap();
    node.call("c2", "blob.release", json!({ "id": blob_id })).await.unwrap();
    node.call("c1", "blob.remove", json!({ "ids": [blob_id] })).await.unwrap();
    let info = node.call("c1", "blob.info", json!({ "ids": [blob_id] })).await.unwrap();
    assert_eq!(info, json!([null]));

    node.stop().await;
}

#[tokio::test]
async fn test_request_errors_carry_their_kind() {
    let node = TestNode::start();

    let missing = node.call("c1", "blob.request", json!({ "id": "abcdef" })).await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    let abort = node.call("c1", "op.abort", json!({ "opId": 999 })).await.unwrap_err();
    assert_eq!(abort.kind(), ErrorKind::NotFound);
    assert_eq!(abort.to_payload()["id"], json!(999));

    let bad = node
        .call("c1", "entity.select", json!({ "type": "t", "method": "mtime", "keys": [] }))
        .await
        .unwrap_err();
    assert_eq!(bad.kind(), ErrorKind::BadParameter);

    let unknown = node.call("c1", "blob.explode", json!({})).await.unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::BadParameter);

    node.stop().await;
}

#[tokio::test]
async fn test_kv_between_local_clients() {
    let mut node = TestNode::start();
    let kv = node.node.kv().clone();
    wait_until(WAIT, || {
        let kv = kv.clone();
        async move { kv.local_parts() == Some(PartitionRange::all()) }
    })
    .await;

    node.call("w1", "kv.watch", json!({ "keys": ["config", "status"] })).await.unwrap();
    node.call("w2", "kv.watch", json!({ "keys": ["status"] })).await.unwrap();
    node.call("p", "kv.publish", json!({ "key": "status", "value": "up", "publisher": true }))
        .await
        .unwrap();

    let (clients, data) = node.event("kv.changed").await;
    assert_eq!(clients, vec!["w1".to_string(), "w2".to_string()]);
    assert_eq!(data, json!({ "key": "status", "value": "up" }));

    node.stop().await;
}
