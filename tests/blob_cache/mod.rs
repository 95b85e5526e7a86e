use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cubes::BlobError;
use cubes::BlobStatus;
use cubes::BlobStore;
use cubes::FsBlobEngine;
use cubes::OpIdAllocator;
use cubes::OpNotification;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::commons::wait_until;
use crate::commons::WAIT;
use crate::enable_logger;

struct Env {
    dir: TempDir,
    engine: Arc<FsBlobEngine>,
}

impl Env {
    fn new() -> Self {
        enable_logger();
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FsBlobEngine::new(dir.path().join("store")));
        Self { dir, engine }
    }

    fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    fn store(&self) -> (BlobStore, mpsc::UnboundedReceiver<OpNotification>) {
        BlobStore::new(self.engine.clone(), self.cache_dir(), Arc::new(OpIdAllocator::new()))
    }
}

async fn completion(
    rx: &mut mpsc::UnboundedReceiver<OpNotification>,
    op_id: u64,
) -> (Option<BlobError>, Vec<String>) {
    loop {
        match timeout(WAIT, rx.recv()).await {
            Ok(Some(OpNotification::Complete {
                op_id: id,
                error,
                clients,
            })) if id == op_id => return (error, clients),
            Ok(Some(_)) => continue,
            other => panic!("no completion for op {}: {:?}", op_id, other),
        }
    }
}

fn marker(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".ready");
    PathBuf::from(name)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap()
}

#[tokio::test]
async fn test_upload_then_shared_download_then_cleanup() {
    let env = Env::new();
    let (store, mut rx) = env.store();
    let src = env.dir.path().join("input.txt");
    tokio::fs::write(&src, b"payload").await.unwrap();

    let ticket = store.upload("uploader", &src).await.unwrap();
    let (error, clients) = completion(&mut rx, ticket.op_id).await;
    assert_eq!(error, None);
    assert_eq!(clients, vec!["uploader".to_string()]);

    let first = store.request("c1", &ticket.blob_id).await.unwrap();
    let second = store.request("c2", &ticket.blob_id).await.unwrap();
    let op_id = match (&first.status, &second.status) {
        (BlobStatus::Downloading { op_id: a, .. }, BlobStatus::Downloading { op_id: b, .. }) => {
            assert_eq!(a, b);
            *a
        }
        other => panic!("expected one shared download, got {:?}", other),
    };
    assert_eq!(first.file, second.file);

    let (error, clients) = completion(&mut rx, op_id).await;
    assert_eq!(error, None);
    assert_eq!(clients, vec!["c1".to_string(), "c2".to_string()]);
    assert_eq!(tokio::fs::read(&first.file).await.unwrap(), b"payload");
    let ready = marker(&first.file);
    wait_until(WAIT, || {
        let ready = ready.clone();
        async move { exists(&ready).await }
    })
    .await;

    // still referenced by c2: survives a sweep
    store.release("c1", &ticket.blob_id);
    store.cleanup(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(exists(&first.file).await);

    store.release("c2", &ticket.blob_id);
    store.cleanup(Duration::ZERO);
    let file = first.file.clone();
    wait_until(WAIT, || {
        let file = file.clone();
        async move { !exists(&file).await }
    })
    .await;
    assert!(!exists(&ready).await);
}

#[tokio::test]
async fn test_ready_cache_survives_store_restart() {
    let env = Env::new();
    let src = env.dir.path().join("input.txt");
    tokio::fs::write(&src, b"kept").await.unwrap();

    let blob_id = {
        let (store, mut rx) = env.store();
        let ticket = store.upload("u", &src).await.unwrap();
        completion(&mut rx, ticket.op_id).await;
        let state = store.request("c1", &ticket.blob_id).await.unwrap();
        if let BlobStatus::Downloading { op_id, .. } = state.status {
            completion(&mut rx, op_id).await;
        }
        let ready = marker(&state.file);
        wait_until(WAIT, || {
            let ready = ready.clone();
            async move { exists(&ready).await }
        })
        .await;
        ticket.blob_id
    };

    let (store, mut rx) = env.store();
    let state = store.request("c9", &blob_id).await.unwrap();

    assert_eq!(state.status, BlobStatus::Ready);
    assert_eq!(tokio::fs::read(&state.file).await.unwrap(), b"kept");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_unknown_blob_request_fails_and_is_forgotten() {
    let env = Env::new();
    let (store, _rx) = env.store();

    let result = store.request("c1", "0123456789abcdef").await;

    assert!(result.is_err());
    assert!(store.list_ops("c1").is_empty());
    // a retry goes back to the engine instead of a cached failure
    assert!(store.request("c1", "0123456789abcdef").await.is_err());
}
