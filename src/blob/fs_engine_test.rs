use std::path::Path;

use tempfile::TempDir;
use tokio::sync::mpsc;

use super::*;
use crate::test_utils::channel_reporter;
use crate::test_utils::enable_logger;
use crate::BlobError;
use crate::Error;

async fn recv_until_complete(rx: &mut mpsc::UnboundedReceiver<(OpId, OpEvent)>) -> Vec<OpEvent> {
    let mut events = Vec::new();
    while let Some((_, event)) = rx.recv().await {
        let done = matches!(event, OpEvent::Complete(_));
        events.push(event);
        if done {
            break;
        }
    }
    events
}

#[tokio::test]
async fn test_upload_then_download_copies_content() {
    enable_logger();
    let dir = TempDir::new().unwrap();
    let engine = FsBlobEngine::new(dir.path().join("store"));
    let src = dir.path().join("input.bin");
    tokio::fs::write(&src, b"blob content").await.unwrap();

    let (reporter, mut rx) = channel_reporter(1);
    let (blob_id, _op) = engine.upload(&src, reporter).await.unwrap();

    assert_eq!(blob_id.len(), 32);
    assert!(blob_id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_eq!(
        recv_until_complete(&mut rx).await,
        vec![OpEvent::Progress(0), OpEvent::Progress(100), OpEvent::Complete(None)]
    );
    let stored = dir.path().join("store").join(&blob_id[..2]).join(&blob_id[2..]);
    assert_eq!(tokio::fs::read(&stored).await.unwrap(), b"blob content");

    let dest = dir.path().join("cache").join("nested").join("copy");
    let (reporter, mut rx) = channel_reporter(2);
    let _op = engine.download(&blob_id, &dest, reporter).await.unwrap();

    assert_eq!(recv_until_complete(&mut rx).await.last(), Some(&OpEvent::Complete(None)));
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"blob content");
}

#[tokio::test]
async fn test_download_unknown_blob_is_not_found() {
    enable_logger();
    let dir = TempDir::new().unwrap();
    let engine = FsBlobEngine::new(dir.path());

    for id in ["0123456789abcdef", "../../etc/passwd", "a"] {
        let (reporter, _rx) = channel_reporter(1);
        let result = engine.download(id, &dir.path().join("out"), reporter).await;
        assert!(
            matches!(result, Err(Error::Blob(BlobError::NotFound(ref missing))) if missing == id),
            "id {:?}",
            id
        );
    }
}

#[tokio::test]
async fn test_copy_failure_reports_exit_code() {
    enable_logger();
    let dir = TempDir::new().unwrap();
    let engine = FsBlobEngine::new(dir.path().join("store"));

    let (reporter, mut rx) = channel_reporter(1);
    let (_blob_id, _op) = engine
        .upload(&dir.path().join("does-not-exist"), reporter)
        .await
        .unwrap();

    match recv_until_complete(&mut rx).await.last() {
        Some(OpEvent::Complete(Some(BlobError::ProcessFailure { code, signal }))) => {
            assert!(matches!(code, Some(c) if *c != 0));
            assert_eq!(*signal, None);
        }
        other => panic!("unexpected completion {:?}", other),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_abort_kills_copy_and_removes_partial_file() {
    enable_logger();
    let dir = TempDir::new().unwrap();
    // reading a fifo without a writer blocks the copy until it is killed
    let fifo = dir.path().join("fifo");
    let status = std::process::Command::new("mkfifo").arg(&fifo).status().unwrap();
    assert!(status.success());
    let dest = dir.path().join("partial");

    let (reporter, mut rx) = channel_reporter(7);
    let op = CopyOp::start(fifo, dest.clone(), reporter);

    assert_eq!(rx.recv().await, Some((7, OpEvent::Progress(0))));
    op.abort();

    assert_eq!(rx.recv().await, Some((7, OpEvent::Complete(Some(BlobError::Aborted)))));
    assert!(!tokio::fs::try_exists(&dest).await.unwrap());
}

#[tokio::test]
async fn test_info_and_remove() {
    enable_logger();
    let dir = TempDir::new().unwrap();
    let engine = FsBlobEngine::new(dir.path());
    let stored = dir.path().join("ab").join("cdef");
    tokio::fs::create_dir_all(stored.parent().unwrap()).await.unwrap();
    tokio::fs::write(&stored, b"12345").await.unwrap();

    let ids = vec!["abcdef".to_string(), "abcd00".to_string(), "zz".to_string()];
    let infos = engine.info(&ids).await.unwrap();

    assert_eq!(infos.len(), 3);
    let info = infos[0].unwrap();
    assert_eq!(info.size, 5);
    assert!(info.mtime_ms > 0);
    assert!(info.ctime_ms > 0);
    assert_eq!(infos[1], None);
    assert_eq!(infos[2], None);

    // unknown ids are skipped silently
    engine.remove(&ids).await.unwrap();
    assert!(!Path::new(&stored).exists());
}
