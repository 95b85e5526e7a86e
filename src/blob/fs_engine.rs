use std::path::Path;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;

use async_trait::async_trait;
use nanoid::nanoid;
use tokio::fs;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::BlobEngine;
use super::BlobId;
use super::BlobInfo;
use super::EngineOp;
use super::OpReporter;
use crate::utils::time::system_time_millis;
use crate::BlobError;
use crate::Result;
use crate::BUCKET_PREFIX_LEN;
use crate::HEX_ALPHABET;

/// Length of generated blob ids
const BLOB_ID_LEN: usize = 32;

/// One file copy executed by an external `cp` process.
///
/// Reports progress 0 when the process starts and 100 when it exits cleanly.
/// A failed or aborted copy removes the partial destination before completing.
#[derive(Debug)]
pub struct CopyOp {
    cancel: CancellationToken,
}

impl CopyOp {
    pub fn start(
        src: PathBuf,
        dst: PathBuf,
        reporter: OpReporter,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            let error = run_copy(&src, &dst, &reporter, token).await;
            reporter.complete(error);
        });
        Self { cancel }
    }
}

impl EngineOp for CopyOp {
    fn abort(&self) {
        self.cancel.cancel();
    }
}

async fn run_copy(
    src: &Path,
    dst: &Path,
    reporter: &OpReporter,
    cancel: CancellationToken,
) -> Option<BlobError> {
    let mut child = match Command::new("cp")
        .arg(src)
        .arg(dst)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!(op_id = reporter.op_id(), "failed to spawn cp: {}", e);
            return Some(BlobError::Engine(e.to_string()));
        }
    };
    reporter.progress(0);

    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            debug!(op_id = reporter.op_id(), "killing copy process");
            if let Err(e) = child.kill().await {
                warn!(op_id = reporter.op_id(), "failed to kill copy process: {}", e);
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) if status.success() => {
            reporter.progress(100);
            None
        }
        Ok(status) => {
            remove_partial(dst).await;
            if cancel.is_cancelled() {
                Some(BlobError::Aborted)
            } else {
                Some(BlobError::ProcessFailure {
                    code: status.code(),
                    signal: exit_signal(&status),
                })
            }
        }
        Err(e) => {
            remove_partial(dst).await;
            Some(BlobError::Engine(e.to_string()))
        }
    }
}

async fn remove_partial(dst: &Path) {
    if let Err(e) = fs::remove_file(dst).await {
        debug!(dst = %dst.display(), "partial file not removed: {}", e);
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Blob engine over a local (or mounted) directory.
///
/// Blobs live at `<base_dir>/<id[0..2]>/<id[2..]>`.
#[derive(Debug, Clone)]
pub struct FsBlobEngine {
    base_dir: PathBuf,
}

impl FsBlobEngine {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn blob_file(
        &self,
        blob_id: &str,
    ) -> Result<PathBuf> {
        if blob_id.len() <= BUCKET_PREFIX_LEN || !blob_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BlobError::NotFound(blob_id.to_string()).into());
        }
        let (bucket, rest) = blob_id.split_at(BUCKET_PREFIX_LEN);
        Ok(self.base_dir.join(bucket).join(rest))
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl BlobEngine for FsBlobEngine {
    #[instrument(skip(self, reporter))]
    async fn upload(
        &self,
        local_file: &Path,
        reporter: OpReporter,
    ) -> Result<(BlobId, Box<dyn EngineOp>)> {
        let blob_id = nanoid!(BLOB_ID_LEN, &HEX_ALPHABET);
        let dst = self.blob_file(&blob_id)?;
        ensure_parent(&dst).await?;
        let op = CopyOp::start(local_file.to_path_buf(), dst, reporter);
        Ok((blob_id, Box::new(op)))
    }

    #[instrument(skip(self, reporter))]
    async fn download(
        &self,
        blob_id: &str,
        dest: &Path,
        reporter: OpReporter,
    ) -> Result<Box<dyn EngineOp>> {
        let src = self.blob_file(blob_id)?;
        if !fs::try_exists(&src).await? {
            return Err(BlobError::NotFound(blob_id.to_string()).into());
        }
        ensure_parent(dest).await?;
        let op = CopyOp::start(src, dest.to_path_buf(), reporter);
        Ok(Box::new(op))
    }

    async fn info(
        &self,
        blob_ids: &[BlobId],
    ) -> Result<Vec<Option<BlobInfo>>> {
        let mut infos = Vec::with_capacity(blob_ids.len());
        for blob_id in blob_ids {
            let Ok(file) = self.blob_file(blob_id) else {
                infos.push(None);
                continue;
            };
            let info = match fs::metadata(&file).await {
                Ok(meta) if meta.is_file() => {
                    let mtime_ms = meta.modified().map(system_time_millis).unwrap_or_default();
                    Some(BlobInfo {
                        size: meta.len(),
                        mtime_ms,
                        ctime_ms: meta.created().map(system_time_millis).unwrap_or(mtime_ms),
                    })
                }
                _ => None,
            };
            infos.push(info);
        }
        Ok(infos)
    }

    async fn remove(
        &self,
        blob_ids: &[BlobId],
    ) -> Result<()> {
        for blob_id in blob_ids {
            let Ok(file) = self.blob_file(blob_id) else {
                continue;
            };
            if let Err(e) = fs::remove_file(&file).await {
                debug!(%blob_id, "blob not removed: {}", e);
            }
        }
        Ok(())
    }
}
