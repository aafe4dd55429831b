//! Streaming object reads: single-file downloads and preview fetches

use futures_util::StreamExt;
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::context::OpContext;
use super::types::{OperationKind, OperationOutput, OperationRequest, OperationResult, Progress};
use crate::error::StorageError;
use crate::format::display_name;
use crate::preview::Preview;
use crate::storage::is_folder_key;

pub(crate) enum TransferError {
    Cancelled,
    Failed(StorageError),
}

impl From<StorageError> for TransferError {
    fn from(err: StorageError) -> Self {
        TransferError::Failed(err)
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Failed(err.into())
    }
}

/// Stream `key` into `path`, retrying transient failures from the start.
/// Bytes land in a sibling temp file that only replaces `path` once the
/// whole object is written, so a failed or cancelled download never touches
/// a file already there.
pub(crate) async fn fetch_to_file(
    ctx: &OpContext,
    key: &str,
    path: &Path,
    report_bytes: bool,
) -> Result<u64, TransferError> {
    let mut retry = ctx.retry(key);
    loop {
        match stream_once(ctx, key, path, report_bytes).await {
            Err(TransferError::Failed(err)) => {
                if !retry.again(&err).await {
                    return Err(TransferError::Failed(err));
                }
            }
            other => return other,
        }
    }
}

async fn stream_once(
    ctx: &OpContext,
    key: &str,
    path: &Path,
    report_bytes: bool,
) -> Result<u64, TransferError> {
    let body = ctx.store.get_object(key).await?;
    let total = body.content_length;
    let mut chunks = body.chunks;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    // Removed on drop unless persisted below.
    let (std_file, part_path) = tempfile::Builder::new()
        .prefix(".bucketview-")
        .suffix(".part")
        .tempfile_in(parent)?
        .into_parts();
    let mut file = tokio::fs::File::from_std(std_file);
    let buffer_size = ctx.config.write_buffer_size.max(1);
    let mut write_buffer = Vec::with_capacity(buffer_size);
    let mut written: u64 = 0;

    while let Some(chunk) = chunks.next().await {
        if ctx.is_cancelled() {
            info!("download_cancelled: {} {} written={}", ctx.id, key, written);
            return Err(TransferError::Cancelled);
        }
        let chunk = chunk?;
        written += chunk.len() as u64;
        write_buffer.extend_from_slice(&chunk);

        // Flush when buffer is full
        if write_buffer.len() >= buffer_size {
            file.write_all(&write_buffer).await?;
            write_buffer.clear();
            if report_bytes {
                ctx.progress(Progress::Bytes {
                    key: key.to_string(),
                    transferred: written,
                    total,
                });
            }
        }
    }

    if !write_buffer.is_empty() {
        file.write_all(&write_buffer).await?;
    }
    file.flush().await?;
    drop(file);
    part_path.persist(path).map_err(|e| e.error)?;

    if report_bytes {
        ctx.progress(Progress::Bytes {
            key: key.to_string(),
            transferred: written,
            total,
        });
    }
    Ok(written)
}

/// File path for a single download. An existing directory receives the
/// object's base name; anything else is taken as the file path itself.
async fn resolve_file_destination(key: &str, destination: Option<&Path>) -> Result<PathBuf, StorageError> {
    let destination = destination
        .ok_or_else(|| StorageError::LocalIo("no download destination given".to_string()))?;

    if tokio::fs::metadata(destination)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        let name = display_name(key);
        if name.is_empty() || name == "." || name == ".." {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        return Ok(destination.join(name));
    }

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(destination.to_path_buf())
}

pub(crate) async fn run_download_one(ctx: &OpContext, request: &OperationRequest) -> OperationResult {
    let mut result = OperationResult::new(ctx.id, OperationKind::DownloadOne);
    let key = request.primary_target();
    if key.is_empty() || is_folder_key(key) {
        result.record(key, Err(StorageError::InvalidKey(key.to_string())));
        return result;
    }

    let path = match resolve_file_destination(key, request.destination.as_deref()).await {
        Ok(path) => path,
        Err(err) => {
            warn!("download_destination_failed: {} {} error={}", ctx.id, key, err);
            result.record(key, Err(err));
            return result;
        }
    };

    info!("download_start: {} {} -> {}", ctx.id, key, path.display());
    match fetch_to_file(ctx, key, &path, true).await {
        Ok(bytes) => {
            info!("download_finish: {} {} bytes={}", ctx.id, key, bytes);
            result.record(key, Ok(()));
            result.output = OperationOutput::File { path, bytes };
        }
        Err(TransferError::Cancelled) => result.cancelled = true,
        Err(TransferError::Failed(err)) => {
            warn!("download_failed: {} {} error={}", ctx.id, key, err);
            result.record(key, Err(err));
        }
    }
    result
}

struct Head {
    content_type: Option<String>,
    bytes: Vec<u8>,
    truncated: bool,
}

/// Read at most `preview_max_bytes` of `key`.
async fn read_head(ctx: &OpContext, key: &str) -> Result<Head, TransferError> {
    let mut retry = ctx.retry(key);
    loop {
        match read_head_once(ctx, key).await {
            Err(TransferError::Failed(err)) => {
                if !retry.again(&err).await {
                    return Err(TransferError::Failed(err));
                }
            }
            other => return other,
        }
    }
}

async fn read_head_once(ctx: &OpContext, key: &str) -> Result<Head, TransferError> {
    let limit = ctx.config.preview_max_bytes;
    let body = ctx.store.get_object(key).await?;
    let mut chunks = body.chunks;
    let mut bytes = Vec::new();
    let mut truncated = false;

    while let Some(chunk) = chunks.next().await {
        if ctx.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        bytes.extend_from_slice(&chunk?);
        if bytes.len() > limit {
            bytes.truncate(limit);
            truncated = true;
            break;
        }
    }

    Ok(Head {
        content_type: body.content_type,
        bytes,
        truncated,
    })
}

pub(crate) async fn run_preview(ctx: &OpContext, key: &str) -> OperationResult {
    let mut result = OperationResult::new(ctx.id, OperationKind::Preview);
    if key.is_empty() || is_folder_key(key) {
        result.record(key, Err(StorageError::InvalidKey(key.to_string())));
        return result;
    }

    match read_head(ctx, key).await {
        Ok(head) => {
            let preview = Preview::build(
                key,
                head.content_type.as_deref(),
                head.bytes,
                head.truncated,
                ctx.config.csv_sample_rows,
            );
            info!(
                "preview_ready: {} {} mode={} bytes={} truncated={}",
                ctx.id,
                key,
                preview.mode,
                preview.bytes.len(),
                preview.truncated
            );
            result.record(key, Ok(()));
            result.output = OperationOutput::Preview(preview);
        }
        Err(TransferError::Cancelled) => result.cancelled = true,
        Err(TransferError::Failed(err)) => {
            warn!("preview_failed: {} {} error={}", ctx.id, key, err);
            result.record(key, Err(err));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::preview::PreviewMode;
    use crate::storage::memory::MemoryStore;
    use crate::worker::context::testing::{context, fast_config};
    use crate::worker::types::{OperationStatus, WorkerEvent};
    use std::sync::Arc;

    #[tokio::test]
    async fn downloads_into_directory_by_base_name() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("docs/report.txt", b"hello world, this is a report");
        let (ctx, mut rx) = context(store, fast_config());
        let dir = tempfile::tempdir().unwrap();

        let request = OperationRequest::download_one("docs/report.txt", dir.path());
        let result = run_download_one(&ctx, &request).await;

        let path = dir.path().join("report.txt");
        assert_eq!(result.status(), OperationStatus::Completed);
        assert_eq!(
            result.output,
            OperationOutput::File {
                path: path.clone(),
                bytes: 29
            }
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world, this is a report");

        let mut last = None;
        while let Ok(WorkerEvent::Progress { progress, .. }) = rx.try_recv() {
            last = Some(progress);
        }
        assert_eq!(
            last,
            Some(Progress::Bytes {
                key: "docs/report.txt".into(),
                transferred: 29,
                total: Some(29)
            })
        );
    }

    #[tokio::test]
    async fn explicit_file_path_creates_parents() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("a.bin", &[1, 2, 3]);
        let (ctx, _rx) = context(store, fast_config());
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("copy.bin");

        let result = run_download_one(&ctx, &OperationRequest::download_one("a.bin", &target)).await;
        assert!(result.succeeded_keys.contains("a.bin"));
        assert_eq!(std::fs::read(&target).unwrap(), vec![1u8, 2, 3]);
    }

    #[tokio::test]
    async fn mid_stream_failure_leaves_no_partial_file() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("big.dat", &[7u8; 64]);
        store.fail_mid_stream("big.dat");
        let config = WorkerConfig {
            max_attempts: 2,
            write_buffer_size: 1,
            ..fast_config()
        };
        let (ctx, _rx) = context(store.clone(), config);
        let dir = tempfile::tempdir().unwrap();

        let result = run_download_one(&ctx, &OperationRequest::download_one("big.dat", dir.path())).await;

        assert_eq!(result.status(), OperationStatus::Failed);
        assert!(matches!(result.failed_keys["big.dat"], StorageError::Network(_)));
        assert!(!dir.path().join("big.dat").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(store.get_calls(), 2);
    }

    #[tokio::test]
    async fn transient_get_failure_is_retried() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("flaky.txt", b"eventually");
        store.fail_get("flaky.txt", StorageError::Throttled("slow down".into()), Some(2));
        let (ctx, _rx) = context(store.clone(), fast_config());
        let dir = tempfile::tempdir().unwrap();

        let result = run_download_one(&ctx, &OperationRequest::download_one("flaky.txt", dir.path())).await;
        assert_eq!(result.status(), OperationStatus::Completed);
        assert_eq!(store.get_calls(), 3);
    }

    #[tokio::test]
    async fn missing_object_suggests_relist() {
        let store = Arc::new(MemoryStore::new("bucket"));
        let (ctx, _rx) = context(store.clone(), fast_config());
        let dir = tempfile::tempdir().unwrap();

        let result = run_download_one(&ctx, &OperationRequest::download_one("gone.txt", dir.path())).await;
        assert!(result.suggests_relist());
        assert_eq!(store.get_calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_download_removes_partial_file() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("movie.mp4", &[0u8; 32]);
        let (ctx, _rx) = context(store, fast_config());
        ctx.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
        let dir = tempfile::tempdir().unwrap();

        let result = run_download_one(&ctx, &OperationRequest::download_one("movie.mp4", dir.path())).await;
        assert_eq!(result.status(), OperationStatus::Cancelled);
        assert!(!dir.path().join("movie.mp4").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_download_keeps_existing_local_file() {
        let store = Arc::new(MemoryStore::new("bucket"));
        let (ctx, _rx) = context(store, fast_config());
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("report.txt");
        std::fs::write(&existing, b"user data").unwrap();

        let result =
            run_download_one(&ctx, &OperationRequest::download_one("docs/report.txt", dir.path())).await;

        assert!(matches!(result.failed_keys["docs/report.txt"], StorageError::NotFound(_)));
        assert_eq!(std::fs::read(&existing).unwrap(), b"user data");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn interrupted_download_keeps_existing_local_file() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("report.txt", &[9u8; 40]);
        store.fail_mid_stream("report.txt");
        let config = WorkerConfig {
            max_attempts: 1,
            write_buffer_size: 1,
            ..fast_config()
        };
        let (ctx, _rx) = context(store, config);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("report.txt");
        std::fs::write(&target, b"user data").unwrap();

        let result = run_download_one(&ctx, &OperationRequest::download_one("report.txt", &target)).await;

        assert_eq!(result.status(), OperationStatus::Failed);
        assert_eq!(std::fs::read(&target).unwrap(), b"user data");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn successful_download_replaces_existing_file() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("report.txt", b"fresh");
        let (ctx, _rx) = context(store, fast_config());
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("report.txt");
        std::fs::write(&target, b"stale contents").unwrap();

        let result = run_download_one(&ctx, &OperationRequest::download_one("report.txt", &target)).await;

        assert_eq!(result.status(), OperationStatus::Completed);
        assert_eq!(std::fs::read(&target).unwrap(), b"fresh");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn preview_is_capped_and_classified() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("notes.txt", b"0123456789abcdefghij");
        store.put("table.csv", b"a,b\n1,2\n3,4\n");
        let config = WorkerConfig {
            preview_max_bytes: 16,
            ..fast_config()
        };
        let (ctx, _rx) = context(store, config);

        let result = run_preview(&ctx, "notes.txt").await;
        let OperationOutput::Preview(preview) = result.output else {
            panic!("expected preview");
        };
        assert_eq!(preview.bytes, b"0123456789abcdef");
        assert!(preview.truncated);
        assert_eq!(preview.mode, PreviewMode::Text);

        let result = run_preview(&ctx, "table.csv").await;
        let OperationOutput::Preview(preview) = result.output else {
            panic!("expected preview");
        };
        assert!(!preview.truncated);
        assert_eq!(preview.mode, PreviewMode::CsvTable);
    }

    #[tokio::test]
    async fn folder_keys_cannot_be_previewed() {
        let (ctx, _rx) = context(Arc::new(MemoryStore::new("bucket")), fast_config());
        let result = run_preview(&ctx, "dir/").await;
        assert!(matches!(result.failed_keys["dir/"], StorageError::InvalidKey(_)));
    }
}
