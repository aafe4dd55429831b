//! DownloadMany: fetch a batch into a private staging directory, then pack
//! whatever succeeded into one deflate-compressed zip archive.

use log::{error, info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::context::OpContext;
use super::download::{fetch_to_file, TransferError};
use super::list::expand_targets;
use super::types::{OperationKind, OperationOutput, OperationRequest, OperationResult, Progress};
use crate::error::StorageError;

/// Map an object key onto a path below the staging root. Keys that would
/// escape it (absolute paths, `..` segments) are rejected.
pub(crate) fn staged_relative_path(key: &str) -> Result<PathBuf, StorageError> {
    let candidate = Path::new(key);
    if candidate.is_absolute() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let mut relative = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::InvalidKey(key.to_string()));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(relative)
}

/// Archive entry name for a staged file: its path below the staging root,
/// always `/`-separated.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Write every regular file under `staging` into a zip at `archive_path`,
/// named by its path relative to `staging`. Returns the number of files.
pub(crate) fn write_archive(staging: &Path, archive_path: &Path) -> io::Result<usize> {
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = 0;

    for entry in WalkDir::new(staging).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(staging)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let size = entry.metadata().map_err(io::Error::from)?.len();
        let options = deflated.large_file(size >= u64::from(u32::MAX));

        zip.start_file(entry_name(relative), options)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let mut source = File::open(entry.path())?;
        io::copy(&mut source, &mut zip)?;
        files += 1;
    }

    let mut writer = zip
        .finish()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    writer.flush()?;
    Ok(files)
}

async fn resolve_archive_path(ctx: &OpContext, destination: Option<&Path>) -> Result<PathBuf, StorageError> {
    let destination = destination
        .ok_or_else(|| StorageError::LocalIo("no archive destination given".to_string()))?;
    let is_dir = tokio::fs::metadata(destination)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if is_dir {
        return Ok(destination.join(&ctx.config.archive_file_name));
    }
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(destination.to_path_buf())
}

fn create_staging(ctx: &OpContext) -> io::Result<tempfile::TempDir> {
    let builder = {
        let mut builder = tempfile::Builder::new();
        builder.prefix("bucketview-staging-");
        builder
    };
    match &ctx.config.staging_root {
        Some(root) => {
            std::fs::create_dir_all(root)?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    }
}

pub(crate) async fn run_download_many(ctx: &OpContext, request: &OperationRequest) -> OperationResult {
    let mut result = OperationResult::new(ctx.id, OperationKind::DownloadMany);

    let archive_path = match resolve_archive_path(ctx, request.destination.as_deref()).await {
        Ok(path) => path,
        Err(err) => {
            warn!("archive_destination_failed: {} error={}", ctx.id, err);
            result.error = Some(err);
            return result;
        }
    };

    let staging = match create_staging(ctx) {
        Ok(dir) => dir,
        Err(err) => {
            error!("staging_create_failed: {} error={}", ctx.id, err);
            result.error = Some(err.into());
            return result;
        }
    };
    info!(
        "download_many_start: {} targets={} staging={}",
        ctx.id,
        request.target_keys.len(),
        staging.path().display()
    );

    let expansion = expand_targets(ctx, &request.target_keys, false).await;
    for (folder, err) in expansion.failed {
        result.record(&folder, Err(err));
    }
    result.cancelled = expansion.cancelled;

    let total = expansion.keys.len();
    for (done, key) in expansion.keys.iter().enumerate() {
        if result.cancelled || ctx.is_cancelled() {
            result.cancelled = true;
            break;
        }

        let outcome = match staged_relative_path(key) {
            Ok(relative) => {
                let path = staging.path().join(relative);
                let parent_ready = match path.parent() {
                    Some(parent) => tokio::fs::create_dir_all(parent).await.map_err(StorageError::from),
                    None => Ok(()),
                };
                match parent_ready {
                    Ok(()) => fetch_to_file(ctx, key, &path, false).await.map(|_| ()),
                    Err(err) => Err(TransferError::Failed(err)),
                }
            }
            Err(err) => Err(TransferError::Failed(err)),
        };

        match outcome {
            Ok(()) => result.record(key, Ok(())),
            Err(TransferError::Cancelled) => {
                result.cancelled = true;
                break;
            }
            Err(TransferError::Failed(err)) => {
                warn!("download_many_item_failed: {} {} error={}", ctx.id, key, err);
                result.record(key, Err(err));
            }
        }
        ctx.progress(Progress::Items {
            done: done + 1,
            total,
            key: key.clone(),
        });
    }

    if !result.cancelled && !result.succeeded_keys.is_empty() {
        let staging_path = staging.path().to_path_buf();
        let target = archive_path.clone();
        let packed = tokio::task::spawn_blocking(move || write_archive(&staging_path, &target))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .and_then(|r| r);

        match packed {
            Ok(files) => {
                info!(
                    "archive_created: {} path={} files={} failed={}",
                    ctx.id,
                    archive_path.display(),
                    files,
                    result.failed_keys.len()
                );
                result.output = OperationOutput::Archive {
                    path: archive_path,
                    files,
                };
            }
            Err(err) => {
                error!("archive_failed: {} path={} error={}", ctx.id, archive_path.display(), err);
                let _ = tokio::fs::remove_file(&archive_path).await;
                let err = StorageError::from(err);
                for key in std::mem::take(&mut result.succeeded_keys) {
                    result.failed_keys.insert(key, err.clone());
                }
                result.error = Some(err);
            }
        }
    }

    if let Err(err) = staging.close() {
        warn!("staging_cleanup_failed: {} error={}", ctx.id, err);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::storage::memory::MemoryStore;
    use crate::worker::context::testing::{context, fast_config};
    use crate::worker::types::OperationStatus;
    use std::collections::BTreeMap;
    use std::io::Read;
    use std::sync::Arc;

    fn read_archive(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut files = BTreeMap::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            assert_eq!(entry.compression(), CompressionMethod::Deflated);
            let name = entry.name().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            files.insert(name, data);
        }
        files
    }

    fn staging_config(root: &Path) -> WorkerConfig {
        WorkerConfig {
            staging_root: Some(root.to_path_buf()),
            ..fast_config()
        }
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[test]
    fn keys_map_below_staging_root() {
        assert_eq!(staged_relative_path("a/b.txt").unwrap(), PathBuf::from("a").join("b.txt"));
        assert_eq!(staged_relative_path("a//./b").unwrap(), PathBuf::from("a").join("b"));
        assert!(matches!(staged_relative_path("../etc/passwd"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(staged_relative_path("a/../../x"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(staged_relative_path("/abs"), Err(StorageError::InvalidKey(_))));
        assert!(staged_relative_path("").is_err());
    }

    #[tokio::test]
    async fn partial_failure_archives_the_rest() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("a/one.txt", b"first");
        store.put("a/deep/two.txt", b"second");
        store.put("three.txt", b"third");
        store.fail_get("a/deep/two.txt", StorageError::AccessDenied("denied".into()), None);
        let staging_root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let (ctx, _rx) = context(store, staging_config(staging_root.path()));

        let request = OperationRequest::download_many(
            vec!["a/".to_string(), "three.txt".to_string(), "missing.txt".to_string()],
            out.path(),
        );
        let result = run_download_many(&ctx, &request).await;

        assert_eq!(result.status(), OperationStatus::Completed);
        assert_eq!(
            result.succeeded_keys.iter().collect::<Vec<_>>(),
            vec!["a/one.txt", "three.txt"]
        );
        assert!(matches!(result.failed_keys["a/deep/two.txt"], StorageError::AccessDenied(_)));
        assert!(result.failed_keys["missing.txt"].is_not_found());

        let archive_path = out.path().join("s3_download.zip");
        assert_eq!(
            result.output,
            OperationOutput::Archive {
                path: archive_path.clone(),
                files: 2
            }
        );
        let files = read_archive(&archive_path);
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["a/one.txt", "three.txt"]);
        assert_eq!(files["a/one.txt"], b"first");
        assert_eq!(files["three.txt"], b"third");

        assert!(is_empty_dir(staging_root.path()));
    }

    #[tokio::test]
    async fn nothing_succeeded_means_no_archive() {
        let store = Arc::new(MemoryStore::new("bucket"));
        let staging_root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let (ctx, _rx) = context(store, staging_config(staging_root.path()));

        let request = OperationRequest::download_many(vec!["gone.txt".to_string()], out.path());
        let result = run_download_many(&ctx, &request).await;

        assert_eq!(result.status(), OperationStatus::Failed);
        assert_eq!(result.output, OperationOutput::None);
        assert!(is_empty_dir(out.path()));
        assert!(is_empty_dir(staging_root.path()));
    }

    #[tokio::test]
    async fn cancelled_batch_leaves_nothing_behind() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("x.txt", b"x");
        let staging_root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let (ctx, _rx) = context(store, staging_config(staging_root.path()));
        ctx.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);

        let request = OperationRequest::download_many(vec!["x.txt".to_string()], out.path());
        let result = run_download_many(&ctx, &request).await;

        assert_eq!(result.status(), OperationStatus::Cancelled);
        assert!(is_empty_dir(out.path()));
        assert!(is_empty_dir(staging_root.path()));
    }

    #[tokio::test]
    async fn explicit_archive_file_name() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("k", b"v");
        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("exports").join("batch.zip");
        let (ctx, _rx) = context(store, fast_config());

        let request = OperationRequest::download_many(vec!["k".to_string()], &target);
        let result = run_download_many(&ctx, &request).await;

        assert!(result.succeeded_keys.contains("k"));
        assert_eq!(read_archive(&target).len(), 1);
    }

    #[tokio::test]
    async fn unwritable_archive_marks_everything_failed() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("k", b"v");
        let out = tempfile::tempdir().unwrap();
        // A directory already occupies the archive's file name.
        std::fs::create_dir(out.path().join("taken")).unwrap();
        let config = WorkerConfig {
            archive_file_name: "taken".to_string(),
            ..fast_config()
        };
        let (ctx, _rx) = context(store, config);

        let request = OperationRequest::download_many(vec!["k".to_string()], out.path());
        let result = run_download_many(&ctx, &request).await;

        assert_eq!(result.status(), OperationStatus::Failed);
        assert!(result.succeeded_keys.is_empty());
        assert!(matches!(result.failed_keys["k"], StorageError::LocalIo(_)));
        assert!(matches!(result.error, Some(StorageError::LocalIo(_))));
        assert_eq!(result.output, OperationOutput::None);
    }
}
