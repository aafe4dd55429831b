//! Operation requests, results and the events the worker emits

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::StorageError;
use crate::preview::Preview;
use crate::storage::ObjectEntry;

/// Unique within the process, across every worker.
pub type OperationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    List,
    DownloadOne,
    DownloadMany,
    DeleteMany,
    Preview,
    ListBuckets,
    CheckBucketAccess,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::List => write!(f, "list"),
            OperationKind::DownloadOne => write!(f, "download_one"),
            OperationKind::DownloadMany => write!(f, "download_many"),
            OperationKind::DeleteMany => write!(f, "delete_many"),
            OperationKind::Preview => write!(f, "preview"),
            OperationKind::ListBuckets => write!(f, "list_buckets"),
            OperationKind::CheckBucketAccess => write!(f, "check_bucket_access"),
        }
    }
}

/// A unit of background work. Immutable once submitted.
///
/// `target_keys` holds the prefix for `List`, the bucket name for
/// `CheckBucketAccess`, and object or folder keys (`a/b/`) otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub target_keys: Vec<String>,
    pub destination: Option<PathBuf>,
}

impl OperationRequest {
    fn new(kind: OperationKind, target_keys: Vec<String>, destination: Option<PathBuf>) -> Self {
        Self {
            kind,
            target_keys,
            destination,
        }
    }

    pub fn list(prefix: &str) -> Self {
        Self::new(OperationKind::List, vec![prefix.to_string()], None)
    }

    pub fn download_one(key: &str, destination: impl Into<PathBuf>) -> Self {
        Self::new(
            OperationKind::DownloadOne,
            vec![key.to_string()],
            Some(destination.into()),
        )
    }

    pub fn download_many(keys: Vec<String>, destination: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::DownloadMany, keys, Some(destination.into()))
    }

    pub fn delete_many(keys: Vec<String>) -> Self {
        Self::new(OperationKind::DeleteMany, keys, None)
    }

    pub fn preview(key: &str) -> Self {
        Self::new(OperationKind::Preview, vec![key.to_string()], None)
    }

    pub fn list_buckets() -> Self {
        Self::new(OperationKind::ListBuckets, Vec::new(), None)
    }

    pub fn check_bucket_access(bucket: &str) -> Self {
        Self::new(OperationKind::CheckBucketAccess, vec![bucket.to_string()], None)
    }

    /// First target, or `""` when there is none.
    pub fn primary_target(&self) -> &str {
        self.target_keys.first().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Queued => write!(f, "queued"),
            OperationStatus::Running => write!(f, "running"),
            OperationStatus::Completed => write!(f, "completed"),
            OperationStatus::Failed => write!(f, "failed"),
            OperationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<String> for OperationStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "queued" => OperationStatus::Queued,
            "running" => OperationStatus::Running,
            "completed" => OperationStatus::Completed,
            "failed" => OperationStatus::Failed,
            "cancelled" => OperationStatus::Cancelled,
            _ => OperationStatus::Queued,
        }
    }
}

/// Kind-specific payload of a finished operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationOutput {
    None,
    Listing {
        prefix: String,
        entries: Vec<ObjectEntry>,
        /// Stopped early by cancellation or an error.
        truncated: bool,
    },
    File {
        path: PathBuf,
        bytes: u64,
    },
    Archive {
        path: PathBuf,
        files: usize,
    },
    Preview(Preview),
    Buckets {
        names: Vec<String>,
    },
    BucketAccess {
        bucket: String,
        accessible: bool,
    },
}

/// Outcome of one operation. Delivered exactly once per started operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub id: OperationId,
    pub kind: OperationKind,
    pub succeeded_keys: BTreeSet<String>,
    pub failed_keys: BTreeMap<String, StorageError>,
    pub cancelled: bool,
    /// Operation-level failure (listing error, archive failure, panic).
    pub error: Option<StorageError>,
    pub output: OperationOutput,
}

impl OperationResult {
    pub fn new(id: OperationId, kind: OperationKind) -> Self {
        Self {
            id,
            kind,
            succeeded_keys: BTreeSet::new(),
            failed_keys: BTreeMap::new(),
            cancelled: false,
            error: None,
            output: OperationOutput::None,
        }
    }

    pub fn failed(id: OperationId, kind: OperationKind, error: StorageError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(id, kind)
        }
    }

    /// Partial success of a batch is still `Completed`.
    pub fn status(&self) -> OperationStatus {
        if self.cancelled {
            OperationStatus::Cancelled
        } else if self.error.is_some()
            || (self.succeeded_keys.is_empty() && !self.failed_keys.is_empty())
        {
            OperationStatus::Failed
        } else {
            OperationStatus::Completed
        }
    }

    /// A key vanished since it was listed; the view is stale.
    pub fn suggests_relist(&self) -> bool {
        self.failed_keys.values().any(StorageError::is_not_found)
            || self.error.as_ref().is_some_and(StorageError::is_not_found)
    }

    pub(crate) fn record(&mut self, key: &str, outcome: Result<(), StorageError>) {
        match outcome {
            Ok(()) => {
                self.failed_keys.remove(key);
                self.succeeded_keys.insert(key.to_string());
            }
            Err(err) => {
                self.failed_keys.insert(key.to_string(), err);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Progress {
    /// Entries listed so far.
    Listed { count: usize },
    /// Bytes written for one object.
    Bytes {
        key: String,
        transferred: u64,
        total: Option<u64>,
    },
    /// Items finished within a batch.
    Items {
        done: usize,
        total: usize,
        key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Started {
        id: OperationId,
        kind: OperationKind,
    },
    Progress {
        id: OperationId,
        progress: Progress,
    },
    Finished(OperationResult),
    /// Cancelled while still queued; no result follows.
    CancelledBeforeStart {
        id: OperationId,
        kind: OperationKind,
    },
}

impl WorkerEvent {
    pub fn id(&self) -> OperationId {
        match self {
            WorkerEvent::Started { id, .. }
            | WorkerEvent::Progress { id, .. }
            | WorkerEvent::CancelledBeforeStart { id, .. } => *id,
            WorkerEvent::Finished(result) => result.id,
        }
    }
}
