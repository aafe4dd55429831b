//! Storage types shared by the adapter, the worker and the browser

use crate::error::StorageResult;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// One listing row. Replaced wholesale by the next listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    /// Directory marker (`key` ends in `/`), not a file.
    pub is_prefix: bool,
}

impl ObjectEntry {
    pub fn file(key: impl Into<String>, size: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            etag: None,
            is_prefix: false,
        }
    }

    pub fn marker(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            last_modified: None,
            etag: None,
            is_prefix: true,
        }
    }
}

/// A single ListObjectsV2 page.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub entries: Vec<ObjectEntry>,
    pub next_token: Option<String>,
}

pub type ByteChunks = BoxStream<'static, StorageResult<Bytes>>;

/// Body of a GetObject response.
pub struct ObjectBody {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub chunks: ByteChunks,
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Keys ending with `/` address a folder prefix rather than an object.
pub fn is_folder_key(key: &str) -> bool {
    key.ends_with('/')
}
