//! List operations (buckets, objects)

use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use log::debug;

use super::sdk_error::classify_sdk_error;
use super::store::ObjectStore;
use super::types::{ObjectEntry, ObjectPage};
use crate::error::StorageResult;

pub(crate) fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// List all buckets visible to the credentials
pub(crate) async fn list_buckets(client: &Client) -> StorageResult<Vec<String>> {
    let response = client
        .list_buckets()
        .send()
        .await
        .map_err(|e| classify_sdk_error(e, "list buckets"))?;

    Ok(response
        .buckets()
        .iter()
        .filter_map(|bucket| bucket.name().map(|s| s.to_string()))
        .collect())
}

/// Fetch one page of objects under `prefix` (recursive, no delimiter)
pub(crate) async fn list_objects_page(
    client: &Client,
    bucket: &str,
    prefix: &str,
    continuation_token: Option<&str>,
    max_keys: i32,
) -> StorageResult<ObjectPage> {
    let mut request = client.list_objects_v2().bucket(bucket).max_keys(max_keys);

    if !prefix.is_empty() {
        request = request.prefix(prefix);
    }
    if let Some(token) = continuation_token {
        request = request.continuation_token(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| classify_sdk_error(e, &format!("list {}/{}", bucket, prefix)))?;

    let entries = response
        .contents()
        .iter()
        .filter_map(|obj| {
            let key = obj.key()?.to_string();
            if key.ends_with('/') {
                return Some(ObjectEntry::marker(key));
            }
            Some(ObjectEntry {
                key,
                size: obj.size().unwrap_or(0).max(0) as u64,
                last_modified: obj.last_modified().and_then(to_chrono),
                etag: obj.e_tag().map(|t| t.trim_matches('"').to_string()),
                is_prefix: false,
            })
        })
        .collect();

    let next_token = if response.is_truncated().unwrap_or(false) {
        response.next_continuation_token().map(|s| s.to_string())
    } else {
        None
    };

    Ok(ObjectPage {
        entries,
        next_token,
    })
}

/// Lazy, non-restartable sequence of listing pages.
///
/// Each call to [`ObjectLister::next_page`] issues one request. An empty page
/// that still carries a continuation token is returned as `Some(vec![])`.
pub struct ObjectLister<'a> {
    store: &'a dyn ObjectStore,
    prefix: String,
    token: Option<String>,
    pages: usize,
    done: bool,
}

impl<'a> ObjectLister<'a> {
    pub fn new(store: &'a dyn ObjectStore, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            token: None,
            pages: 0,
            done: false,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub async fn next_page(&mut self) -> StorageResult<Option<Vec<ObjectEntry>>> {
        if self.done {
            return Ok(None);
        }

        let page = self
            .store
            .list_page(&self.prefix, self.token.as_deref())
            .await?;
        self.pages += 1;

        // A token identical to the one just used would loop forever.
        match page.next_token {
            Some(next) if self.token.as_deref() != Some(next.as_str()) => self.token = Some(next),
            _ => {
                self.token = None;
                self.done = true;
            }
        }

        debug!(
            "list_page: prefix={} page={} entries={} more={}",
            self.prefix,
            self.pages,
            page.entries.len(),
            !self.done
        );
        Ok(Some(page.entries))
    }

    /// Drain all remaining pages.
    pub async fn collect_all(mut self) -> StorageResult<Vec<ObjectEntry>> {
        let mut all = Vec::new();
        while let Some(entries) = self.next_page().await? {
            all.extend(entries);
        }
        Ok(all)
    }
}
