//! In-memory [`ObjectStore`] with failure injection, used by tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::store::ObjectStore;
use super::types::{ObjectBody, ObjectEntry, ObjectPage};
use crate::error::{StorageError, StorageResult};

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
    content_type: Option<String>,
}

#[derive(Clone)]
struct Failure {
    error: StorageError,
    /// `None` fails forever.
    remaining: Option<usize>,
}

#[derive(Default)]
struct Failures {
    get: HashMap<String, Failure>,
    mid_stream: HashSet<String>,
    delete: HashMap<String, Failure>,
    list: Option<Failure>,
}

pub(crate) struct MemoryStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failures: Mutex<Failures>,
    accessible_buckets: Mutex<HashSet<String>>,
    page_size: usize,
    chunk_size: usize,
    empty_pages: AtomicUsize,
    token_nonce: AtomicUsize,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    page_gate: Option<Arc<Semaphore>>,
}

fn take_failure(map: &mut HashMap<String, Failure>, key: &str) -> Option<StorageError> {
    let failure = map.get_mut(key)?;
    match failure.remaining.as_mut() {
        None => Some(failure.error.clone()),
        Some(0) => None,
        Some(n) => {
            *n -= 1;
            Some(failure.error.clone())
        }
    }
}

impl MemoryStore {
    pub fn new(bucket: &str) -> Self {
        let mut accessible = HashSet::new();
        accessible.insert(bucket.to_string());
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(Failures::default()),
            accessible_buckets: Mutex::new(accessible),
            page_size: 1000,
            chunk_size: 4,
            empty_pages: AtomicUsize::new(0),
            token_nonce: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            page_gate: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Every list call after the first waits for a permit on `gate`.
    pub fn with_page_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.page_gate = Some(gate);
        self
    }

    pub fn put(&self, key: &str, data: &[u8]) {
        let seconds = self.objects.lock().unwrap().len() as i64;
        let modified = Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap();
        self.put_with(key, data, modified, None);
    }

    pub fn put_with(
        &self,
        key: &str,
        data: &[u8],
        last_modified: DateTime<Utc>,
        content_type: Option<&str>,
    ) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: Bytes::copy_from_slice(data),
                last_modified,
                content_type: content_type.map(|s| s.to_string()),
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn fail_get(&self, key: &str, error: StorageError, times: Option<usize>) {
        self.failures.lock().unwrap().get.insert(
            key.to_string(),
            Failure {
                error,
                remaining: times,
            },
        );
    }

    /// The body stream yields one chunk and then breaks.
    pub fn fail_mid_stream(&self, key: &str) {
        self.failures.lock().unwrap().mid_stream.insert(key.to_string());
    }

    pub fn fail_delete(&self, key: &str, error: StorageError, times: Option<usize>) {
        self.failures.lock().unwrap().delete.insert(
            key.to_string(),
            Failure {
                error,
                remaining: times,
            },
        );
    }

    pub fn fail_list(&self, error: StorageError, times: Option<usize>) {
        self.failures.lock().unwrap().list = Some(Failure {
            error,
            remaining: times,
        });
    }

    pub fn insert_empty_pages(&self, count: usize) {
        self.empty_pages.store(count, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn next_token(&self, offset: usize) -> String {
        let nonce = self.token_nonce.fetch_add(1, Ordering::SeqCst);
        format!("{}#{}", offset, nonce)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> StorageResult<ObjectPage> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        if call > 0 {
            if let Some(gate) = &self.page_gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(failure) = failures.list.as_mut() {
                let fire = match failure.remaining.as_mut() {
                    None => true,
                    Some(0) => false,
                    Some(n) => {
                        *n -= 1;
                        true
                    }
                };
                if fire {
                    return Err(failure.error.clone());
                }
            }
        }

        let offset: usize = continuation
            .and_then(|t| t.split('#').next())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let pending_empty = self.empty_pages.load(Ordering::SeqCst);
        if pending_empty > 0 {
            self.empty_pages.store(pending_empty - 1, Ordering::SeqCst);
            return Ok(ObjectPage {
                entries: Vec::new(),
                next_token: Some(self.next_token(offset)),
            });
        }

        let matching: Vec<ObjectEntry> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| {
                if key.ends_with('/') {
                    ObjectEntry::marker(key.clone())
                } else {
                    ObjectEntry::file(key.clone(), obj.data.len() as u64, Some(obj.last_modified))
                }
            })
            .collect();

        let end = (offset + self.page_size).min(matching.len());
        let entries = matching.get(offset..end).map(|s| s.to_vec()).unwrap_or_default();
        let next_token = if end < matching.len() {
            Some(self.next_token(end))
        } else {
            None
        };

        Ok(ObjectPage {
            entries,
            next_token,
        })
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let break_stream = {
            let mut failures = self.failures.lock().unwrap();
            if let Some(error) = take_failure(&mut failures.get, key) {
                return Err(error);
            }
            failures.mid_stream.contains(key)
        };

        let object = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let mut chunks: Vec<StorageResult<Bytes>> = object
            .data
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if break_stream {
            chunks.truncate(1);
            chunks.push(Err(StorageError::Network(format!("{}: connection reset", key))));
        }

        Ok(ObjectBody {
            content_type: object.content_type.clone(),
            content_length: Some(object.data.len() as u64),
            chunks: stream::iter(chunks).boxed(),
        })
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        if let Some(error) = take_failure(&mut self.failures.lock().unwrap().delete, key) {
            return Err(error);
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn check_bucket_access(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.accessible_buckets.lock().unwrap().contains(bucket))
    }

    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        let mut buckets: Vec<String> = self.accessible_buckets.lock().unwrap().iter().cloned().collect();
        buckets.sort();
        Ok(buckets)
    }
}
