use async_trait::async_trait;
use aws_sdk_s3::Client;

use super::client::create_s3_client;
use super::types::{ObjectBody, ObjectPage};
use super::{list, objects};
use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::StorageResult;
use crate::session::Session;

/// The remote object-storage API, scoped to one bucket.
///
/// Implementations never retry; the worker owns retry policy.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// One page of the recursive listing under `prefix`.
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> StorageResult<ObjectPage>;

    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody>;

    /// Idempotent: an absent key is reported as success.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    async fn check_bucket_access(&self, bucket: &str) -> StorageResult<bool>;

    async fn list_buckets(&self) -> StorageResult<Vec<String>>;
}

/// [`ObjectStore`] backed by `aws-sdk-s3`.
pub struct S3Store {
    client: Client,
    bucket: String,
    page_size: i32,
}

impl S3Store {
    pub fn new(session: &Session) -> Self {
        Self {
            client: create_s3_client(&session.credentials),
            bucket: session.bucket.clone(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> StorageResult<ObjectPage> {
        list::list_objects_page(&self.client, &self.bucket, prefix, continuation, self.page_size).await
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody> {
        objects::get_object(&self.client, &self.bucket, key).await
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        objects::delete_object(&self.client, &self.bucket, key).await
    }

    async fn check_bucket_access(&self, bucket: &str) -> StorageResult<bool> {
        objects::check_bucket_access(&self.client, bucket).await
    }

    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        list::list_buckets(&self.client).await
    }
}
