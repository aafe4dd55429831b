//! Object operations (get, delete, bucket access check)

use aws_sdk_s3::Client;
use futures_util::stream::{self, StreamExt};
use log::debug;

use super::sdk_error::classify_sdk_error;
use super::types::ObjectBody;
use crate::error::{StorageError, StorageResult};

/// Start a GetObject and expose its body as a chunk stream
pub(crate) async fn get_object(client: &Client, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
    let response = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| classify_sdk_error(e, key))?;

    let content_type = response.content_type().map(|s| s.to_string());
    let content_length = response.content_length().map(|n| n.max(0) as u64);
    let key = key.to_string();

    let chunks = stream::unfold(Some(response.body), move |body| {
        let key = key.clone();
        async move {
            let mut body = body?;
            match body.next().await {
                Some(Ok(bytes)) => Some((Ok(bytes), Some(body))),
                Some(Err(e)) => Some((
                    Err(StorageError::Network(format!("{}: body stream failed: {}", key, e))),
                    None,
                )),
                None => None,
            }
        }
    })
    .boxed();

    Ok(ObjectBody {
        content_type,
        content_length,
        chunks,
    })
}

/// Delete a single object. Deleting an absent key succeeds.
pub(crate) async fn delete_object(client: &Client, bucket: &str, key: &str) -> StorageResult<()> {
    match client.delete_object().bucket(bucket).key(key).send().await {
        Ok(_) => Ok(()),
        Err(e) => match classify_sdk_error(e, key) {
            StorageError::NotFound(_) => {
                debug!("delete_object: {} already absent", key);
                Ok(())
            }
            other => Err(other),
        },
    }
}

/// HeadBucket probe for manually entered bucket names
pub(crate) async fn check_bucket_access(client: &Client, bucket: &str) -> StorageResult<bool> {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => Ok(true),
        Err(e) => match classify_sdk_error(e, bucket) {
            StorageError::NotFound(_) | StorageError::AccessDenied(_) => Ok(false),
            other => Err(other),
        },
    }
}
