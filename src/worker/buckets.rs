//! Bucket-level operations: enumerate buckets and probe access to one.

use log::{info, warn};

use super::context::{with_retry, OpContext};
use super::types::{OperationKind, OperationOutput, OperationResult};

pub(crate) async fn run_list_buckets(ctx: &OpContext) -> OperationResult {
    let mut result = OperationResult::new(ctx.id, OperationKind::ListBuckets);
    let store = ctx.store.as_ref();
    match with_retry(ctx, "list_buckets", move || store.list_buckets()).await {
        Ok(names) => {
            info!("list_buckets_finish: {} count={}", ctx.id, names.len());
            result.output = OperationOutput::Buckets { names };
        }
        Err(err) => {
            // Credentials scoped to one bucket usually cannot enumerate; the
            // caller falls back to a typed bucket name.
            warn!("list_buckets_failed: {} error={}", ctx.id, err);
            result.error = Some(err);
        }
    }
    result
}

pub(crate) async fn run_check_bucket_access(ctx: &OpContext, bucket: &str) -> OperationResult {
    let mut result = OperationResult::new(ctx.id, OperationKind::CheckBucketAccess);
    let store = ctx.store.as_ref();
    match with_retry(ctx, "check_bucket_access", move || store.check_bucket_access(bucket)).await {
        Ok(accessible) => {
            info!("bucket_access: {} bucket={} accessible={}", ctx.id, bucket, accessible);
            result.output = OperationOutput::BucketAccess {
                bucket: bucket.to_string(),
                accessible,
            };
        }
        Err(err) => {
            warn!("bucket_access_failed: {} bucket={} error={}", ctx.id, bucket, err);
            result.error = Some(err);
        }
    }
    result
}
