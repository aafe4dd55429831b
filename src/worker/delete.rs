//! DeleteMany: remove objects one at a time, folders expanded by listing.

use log::{info, warn};

use super::context::{with_retry, OpContext};
use super::list::expand_targets;
use super::types::{OperationKind, OperationRequest, OperationResult, Progress};

pub(crate) async fn run_delete_many(ctx: &OpContext, request: &OperationRequest) -> OperationResult {
    let mut result = OperationResult::new(ctx.id, OperationKind::DeleteMany);

    let expansion = expand_targets(ctx, &request.target_keys, true).await;
    for (folder, err) in expansion.failed {
        result.record(&folder, Err(err));
    }
    result.cancelled = expansion.cancelled;

    let store = ctx.store.as_ref();
    let total = expansion.keys.len();
    info!("delete_many_start: {} keys={}", ctx.id, total);

    for (done, key) in expansion.keys.iter().enumerate() {
        if result.cancelled || ctx.is_cancelled() {
            result.cancelled = true;
            break;
        }

        let key_ref = key.as_str();
        let outcome = match with_retry(ctx, key_ref, move || store.delete_object(key_ref)).await {
            // Already gone counts as deleted.
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        };
        if let Err(err) = &outcome {
            warn!("delete_failed: {} {} error={}", ctx.id, key, err);
        }
        result.record(key, outcome);
        ctx.progress(Progress::Items {
            done: done + 1,
            total,
            key: key.clone(),
        });
    }

    info!(
        "delete_many_finish: {} deleted={} failed={} cancelled={}",
        ctx.id,
        result.succeeded_keys.len(),
        result.failed_keys.len(),
        result.cancelled
    );
    result
}
