//! Listing operation and folder-target expansion

use log::{info, warn};
use std::collections::HashSet;

use super::context::OpContext;
use super::types::{OperationKind, OperationOutput, OperationResult, Progress};
use crate::error::StorageError;
use crate::storage::{is_folder_key, ObjectEntry, ObjectLister};

pub(crate) struct Listing {
    pub entries: Vec<ObjectEntry>,
    /// Every page was fetched.
    pub complete: bool,
    pub error: Option<StorageError>,
}

/// Drain the listing under `prefix`, page by page. Cancellation is checked
/// before each page request, so no page is requested after it is observed.
/// A cancel that lands after the final page still yields a complete listing.
pub(crate) async fn list_all(ctx: &OpContext, prefix: &str, report_progress: bool) -> Listing {
    let mut lister = ObjectLister::new(ctx.store.as_ref(), prefix);
    let mut entries = Vec::new();
    let mut reported = 0;
    let interval = ctx.config.list_progress_interval.max(1);

    loop {
        if ctx.is_cancelled() && !lister.is_done() {
            info!(
                "list_cancelled: {} prefix={} pages={} entries={}",
                ctx.id,
                prefix,
                lister.pages_fetched(),
                entries.len()
            );
            return Listing {
                entries,
                complete: false,
                error: None,
            };
        }

        let mut retry = ctx.retry("list_page");
        let page = loop {
            match lister.next_page().await {
                Ok(page) => break Ok(page),
                Err(err) => {
                    if !retry.again(&err).await {
                        break Err(err);
                    }
                }
            }
        };

        match page {
            Ok(Some(batch)) => {
                entries.extend(batch);
                if report_progress && entries.len() - reported >= interval {
                    reported = entries.len();
                    ctx.progress(Progress::Listed { count: reported });
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(
                    "list_failed: {} prefix={} pages={} error={}",
                    ctx.id,
                    prefix,
                    lister.pages_fetched(),
                    err
                );
                return Listing {
                    entries,
                    complete: false,
                    error: Some(err),
                };
            }
        }
    }

    if report_progress && reported != entries.len() {
        ctx.progress(Progress::Listed {
            count: entries.len(),
        });
    }
    Listing {
        entries,
        complete: true,
        error: None,
    }
}

pub(crate) async fn run_list(ctx: &OpContext, prefix: &str) -> OperationResult {
    let mut result = OperationResult::new(ctx.id, OperationKind::List);
    let listing = list_all(ctx, prefix, true).await;

    info!(
        "list_finish: {} prefix={} entries={} complete={}",
        ctx.id,
        prefix,
        listing.entries.len(),
        listing.complete
    );
    result.cancelled = !listing.complete && listing.error.is_none();
    result.error = listing.error;
    result.output = OperationOutput::Listing {
        prefix: prefix.to_string(),
        entries: listing.entries,
        truncated: !listing.complete,
    };
    result
}

/// Object keys addressed by a batch request.
pub(crate) struct Expansion {
    /// Deduplicated, in request order.
    pub keys: Vec<String>,
    /// Folder targets whose listing failed.
    pub failed: Vec<(String, StorageError)>,
    pub cancelled: bool,
}

/// Replace folder targets (`a/b/`) by the keys listed under them.
///
/// Folder marker objects are kept only when `include_markers` is set (a
/// delete must remove them, a download has nothing to fetch). A folder that
/// lists empty expands to itself when markers are included, so deleting an
/// already-empty folder is a success.
pub(crate) async fn expand_targets(
    ctx: &OpContext,
    targets: &[String],
    include_markers: bool,
) -> Expansion {
    let mut seen = HashSet::new();
    let mut expansion = Expansion {
        keys: Vec::new(),
        failed: Vec::new(),
        cancelled: false,
    };

    for target in targets {
        if !is_folder_key(target) {
            if seen.insert(target.clone()) {
                expansion.keys.push(target.clone());
            }
            continue;
        }

        let listing = list_all(ctx, target, false).await;
        if let Some(err) = listing.error {
            expansion.failed.push((target.clone(), err));
            continue;
        }
        if !listing.complete {
            expansion.cancelled = true;
            break;
        }

        let mut found = false;
        for entry in listing.entries {
            if entry.is_prefix && !include_markers {
                continue;
            }
            found = true;
            if seen.insert(entry.key.clone()) {
                expansion.keys.push(entry.key);
            }
        }
        if !found && include_markers && seen.insert(target.clone()) {
            expansion.keys.push(target.clone());
        }
        info!("expand_folder: {} folder={} total_keys={}", ctx.id, target, expansion.keys.len());
    }

    expansion
}
