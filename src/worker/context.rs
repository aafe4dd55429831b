//! Per-operation context: the store snapshot, cancel flag, config, events,
//! and the retry policy shared by every operation kind.

use log::warn;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::types::{OperationId, Progress, WorkerEvent};
use crate::config::WorkerConfig;
use crate::error::{StorageError, StorageResult};
use crate::storage::ObjectStore;

/// Sending half of the worker's event channel. A dropped receiver is not an
/// error; events are simply discarded.
#[derive(Clone)]
pub(crate) struct EventSink {
    sender: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { sender }
    }

    pub fn send(&self, event: WorkerEvent) {
        let _ = self.sender.send(event);
    }
}

pub(crate) struct OpContext {
    pub id: OperationId,
    pub store: Arc<dyn ObjectStore>,
    pub config: Arc<WorkerConfig>,
    pub cancelled: Arc<AtomicBool>,
    pub events: EventSink,
}

impl OpContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn progress(&self, progress: Progress) {
        self.events.send(WorkerEvent::Progress {
            id: self.id,
            progress,
        });
    }

    pub fn retry(&self, what: &str) -> Retry<'_> {
        Retry {
            ctx: self,
            what: what.to_string(),
            attempt: 1,
        }
    }
}

/// Attempt counter for one network call. Used directly where the call
/// borrows mutable state; [`with_retry`] covers the rest.
pub(crate) struct Retry<'a> {
    ctx: &'a OpContext,
    what: String,
    attempt: u32,
}

impl Retry<'_> {
    /// Sleeps and returns `true` when `err` deserves another attempt.
    /// Never retries once the operation is cancelled.
    pub async fn again(&mut self, err: &StorageError) -> bool {
        if !err.is_retryable()
            || self.attempt >= self.ctx.config.max_attempts
            || self.ctx.is_cancelled()
        {
            return false;
        }
        let delay = self.ctx.config.backoff(self.attempt);
        warn!(
            "operation_retry: {} {} attempt={} delay_ms={} error={}",
            self.ctx.id,
            self.what,
            self.attempt,
            delay.as_millis(),
            err
        );
        tokio::time::sleep(delay).await;
        self.attempt += 1;
        !self.ctx.is_cancelled()
    }
}

pub(crate) async fn with_retry<T, F, Fut>(ctx: &OpContext, what: &str, mut call: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut retry = ctx.retry(what);
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !retry.again(&err).await {
                    return Err(err);
                }
            }
        }
    }
}
