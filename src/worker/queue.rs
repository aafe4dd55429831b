//! FIFO operation queue with a cancel registry.
//!
//! One loop task per [`Worker`] pulls operations off an unbounded channel and
//! runs them one at a time. Each operation executes in its own task so a panic
//! becomes a failed result instead of killing the queue.

use log::{error, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::archive::run_download_many;
use super::buckets::{run_check_bucket_access, run_list_buckets};
use super::context::{EventSink, OpContext};
use super::delete::run_delete_many;
use super::download::{run_download_one, run_preview};
use super::list::run_list;
use super::types::{OperationId, OperationKind, OperationRequest, OperationResult, WorkerEvent};
use crate::config::WorkerConfig;
use crate::error::StorageError;
use crate::storage::ObjectStore;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

type CancelRegistry = Arc<Mutex<HashMap<OperationId, Arc<AtomicBool>>>>;

pub type EventReceiver = mpsc::UnboundedReceiver<WorkerEvent>;

struct QueuedOperation {
    id: OperationId,
    request: OperationRequest,
    store: Arc<dyn ObjectStore>,
    cancelled: Arc<AtomicBool>,
}

fn lock(registry: &CancelRegistry) -> MutexGuard<'_, HashMap<OperationId, Arc<AtomicBool>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a background queue. Dropping it stops the loop once the
/// running operation finishes; queued operations are discarded.
pub struct Worker {
    name: String,
    sender: mpsc::UnboundedSender<QueuedOperation>,
    registry: CancelRegistry,
}

impl Worker {
    /// Start a worker on the current tokio runtime.
    pub fn spawn(name: &str, config: WorkerConfig) -> (Self, EventReceiver) {
        Self::spawn_on(&Handle::current(), name, config)
    }

    pub fn spawn_on(handle: &Handle, name: &str, config: WorkerConfig) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let registry: CancelRegistry = Arc::new(Mutex::new(HashMap::new()));

        handle.spawn(run_queue_worker(
            name.to_string(),
            receiver,
            EventSink::new(event_tx),
            registry.clone(),
            Arc::new(config),
        ));

        let worker = Self {
            name: name.to_string(),
            sender,
            registry,
        };
        (worker, event_rx)
    }

    /// Enqueue `request` against a snapshot of `store`. Never blocks.
    pub fn submit(&self, store: Arc<dyn ObjectStore>, request: OperationRequest) -> OperationId {
        let id = NEXT_OPERATION_ID.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        lock(&self.registry).insert(id, cancelled.clone());

        info!(
            "operation_queued: {} {} worker={} bucket={} targets={}",
            id,
            request.kind,
            self.name,
            store.bucket(),
            request.target_keys.len()
        );
        let queued = QueuedOperation {
            id,
            request,
            store,
            cancelled,
        };
        if self.sender.send(queued).is_err() {
            error!("operation_queue_closed: {} worker={}", id, self.name);
            lock(&self.registry).remove(&id);
        }
        id
    }

    /// Request cancellation. Returns `false` when `id` is unknown or already
    /// finished. A queued operation is acknowledged with
    /// [`WorkerEvent::CancelledBeforeStart`]; a running one stops at its next
    /// checkpoint and reports `cancelled`.
    pub fn cancel(&self, id: OperationId) -> bool {
        match lock(&self.registry).get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!("operation_cancel: {} worker={}", id, self.name);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for flag in lock(&self.registry).values() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Operations queued or running.
    pub fn pending(&self) -> usize {
        lock(&self.registry).len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

async fn execute(ctx: OpContext, request: OperationRequest) -> OperationResult {
    match request.kind {
        OperationKind::List => run_list(&ctx, request.primary_target()).await,
        OperationKind::DownloadOne => run_download_one(&ctx, &request).await,
        OperationKind::DownloadMany => run_download_many(&ctx, &request).await,
        OperationKind::DeleteMany => run_delete_many(&ctx, &request).await,
        OperationKind::Preview => run_preview(&ctx, request.primary_target()).await,
        OperationKind::ListBuckets => run_list_buckets(&ctx).await,
        OperationKind::CheckBucketAccess => {
            run_check_bucket_access(&ctx, request.primary_target()).await
        }
    }
}

async fn run_queue_worker(
    name: String,
    mut receiver: mpsc::UnboundedReceiver<QueuedOperation>,
    events: EventSink,
    registry: CancelRegistry,
    config: Arc<WorkerConfig>,
) {
    info!("worker_start: {}", name);
    while let Some(queued) = receiver.recv().await {
        let QueuedOperation {
            id,
            request,
            store,
            cancelled,
        } = queued;
        let kind = request.kind;

        if cancelled.load(Ordering::SeqCst) {
            info!("operation_cancelled_before_start: {} {} worker={}", id, kind, name);
            lock(&registry).remove(&id);
            events.send(WorkerEvent::CancelledBeforeStart { id, kind });
            continue;
        }

        info!("operation_start: {} {} worker={}", id, kind, name);
        events.send(WorkerEvent::Started { id, kind });

        let ctx = OpContext {
            id,
            store,
            config: config.clone(),
            cancelled,
            events: events.clone(),
        };
        let result = match tokio::spawn(execute(ctx, request)).await {
            Ok(result) => result,
            Err(join_err) => {
                error!("operation_panicked: {} {} error={}", id, kind, join_err);
                OperationResult::failed(
                    id,
                    kind,
                    StorageError::Service(format!("operation aborted: {}", join_err)),
                )
            }
        };

        lock(&registry).remove(&id);
        info!(
            "operation_finish: {} {} status={} succeeded={} failed={}",
            id,
            kind,
            result.status(),
            result.succeeded_keys.len(),
            result.failed_keys.len()
        );
        events.send(WorkerEvent::Finished(result));
    }
    info!("worker_stop: {}", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::{ObjectBody, ObjectPage};
    use crate::worker::context::testing::fast_config;
    use crate::worker::types::{OperationOutput, OperationStatus, Progress};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    async fn next_event(rx: &mut EventReceiver) -> WorkerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("worker event timed out")
            .expect("event channel closed")
    }

    async fn finished(rx: &mut EventReceiver, id: OperationId) -> OperationResult {
        loop {
            if let WorkerEvent::Finished(result) = next_event(rx).await {
                if result.id == id {
                    return result;
                }
            }
        }
    }

    fn seeded(keys: &[&str], page_size: usize) -> MemoryStore {
        let store = MemoryStore::new("bucket").with_page_size(page_size);
        for key in keys {
            store.put(key, b"data");
        }
        store
    }

    #[tokio::test]
    async fn runs_operations_in_submission_order() {
        let (worker, mut rx) = Worker::spawn("test", fast_config());
        let store: Arc<dyn ObjectStore> = Arc::new(seeded(&["a", "b/c"], 1));

        let ids: Vec<OperationId> = ["", "b/", ""]
            .iter()
            .map(|prefix| worker.submit(store.clone(), OperationRequest::list(prefix)))
            .collect();

        let mut order = Vec::new();
        while order.len() < 6 {
            match next_event(&mut rx).await {
                WorkerEvent::Started { id, .. } => order.push(("start", id)),
                WorkerEvent::Finished(result) => order.push(("finish", result.id)),
                _ => {}
            }
        }
        assert_eq!(
            order,
            vec![
                ("start", ids[0]),
                ("finish", ids[0]),
                ("start", ids[1]),
                ("finish", ids[1]),
                ("start", ids[2]),
                ("finish", ids[2]),
            ]
        );
        assert_eq!(worker.pending(), 0);
    }

    #[tokio::test]
    async fn cancel_mid_pagination_stops_listing() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(
            seeded(&["k1", "k2", "k3", "k4", "k5", "k6"], 2).with_page_gate(gate.clone()),
        );
        let config = WorkerConfig {
            list_progress_interval: 1,
            ..fast_config()
        };
        let (worker, mut rx) = Worker::spawn("test", config);
        let id = worker.submit(store.clone(), OperationRequest::list(""));

        loop {
            if let WorkerEvent::Progress {
                progress: Progress::Listed { count },
                ..
            } = next_event(&mut rx).await
            {
                assert_eq!(count, 2);
                break;
            }
        }
        assert!(worker.cancel(id));
        gate.add_permits(10);

        let result = finished(&mut rx, id).await;
        assert_eq!(result.status(), OperationStatus::Cancelled);
        let partial = match result.output {
            OperationOutput::Listing {
                entries, truncated, ..
            } => {
                assert!(truncated);
                entries
            }
            other => panic!("unexpected output {:?}", other),
        };
        assert!(store.list_calls() <= 2);

        // The same listing run to the end, for comparison.
        let rerun = worker.submit(store.clone(), OperationRequest::list(""));
        let full = match finished(&mut rx, rerun).await.output {
            OperationOutput::Listing { entries, .. } => entries,
            other => panic!("unexpected output {:?}", other),
        };
        assert_eq!(full.len(), 6);
        assert_eq!(partial, full[..partial.len()].to_vec());

        // Cancellation lands on a page boundary: one page, or the one in flight too.
        let keys: Vec<&str> = partial.iter().map(|e| e.key.as_str()).collect();
        assert!(
            keys == ["k1", "k2"] || keys == ["k1", "k2", "k3", "k4"],
            "unexpected partial listing {:?}",
            keys
        );
    }

    #[tokio::test]
    async fn queued_operation_can_be_cancelled_before_start() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(seeded(&["k1", "k2", "k3"], 1).with_page_gate(gate.clone()));
        let (worker, mut rx) = Worker::spawn("test", fast_config());

        let blocking = worker.submit(store.clone(), OperationRequest::list(""));
        let queued = worker.submit(store.clone(), OperationRequest::delete_many(vec!["k1".into()]));
        assert_eq!(
            next_event(&mut rx).await,
            WorkerEvent::Started {
                id: blocking,
                kind: OperationKind::List
            }
        );

        assert!(worker.cancel(queued));
        assert!(worker.cancel(blocking));
        gate.add_permits(10);

        let mut saw_ack = false;
        let mut saw_blocking = false;
        while !(saw_ack && saw_blocking) {
            match next_event(&mut rx).await {
                WorkerEvent::CancelledBeforeStart { id, kind } => {
                    assert_eq!(id, queued);
                    assert_eq!(kind, OperationKind::DeleteMany);
                    saw_ack = true;
                }
                WorkerEvent::Started { id, .. } => panic!("unexpected start of {}", id),
                WorkerEvent::Finished(result) => {
                    assert_eq!(result.id, blocking);
                    saw_blocking = true;
                }
                WorkerEvent::Progress { .. } => {}
            }
        }
        assert!(store.contains("k1"));
        assert!(!worker.cancel(queued));
        assert!(!worker.cancel(blocking));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_cancellable() {
        let (worker, _rx) = Worker::spawn("test", fast_config());
        assert!(!worker.cancel(u64::MAX));
    }

    struct PanickingStore;

    #[async_trait]
    impl ObjectStore for PanickingStore {
        fn bucket(&self) -> &str {
            "broken"
        }

        async fn list_page(&self, _prefix: &str, _continuation: Option<&str>) -> crate::error::StorageResult<ObjectPage> {
            panic!("backend bug");
        }

        async fn get_object(&self, key: &str) -> crate::error::StorageResult<ObjectBody> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn delete_object(&self, _key: &str) -> crate::error::StorageResult<()> {
            Ok(())
        }

        async fn check_bucket_access(&self, _bucket: &str) -> crate::error::StorageResult<bool> {
            Ok(false)
        }

        async fn list_buckets(&self) -> crate::error::StorageResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn panic_becomes_failed_result_and_queue_survives() {
        let (worker, mut rx) = Worker::spawn("test", fast_config());

        let broken = worker.submit(Arc::new(PanickingStore), OperationRequest::list(""));
        let result = finished(&mut rx, broken).await;
        assert_eq!(result.status(), OperationStatus::Failed);
        assert!(matches!(result.error, Some(StorageError::Service(_))));

        let healthy = worker.submit(Arc::new(seeded(&["x"], 10)), OperationRequest::list(""));
        let result = finished(&mut rx, healthy).await;
        assert_eq!(result.status(), OperationStatus::Completed);
    }
}
