//! Glue between user commands, the session, the workers and [`BrowserState`].
//!
//! Listing and preview run on one worker, downloads and deletes on another,
//! so a long transfer never holds up navigation. The interactive side only
//! submits requests and drains events; it never waits on a worker.

use log::{debug, info};
use std::path::PathBuf;
use tokio::runtime::Handle;

use super::state::BrowserState;
use crate::config::WorkerConfig;
use crate::error::{StorageError, StorageResult};
use crate::preview::Preview;
use crate::session::{Credentials, SessionManager};
use crate::storage::is_folder_key;
use crate::worker::{
    EventReceiver, OperationId, OperationKind, OperationOutput, OperationRequest, OperationResult,
    Progress, Worker, WorkerEvent,
};

/// Something the UI should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserUpdate {
    ListingProgress {
        count: usize,
    },
    /// The state now holds a fresh snapshot of `prefix`.
    ListingReady {
        prefix: String,
        entries: usize,
        truncated: bool,
    },
    ListingFailed {
        prefix: String,
        error: StorageError,
    },
    PreviewReady(Preview),
    PreviewFailed {
        key: String,
        error: StorageError,
    },
    Buckets(Vec<String>),
    /// Enumeration denied; the user has to type a bucket name.
    BucketsUnavailable(StorageError),
    BucketAccess {
        bucket: String,
        accessible: bool,
    },
    TransferProgress {
        id: OperationId,
        progress: Progress,
    },
    TransferFinished(OperationResult),
    Cancelled {
        id: OperationId,
        kind: OperationKind,
    },
    /// Something vanished since it was listed; a refresh would help.
    RelistSuggested,
}

#[derive(Clone, Copy)]
enum Lane {
    Interactive,
    Transfer,
}

pub struct Browser {
    sessions: SessionManager,
    state: BrowserState,
    interactive: Worker,
    interactive_events: EventReceiver,
    transfers: Worker,
    transfer_events: EventReceiver,
    pending_list: Option<OperationId>,
    pending_preview: Option<(OperationId, String)>,
}

impl Browser {
    /// Must be called inside a tokio runtime.
    pub fn new(sessions: SessionManager, config: WorkerConfig) -> Self {
        Self::with_handle(&Handle::current(), sessions, config)
    }

    pub fn with_handle(handle: &Handle, sessions: SessionManager, config: WorkerConfig) -> Self {
        let (interactive, interactive_events) = Worker::spawn_on(handle, "interactive", config.clone());
        let (transfers, transfer_events) = Worker::spawn_on(handle, "transfers", config);
        let mut state = BrowserState::new();
        state.set_bucket(sessions.bucket());
        Self {
            sessions,
            state,
            interactive,
            interactive_events,
            transfers,
            transfer_events,
            pending_list: None,
            pending_preview: None,
        }
    }

    pub fn state(&self) -> &BrowserState {
        &self.state
    }

    /// Local-only changes: selection, sort, view mode, expansion.
    pub fn state_mut(&mut self) -> &mut BrowserState {
        &mut self.state
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// New credentials. Lists the bucket right away when one is given.
    pub fn connect(&mut self, credentials: Credentials, bucket: Option<String>) -> StorageResult<Option<OperationId>> {
        self.sessions.connect(credentials, bucket)?;
        self.reset_view();
        if self.sessions.bucket().is_some() {
            return self.refresh().map(Some);
        }
        Ok(None)
    }

    pub fn set_bucket(&mut self, bucket: &str) -> StorageResult<OperationId> {
        self.sessions.set_bucket(bucket)?;
        self.reset_view();
        self.refresh()
    }

    fn reset_view(&mut self) {
        self.state.set_bucket(self.sessions.bucket());
        self.supersede_listing();
        if let Some((id, _)) = self.pending_preview.take() {
            self.interactive.cancel(id);
        }
    }

    fn supersede_listing(&mut self) {
        if let Some(id) = self.pending_list.take() {
            debug!("listing_superseded: {}", id);
            self.interactive.cancel(id);
        }
    }

    /// Re-list the current location, superseding any listing in flight.
    pub fn refresh(&mut self) -> StorageResult<OperationId> {
        if self.sessions.bucket().is_none() {
            return Err(StorageError::NotConnected);
        }
        let store = self.sessions.store()?;
        self.supersede_listing();
        let id = self
            .interactive
            .submit(store, OperationRequest::list(self.state.prefix()));
        self.pending_list = Some(id);
        self.state.begin_listing();
        Ok(id)
    }

    pub fn navigate_into(&mut self, prefix: &str) -> StorageResult<OperationId> {
        self.state.navigate_into(prefix);
        self.refresh()
    }

    pub fn navigate_up(&mut self) -> StorageResult<OperationId> {
        self.state.navigate_up();
        self.refresh()
    }

    /// Only the latest preview request is reported.
    pub fn request_preview(&mut self, key: &str) -> StorageResult<OperationId> {
        let store = self.sessions.store()?;
        if let Some((id, _)) = self.pending_preview.take() {
            self.interactive.cancel(id);
        }
        let id = self.interactive.submit(store, OperationRequest::preview(key));
        self.pending_preview = Some((id, key.to_string()));
        Ok(id)
    }

    /// One plain file is saved as-is; anything else becomes an archive.
    pub fn request_download(&mut self, keys: Vec<String>, destination: impl Into<PathBuf>) -> StorageResult<OperationId> {
        if keys.is_empty() {
            return Err(StorageError::InvalidKey("nothing selected".to_string()));
        }
        let store = self.sessions.store()?;
        let request = match keys.as_slice() {
            [key] if !is_folder_key(key) => OperationRequest::download_one(key, destination),
            _ => OperationRequest::download_many(keys, destination),
        };
        Ok(self.transfers.submit(store, request))
    }

    /// Confirmation is the caller's job.
    pub fn request_delete(&mut self, keys: Vec<String>) -> StorageResult<OperationId> {
        if keys.is_empty() {
            return Err(StorageError::InvalidKey("nothing selected".to_string()));
        }
        let store = self.sessions.store()?;
        info!("delete_requested: keys={}", keys.len());
        Ok(self.transfers.submit(store, OperationRequest::delete_many(keys)))
    }

    pub fn request_bucket_list(&mut self) -> StorageResult<OperationId> {
        let store = self.sessions.store()?;
        Ok(self.interactive.submit(store, OperationRequest::list_buckets()))
    }

    pub fn check_bucket(&mut self, bucket: &str) -> StorageResult<OperationId> {
        let store = self.sessions.store()?;
        Ok(self
            .interactive
            .submit(store, OperationRequest::check_bucket_access(bucket)))
    }

    pub fn cancel(&self, id: OperationId) -> bool {
        self.interactive.cancel(id) || self.transfers.cancel(id)
    }

    /// Drain every pending worker event without blocking.
    pub fn pump_events(&mut self) -> Vec<BrowserUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.interactive_events.try_recv() {
            self.handle_event(Lane::Interactive, event, &mut updates);
        }
        while let Ok(event) = self.transfer_events.try_recv() {
            self.handle_event(Lane::Transfer, event, &mut updates);
        }
        updates
    }

    /// Wait until at least one update is available. Returns an empty list
    /// only when both workers are gone.
    pub async fn next_updates(&mut self) -> Vec<BrowserUpdate> {
        loop {
            let (lane, event) = tokio::select! {
                Some(event) = self.interactive_events.recv() => (Lane::Interactive, event),
                Some(event) = self.transfer_events.recv() => (Lane::Transfer, event),
                else => return Vec::new(),
            };
            let mut updates = Vec::new();
            self.handle_event(lane, event, &mut updates);
            updates.extend(self.pump_events());
            if !updates.is_empty() {
                return updates;
            }
        }
    }

    fn handle_event(&mut self, lane: Lane, event: WorkerEvent, updates: &mut Vec<BrowserUpdate>) {
        match (lane, event) {
            (Lane::Interactive, WorkerEvent::Progress { id, progress }) => {
                if let Progress::Listed { count } = progress {
                    if self.pending_list == Some(id) {
                        self.state.set_listing_progress(count);
                        updates.push(BrowserUpdate::ListingProgress { count });
                    }
                }
            }
            (Lane::Interactive, WorkerEvent::Finished(result)) => self.handle_interactive_result(result, updates),
            (Lane::Transfer, WorkerEvent::Progress { id, progress }) => {
                updates.push(BrowserUpdate::TransferProgress { id, progress });
            }
            (Lane::Transfer, WorkerEvent::Finished(result)) => self.handle_transfer_result(result, updates),
            (_, WorkerEvent::CancelledBeforeStart { id, kind }) => {
                if self.pending_list == Some(id) {
                    self.pending_list = None;
                }
                updates.push(BrowserUpdate::Cancelled { id, kind });
            }
            (_, WorkerEvent::Started { .. }) => {}
        }
    }

    fn handle_interactive_result(&mut self, result: OperationResult, updates: &mut Vec<BrowserUpdate>) {
        match result.kind {
            OperationKind::List => {
                if self.pending_list != Some(result.id) {
                    debug!("listing_ignored: {} superseded", result.id);
                    return;
                }
                self.pending_list = None;
                let OperationOutput::Listing {
                    prefix,
                    entries,
                    truncated,
                } = result.output
                else {
                    if let Some(error) = result.error {
                        updates.push(BrowserUpdate::ListingFailed {
                            prefix: self.state.prefix().to_string(),
                            error,
                        });
                    }
                    return;
                };
                if let Some(error) = result.error {
                    updates.push(BrowserUpdate::ListingFailed { prefix, error });
                    return;
                }
                let count = entries.len();
                if self.state.apply_listing(&prefix, entries, truncated) {
                    updates.push(BrowserUpdate::ListingReady {
                        prefix,
                        entries: count,
                        truncated,
                    });
                }
            }
            OperationKind::Preview => {
                let Some((pending, key)) = self.pending_preview.take() else {
                    return;
                };
                if pending != result.id {
                    self.pending_preview = Some((pending, key));
                    return;
                }
                if result.suggests_relist() {
                    updates.push(BrowserUpdate::RelistSuggested);
                }
                match result.output {
                    OperationOutput::Preview(preview) => updates.push(BrowserUpdate::PreviewReady(preview)),
                    _ if result.cancelled => {}
                    _ => {
                        let error = result
                            .failed_keys
                            .into_values()
                            .next()
                            .or(result.error)
                            .unwrap_or_else(|| StorageError::Service("preview unavailable".to_string()));
                        updates.push(BrowserUpdate::PreviewFailed { key, error });
                    }
                }
            }
            OperationKind::ListBuckets => match (result.output, result.error) {
                (OperationOutput::Buckets { names }, _) => updates.push(BrowserUpdate::Buckets(names)),
                (_, Some(error)) => updates.push(BrowserUpdate::BucketsUnavailable(error)),
                _ => {}
            },
            OperationKind::CheckBucketAccess => {
                if let OperationOutput::BucketAccess { bucket, accessible } = result.output {
                    updates.push(BrowserUpdate::BucketAccess { bucket, accessible });
                } else if let Some(error) = result.error {
                    updates.push(BrowserUpdate::BucketsUnavailable(error));
                }
            }
            _ => {}
        }
    }

    fn handle_transfer_result(&mut self, result: OperationResult, updates: &mut Vec<BrowserUpdate>) {
        let relist = result.kind == OperationKind::DeleteMany && !result.succeeded_keys.is_empty();
        if result.suggests_relist() && !relist {
            updates.push(BrowserUpdate::RelistSuggested);
        }
        updates.push(BrowserUpdate::TransferFinished(result));
        if relist {
            // Deleted keys must disappear from the view.
            if let Err(err) = self.refresh() {
                debug!("relist_after_delete_skipped: {}", err);
            }
        }
    }
}
