//! DataSyncManager - shared, async access to synchronization state.
//!
//! Wraps the pure [`SyncState`] from sync-core in `Arc<Mutex<_>>` so
//! requests and transport callbacks can arrive from any task. Every call
//! takes the lock for the duration of one state transition only; no I/O
//! happens while it is held.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use objsync_core::{
    FailedTask, FeedPlan, ObjectHandle, RemoteObject, Step, SyncEvent, SyncOptions, SyncRequest,
    SyncState, SyncStats, SyncTask, SyncUpdate, TaskKind,
};
use objsync_types::{FeedMessage, FetchRequest, FetchResponse, SyncError};

use crate::config::DataSyncConfig;

/// Shared synchronization manager.
///
/// Cloning is cheap and every clone sees the same state.
#[derive(Debug, Clone)]
pub struct DataSyncManager {
    state: Arc<Mutex<SyncState>>,
}

impl Default for DataSyncManager {
    fn default() -> Self {
        Self::new(SyncOptions::default())
    }
}

impl DataSyncManager {
    /// Create a manager with explicit options.
    pub fn new(options: SyncOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(SyncState::new(options))),
        }
    }

    /// Create a manager from loaded configuration.
    pub fn from_config(config: &DataSyncConfig) -> Self {
        Self::new(config.to_options())
    }

    /// Register a start task and return the feed changes to perform.
    pub async fn prepare_start(&self, request: SyncRequest) -> Result<FeedPlan, SyncError> {
        let id = request.object_id().to_string();
        let plan = self.state.lock().await.prepare_start(request)?;
        tracing::debug!(
            "start {}: subscribe {:?}, unsubscribe {:?}, next step {:?}",
            id,
            plan.relevant,
            plan.irrelevant,
            plan.next_step
        );
        Ok(plan)
    }

    /// Register a stop task. `Ok(None)` if the object is not synchronized.
    pub async fn prepare_stop(&self, request: SyncRequest) -> Result<Option<FeedPlan>, SyncError> {
        let id = request.object_id().to_string();
        let plan = self.state.lock().await.prepare_stop(request)?;
        match &plan {
            Some(plan) => tracing::debug!(
                "stop {}: subscribe {:?}, unsubscribe {:?}, next step {:?}",
                id,
                plan.relevant,
                plan.irrelevant,
                plan.next_step
            ),
            None => tracing::debug!("stop {}: already stopped", id),
        }
        Ok(plan)
    }

    /// Register a standalone fetch task.
    pub async fn prepare_fetch(&self, request: SyncRequest) -> Result<FeedPlan, SyncError> {
        let id = request.object_id().to_string();
        let plan = self.state.lock().await.prepare_fetch(request)?;
        tracing::debug!("fetch {}: registered", id);
        Ok(plan)
    }

    /// Report that (un)subscribing `feeds` succeeded.
    pub async fn on_feed_transition_complete(&self, feeds: &[String]) -> Vec<SyncTask> {
        let (done, rejected) = {
            let mut state = self.state.lock().await;
            let done = state.on_feed_transition_complete(feeds);
            (done, state.take_rejected())
        };
        log_rejected(rejected);
        tracing::debug!("feed transition complete for {:?}", feeds);
        for task in &done {
            log_completed(task);
        }
        done
    }

    /// Report that (un)subscribing `feeds` failed. Affected tasks are
    /// aborted; nothing is retried.
    pub async fn on_feed_transition_failed(
        &self,
        error: &str,
        feeds: &[String],
    ) -> Vec<FailedTask> {
        let (failed, rejected) = {
            let mut state = self.state.lock().await;
            let failed = state.on_feed_transition_failed(error, feeds);
            (failed, state.take_rejected())
        };
        log_rejected(rejected);
        for failure in &failed {
            tracing::warn!(
                "{:?} task for {} aborted: {}",
                failure.task.kind(),
                failure.task.object_id(),
                failure.error
            );
        }
        failed
    }

    /// Request for the next page the object's task is waiting for.
    pub async fn next_fetch_request(&self, object_id: &str) -> Option<FetchRequest> {
        let state = self.state.lock().await;
        let task = state.active_task(object_id)?;
        if task.next_step() != Step::Fetch {
            return None;
        }
        let location = task.next_data_location()?;
        Some(FetchRequest {
            object_id: object_id.to_string(),
            location: location.to_string(),
            snapshot_time_token: task.request().snapshot_time_token(),
            next_page: task.request().next_page().map(str::to_string),
        })
    }

    /// Report a non-final page.
    pub async fn on_partial_fetch_complete(
        &self,
        object_id: &str,
        response: &FetchResponse,
    ) -> Result<(), SyncError> {
        self.state
            .lock()
            .await
            .on_partial_fetch_complete(object_id, response)?;
        tracing::debug!("{}: page for {:?} accumulated", object_id, response.location);
        Ok(())
    }

    /// Report the final page of a location.
    pub async fn on_fetch_complete(
        &self,
        object_id: &str,
        response: &FetchResponse,
    ) -> Result<Option<SyncTask>, SyncError> {
        let (done, rejected) = {
            let mut state = self.state.lock().await;
            let done = state.on_fetch_complete(object_id, response);
            (done, state.take_rejected())
        };
        log_rejected(rejected);
        let done = done?;
        tracing::debug!("{}: location {:?} fetched", object_id, response.location);
        if let Some(task) = &done {
            log_completed(task);
        }
        Ok(done)
    }

    /// Report any page; dispatches on `next_page`.
    pub async fn on_fetch_response(
        &self,
        object_id: &str,
        response: &FetchResponse,
    ) -> Result<Option<SyncTask>, SyncError> {
        if response.is_last_page() {
            self.on_fetch_complete(object_id, response).await
        } else {
            self.on_partial_fetch_complete(object_id, response).await?;
            Ok(None)
        }
    }

    /// Report a failed fetch; aborts the object's task.
    pub async fn on_fetch_failed(
        &self,
        object_id: &str,
        error: &str,
    ) -> Result<FailedTask, SyncError> {
        let (failed, rejected) = {
            let mut state = self.state.lock().await;
            let failed = state.on_fetch_failed(object_id, error);
            (failed, state.take_rejected())
        };
        log_rejected(rejected);
        let failed = failed?;
        tracing::warn!(
            "{:?} task for {} aborted: {}",
            failed.task.kind(),
            object_id,
            failed.error
        );
        Ok(failed)
    }

    /// Apply, buffer or drop a decoded event.
    pub async fn on_sync_event(&self, event: SyncEvent) -> Result<Option<SyncUpdate>, SyncError> {
        let id = event.object_id().to_string();
        let time_token = event.time_token();
        let mut state = self.state.lock().await;
        let stale_before = state.stats().stale_events;
        let result = state.on_sync_event(event);
        let stale_after = state.stats().stale_events;
        drop(state);

        if stale_after > stale_before {
            tracing::warn!("{}: dropped stale event {}", id, time_token);
        }
        match &result {
            Ok(Some(update)) if update.transaction_complete => {
                tracing::debug!("{}: applied changes at {:?}", id, update.locations)
            }
            Ok(Some(update)) => {
                tracing::debug!("{}: holding change at {:?}", id, update.locations)
            }
            Ok(None) => {}
            Err(err) => tracing::warn!("{}: event rejected: {}", id, err),
        }
        result
    }

    /// Decode a feed message and hand it to [`DataSyncManager::on_sync_event`].
    ///
    /// Ordinary traffic on the same feeds yields `Ok(None)`.
    pub async fn handle_message(
        &self,
        message: &FeedMessage,
    ) -> Result<Option<SyncUpdate>, SyncError> {
        match SyncEvent::classify(&message.feed, &message.payload) {
            Ok(event) => self.on_sync_event(event).await,
            Err(reason) => {
                tracing::debug!("ignoring message on {}: {}", message.feed, reason);
                Ok(None)
            }
        }
    }

    /// Whether a task is in flight for the object.
    pub async fn has_active_task(&self, object_id: &str) -> bool {
        self.state.lock().await.has_active_task(object_id)
    }

    /// Snapshot of the task in flight for the object.
    pub async fn active_task(&self, object_id: &str) -> Option<SyncTask> {
        self.state.lock().await.active_task(object_id).cloned()
    }

    /// Snapshot of a cached object.
    pub async fn object(&self, object_id: &str) -> Option<RemoteObject> {
        self.state.lock().await.object(object_id).cloned()
    }

    /// Snapshot of the object behind a handle.
    pub async fn resolve(&self, handle: &ObjectHandle) -> Option<RemoteObject> {
        self.state.lock().await.resolve(handle).cloned()
    }

    /// JSON value at a key-path of a cached object.
    pub async fn lookup(&self, object_id: &str, path: &str) -> Result<Option<Value>, SyncError> {
        Ok(self
            .state
            .lock()
            .await
            .lookup(object_id, path)?
            .map(|node| node.to_json()))
    }

    /// Locations currently synchronized for an object.
    pub async fn synchronized_locations(&self, object_id: &str) -> Vec<String> {
        self.state.lock().await.synchronized_locations(object_id)
    }

    /// Feeds currently subscribed for an object.
    pub async fn subscribed_feeds(&self, object_id: &str) -> BTreeSet<String> {
        self.state.lock().await.subscribed_feeds(object_id)
    }

    /// Current counters.
    pub async fn stats(&self) -> SyncStats {
        self.state.lock().await.stats()
    }

    /// Drop every task, subscription record and cached object.
    pub async fn purge(&self) {
        self.state.lock().await.purge();
        tracing::info!("synchronization state purged");
    }
}

fn log_rejected(errors: Vec<SyncError>) {
    for err in errors {
        tracing::warn!("held event rejected on replay: {}", err);
    }
}

fn log_completed(task: &SyncTask) {
    match task.kind() {
        TaskKind::Start => tracing::info!(
            "synchronization started for {} at {:?}",
            task.object_id(),
            task.target_locations()
        ),
        TaskKind::Stop if task.target_locations().is_empty() => {
            tracing::info!("synchronization stopped for {}", task.object_id())
        }
        TaskKind::Stop => tracing::info!(
            "synchronization of {} narrowed to {:?}",
            task.object_id(),
            task.target_locations()
        ),
        TaskKind::Fetch => tracing::debug!("fetch completed for {}", task.object_id()),
    }
}
