//! SyncClient - the main interface for remote object synchronization.
//!
//! This module provides [`SyncClient`], the primary API for applications to
//! mirror remote objects locally and keep them up to date.
//!
//! # Architecture
//!
//! SyncClient uses the pure state from sync-core (through
//! [`DataSyncManager`]) for protocol logic and executes the resulting plans
//! via the [`FeedTransport`] trait.
//!
//! ```text
//! Application → SyncClient → FeedTransport → Network
//!                   ↓
//!            DataSyncManager → sync-core (pure state)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use objsync_client::{DataSyncConfig, MockTransport, SyncClient};
//!
//! let client = SyncClient::new(MockTransport::new(), &DataSyncConfig::default());
//!
//! let chess = client.start_synchronization("chess", ["boards"]).await?;
//! // Feed messages from the pub/sub client:
//! client.handle_message(&message).await?;
//! client.push_data("chess", "boards.a", json!({"piece": "rook"})).await?;
//! client.stop_synchronization("chess", Vec::<String>::new()).await?;
//! ```

use serde_json::Value;
use thiserror::Error;

use objsync_core::{feed, FeedPlan, KeyPath, RemoteObject, SyncRequest, SyncTask, SyncUpdate};
use objsync_types::{FeedMessage, ModificationRequest, SyncError, TimeToken};

use crate::config::DataSyncConfig;
use crate::manager::DataSyncManager;
use crate::transport::{FeedTransport, TransportError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Synchronization error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// The main sync client.
///
/// Drives start, stop and fetch requests over a transport and routes
/// incoming feed messages to the manager.
pub struct SyncClient<T: FeedTransport> {
    manager: DataSyncManager,
    transport: T,
}

impl<T: FeedTransport> SyncClient<T> {
    /// Create a new SyncClient.
    pub fn new(transport: T, config: &DataSyncConfig) -> Self {
        Self::with_manager(transport, DataSyncManager::from_config(config))
    }

    /// Create a client around an existing manager.
    pub fn with_manager(transport: T, manager: DataSyncManager) -> Self {
        Self { manager, transport }
    }

    /// Start synchronizing `locations` of an object (all of it if empty).
    ///
    /// Returns a snapshot of the object once every location is fetched.
    pub async fn start_synchronization<I, S>(
        &self,
        object_id: &str,
        locations: I,
    ) -> Result<RemoteObject, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start_request(SyncRequest::new(object_id, locations)).await
    }

    /// Start synchronizing from a data snapshot at `time_token`.
    pub async fn start_synchronization_at<I, S>(
        &self,
        object_id: &str,
        locations: I,
        time_token: TimeToken,
    ) -> Result<RemoteObject, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = SyncRequest::new(object_id, locations).with_snapshot_time_token(time_token);
        self.start_request(request).await
    }

    async fn start_request(&self, request: SyncRequest) -> Result<RemoteObject, ClientError> {
        let object_id = request.object_id().to_string();
        let plan = self.manager.prepare_start(request).await?;
        self.drive(&object_id, plan).await?;
        self.manager
            .object(&object_id)
            .await
            .ok_or_else(|| ClientError::Protocol(format!("object {object_id} missing after start")))
    }

    /// Stop synchronizing `locations` of an object (all of it if empty).
    ///
    /// Stopping an object that is not synchronized succeeds.
    pub async fn stop_synchronization<I, S>(
        &self,
        object_id: &str,
        locations: I,
    ) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = SyncRequest::new(object_id, locations);
        if let Some(plan) = self.manager.prepare_stop(request).await? {
            self.drive(object_id, plan).await?;
        }
        Ok(())
    }

    /// Fetch `locations` of an object without synchronizing it.
    pub async fn fetch<I, S>(&self, object_id: &str, locations: I) -> Result<Value, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let plan = self.manager.prepare_fetch(SyncRequest::new(object_id, locations)).await?;
        let task = self
            .drive(object_id, plan)
            .await?
            .ok_or_else(|| {
                ClientError::Protocol(format!("fetch for {object_id} did not complete"))
            })?;
        Ok(task.request().data())
    }

    /// Execute a plan: unsubscribe, subscribe, then fetch every pending
    /// location page by page.
    ///
    /// Returns the task if it completed during this call.
    async fn drive(
        &self,
        object_id: &str,
        plan: FeedPlan,
    ) -> Result<Option<SyncTask>, ClientError> {
        if plan.is_complete() {
            return Ok(None);
        }
        let mut finished = None;

        if !plan.irrelevant.is_empty() {
            let feeds: Vec<String> = plan.irrelevant.into_iter().collect();
            if let Err(err) = self.transport.unsubscribe(&feeds).await {
                self.manager.on_feed_transition_failed(&err.to_string(), &feeds).await;
                return Err(err.into());
            }
            finished = take_task(self.manager.on_feed_transition_complete(&feeds).await, object_id);
        }

        if !plan.relevant.is_empty() {
            let feeds: Vec<String> = plan.relevant.into_iter().collect();
            if let Err(err) = self.transport.subscribe(&feeds).await {
                self.manager.on_feed_transition_failed(&err.to_string(), &feeds).await;
                return Err(err.into());
            }
            finished = finished.or(take_task(
                self.manager.on_feed_transition_complete(&feeds).await,
                object_id,
            ));
        }

        while finished.is_none() {
            let Some(request) = self.manager.next_fetch_request(object_id).await else {
                break;
            };
            let mut response = match self.transport.fetch(&request).await {
                Ok(response) => response,
                Err(err) => {
                    self.abort_fetch(object_id, &err.to_string()).await;
                    return Err(err.into());
                }
            };
            if response.location.is_empty() {
                response.location = request.location;
            }
            finished = match self.manager.on_fetch_response(object_id, &response).await {
                Ok(finished) => finished,
                Err(err) => {
                    self.abort_fetch(object_id, &err.to_string()).await;
                    return Err(err.into());
                }
            };
        }

        Ok(finished)
    }

    async fn abort_fetch(&self, object_id: &str, reason: &str) {
        if let Err(err) = self.manager.on_fetch_failed(object_id, reason).await {
            tracing::debug!("{}: nothing to abort: {}", object_id, err);
        }
    }

    /// Merge `data` into the node at `location` of a remote object.
    ///
    /// A synchronized copy changes when the resulting event arrives, not
    /// when this call returns.
    pub async fn push_data(
        &self,
        object_id: &str,
        location: &str,
        data: Value,
    ) -> Result<(), ClientError> {
        self.modify(ModificationRequest::push(object_id, location, data)).await
    }

    /// Append `entries` to the list at `location`.
    ///
    /// `sort_key` (ASCII letters) orders a single entry among its siblings;
    /// it is ignored when several entries are pushed.
    pub async fn push_to_list(
        &self,
        object_id: &str,
        location: &str,
        entries: Vec<Value>,
        sort_key: Option<&str>,
    ) -> Result<(), ClientError> {
        let request = ModificationRequest::push_to_list(object_id, location, entries, sort_key);
        self.modify(request).await
    }

    /// Overwrite the node at `location` with `data`.
    pub async fn replace_data(
        &self,
        object_id: &str,
        location: &str,
        data: Value,
    ) -> Result<(), ClientError> {
        self.modify(ModificationRequest::replace(object_id, location, data)).await
    }

    /// Remove the node at `location`.
    pub async fn remove_data(&self, object_id: &str, location: &str) -> Result<(), ClientError> {
        self.modify(ModificationRequest::remove(object_id, location)).await
    }

    async fn modify(&self, mut request: ModificationRequest) -> Result<(), ClientError> {
        feed::validate_object_id(&request.object_id)?;
        request.location = KeyPath::parse(&request.location)?.to_string();
        request.validate()?;
        self.transport.modify(&request).await?;
        tracing::debug!(
            "{:?} accepted for {} at {:?}",
            request.kind,
            request.object_id,
            request.location
        );
        Ok(())
    }

    /// Route a message from a subscribed feed.
    ///
    /// Returns `Ok(None)` for ordinary traffic and dropped events.
    pub async fn handle_message(
        &self,
        message: &FeedMessage,
    ) -> Result<Option<SyncUpdate>, ClientError> {
        Ok(self.manager.handle_message(message).await?)
    }

    /// Snapshot of a synchronized object.
    pub async fn object(&self, object_id: &str) -> Option<RemoteObject> {
        self.manager.object(object_id).await
    }

    /// Get the manager shared by this client.
    pub fn manager(&self) -> &DataSyncManager {
        &self.manager
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

fn take_task(tasks: Vec<SyncTask>, object_id: &str) -> Option<SyncTask> {
    tasks.into_iter().find(|task| task.object_id() == object_id)
}
