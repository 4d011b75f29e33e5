//! Error types for remote object synchronization.

use thiserror::Error;

/// Errors that can occur in data synchronization operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Key-path could not be parsed
    #[error("malformed key-path {path:?}: {reason}")]
    MalformedPath {
        /// The offending key-path text.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Another start/stop/fetch is already in flight for this object
    #[error("conflicting synchronization task for object {object_id:?}")]
    ConflictingTask {
        /// Object identifier with the active task.
        object_id: String,
    },

    /// No task is registered for this object
    #[error("no active synchronization task for object {object_id:?}")]
    NoActiveTask {
        /// Object identifier that was reported on.
        object_id: String,
    },

    /// A fetch result arrived for a location the task is not waiting for
    #[error("unexpected data location {location:?} for object {object_id:?}")]
    UnexpectedLocation {
        /// Object identifier.
        object_id: String,
        /// The reported location.
        location: String,
    },

    /// Payload is ordinary feed traffic, not a synchronization event
    #[error("not a synchronization event: {0}")]
    NotASyncEvent(String),

    /// Subscribe, unsubscribe or fetch failed in the transport layer
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Event is older than what has already been applied
    #[error("stale event for object {object_id:?}: {time_token} < {last_applied}")]
    StaleEvent {
        /// Object identifier.
        object_id: String,
        /// Time token carried by the event.
        time_token: u64,
        /// Last time token applied to the object.
        last_applied: u64,
    },

    /// Too many events buffered for open transactions
    #[error("transaction buffer full (capacity: {capacity})")]
    TransactionOverflow {
        /// Configured capacity.
        capacity: usize,
    },

    /// Name is not a valid synchronization feed
    #[error("invalid synchronization feed name: {0}")]
    InvalidFeed(String),

    /// Modification request is missing or carries the wrong data
    #[error("invalid modification: {0}")]
    InvalidModification(String),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),
}

impl SyncError {
    /// Shorthand for [`SyncError::MalformedPath`].
    pub fn malformed_path(path: &str, reason: impl Into<String>) -> Self {
        SyncError::MalformedPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
