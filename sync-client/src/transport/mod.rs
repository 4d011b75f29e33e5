//! Transport abstraction for data synchronization.
//!
//! This module provides a pluggable transport layer that abstracts the
//! pub/sub client performing the actual network calls (real SDK client,
//! mock for testing).
//!
//! # Design
//!
//! The transport trait is async and request/response oriented:
//! - `subscribe()` joins feeds
//! - `unsubscribe()` leaves feeds
//! - `fetch()` reads one page of remote object data
//! - `modify()` sends a change to remote object data
//!
//! Messages arriving on subscribed feeds are delivered out of band and
//! handed to [`crate::SyncClient::handle_message`].
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.subscribe(&["pn_ds_chess".to_string()]).await?;
//! let page = transport.fetch(&request).await?;
//! ```

mod mock;

pub use mock::{MockTransport, TransportCall};

use async_trait::async_trait;
use thiserror::Error;

use objsync_types::{FetchRequest, FetchResponse, ModificationRequest};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Subscribing to feeds failed.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Unsubscribing from feeds failed.
    #[error("unsubscribe failed: {0}")]
    UnsubscribeFailed(String),

    /// Data fetch failed.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Data modification was refused or failed.
    #[error("modification failed: {0}")]
    ModificationFailed(String),
}

/// Feed transport used to execute synchronization plans.
///
/// Implementations wrap the pub/sub client's channel and data APIs.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Subscribe to every feed in `feeds`.
    async fn subscribe(&self, feeds: &[String]) -> Result<(), TransportError>;

    /// Unsubscribe from every feed in `feeds`.
    async fn unsubscribe(&self, feeds: &[String]) -> Result<(), TransportError>;

    /// Fetch one page of object data.
    ///
    /// An empty `location` in the response means the requested location.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;

    /// Send a change to remote object data.
    ///
    /// Success means the service accepted the change; the matching
    /// synchronization event arrives separately.
    async fn modify(&self, request: &ModificationRequest) -> Result<(), TransportError>;
}
