//! Mock transport for testing.
//!
//! Allows queueing fetch pages and capturing feed calls for verification.

use super::{FeedTransport, TransportError};
use async_trait::async_trait;
use objsync_types::{FetchRequest, FetchResponse, ModificationRequest};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// A call received by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `subscribe()` with these feeds.
    Subscribe(Vec<String>),
    /// `unsubscribe()` with these feeds.
    Unsubscribe(Vec<String>),
    /// `fetch()` with this request.
    Fetch(FetchRequest),
    /// `modify()` with this request.
    Modify(ModificationRequest),
}

/// Mock transport for testing.
///
/// Allows queueing fetch pages and capturing feed calls for verification.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    subscriptions: BTreeSet<String>,
    calls: Vec<TransportCall>,
    pages: HashMap<(String, String), VecDeque<FetchResponse>>,
    fail_next_subscribe: Option<String>,
    fail_next_unsubscribe: Option<String>,
    fail_next_fetch: Option<String>,
    fail_next_modify: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a page to be returned by `fetch()` for the object and the
    /// page's location.
    ///
    /// Locations without queued pages answer with a single empty page.
    pub fn queue_page(&self, object_id: &str, page: FetchResponse) {
        let location = page.location.clone();
        self.queue_page_at(object_id, &location, page);
    }

    /// Queue a page answering requests for `location`, whatever location
    /// the page itself reports.
    pub fn queue_page_at(&self, object_id: &str, location: &str, page: FetchResponse) {
        let mut inner = self.inner();
        inner
            .pages
            .entry((object_id.to_string(), location.to_string()))
            .or_default()
            .push_back(page);
    }

    /// Get all calls in the order they were made.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner().calls.clone()
    }

    /// Get the feeds currently subscribed.
    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.inner().subscriptions.clone()
    }

    /// Cause the next subscribe() to fail with the given error.
    pub fn fail_next_subscribe(&self, error: &str) {
        self.inner().fail_next_subscribe = Some(error.to_string());
    }

    /// Cause the next unsubscribe() to fail with the given error.
    pub fn fail_next_unsubscribe(&self, error: &str) {
        self.inner().fail_next_unsubscribe = Some(error.to_string());
    }

    /// Cause the next fetch() to fail with the given error.
    pub fn fail_next_fetch(&self, error: &str) {
        self.inner().fail_next_fetch = Some(error.to_string());
    }

    /// Cause the next modify() to fail with the given error.
    pub fn fail_next_modify(&self, error: &str) {
        self.inner().fail_next_modify = Some(error.to_string());
    }

    /// Clear all state (calls, pages, subscriptions).
    pub fn reset(&self) {
        *self.inner() = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl FeedTransport for MockTransport {
    async fn subscribe(&self, feeds: &[String]) -> Result<(), TransportError> {
        let mut inner = self.inner();
        inner.calls.push(TransportCall::Subscribe(feeds.to_vec()));

        // Check for forced failure
        if let Some(error) = inner.fail_next_subscribe.take() {
            return Err(TransportError::SubscribeFailed(error));
        }

        inner.subscriptions.extend(feeds.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, feeds: &[String]) -> Result<(), TransportError> {
        let mut inner = self.inner();
        inner.calls.push(TransportCall::Unsubscribe(feeds.to_vec()));

        // Check for forced failure
        if let Some(error) = inner.fail_next_unsubscribe.take() {
            return Err(TransportError::UnsubscribeFailed(error));
        }

        for feed in feeds {
            inner.subscriptions.remove(feed);
        }
        Ok(())
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let mut inner = self.inner();
        inner.calls.push(TransportCall::Fetch(request.clone()));

        // Check for forced failure
        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(TransportError::FetchFailed(error));
        }

        let key = (request.object_id.clone(), request.location.clone());
        let page = inner.pages.get_mut(&key).and_then(VecDeque::pop_front);
        Ok(page.unwrap_or_else(|| {
            FetchResponse::new(&request.location, serde_json::Value::Null, None)
        }))
    }

    async fn modify(&self, request: &ModificationRequest) -> Result<(), TransportError> {
        let mut inner = self.inner();
        inner.calls.push(TransportCall::Modify(request.clone()));

        if let Some(error) = inner.fail_next_modify.take() {
            return Err(TransportError::ModificationFailed(error));
        }
        Ok(())
    }
}
