//! Data synchronization state.
//!
//! [`SyncState`] owns the object cache, the task registry and the feed
//! bookkeeping. It never performs I/O: `prepare_*` calls return the feed
//! changes the caller has to make, and the caller reports every outcome back
//! through the matching `on_*` call.
//!
//! The caller (sync-client) is responsible for executing the returned plans
//! in order: unsubscribe, subscribe, then fetch each pending location.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use objsync_types::{FetchResponse, SyncError, TransactionId};

use crate::buffer::TransactionBuffer;
use crate::cache::{ObjectCache, ObjectHandle, RemoteObject};
use crate::event::{SyncEvent, SyncEventKind};
use crate::feed;
use crate::path::KeyPath;
use crate::task::{Step, SyncRequest, SyncTask, TaskKind};
use crate::tree::Node;

/// Tunables for [`SyncState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Subscribe to transaction completion feeds and hold transactional
    /// events until their transaction completes.
    pub transaction_feed: bool,
    /// Capacity of the transaction buffer.
    pub max_buffered_events: usize,
    /// Remove cached data of locations dropped by a partial stop.
    pub prune_on_partial_stop: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            transaction_feed: true,
            max_buffered_events: 1024,
            prune_on_partial_stop: true,
        }
    }
}

/// Feed changes the caller has to perform for a new task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPlan {
    /// Feeds to subscribe to.
    pub relevant: BTreeSet<String>,
    /// Feeds to unsubscribe from.
    pub irrelevant: BTreeSet<String>,
    /// First step waiting on the caller. [`Step::Unknown`] if the task
    /// completed on creation.
    pub next_step: Step,
}

impl FeedPlan {
    fn from_task(task: &SyncTask) -> Self {
        Self {
            relevant: task.relevant().clone(),
            irrelevant: task.irrelevant().clone(),
            next_step: task.next_step(),
        }
    }

    fn completed() -> Self {
        Self {
            relevant: BTreeSet::new(),
            irrelevant: BTreeSet::new(),
            next_step: Step::Unknown,
        }
    }

    /// Whether the task finished without needing the caller.
    pub fn is_complete(&self) -> bool {
        self.next_step == Step::Unknown
    }
}

/// A task aborted by a failure report.
#[derive(Debug)]
pub struct FailedTask {
    /// The removed task.
    pub task: SyncTask,
    /// Why it failed.
    pub error: SyncError,
}

/// Result of handing an event to [`SyncState::on_sync_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncUpdate {
    /// Object the event belongs to.
    pub object: ObjectHandle,
    /// Canonical locations touched.
    pub locations: Vec<String>,
    /// `false` while the change is held for an open transaction; `true`
    /// once it is visible in the cache.
    pub transaction_complete: bool,
}

/// Counters over the lifetime of a [`SyncState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Events merged into the cache.
    pub applied_events: u64,
    /// Events dropped for being older than the cached data.
    pub stale_events: u64,
    /// Events waiting for their transaction to complete or for a start
    /// task to finish.
    pub buffered_events: usize,
    /// Tasks in flight.
    pub active_tasks: usize,
    /// Objects in the cache.
    pub objects: usize,
}

type TransactionKey = (String, TransactionId);

/// Synchronization bookkeeping for every object.
#[derive(Debug)]
pub struct SyncState {
    options: SyncOptions,
    cache: ObjectCache,
    tasks: HashMap<String, SyncTask>,
    subscribed: HashMap<String, BTreeSet<String>>,
    locations: HashMap<String, BTreeSet<String>>,
    buffer: TransactionBuffer,
    poisoned: HashSet<TransactionKey>,
    deferred: HashMap<String, Vec<SyncEvent>>,
    rejected: Vec<SyncError>,
    applied_events: u64,
    stale_events: u64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new(SyncOptions::default())
    }
}

impl SyncState {
    /// Create empty state.
    pub fn new(options: SyncOptions) -> Self {
        Self {
            buffer: TransactionBuffer::new(options.max_buffered_events),
            options,
            cache: ObjectCache::new(),
            tasks: HashMap::new(),
            subscribed: HashMap::new(),
            locations: HashMap::new(),
            poisoned: HashSet::new(),
            deferred: HashMap::new(),
            rejected: Vec::new(),
            applied_events: 0,
            stale_events: 0,
        }
    }

    /// Options in effect.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Register a start task.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ConflictingTask`] if a task is active for the object
    /// - [`SyncError::InvalidFeed`] if the identifier cannot name a feed
    /// - [`SyncError::MalformedPath`] for a bad location
    pub fn prepare_start(&mut self, request: SyncRequest) -> Result<FeedPlan, SyncError> {
        let (id, mut request, requested) = self.admit(request)?;

        let mut combined: BTreeSet<String> = self.locations.get(&id).cloned().unwrap_or_default();
        if requested.is_empty() {
            combined.insert(String::new());
        } else {
            combined.extend(requested.iter().cloned());
        }
        let target = normalize(&combined)?;

        let required = feed::feeds_for(&id, &target, self.options.transaction_feed);
        let subscribed = self.subscribed.get(&id).cloned().unwrap_or_default();
        let relevant = required.difference(&subscribed).cloned().collect();
        let irrelevant = subscribed.difference(&required).cloned().collect();

        request.set_locations(requested);
        let task = SyncTask::new(request, TaskKind::Start, relevant, irrelevant)
            .with_locations(target, BTreeSet::new());
        Ok(self.register(task))
    }

    /// Register a stop task.
    ///
    /// Returns `Ok(None)` if the object is not synchronized.
    pub fn prepare_stop(&mut self, request: SyncRequest) -> Result<Option<FeedPlan>, SyncError> {
        let (id, mut request, requested) = self.admit(request)?;
        if !self.locations.contains_key(&id) && !self.subscribed.contains_key(&id) {
            return Ok(None);
        }

        let existing = self.locations.get(&id).cloned().unwrap_or_default();
        let stopped: Vec<KeyPath> = requested
            .iter()
            .map(|l| KeyPath::parse(l))
            .collect::<Result<_, _>>()?;
        let remaining: BTreeSet<String> = if stopped.is_empty() {
            BTreeSet::new()
        } else {
            existing
                .iter()
                .filter(|location| match KeyPath::parse(location) {
                    Ok(path) => !stopped.iter().any(|s| s.covers(&path)),
                    Err(_) => false,
                })
                .cloned()
                .collect()
        };

        let required = if remaining.is_empty() {
            BTreeSet::new()
        } else {
            feed::feeds_for(&id, &remaining, self.options.transaction_feed)
        };
        let subscribed = self.subscribed.get(&id).cloned().unwrap_or_default();
        let relevant = required.difference(&subscribed).cloned().collect();
        let irrelevant = subscribed.difference(&required).cloned().collect();

        let stopped_locations = if requested.is_empty() {
            existing
        } else {
            requested.iter().cloned().collect()
        };
        request.set_locations(requested);
        let task = SyncTask::new(request, TaskKind::Stop, relevant, irrelevant)
            .with_locations(remaining, stopped_locations);
        Ok(Some(self.register(task)))
    }

    /// Register a standalone fetch. Fetched data is returned with the
    /// completed task and never written to the cache.
    pub fn prepare_fetch(&mut self, request: SyncRequest) -> Result<FeedPlan, SyncError> {
        let (_, mut request, requested) = self.admit(request)?;
        request.set_locations(requested);
        let task = SyncTask::new(request, TaskKind::Fetch, BTreeSet::new(), BTreeSet::new());
        Ok(self.register(task))
    }

    fn admit(&self, request: SyncRequest) -> Result<(String, SyncRequest, Vec<String>), SyncError> {
        let id = request.object_id().to_string();
        feed::validate_object_id(&id)?;
        if self.tasks.contains_key(&id) {
            return Err(SyncError::ConflictingTask { object_id: id });
        }
        let mut requested = Vec::new();
        for location in request.locations() {
            let canonical = KeyPath::parse(location)?.to_string();
            if !requested.contains(&canonical) {
                requested.push(canonical);
            }
        }
        Ok((id, request, requested))
    }

    fn register(&mut self, task: SyncTask) -> FeedPlan {
        let plan = FeedPlan::from_task(&task);
        if task.next_step() == task.last_step() {
            self.finalize(task);
            return FeedPlan::completed();
        }
        self.tasks.insert(task.object_id().to_string(), task);
        plan
    }

    /// Record that the caller finished (un)subscribing `feeds`.
    ///
    /// Returns tasks that reached their terminal step and were removed.
    pub fn on_feed_transition_complete<S: AsRef<str>>(&mut self, feeds: &[S]) -> Vec<SyncTask> {
        let reported: BTreeSet<&str> = feeds.iter().map(AsRef::as_ref).collect();
        let mut ids: Vec<String> = self.tasks.keys().cloned().collect();
        ids.sort();

        let mut done = Vec::new();
        for id in ids {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };

            let left: Vec<String> = task
                .irrelevant()
                .iter()
                .filter(|f| reported.contains(f.as_str()))
                .cloned()
                .collect();
            if !left.is_empty() {
                task.commit_step(Step::Unsubscribe);
                if let Some(subscribed) = self.subscribed.get_mut(&id) {
                    for name in &left {
                        subscribed.remove(name);
                    }
                }
            }

            let joined: Vec<String> = task
                .relevant()
                .iter()
                .filter(|f| reported.contains(f.as_str()))
                .cloned()
                .collect();
            if !joined.is_empty() {
                task.commit_step(Step::Subscribe);
                self.subscribed
                    .entry(id.clone())
                    .or_default()
                    .extend(joined);
                if task.kind() == TaskKind::Start {
                    self.cache.ensure(&id);
                }
            }

            if task.next_step() == task.last_step() {
                done.push(id);
            }
        }

        let mut finished = Vec::with_capacity(done.len());
        for id in done {
            if let Some(task) = self.tasks.remove(&id) {
                finished.push(self.finalize(task));
            }
        }
        finished
    }

    /// Abort every task waiting on `feeds`.
    pub fn on_feed_transition_failed<S: AsRef<str>>(
        &mut self,
        error: &str,
        feeds: &[S],
    ) -> Vec<FailedTask> {
        let reported: BTreeSet<&str> = feeds.iter().map(AsRef::as_ref).collect();
        let mut ids: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, task)| {
                let waiting = |names: &BTreeSet<String>, step: Step| {
                    !task.is_committed(step) && names.iter().any(|f| reported.contains(f.as_str()))
                };
                waiting(task.irrelevant(), Step::Unsubscribe)
                    || waiting(task.relevant(), Step::Subscribe)
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();

        let mut failed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = self.tasks.remove(&id) {
                self.release_deferred(&id);
                failed.push(FailedTask {
                    task,
                    error: SyncError::TransportFailure(error.to_string()),
                });
            }
        }
        failed
    }

    /// Accept one non-final page of data.
    pub fn on_partial_fetch_complete(
        &mut self,
        object_id: &str,
        response: &FetchResponse,
    ) -> Result<(), SyncError> {
        let (task, location) = self.pending_fetch(object_id, &response.location)?;
        let request = task.request_mut();
        request.accumulate(&location, response.data.clone());
        request.set_next_page(response.next_page.clone());
        Ok(())
    }

    /// Accept the final page for a location.
    ///
    /// Start tasks merge the location's data into the cache. Returns the
    /// task if this completed it.
    pub fn on_fetch_complete(
        &mut self,
        object_id: &str,
        response: &FetchResponse,
    ) -> Result<Option<SyncTask>, SyncError> {
        let (task, location) = self.pending_fetch(object_id, &response.location)?;
        let request = task.request_mut();
        request.accumulate(&location, response.data.clone());
        request.set_next_page(None);

        if task.kind() == TaskKind::Start {
            let data = task.request().page_data(&location).cloned();
            let snapshot = task.request().snapshot_time_token();
            let path = KeyPath::parse(&location)?;
            let object = self.cache.ensure(object_id);
            if let Some(snapshot) = snapshot {
                object.record_time_token(snapshot);
            }
            if let Some(data) = data {
                self.cache.merge_node_at(object_id, &path, Node::from_json(data));
            }
        }

        let Some(task) = self.tasks.get_mut(object_id) else {
            return Err(SyncError::NoActiveTask {
                object_id: object_id.to_string(),
            });
        };
        task.commit_data_location(&location);
        if task.next_step() != task.last_step() {
            return Ok(None);
        }
        Ok(self.tasks.remove(object_id).map(|task| self.finalize(task)))
    }

    /// Dispatch a page to [`SyncState::on_partial_fetch_complete`] or
    /// [`SyncState::on_fetch_complete`].
    pub fn on_fetch_response(
        &mut self,
        object_id: &str,
        response: &FetchResponse,
    ) -> Result<Option<SyncTask>, SyncError> {
        if response.is_last_page() {
            self.on_fetch_complete(object_id, response)
        } else {
            self.on_partial_fetch_complete(object_id, response).map(|()| None)
        }
    }

    /// Abort the task of an object after a failed fetch.
    pub fn on_fetch_failed(
        &mut self,
        object_id: &str,
        error: &str,
    ) -> Result<FailedTask, SyncError> {
        let task = self.tasks.remove(object_id).ok_or_else(|| SyncError::NoActiveTask {
            object_id: object_id.to_string(),
        })?;
        self.release_deferred(object_id);
        Ok(FailedTask {
            task,
            error: SyncError::TransportFailure(error.to_string()),
        })
    }

    fn pending_fetch(
        &mut self,
        object_id: &str,
        location: &str,
    ) -> Result<(&mut SyncTask, String), SyncError> {
        let location = KeyPath::parse(location)?.to_string();
        let task = self.tasks.get_mut(object_id).ok_or_else(|| SyncError::NoActiveTask {
            object_id: object_id.to_string(),
        })?;
        if !task.is_pending_location(&location) {
            return Err(SyncError::UnexpectedLocation {
                object_id: object_id.to_string(),
                location,
            });
        }
        Ok((task, location))
    }

    fn finalize(&mut self, mut task: SyncTask) -> SyncTask {
        task.commit_step(task.last_step());
        let id = task.object_id().to_string();
        match task.kind() {
            TaskKind::Start => {
                self.cache.ensure(&id);
                self.locations.insert(id.clone(), task.target_locations().clone());
                self.release_deferred(&id);
            }
            TaskKind::Stop if task.target_locations().is_empty() => {
                self.locations.remove(&id);
                self.subscribed.remove(&id);
                self.cache.invalidate(&id);
                self.buffer.discard_object(&id);
                self.poisoned.retain(|(object_id, _)| *object_id != id);
            }
            TaskKind::Stop => {
                let remaining: Vec<KeyPath> = task
                    .target_locations()
                    .iter()
                    .filter_map(|l| KeyPath::parse(l).ok())
                    .collect();
                if self.options.prune_on_partial_stop {
                    for stopped in task.stopped_locations() {
                        let Ok(path) = KeyPath::parse(stopped) else {
                            continue;
                        };
                        if !remaining.iter().any(|r| r.covers(&path)) {
                            self.cache.remove_node_at(&id, &path);
                        }
                    }
                }
                self.locations.insert(id, task.target_locations().clone());
            }
            TaskKind::Fetch => {}
        }
        task
    }

    /// Apply, buffer or drop a synchronization event.
    ///
    /// Returns `Ok(None)` when the event is dropped: the object is not
    /// cached, the event is stale, or its transaction overflowed earlier.
    /// Events arriving while a start task is in flight are held and
    /// replayed, in arrival order, once the task leaves the registry.
    ///
    /// # Errors
    ///
    /// [`SyncError::TransactionOverflow`] when the transaction buffer is
    /// full. The whole transaction is discarded in that case.
    pub fn on_sync_event(&mut self, event: SyncEvent) -> Result<Option<SyncUpdate>, SyncError> {
        let id = event.object_id().to_string();
        let Some(handle) = self.cache.handle(&id) else {
            return Ok(None);
        };

        if self
            .tasks
            .get(&id)
            .is_some_and(|task| task.kind() == TaskKind::Start)
        {
            let locations = match event.kind() {
                SyncEventKind::TransactionComplete => Vec::new(),
                _ => vec![event.location().to_string()],
            };
            self.deferred.entry(id).or_default().push(event);
            return Ok(Some(SyncUpdate {
                object: handle,
                locations,
                transaction_complete: false,
            }));
        }

        if event.kind() == SyncEventKind::TransactionComplete {
            let Some(transaction_id) = event.transaction_id() else {
                return Ok(None);
            };
            let key = (id.clone(), transaction_id.clone());
            let events = self.buffer.take(&id, transaction_id);
            if self.poisoned.remove(&key) {
                return Ok(None);
            }
            return Ok(self.apply_transaction(&id, events).map(|locations| SyncUpdate {
                object: handle,
                locations,
                transaction_complete: true,
            }));
        }

        let transactional = self.options.transaction_feed && event.transaction_id().is_some();
        if !transactional {
            if self.drop_if_stale(&event) {
                return Ok(None);
            }
            let locations = self.apply(&event).into_iter().collect();
            return Ok(Some(SyncUpdate {
                object: handle,
                locations,
                transaction_complete: true,
            }));
        }

        let location = event.location().to_string();
        if let Some(transaction_id) = event.transaction_id() {
            if self.poisoned.contains(&(id.clone(), transaction_id.clone())) {
                return Ok(None);
            }
        }
        match self.buffer.enqueue(event.clone()) {
            Ok(_) => Ok(Some(SyncUpdate {
                object: handle,
                locations: vec![location],
                transaction_complete: false,
            })),
            Err(err) => {
                if let Some(transaction_id) = event.transaction_id() {
                    self.buffer.take(&id, transaction_id);
                    self.poisoned.insert((id, transaction_id.clone()));
                }
                Err(err.into())
            }
        }
    }

    /// Apply a completed transaction as one unit.
    ///
    /// The group is stale only when its newest event is older than the
    /// cached data; otherwise every event is applied.
    fn apply_transaction(
        &mut self,
        object_id: &str,
        events: Vec<SyncEvent>,
    ) -> Option<Vec<String>> {
        let Some(newest) = events.iter().map(SyncEvent::time_token).max() else {
            return Some(Vec::new());
        };
        let object = self.cache.get_mut(object_id)?;
        if object.ensure_fresh(newest).is_err() {
            for _ in &events {
                object.record_stale();
            }
            self.stale_events += events.len() as u64;
            return None;
        }

        let mut locations = Vec::new();
        for event in &events {
            if let Some(location) = self.apply(event) {
                if !locations.contains(&location) {
                    locations.push(location);
                }
            }
        }
        Some(locations)
    }

    fn drop_if_stale(&mut self, event: &SyncEvent) -> bool {
        match self.cache.get_mut(event.object_id()) {
            Some(object) if object.ensure_fresh(event.time_token()).is_err() => {
                object.record_stale();
                self.stale_events += 1;
                true
            }
            _ => false,
        }
    }

    fn apply(&mut self, event: &SyncEvent) -> Option<String> {
        let id = event.object_id();
        let path = event.location();
        match (event.kind(), event.value()) {
            (SyncEventKind::Update, Some(value)) => {
                self.cache.merge_node_at(id, path, Node::from_json(value.clone()));
            }
            (SyncEventKind::Replace, Some(value)) => {
                self.cache.replace_node_at(id, path, Node::from_json(value.clone()));
            }
            (SyncEventKind::Delete, _) => {
                self.cache.remove_node_at(id, path);
            }
            _ => return None,
        }
        if let Some(object) = self.cache.get_mut(id) {
            object.record_time_token(event.time_token());
        }
        self.applied_events += 1;
        Some(path.to_string())
    }

    /// Replay events held back while a start task was in flight.
    fn release_deferred(&mut self, object_id: &str) {
        let Some(events) = self.deferred.remove(object_id) else {
            return;
        };
        for event in events {
            if let Err(err) = self.on_sync_event(event) {
                self.rejected.push(err);
            }
        }
    }

    /// Errors raised while replaying held events since the last call.
    pub fn take_rejected(&mut self) -> Vec<SyncError> {
        std::mem::take(&mut self.rejected)
    }

    /// Drop all tasks, subscriptions, buffered events and cached objects.
    pub fn purge(&mut self) {
        self.tasks.clear();
        self.subscribed.clear();
        self.locations.clear();
        self.buffer.clear();
        self.poisoned.clear();
        self.deferred.clear();
        self.rejected.clear();
        self.cache.clear();
    }

    /// Whether a task is in flight for the object.
    pub fn has_active_task(&self, object_id: &str) -> bool {
        self.tasks.contains_key(object_id)
    }

    /// Task in flight for the object.
    pub fn active_task(&self, object_id: &str) -> Option<&SyncTask> {
        self.tasks.get(object_id)
    }

    /// Cached object.
    pub fn object(&self, object_id: &str) -> Option<&RemoteObject> {
        self.cache.get(object_id)
    }

    /// Object behind a handle.
    pub fn resolve(&self, handle: &ObjectHandle) -> Option<&RemoteObject> {
        self.cache.resolve(handle)
    }

    /// Resolve a key-path inside a cached object.
    pub fn lookup(&self, object_id: &str, path: &str) -> Result<Option<&Node>, SyncError> {
        self.cache.lookup(object_id, path)
    }

    /// Locations currently synchronized for an object.
    pub fn synchronized_locations(&self, object_id: &str) -> Vec<String> {
        self.locations
            .get(object_id)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Feeds currently subscribed for an object.
    pub fn subscribed_feeds(&self, object_id: &str) -> BTreeSet<String> {
        self.subscribed.get(object_id).cloned().unwrap_or_default()
    }

    /// Read-only access to the cache.
    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Current counters.
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            applied_events: self.applied_events,
            stale_events: self.stale_events,
            buffered_events: self.buffer.len()
                + self.deferred.values().map(Vec::len).sum::<usize>(),
            active_tasks: self.tasks.len(),
            objects: self.cache.len(),
        }
    }
}

/// Drop locations covered by another one; the root covers everything.
fn normalize(locations: &BTreeSet<String>) -> Result<BTreeSet<String>, SyncError> {
    let paths: Vec<KeyPath> = locations
        .iter()
        .map(|l| KeyPath::parse(l))
        .collect::<Result<_, _>>()?;
    if paths.is_empty() || paths.iter().any(KeyPath::is_root) {
        return Ok(BTreeSet::from([String::new()]));
    }
    Ok(paths
        .iter()
        .filter(|path| !paths.iter().any(|other| other != *path && other.covers(path)))
        .map(ToString::to_string)
        .collect())
}
