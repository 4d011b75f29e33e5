//! Synchronization task state machine.
//!
//! A task tracks one start, stop or fetch request through its steps:
//!
//! ```text
//! Unsubscribe -> Subscribe -> Fetch (one per location) -> StartCompleted
//!                                                       | StopCompleted
//!                                                       | FetchCompleted
//! ```
//!
//! Steps with nothing to do are committed when the task is created, so
//! [`SyncTask::next_step`] always names work the caller has to perform.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use objsync_types::TimeToken;

use crate::path::KeyPath;
use crate::tree::Node;

/// Task step. Values are bit flags in the completed-steps mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Step {
    /// Every step, including the terminal one, is committed.
    Unknown = 0,
    /// Unsubscribe from irrelevant feeds.
    Unsubscribe = 1,
    /// Subscribe to relevant feeds.
    Subscribe = 1 << 1,
    /// Fetch data for the requested locations.
    Fetch = 1 << 2,
    /// Terminal step of a start task.
    StartCompleted = 1 << 3,
    /// Terminal step of a stop task.
    StopCompleted = 1 << 4,
    /// Terminal step of a standalone fetch task.
    FetchCompleted = 1 << 5,
}

impl Step {
    fn bit(self) -> u8 {
        self as u8
    }
}

/// What a task was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Begin synchronizing locations of an object.
    Start,
    /// Stop synchronizing locations of an object.
    Stop,
    /// One-off data fetch, no feed changes and no cache writes.
    Fetch,
}

impl TaskKind {
    fn steps(self) -> [Step; 4] {
        [
            Step::Unsubscribe,
            Step::Subscribe,
            Step::Fetch,
            match self {
                TaskKind::Start => Step::StartCompleted,
                TaskKind::Stop => Step::StopCompleted,
                TaskKind::Fetch => Step::FetchCompleted,
            },
        ]
    }
}

/// Caller supplied description of what to synchronize.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    object_id: String,
    locations: Vec<String>,
    snapshot_time_token: Option<TimeToken>,
    next_page: Option<String>,
    pages: BTreeMap<String, Value>,
}

impl SyncRequest {
    /// Request for `locations` of an object. No locations means the whole
    /// object. Duplicates are dropped, first occurrence wins.
    pub fn new<I, S>(object_id: impl Into<String>, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let locations = locations
            .into_iter()
            .map(Into::into)
            .filter(|location: &String| seen.insert(location.clone()))
            .collect();
        Self {
            object_id: object_id.into(),
            locations,
            snapshot_time_token: None,
            next_page: None,
            pages: BTreeMap::new(),
        }
    }

    /// Fetch data as of a time token.
    pub fn with_snapshot_time_token(mut self, time_token: TimeToken) -> Self {
        self.snapshot_time_token = Some(time_token);
        self
    }

    /// Object identifier.
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Requested locations, empty for the whole object.
    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    /// Snapshot time token, if any.
    pub fn snapshot_time_token(&self) -> Option<TimeToken> {
        self.snapshot_time_token
    }

    /// Continuation token of the fetch in progress.
    pub fn next_page(&self) -> Option<&str> {
        self.next_page.as_deref()
    }

    pub(crate) fn set_locations(&mut self, locations: Vec<String>) {
        self.locations = locations;
    }

    pub(crate) fn set_next_page(&mut self, next_page: Option<String>) {
        self.next_page = next_page;
    }

    /// Add one page of data for `location`.
    ///
    /// Pages are deep merged as JSON so indexed lists split across pages
    /// keep every entry.
    pub(crate) fn accumulate(&mut self, location: &str, page: Value) {
        if page.is_null() {
            return;
        }
        match self.pages.get_mut(location) {
            Some(existing) => merge_json(existing, page),
            None => {
                self.pages.insert(location.to_string(), page);
            }
        }
    }

    /// Accumulated data for one location.
    pub fn page_data(&self, location: &str) -> Option<&Value> {
        self.pages.get(location)
    }

    /// All accumulated data, assembled into one object.
    pub fn data(&self) -> Value {
        let mut root = Node::empty_map();
        for (location, page) in &self.pages {
            if let Ok(path) = KeyPath::parse(location) {
                root.merge_at(&path, Node::from_json(page.clone()));
            }
        }
        root.to_json()
    }
}

fn merge_json(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(current), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match current.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        current.insert(key, value);
                    }
                }
            }
        }
        (slot, incoming) => *slot = incoming,
    }
}

/// One in-flight start, stop or fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncTask {
    request: SyncRequest,
    kind: TaskKind,
    relevant: BTreeSet<String>,
    irrelevant: BTreeSet<String>,
    completed: u8,
    fetch_locations: Vec<String>,
    fetched: BTreeSet<String>,
    target_locations: BTreeSet<String>,
    stopped_locations: BTreeSet<String>,
}

impl SyncTask {
    /// Create a task and pre-commit the steps it has nothing to do for.
    pub fn new(
        request: SyncRequest,
        kind: TaskKind,
        relevant: BTreeSet<String>,
        irrelevant: BTreeSet<String>,
    ) -> Self {
        debug_assert!(relevant.is_disjoint(&irrelevant));

        let fetch_locations = match kind {
            TaskKind::Stop => Vec::new(),
            TaskKind::Start | TaskKind::Fetch if request.locations().is_empty() => {
                vec![String::new()]
            }
            TaskKind::Start | TaskKind::Fetch => request.locations().to_vec(),
        };
        let mut task = Self {
            request,
            kind,
            relevant,
            irrelevant,
            completed: 0,
            fetch_locations,
            fetched: BTreeSet::new(),
            target_locations: BTreeSet::new(),
            stopped_locations: BTreeSet::new(),
        };
        if task.irrelevant.is_empty() {
            task.commit_step(Step::Unsubscribe);
        }
        if task.relevant.is_empty() {
            task.commit_step(Step::Subscribe);
        }
        if task.fetch_locations.is_empty() {
            task.commit_step(Step::Fetch);
        }
        task
    }

    pub(crate) fn with_locations(
        mut self,
        target: BTreeSet<String>,
        stopped: BTreeSet<String>,
    ) -> Self {
        self.target_locations = target;
        self.stopped_locations = stopped;
        self
    }

    /// The request this task serves.
    pub fn request(&self) -> &SyncRequest {
        &self.request
    }

    pub(crate) fn request_mut(&mut self) -> &mut SyncRequest {
        &mut self.request
    }

    /// Object identifier.
    pub fn object_id(&self) -> &str {
        self.request.object_id()
    }

    /// Task kind.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Feeds to subscribe to.
    pub fn relevant(&self) -> &BTreeSet<String> {
        &self.relevant
    }

    /// Feeds to unsubscribe from.
    pub fn irrelevant(&self) -> &BTreeSet<String> {
        &self.irrelevant
    }

    /// Locations synchronized once the task completes.
    pub fn target_locations(&self) -> &BTreeSet<String> {
        &self.target_locations
    }

    /// Locations a stop task removes.
    pub fn stopped_locations(&self) -> &BTreeSet<String> {
        &self.stopped_locations
    }

    /// Lowest step not yet committed.
    pub fn next_step(&self) -> Step {
        self.kind
            .steps()
            .into_iter()
            .find(|step| !self.is_committed(*step))
            .unwrap_or(Step::Unknown)
    }

    /// Terminal step for this kind of task.
    pub fn last_step(&self) -> Step {
        self.kind.steps()[3]
    }

    /// Whether `step` has been committed.
    pub fn is_committed(&self, step: Step) -> bool {
        step != Step::Unknown && self.completed & step.bit() != 0
    }

    /// Whether the terminal step has been committed.
    pub fn is_finished(&self) -> bool {
        self.is_committed(self.last_step())
    }

    /// Mark a step done. Committing twice is a no-op.
    pub fn commit_step(&mut self, step: Step) {
        self.completed |= step.bit();
    }

    /// Next location to fetch, `None` once every location is fetched.
    pub fn next_data_location(&self) -> Option<&str> {
        if self.is_committed(Step::Fetch) {
            return None;
        }
        self.fetch_locations
            .iter()
            .find(|location| !self.fetched.contains(*location))
            .map(String::as_str)
    }

    /// Whether the task still expects data for `location`.
    pub fn is_pending_location(&self, location: &str) -> bool {
        !self.is_committed(Step::Fetch)
            && self.fetch_locations.iter().any(|l| l == location)
            && !self.fetched.contains(location)
    }

    /// Mark a location fetched. Commits [`Step::Fetch`] after the last one.
    ///
    /// Returns `false` if the location was not pending.
    pub fn commit_data_location(&mut self, location: &str) -> bool {
        if !self.is_pending_location(location) {
            return false;
        }
        self.fetched.insert(location.to_string());
        if self.fetch_locations.iter().all(|l| self.fetched.contains(l)) {
            self.commit_step(Step::Fetch);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feeds(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn start(locations: &[&str], relevant: &[&str], irrelevant: &[&str]) -> SyncTask {
        let request = SyncRequest::new("chess", locations.iter().copied());
        SyncTask::new(request, TaskKind::Start, feeds(relevant), feeds(irrelevant))
    }

    #[test]
    fn request_dedups_locations() {
        let request = SyncRequest::new("chess", ["a", "b", "a"]);
        assert_eq!(request.locations(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn start_walks_all_steps() {
        let mut task = start(&["boards"], &["pn_ds_chess.boards"], &["pn_ds_chess"]);

        assert_eq!(task.next_step(), Step::Unsubscribe);
        task.commit_step(Step::Unsubscribe);
        assert_eq!(task.next_step(), Step::Subscribe);
        task.commit_step(Step::Subscribe);
        assert_eq!(task.next_step(), Step::Fetch);
        assert!(task.commit_data_location("boards"));
        assert_eq!(task.next_step(), Step::StartCompleted);
        assert_eq!(task.last_step(), Step::StartCompleted);
        task.commit_step(Step::StartCompleted);
        assert_eq!(task.next_step(), Step::Unknown);
        assert!(task.is_finished());
    }

    #[test]
    fn empty_steps_are_precommitted() {
        let task = start(&["boards"], &["pn_ds_chess.boards"], &[]);
        assert!(task.is_committed(Step::Unsubscribe));
        assert_eq!(task.next_step(), Step::Subscribe);

        let task = start(&["boards"], &[], &[]);
        assert_eq!(task.next_step(), Step::Fetch);
    }

    #[test]
    fn stop_skips_fetch() {
        let request = SyncRequest::new("chess", ["boards"]);
        let irrelevant = feeds(&["pn_ds_chess.boards"]);
        let task = SyncTask::new(request, TaskKind::Stop, feeds(&[]), irrelevant);

        assert_eq!(task.next_step(), Step::Unsubscribe);
        assert!(task.is_committed(Step::Fetch));
        assert!(task.next_data_location().is_none());
        assert_eq!(task.last_step(), Step::StopCompleted);
    }

    #[test]
    fn whole_object_fetches_root() {
        let none: [&str; 0] = [];
        let request = SyncRequest::new("chess", none);
        let task = SyncTask::new(request, TaskKind::Fetch, feeds(&[]), feeds(&[]));
        assert_eq!(task.next_step(), Step::Fetch);
        assert_eq!(task.next_data_location(), Some(""));
        assert_eq!(task.last_step(), Step::FetchCompleted);
    }

    #[test]
    fn data_locations_in_request_order() {
        let mut task = start(&["boards", "leaderboard"], &[], &[]);

        assert_eq!(task.next_data_location(), Some("boards"));
        assert!(task.commit_data_location("boards"));
        assert_eq!(task.next_step(), Step::Fetch);
        assert_eq!(task.next_data_location(), Some("leaderboard"));
        assert!(task.commit_data_location("leaderboard"));
        assert!(task.next_data_location().is_none());
        assert_eq!(task.next_step(), Step::StartCompleted);
    }

    #[test]
    fn unexpected_location_is_rejected() {
        let mut task = start(&["boards"], &[], &[]);
        assert!(!task.is_pending_location("scores"));
        assert!(!task.commit_data_location("scores"));
        assert!(task.commit_data_location("boards"));
        assert!(!task.commit_data_location("boards"));
    }

    #[test]
    fn out_of_order_locations_are_accepted() {
        let mut task = start(&["a", "b"], &[], &[]);
        assert!(task.commit_data_location("b"));
        assert_eq!(task.next_data_location(), Some("a"));
        assert!(task.commit_data_location("a"));
        assert!(task.is_committed(Step::Fetch));
    }

    #[test]
    fn pages_merge_per_location() {
        let mut request = SyncRequest::new("chess", ["moves"]);
        request.accumulate("moves", json!({"-!1": "e4"}));
        request.accumulate("moves", json!({"-!2": "e5"}));
        request.accumulate("moves", Value::Null);

        assert_eq!(request.page_data("moves"), Some(&json!({"-!1": "e4", "-!2": "e5"})));
        assert_eq!(request.data(), json!({"moves": ["e4", "e5"]}));
    }

    #[test]
    fn root_page_is_the_whole_object() {
        let none: [&str; 0] = [];
        let mut request = SyncRequest::new("chess", none);
        request.accumulate("", json!({"a": 1}));
        request.accumulate("", json!({"b": {"c": 2}}));
        assert_eq!(request.data(), json!({"a": 1, "b": {"c": 2}}));
    }
}
