//! Local mirror of remote objects.
//!
//! [`ObjectCache`] exclusively owns every [`RemoteObject`]. Code outside the
//! cache holds [`ObjectHandle`]s, which are identifier + generation pairs:
//! once an object is invalidated (or evicted and re-created) its old handles
//! stop resolving instead of pointing at stale data.

use std::collections::HashMap;

use objsync_types::{SyncError, TimeToken};

use crate::path::KeyPath;
use crate::tree::Node;

/// Back-reference to a cached remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    id: String,
    generation: u64,
}

impl ObjectHandle {
    /// Remote object identifier.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Locally mirrored remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    id: String,
    data: Node,
    valid: bool,
    generation: u64,
    last_time_token: Option<TimeToken>,
    stale_events: u64,
}

impl RemoteObject {
    fn new(id: &str, generation: u64) -> Self {
        Self {
            id: id.to_string(),
            data: Node::empty_map(),
            valid: true,
            generation,
            last_time_token: None,
            stale_events: 0,
        }
    }

    /// Remote object identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the object is still backed by the cache.
    ///
    /// Copies taken before invalidation keep `false` here once the cache
    /// evicts the object through [`ObjectCache::invalidate`].
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Root of the object data.
    pub fn data(&self) -> &Node {
        &self.data
    }

    /// Object data as plain JSON.
    pub fn to_json(&self) -> serde_json::Value {
        self.data.to_json()
    }

    /// Resolve a key-path inside the object.
    pub fn lookup(&self, path: &str) -> Result<Option<&Node>, SyncError> {
        let path = KeyPath::parse(path)?;
        Ok(self.data.get(&path))
    }

    /// Highest time token applied to the object.
    pub fn last_time_token(&self) -> Option<TimeToken> {
        self.last_time_token
    }

    /// Number of events dropped because they were older than the data.
    pub fn stale_events(&self) -> u64 {
        self.stale_events
    }

    /// Handle for this object.
    pub fn handle(&self) -> ObjectHandle {
        ObjectHandle {
            id: self.id.clone(),
            generation: self.generation,
        }
    }

    /// Whether an event with `time_token` is older than the applied data.
    pub fn is_stale(&self, time_token: TimeToken) -> bool {
        matches!(self.last_time_token, Some(last) if time_token < last)
    }

    /// Reject a time token older than the last applied one.
    pub fn ensure_fresh(&self, time_token: TimeToken) -> Result<(), SyncError> {
        match self.last_time_token {
            Some(last) if time_token < last => Err(SyncError::StaleEvent {
                object_id: self.id.clone(),
                time_token: time_token.value(),
                last_applied: last.value(),
            }),
            _ => Ok(()),
        }
    }

    /// Record an applied time token. Never moves backwards.
    pub fn record_time_token(&mut self, time_token: TimeToken) {
        self.last_time_token = Some(self.last_time_token.map_or(time_token, |t| t.max(time_token)));
    }

    /// Count a dropped stale event.
    pub fn record_stale(&mut self) {
        self.stale_events += 1;
    }
}

/// Owner of all locally mirrored remote objects, keyed by identifier.
#[derive(Debug, Default)]
pub struct ObjectCache {
    objects: HashMap<String, RemoteObject>,
    next_generation: u64,
}

impl ObjectCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached object, never creates one.
    pub fn get(&self, id: &str) -> Option<&RemoteObject> {
        self.objects.get(id)
    }

    /// Mutable access to a cached object.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut RemoteObject> {
        self.objects.get_mut(id)
    }

    /// Existing object or a new, empty and valid one.
    pub fn ensure(&mut self, id: &str) -> &mut RemoteObject {
        let generation = self.next_generation;
        let object = self
            .objects
            .entry(id.to_string())
            .or_insert_with(|| RemoteObject::new(id, generation));
        if object.generation == generation {
            self.next_generation += 1;
        }
        object
    }

    /// Deep merge `value` at `path` (see [`Node::merge`]).
    ///
    /// # Errors
    ///
    /// [`SyncError::MalformedPath`] if `path` does not parse; nothing is
    /// changed in that case.
    pub fn merge_at(
        &mut self,
        id: &str,
        path: &str,
        value: serde_json::Value,
    ) -> Result<(), SyncError> {
        let path = KeyPath::parse(path)?;
        self.merge_node_at(id, &path, Node::from_json(value));
        Ok(())
    }

    /// Overwrite the subtree at `path`.
    pub fn replace_at(
        &mut self,
        id: &str,
        path: &str,
        value: serde_json::Value,
    ) -> Result<(), SyncError> {
        let path = KeyPath::parse(path)?;
        self.replace_node_at(id, &path, Node::from_json(value));
        Ok(())
    }

    /// Remove the node at `path`, pruning empty ancestors.
    ///
    /// Returns `Ok(false)` if the object or path did not exist.
    pub fn remove_at(&mut self, id: &str, path: &str) -> Result<bool, SyncError> {
        let path = KeyPath::parse(path)?;
        Ok(self.remove_node_at(id, &path))
    }

    /// Resolve `path` inside object `id`.
    pub fn lookup(&self, id: &str, path: &str) -> Result<Option<&Node>, SyncError> {
        let path = KeyPath::parse(path)?;
        Ok(self.objects.get(id).and_then(|o| o.data.get(&path)))
    }

    /// Pre-parsed variant of [`ObjectCache::merge_at`].
    pub fn merge_node_at(&mut self, id: &str, path: &KeyPath, value: Node) {
        self.ensure(id).data.merge_at(path, value);
    }

    /// Pre-parsed variant of [`ObjectCache::replace_at`].
    pub fn replace_node_at(&mut self, id: &str, path: &KeyPath, value: Node) {
        self.ensure(id).data.replace_at(path, value);
    }

    /// Pre-parsed variant of [`ObjectCache::remove_at`].
    pub fn remove_node_at(&mut self, id: &str, path: &KeyPath) -> bool {
        self.objects
            .get_mut(id)
            .map(|o| o.data.remove_at(path))
            .unwrap_or(false)
    }

    /// Mark the object invalid and evict it.
    ///
    /// Returns the evicted object (already flagged invalid).
    pub fn invalidate(&mut self, id: &str) -> Option<RemoteObject> {
        let mut object = self.objects.remove(id)?;
        object.valid = false;
        Some(object)
    }

    /// Handle for a cached object.
    pub fn handle(&self, id: &str) -> Option<ObjectHandle> {
        self.objects.get(id).map(RemoteObject::handle)
    }

    /// Object behind `handle`, if it has not been invalidated since.
    pub fn resolve(&self, handle: &ObjectHandle) -> Option<&RemoteObject> {
        self.objects
            .get(&handle.id)
            .filter(|o| o.generation == handle.generation)
    }

    /// Identifiers of all cached objects.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.objects.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Invalidate and evict everything.
    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_never_creates() {
        let cache = ObjectCache::new();
        assert!(cache.get("chess").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn ensure_creates_empty_valid_object() {
        let mut cache = ObjectCache::new();
        let object = cache.ensure("chess");
        assert!(object.is_valid());
        assert_eq!(object.to_json(), json!({}));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn ensure_returns_existing_object() {
        let mut cache = ObjectCache::new();
        cache.merge_at("chess", "a", json!(1)).unwrap();
        let handle = cache.handle("chess").unwrap();
        cache.ensure("chess");
        assert_eq!(cache.resolve(&handle).unwrap().to_json(), json!({"a": 1}));
    }

    #[test]
    fn merge_then_lookup() {
        let mut cache = ObjectCache::new();
        cache.merge_at("chess", "boards.a", json!({"x": 1})).unwrap();
        cache.merge_at("chess", "boards.a", json!({"y": 2})).unwrap();
        let node = cache.lookup("chess", "boards.a").unwrap().unwrap();
        assert_eq!(node.to_json(), json!({"x": 1, "y": 2}));
    }

    #[test]
    fn malformed_path_leaves_tree_untouched() {
        let mut cache = ObjectCache::new();
        cache.merge_at("chess", "a", json!(1)).unwrap();
        let before = cache.get("chess").unwrap().clone();

        assert!(cache.merge_at("chess", "a..b", json!(2)).is_err());
        assert!(cache.replace_at("chess", "a[", json!(2)).is_err());
        assert!(cache.remove_at("chess", ".a").is_err());

        assert_eq!(cache.get("chess").unwrap(), &before);
    }

    #[test]
    fn malformed_path_does_not_create_object() {
        let mut cache = ObjectCache::new();
        assert!(cache.merge_at("chess", "a..b", json!(2)).is_err());
        assert!(cache.get("chess").is_none());
    }

    #[test]
    fn remove_then_lookup_is_none() {
        let mut cache = ObjectCache::new();
        cache.merge_at("chess", "a.b.c", json!(1)).unwrap();
        assert!(cache.remove_at("chess", "a.b.c").unwrap());
        assert!(cache.lookup("chess", "a.b.c").unwrap().is_none());
        assert!(cache.lookup("chess", "a").unwrap().is_none());
    }

    #[test]
    fn remove_on_unknown_object_is_false() {
        let mut cache = ObjectCache::new();
        assert!(!cache.remove_at("nope", "a").unwrap());
    }

    #[test]
    fn invalidate_evicts_and_flags() {
        let mut cache = ObjectCache::new();
        cache.ensure("chess");
        let handle = cache.handle("chess").unwrap();

        let evicted = cache.invalidate("chess").unwrap();
        assert!(!evicted.is_valid());
        assert!(cache.get("chess").is_none());
        assert!(cache.resolve(&handle).is_none());
    }

    #[test]
    fn old_handles_do_not_resolve_recreated_objects() {
        let mut cache = ObjectCache::new();
        cache.ensure("chess");
        let old = cache.handle("chess").unwrap();
        cache.invalidate("chess");
        cache.ensure("chess");

        assert!(cache.resolve(&old).is_none());
        let new = cache.handle("chess").unwrap();
        assert!(cache.resolve(&new).is_some());
        assert_ne!(old, new);
    }

    #[test]
    fn time_token_never_moves_backwards() {
        let mut cache = ObjectCache::new();
        let object = cache.ensure("chess");
        object.record_time_token(TimeToken::new(10));
        object.record_time_token(TimeToken::new(5));
        assert_eq!(object.last_time_token(), Some(TimeToken::new(10)));
        assert!(object.is_stale(TimeToken::new(9)));
        assert!(!object.is_stale(TimeToken::new(10)));
    }

    #[test]
    fn older_time_token_is_reported_as_stale_event() {
        let mut cache = ObjectCache::new();
        let object = cache.ensure("chess");
        assert!(object.ensure_fresh(TimeToken::new(1)).is_ok());
        object.record_time_token(TimeToken::new(10));

        let err = object.ensure_fresh(TimeToken::new(7)).unwrap_err();
        match err {
            SyncError::StaleEvent {
                object_id,
                time_token,
                last_applied,
            } => {
                assert_eq!(object_id, "chess");
                assert_eq!((time_token, last_applied), (7, 10));
            }
            other => panic!("expected stale event, got {other:?}"),
        }
        assert!(object.ensure_fresh(TimeToken::new(10)).is_ok());
    }

    #[test]
    fn clear_drops_everything() {
        let mut cache = ObjectCache::new();
        cache.ensure("a");
        cache.ensure("b");
        assert_eq!(cache.ids(), vec!["a".to_string(), "b".to_string()]);
        cache.clear();
        assert!(cache.is_empty());
    }
}
