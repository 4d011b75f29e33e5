//! In-memory tree holding one remote object's data.
//!
//! Maps merge key-by-key. Indexed lists merge entry-by-entry on their server
//! index; plain lists and scalars are replaced outright. Lists keep the
//! server assigned index of every entry so key-paths can address entries
//! structurally, independent of their position.

use std::collections::BTreeMap;

use crate::path::{KeyPath, ListIndex, PathSegment};

/// A node of remote object data.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Any JSON value which is not a container (including `null`).
    Scalar(serde_json::Value),
    /// Keyed children.
    Map(BTreeMap<String, Node>),
    /// Ordered entries.
    List(Vec<ListEntry>),
}

/// One list entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    /// Server assigned index, `None` for entries that came from a plain JSON
    /// array.
    pub index: Option<ListIndex>,
    /// Entry value.
    pub value: Node,
}

impl Node {
    /// Empty map node.
    pub fn empty_map() -> Self {
        Node::Map(BTreeMap::new())
    }

    /// Build a tree from the service's JSON representation.
    ///
    /// A non-empty object whose keys are all list indices is the service's
    /// encoding of a list and becomes a [`Node::List`] ordered by index.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => {
                let all_indexed =
                    !map.is_empty() && map.keys().all(|k| ListIndex::parse(k).is_some());
                if all_indexed {
                    let mut entries: Vec<ListEntry> = map
                        .into_iter()
                        .filter_map(|(k, v)| {
                            ListIndex::parse(&k).map(|index| ListEntry {
                                index: Some(index),
                                value: Node::from_json(v),
                            })
                        })
                        .collect();
                    entries.sort_by(|a, b| a.index.cmp(&b.index));
                    Node::List(entries)
                } else {
                    Node::Map(
                        map.into_iter()
                            .map(|(k, v)| (k, Node::from_json(v)))
                            .collect(),
                    )
                }
            }
            serde_json::Value::Array(items) => Node::List(
                items
                    .into_iter()
                    .map(|v| ListEntry {
                        index: None,
                        value: Node::from_json(v),
                    })
                    .collect(),
            ),
            scalar => Node::Scalar(scalar),
        }
    }

    /// Plain JSON view (lists become arrays, indices are dropped).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Node::Scalar(value) => value.clone(),
            Node::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Node::List(entries) => {
                serde_json::Value::Array(entries.iter().map(|e| e.value.to_json()).collect())
            }
        }
    }

    /// Whether this is a map or list without children.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Node::Map(map) => map.is_empty(),
            Node::List(entries) => entries.is_empty(),
            Node::Scalar(_) => false,
        }
    }

    /// Deep merge `incoming` into this node.
    pub fn merge(&mut self, incoming: Node) {
        match (self, incoming) {
            (Node::Map(current), Node::Map(incoming)) => {
                for (key, value) in incoming {
                    match current.get_mut(&key) {
                        Some(existing) => existing.merge(value),
                        None => {
                            current.insert(key, value);
                        }
                    }
                }
            }
            (Node::List(current), Node::List(incoming))
                if !incoming.is_empty() && is_indexed(&incoming) && is_indexed(current) =>
            {
                for entry in incoming {
                    let Some(index) = entry.index else {
                        continue;
                    };
                    let position = indexed_position(current, &index);
                    current[position].value.merge(entry.value);
                }
            }
            (slot, incoming) => *slot = incoming,
        }
    }

    /// Resolve a path without creating anything.
    pub fn get(&self, path: &KeyPath) -> Option<&Node> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Server index of the list entry at `path`, if it is one.
    pub fn list_index_at(&self, path: &KeyPath) -> Option<&ListIndex> {
        let last = path.last()?;
        match (self.get(&path.parent())?, last) {
            (Node::List(entries), PathSegment::Index(index)) => entries
                .iter()
                .find(|e| e.index.as_ref() == Some(index))
                .and_then(|e| e.index.as_ref()),
            (Node::List(entries), PathSegment::Key(key)) => {
                let position: usize = key.parse().ok()?;
                entries.get(position)?.index.as_ref()
            }
            _ => None,
        }
    }

    /// Deep merge `value` at `path`, creating missing ancestors.
    pub fn merge_at(&mut self, path: &KeyPath, value: Node) {
        self.node_mut_or_create(path).merge(value);
    }

    /// Overwrite the subtree at `path`, creating missing ancestors.
    pub fn replace_at(&mut self, path: &KeyPath, value: Node) {
        *self.node_mut_or_create(path) = value;
    }

    /// Remove the node at `path` and prune ancestors left empty.
    ///
    /// The receiver itself is never removed; removing the root path clears
    /// it to an empty map. Returns `false` if nothing was stored at `path`.
    pub fn remove_at(&mut self, path: &KeyPath) -> bool {
        if path.is_root() {
            let had_data = !self.is_empty_container();
            *self = Node::empty_map();
            return had_data;
        }
        remove_path(self, path.segments())
    }

    fn child(&self, segment: &PathSegment) -> Option<&Node> {
        match (self, segment) {
            (Node::Map(map), PathSegment::Key(key)) => map.get(key),
            (Node::Map(map), PathSegment::Index(index)) => map.get(index.as_str()),
            (Node::List(entries), PathSegment::Key(key)) => {
                let position: usize = key.parse().ok()?;
                entries.get(position).map(|e| &e.value)
            }
            (Node::List(entries), PathSegment::Index(index)) => entries
                .iter()
                .find(|e| e.index.as_ref() == Some(index))
                .map(|e| &e.value),
            (Node::Scalar(_), _) => None,
        }
    }

    fn child_mut(&mut self, segment: &PathSegment) -> Option<&mut Node> {
        match (self, segment) {
            (Node::Map(map), PathSegment::Key(key)) => map.get_mut(key),
            (Node::Map(map), PathSegment::Index(index)) => map.get_mut(index.as_str()),
            (Node::List(entries), PathSegment::Key(key)) => {
                let position: usize = key.parse().ok()?;
                entries.get_mut(position).map(|e| &mut e.value)
            }
            (Node::List(entries), PathSegment::Index(index)) => entries
                .iter_mut()
                .find(|e| e.index.as_ref() == Some(index))
                .map(|e| &mut e.value),
            (Node::Scalar(_), _) => None,
        }
    }

    fn remove_child(&mut self, segment: &PathSegment) -> bool {
        match (self, segment) {
            (Node::Map(map), PathSegment::Key(key)) => map.remove(key).is_some(),
            (Node::Map(map), PathSegment::Index(index)) => map.remove(index.as_str()).is_some(),
            (Node::List(entries), PathSegment::Key(key)) => match key.parse::<usize>() {
                Ok(position) if position < entries.len() => {
                    entries.remove(position);
                    true
                }
                _ => false,
            },
            (Node::List(entries), PathSegment::Index(index)) => {
                let before = entries.len();
                entries.retain(|e| e.index.as_ref() != Some(index));
                entries.len() != before
            }
            (Node::Scalar(_), _) => false,
        }
    }

    fn node_mut_or_create(&mut self, path: &KeyPath) -> &mut Node {
        path.segments()
            .iter()
            .fold(self, |node, segment| node.child_or_create(segment))
    }

    fn child_or_create(&mut self, segment: &PathSegment) -> &mut Node {
        match segment {
            PathSegment::Key(key) => {
                let position = match self {
                    Node::List(entries) => key.parse::<usize>().ok().filter(|p| *p < entries.len()),
                    _ => None,
                };
                match (self, position) {
                    (Node::List(entries), Some(position)) => &mut entries[position].value,
                    (node, _) => ensure_map(node)
                        .entry(key.clone())
                        .or_insert_with(Node::empty_map),
                }
            }
            PathSegment::Index(index) => {
                let entries = ensure_list(self);
                let position = indexed_position(entries, index);
                &mut entries[position].value
            }
        }
    }
}

fn is_indexed(entries: &[ListEntry]) -> bool {
    entries.iter().all(|e| e.index.is_some())
}

/// Position of the entry with `index`, inserting an empty one in sort order
/// when missing.
fn indexed_position(entries: &mut Vec<ListEntry>, index: &ListIndex) -> usize {
    if let Some(position) = entries.iter().position(|e| e.index.as_ref() == Some(index)) {
        return position;
    }
    let position = entries
        .iter()
        .position(|e| matches!(&e.index, Some(existing) if existing > index))
        .unwrap_or(entries.len());
    entries.insert(
        position,
        ListEntry {
            index: Some(index.clone()),
            value: Node::empty_map(),
        },
    );
    position
}

impl Default for Node {
    fn default() -> Self {
        Node::empty_map()
    }
}

fn ensure_map(node: &mut Node) -> &mut BTreeMap<String, Node> {
    if !matches!(node, Node::Map(_)) {
        *node = Node::empty_map();
    }
    match node {
        Node::Map(map) => map,
        _ => unreachable!("node was just replaced by a map"),
    }
}

fn ensure_list(node: &mut Node) -> &mut Vec<ListEntry> {
    if !matches!(node, Node::List(_)) {
        *node = Node::List(Vec::new());
    }
    match node {
        Node::List(entries) => entries,
        _ => unreachable!("node was just replaced by a list"),
    }
}

fn remove_path(node: &mut Node, segments: &[PathSegment]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    if rest.is_empty() {
        return node.remove_child(first);
    }
    let Some(child) = node.child_mut(first) else {
        return false;
    };
    let removed = remove_path(child, rest);
    if removed && child.is_empty_container() {
        node.remove_child(first);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> KeyPath {
        KeyPath::parse(p).unwrap()
    }

    fn tree(value: serde_json::Value) -> Node {
        Node::from_json(value)
    }

    #[test]
    fn indexed_object_becomes_ordered_list() {
        let node = tree(json!({
            "-!200": "second",
            "-!100": "first",
        }));
        assert_eq!(node.to_json(), json!(["first", "second"]));
        let index = node.list_index_at(&path("0")).unwrap();
        assert_eq!(index.as_str(), "-!100");
    }

    #[test]
    fn empty_object_stays_a_map() {
        assert_eq!(tree(json!({})), Node::empty_map());
    }

    #[test]
    fn merge_maps_key_by_key() {
        let mut node = tree(json!({"a": {"x": 1, "y": 2}, "b": 1}));
        node.merge_at(&path("a"), tree(json!({"y": 3, "z": 4})));
        assert_eq!(node.to_json(), json!({"a": {"x": 1, "y": 3, "z": 4}, "b": 1}));
    }

    #[test]
    fn merge_replaces_lists_and_scalars() {
        let mut node = tree(json!({"list": [1, 2, 3], "n": 1}));
        node.merge_at(&path("list"), tree(json!([9])));
        node.merge_at(&path("n"), tree(json!({"now": "a map"})));
        assert_eq!(node.to_json(), json!({"list": [9], "n": {"now": "a map"}}));
    }

    #[test]
    fn merge_of_indexed_lists_keeps_existing_entries() {
        let mut node = tree(json!({"moves": {"-!100": "e4", "-!300": "Nf3"}}));
        node.merge_at(&path("moves"), tree(json!({"-!200": "e5"})));
        assert_eq!(node.to_json(), json!({"moves": ["e4", "e5", "Nf3"]}));

        node.merge_at(&path("moves"), tree(json!({"-!300": "Nc3", "-!400": "Nc6"})));
        assert_eq!(node.to_json(), json!({"moves": ["e4", "e5", "Nc3", "Nc6"]}));
        assert_eq!(
            node.list_index_at(&path("moves.3")).map(|i| i.as_str().to_string()),
            Some("-!400".to_string())
        );
    }

    #[test]
    fn merge_of_plain_array_replaces_indexed_list() {
        let mut node = tree(json!({"moves": {"-!100": "e4"}}));
        node.merge_at(&path("moves"), tree(json!(["d4"])));
        assert_eq!(node.to_json(), json!({"moves": ["d4"]}));
    }

    #[test]
    fn merge_creates_missing_ancestors() {
        let mut node = Node::empty_map();
        node.merge_at(&path("a.b['c.d']"), tree(json!(5)));
        assert_eq!(node.to_json(), json!({"a": {"b": {"c.d": 5}}}));
    }

    #[test]
    fn merge_through_scalar_converts_it() {
        let mut node = tree(json!({"a": 1}));
        node.merge_at(&path("a.b"), tree(json!(2)));
        assert_eq!(node.to_json(), json!({"a": {"b": 2}}));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut node = tree(json!({"a": {"x": 1}}));
        let value = tree(json!({"y": {"z": [1, 2]}}));
        node.merge_at(&path("a"), value.clone());
        let once = node.clone();
        node.merge_at(&path("a"), value);
        assert_eq!(node, once);
    }

    #[test]
    fn index_segments_insert_in_sorted_position() {
        let mut node = tree(json!({"moves": {"-!100": "e4", "-!300": "Nf3"}}));
        node.merge_at(&path("moves.-!200"), tree(json!("e5")));
        assert_eq!(node.to_json(), json!({"moves": ["e4", "e5", "Nf3"]}));
        assert_eq!(
            node.get(&path("moves.-!200")).map(Node::to_json),
            Some(json!("e5"))
        );
    }

    #[test]
    fn index_segments_update_existing_entry() {
        let mut node = tree(json!({"moves": {"-!100": {"from": "e2"}}}));
        node.merge_at(&path("moves.-!100.to"), tree(json!("e4")));
        assert_eq!(
            node.to_json(),
            json!({"moves": [{"from": "e2", "to": "e4"}]})
        );
    }

    #[test]
    fn lookup_by_position_on_lists() {
        let node = tree(json!({"l": ["a", {"b": 1}]}));
        assert_eq!(node.get(&path("l.1.b")).map(Node::to_json), Some(json!(1)));
        assert!(node.get(&path("l.2")).is_none());
    }

    #[test]
    fn replace_overwrites_subtree() {
        let mut node = tree(json!({"boards": {"a": 1}}));
        node.replace_at(&path("boards"), tree(json!({"b": 2})));
        assert_eq!(node.to_json(), json!({"boards": {"b": 2}}));
    }

    #[test]
    fn remove_prunes_empty_ancestors() {
        let mut node = tree(json!({"a": {"b": {"c": 1}}, "keep": true}));
        assert!(node.remove_at(&path("a.b.c")));
        assert!(node.get(&path("a.b.c")).is_none());
        assert!(node.get(&path("a")).is_none());
        assert_eq!(node.to_json(), json!({"keep": true}));
    }

    #[test]
    fn remove_stops_at_first_non_empty_ancestor() {
        let mut node = tree(json!({"a": {"b": {"c": 1}, "d": 2}}));
        node.remove_at(&path("a.b.c"));
        assert_eq!(node.to_json(), json!({"a": {"d": 2}}));
    }

    #[test]
    fn remove_list_entry_by_index() {
        let mut node = tree(json!({"moves": {"-!1": "e4", "-!2": "e5"}}));
        assert!(node.remove_at(&path("moves.-!1")));
        assert_eq!(node.to_json(), json!({"moves": ["e5"]}));
        assert!(node.remove_at(&path("moves.-!2")));
        assert_eq!(node.to_json(), json!({}));
    }

    #[test]
    fn remove_missing_path_is_noop() {
        let mut node = tree(json!({"a": 1}));
        assert!(!node.remove_at(&path("b.c")));
        assert!(!node.remove_at(&path("a.b")));
        assert_eq!(node.to_json(), json!({"a": 1}));
    }

    #[test]
    fn remove_root_clears() {
        let mut node = tree(json!({"a": 1}));
        assert!(node.remove_at(&KeyPath::root()));
        assert_eq!(node, Node::empty_map());
    }
}
