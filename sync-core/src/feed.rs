//! Synchronization feed naming.
//!
//! Every synchronized object is observed through pub/sub feeds whose names
//! encode the object identifier and a key-path location:
//!
//! | feed | name |
//! |------|------|
//! | object root | `pn_ds_<id>` |
//! | location | `pn_ds_<id>.<location>` |
//! | descendants of a location | `pn_ds_<id>.<location>.*` |
//! | transaction completion | `pn_dstr_<id>` |
//!
//! All functions here are pure and set-valued results are ordered, so the
//! same input always yields the same subscribe/unsubscribe lists.

use std::collections::BTreeSet;

use objsync_types::SyncError;

/// Prefix of data feeds.
pub const DATA_FEED_PREFIX: &str = "pn_ds_";

/// Prefix of transaction completion feeds.
pub const TRANSACTION_FEED_PREFIX: &str = "pn_dstr_";

/// Suffix marking a descendant (wildcard) feed.
pub const DESCENDANT_SUFFIX: &str = ".*";

/// Kind of synchronization feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Object root or location feed.
    Base,
    /// Wildcard feed for everything below a location.
    Descendant,
    /// Transaction completion feed.
    Transaction,
}

/// Check that `id` can be encoded into a feed name.
///
/// # Errors
///
/// [`SyncError::InvalidFeed`] for empty identifiers and identifiers
/// containing `.` or `*`.
pub fn validate_object_id(id: &str) -> Result<(), SyncError> {
    if id.is_empty() || id.contains(&['.', '*'][..]) {
        return Err(SyncError::InvalidFeed(format!(
            "object identifier {id:?} is empty or contains reserved characters"
        )));
    }
    Ok(())
}

/// Base feed for a location of an object. The empty location is the root.
pub fn feed_name(id: &str, location: &str) -> String {
    if location.is_empty() {
        format!("{DATA_FEED_PREFIX}{id}")
    } else {
        format!("{DATA_FEED_PREFIX}{id}.{location}")
    }
}

/// Wildcard feed for everything below a location.
pub fn descendant_feed(id: &str, location: &str) -> String {
    format!("{}{DESCENDANT_SUFFIX}", feed_name(id, location))
}

/// Transaction completion feed for an object.
pub fn transaction_feed(id: &str) -> String {
    format!("{TRANSACTION_FEED_PREFIX}{id}")
}

/// Feeds needed to observe `locations` of an object.
///
/// One base feed per location (the root feed when `locations` is empty),
/// plus the transaction feed when requested.
pub fn feeds_for<I, S>(id: &str, locations: I, include_transaction_feed: bool) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut feeds: BTreeSet<String> = locations
        .into_iter()
        .map(|location| feed_name(id, location.as_ref()))
        .collect();
    if feeds.is_empty() {
        feeds.insert(feed_name(id, ""));
    }
    if include_transaction_feed {
        feeds.insert(transaction_feed(id));
    }
    feeds
}

/// Classify a feed name, `None` for ordinary channels.
pub fn classify(name: &str) -> Option<FeedKind> {
    if let Some(id) = name.strip_prefix(TRANSACTION_FEED_PREFIX) {
        return (!id.is_empty() && !id.contains(&['.', '*'][..])).then_some(FeedKind::Transaction);
    }
    let rest = name.strip_prefix(DATA_FEED_PREFIX)?;
    let (rest, kind) = match rest.strip_suffix(DESCENDANT_SUFFIX) {
        Some(rest) => (rest, FeedKind::Descendant),
        None => (rest, FeedKind::Base),
    };
    let id = rest.split('.').next().unwrap_or_default();
    if id.is_empty() || id.contains('*') || rest.ends_with('.') {
        return None;
    }
    Some(kind)
}

/// Whether `name` is any kind of synchronization feed.
pub fn is_sync_feed(name: &str) -> bool {
    classify(name).is_some()
}

/// Object identifier encoded in a feed name.
pub fn object_id_from(name: &str) -> Option<&str> {
    match classify(name)? {
        FeedKind::Transaction => name.strip_prefix(TRANSACTION_FEED_PREFIX),
        FeedKind::Base | FeedKind::Descendant => {
            let rest = name.strip_prefix(DATA_FEED_PREFIX)?;
            rest.split('.').next()
        }
    }
}

/// Location encoded in a feed name. Root and transaction feeds yield `""`.
pub fn location_from(name: &str) -> Option<&str> {
    match classify(name)? {
        FeedKind::Transaction => Some(""),
        FeedKind::Base | FeedKind::Descendant => {
            let rest = name.strip_prefix(DATA_FEED_PREFIX)?;
            let rest = rest.strip_suffix(DESCENDANT_SUFFIX).unwrap_or(rest);
            Some(rest.split_once('.').map_or("", |(_, location)| location))
        }
    }
}

/// Keep only base feeds, dropping descendant and transaction feeds.
pub fn base_feeds_only<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter(|name| classify(name.as_ref()) == Some(FeedKind::Base))
        .map(|name| name.as_ref().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_names() {
        assert_eq!(feed_name("chess", ""), "pn_ds_chess");
        assert_eq!(feed_name("chess", "boards"), "pn_ds_chess.boards");
        assert_eq!(descendant_feed("chess", "boards"), "pn_ds_chess.boards.*");
        assert_eq!(descendant_feed("chess", ""), "pn_ds_chess.*");
        assert_eq!(transaction_feed("chess"), "pn_dstr_chess");
    }

    #[test]
    fn feeds_for_locations() {
        let feeds = feeds_for("chess", ["boards", "leaderboard"], true);
        let expected: BTreeSet<String> = [
            "pn_ds_chess.boards",
            "pn_ds_chess.leaderboard",
            "pn_dstr_chess",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(feeds, expected);
    }

    #[test]
    fn feeds_for_whole_object() {
        let none: [&str; 0] = [];
        let feeds = feeds_for("chess", none, false);
        assert_eq!(feeds.into_iter().collect::<Vec<_>>(), vec!["pn_ds_chess"]);
    }

    #[test]
    fn root_and_location_feeds_share_transaction_feed() {
        let none: [&str; 0] = [];
        let root = feeds_for("chess", none, true);
        let located = feeds_for("chess", ["a"], true);

        assert!(root.intersection(&located).next().is_some());
        let root_base = base_feeds_only(&root);
        let located_base = base_feeds_only(&located);
        assert_eq!(location_from(root_base.iter().next().unwrap()), Some(""));
        assert_eq!(location_from(located_base.iter().next().unwrap()), Some("a"));
    }

    #[test]
    fn classification() {
        assert_eq!(classify("pn_ds_chess"), Some(FeedKind::Base));
        assert_eq!(classify("pn_ds_chess.boards.a"), Some(FeedKind::Base));
        assert_eq!(classify("pn_ds_chess.boards.*"), Some(FeedKind::Descendant));
        assert_eq!(classify("pn_dstr_chess"), Some(FeedKind::Transaction));
        assert_eq!(classify("lobby"), None);
        assert_eq!(classify("pn_ds_"), None);
        assert_eq!(classify("pn_ds_chess."), None);
        assert_eq!(classify("pn_dstr_"), None);
        assert!(!is_sync_feed("pn_dsx"));
    }

    #[test]
    fn object_id_round_trips() {
        for location in ["", "boards", "boards.a", "x['y.z']"] {
            let name = feed_name("chess", location);
            assert_eq!(object_id_from(&name), Some("chess"));
            assert_eq!(location_from(&name), Some(location));
        }
        assert_eq!(object_id_from("pn_dstr_chess"), Some("chess"));
        assert_eq!(object_id_from("pn_ds_chess.boards.*"), Some("chess"));
        assert_eq!(location_from("pn_ds_chess.boards.*"), Some("boards"));
        assert_eq!(object_id_from("lobby"), None);
    }

    #[test]
    fn base_feeds_filter() {
        let names = [
            "pn_ds_chess",
            "pn_ds_chess.*",
            "pn_ds_chess.boards",
            "pn_ds_chess.boards.*",
            "pn_dstr_chess",
            "lobby",
        ];
        let base = base_feeds_only(names);
        assert_eq!(
            base.into_iter().collect::<Vec<_>>(),
            vec!["pn_ds_chess", "pn_ds_chess.boards"]
        );
    }

    #[test]
    fn object_id_validation() {
        assert!(validate_object_id("chess").is_ok());
        assert!(validate_object_id("").is_err());
        assert!(validate_object_id("a.b").is_err());
        assert!(validate_object_id("a*").is_err());
    }
}
