//! Key-path parsing for remote object data.
//!
//! Syntax:
//! - `a.b.c` - dot separated map keys
//! - `a['b.c']` or `a["b.c"]` - bracket-quoted keys which may contain
//!   reserved characters
//! - `-!14169947586481522` - server assigned list entry index
//!   (`-?<sortKey>!<digits>`), matched against entries structurally rather
//!   than by position
//!
//! The empty string addresses the object root.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use objsync_types::SyncError;

/// Server assigned list entry index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListIndex {
    raw: String,
    sort_key: String,
    timestamp: u64,
}

impl ListIndex {
    /// Parse an index token, returning `None` if it does not match
    /// `-?<sortKey>!<digits>`.
    pub fn parse(token: &str) -> Option<Self> {
        let body = token.strip_prefix('-').unwrap_or(token);
        let (sort_key, digits) = body.rsplit_once('!')?;
        if sort_key.contains('!')
            || digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        if sort_key.contains(&['.', '[', ']', '\'', '"'][..]) {
            return None;
        }
        let timestamp = digits.parse().ok()?;
        Some(Self {
            raw: token.to_string(),
            sort_key: sort_key.to_string(),
            timestamp,
        })
    }

    /// The index exactly as the service sent it.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Sort key part (may be empty).
    pub fn sort_key(&self) -> &str {
        &self.sort_key
    }

    /// Timestamp part.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

impl Ord for ListIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key
            .cmp(&other.sort_key)
            .then(self.timestamp.cmp(&other.timestamp))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for ListIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ListIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One step of a key-path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Map key (or list position when resolving against a list).
    Key(String),
    /// Server list entry index.
    Index(ListIndex),
}

impl PathSegment {
    fn needs_brackets(key: &str) -> bool {
        key.is_empty()
            || key.contains(&['.', '[', ']', '\'', '"'][..])
            || ListIndex::parse(key).is_some()
    }
}

/// Parsed key-path addressing a node inside a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyPath {
    segments: Vec<PathSegment>,
}

impl KeyPath {
    /// Path of the object root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse key-path text.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedPath`] for empty keys, dangling dots,
    /// unterminated or empty brackets, and junk after a closing bracket.
    pub fn parse(path: &str) -> Result<Self, SyncError> {
        let chars: Vec<char> = path.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        if chars.is_empty() {
            return Ok(Self::root());
        }

        loop {
            if chars[i] == '[' {
                let quote = match chars.get(i + 1) {
                    Some(&q) if q == '\'' || q == '"' => q,
                    _ => return Err(SyncError::malformed_path(path, "expected quote after '['")),
                };
                let start = i + 2;
                let mut end = start;
                while end < chars.len()
                    && !(chars[end] == quote && chars.get(end + 1) == Some(&']'))
                {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(SyncError::malformed_path(path, "unterminated bracket"));
                }
                if end == start {
                    return Err(SyncError::malformed_path(path, "empty bracket key"));
                }
                segments.push(PathSegment::Key(chars[start..end].iter().collect()));
                i = end + 2;
            } else {
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    if chars[i] == ']' {
                        return Err(SyncError::malformed_path(path, "unexpected ']'"));
                    }
                    i += 1;
                }
                if i == start {
                    return Err(SyncError::malformed_path(path, "empty key"));
                }
                let token: String = chars[start..i].iter().collect();
                segments.push(match ListIndex::parse(&token) {
                    Some(index) => PathSegment::Index(index),
                    None => PathSegment::Key(token),
                });
            }

            if i == chars.len() {
                break;
            }
            match chars[i] {
                '.' => {
                    i += 1;
                    if i == chars.len() {
                        return Err(SyncError::malformed_path(path, "trailing '.'"));
                    }
                }
                '[' => {}
                other => {
                    return Err(SyncError::malformed_path(
                        path,
                        format!("unexpected {other:?} after ']'"),
                    ))
                }
            }
        }

        Ok(Self { segments })
    }

    /// Build a path from segments.
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Path segments from the root down.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Whether this path addresses the root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Same as [`KeyPath::is_root`].
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, `None` for the root.
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Path of the containing node. The root is its own parent.
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    /// Append a segment.
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn covers(&self, other: &KeyPath) -> bool {
        other.segments.starts_with(&self.segments)
    }
}

impl FromStr for KeyPath {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if PathSegment::needs_brackets(key) => {
                    let quote = if key.contains('\'') { '"' } else { '\'' };
                    write!(f, "[{quote}{key}{quote}]")?;
                }
                PathSegment::Key(key) => {
                    if position > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                PathSegment::Index(index) => {
                    if position > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(index.as_str())?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> PathSegment {
        PathSegment::Key(k.to_string())
    }

    #[test]
    fn empty_path_is_root() {
        let path = KeyPath::parse("").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_string(), "");
    }

    #[test]
    fn dotted_keys() {
        let path = KeyPath::parse("a.b.c").unwrap();
        assert_eq!(path.segments(), &[key("a"), key("b"), key("c")]);
    }

    #[test]
    fn bracket_quoted_keys() {
        let path = KeyPath::parse("a['b.c']").unwrap();
        assert_eq!(path.segments(), &[key("a"), key("b.c")]);

        let path = KeyPath::parse("[\"it's\"].x").unwrap();
        assert_eq!(path.segments(), &[key("it's"), key("x")]);

        let path = KeyPath::parse("a.['b']['c']").unwrap();
        assert_eq!(path.segments(), &[key("a"), key("b"), key("c")]);
    }

    #[test]
    fn list_index_tokens() {
        let path = KeyPath::parse("moves.-!14169947586481522.from").unwrap();
        match &path.segments()[1] {
            PathSegment::Index(index) => {
                assert_eq!(index.sort_key(), "");
                assert_eq!(index.timestamp(), 14169947586481522);
                assert_eq!(index.as_str(), "-!14169947586481522");
            }
            other => panic!("expected index, got {other:?}"),
        }
    }

    #[test]
    fn list_index_grammar() {
        assert!(ListIndex::parse("-!1").is_some());
        assert!(ListIndex::parse("abc!12").is_some());
        assert!(ListIndex::parse("-abc!12").is_some());
        assert!(ListIndex::parse("abc").is_none());
        assert!(ListIndex::parse("-!").is_none());
        assert!(ListIndex::parse("-!12x").is_none());
        assert!(ListIndex::parse("a!b!1").is_none());
    }

    #[test]
    fn list_index_orders_by_sort_key_then_timestamp() {
        let a = ListIndex::parse("-a!5").unwrap();
        let b = ListIndex::parse("-b!1").unwrap();
        let c = ListIndex::parse("-b!2").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn quoted_index_stays_a_key() {
        let path = KeyPath::parse("['-!1']").unwrap();
        assert_eq!(path.segments(), &[key("-!1")]);
        assert_eq!(path.to_string(), "['-!1']");
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for bad in ["a..b", ".a", "a.", "a[", "a['b'", "a[b]", "a['']", "a['b']c", "a]b"] {
            let err = KeyPath::parse(bad).unwrap_err();
            assert!(
                matches!(err, SyncError::MalformedPath { .. }),
                "{bad:?} should be malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn display_is_canonical() {
        let path = KeyPath::parse("a.['b'].c['d.e'].-!7").unwrap();
        assert_eq!(path.to_string(), "a.b.c['d.e'].-!7");
        assert_eq!(KeyPath::parse(&path.to_string()).unwrap(), path);
    }

    #[test]
    fn parent_and_cover() {
        let path = KeyPath::parse("boards.a.b").unwrap();
        assert_eq!(path.parent().to_string(), "boards.a");
        assert!(KeyPath::root().parent().is_root());
        assert!(KeyPath::parse("boards").unwrap().covers(&path));
        assert!(KeyPath::root().covers(&path));
        assert!(!KeyPath::parse("board").unwrap().covers(&path));
        assert!(!path.covers(&path.parent()));
    }
}
