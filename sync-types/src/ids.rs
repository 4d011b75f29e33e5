//! Ordering and grouping identifiers for synchronization events.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::SyncError;

/// A server-issued, monotonically comparable ordering value.
///
/// The service sends time tokens as 17-digit decimal strings; some payloads
/// carry them as plain JSON integers. Both forms deserialize.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeToken(u64);

impl TimeToken {
    /// Create a time token from its numeric value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Read a time token from a JSON value (string of digits or integer).
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_u64().map(Self),
            _ => None,
        }
    }
}

impl FromStr for TimeToken {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SyncError::NotASyncEvent(format!(
                "time token {s:?} is not a decimal number"
            )));
        }
        s.parse::<u64>()
            .map(Self)
            .map_err(|e| SyncError::NotASyncEvent(format!("time token {s:?}: {e}")))
    }
}

impl Serialize for TimeToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        TimeToken::from_json(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time token: {value}")))
    }
}

impl fmt::Display for TimeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TimeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeToken({})", self.0)
    }
}

/// Identifier grouping events that must become visible together.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Create a transaction identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn time_token_ordering() {
        let t1 = TimeToken::new(14169947586481522);
        let t2 = TimeToken::new(14169947586481523);
        assert!(t1 < t2);
        assert!(t2 > t1);
    }

    #[test]
    fn time_token_parses_decimal_string() {
        let t: TimeToken = "14169947586481522".parse().unwrap();
        assert_eq!(t.value(), 14169947586481522);
    }

    #[test]
    fn time_token_rejects_non_digits() {
        assert!("".parse::<TimeToken>().is_err());
        assert!("-12".parse::<TimeToken>().is_err());
        assert!("12a".parse::<TimeToken>().is_err());
    }

    #[test]
    fn time_token_from_json_accepts_both_forms() {
        assert_eq!(TimeToken::from_json(&json!("42")), Some(TimeToken::new(42)));
        assert_eq!(TimeToken::from_json(&json!(42)), Some(TimeToken::new(42)));
        assert_eq!(TimeToken::from_json(&json!(-1)), None);
        assert_eq!(TimeToken::from_json(&json!(null)), None);
    }

    #[test]
    fn time_token_serializes_as_string() {
        let encoded = serde_json::to_string(&TimeToken::new(7)).unwrap();
        assert_eq!(encoded, "\"7\"");
        let decoded: TimeToken = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, TimeToken::new(7));
    }

    #[test]
    fn transaction_id_is_transparent() {
        let id: TransactionId = serde_json::from_str("\"tx-1\"").unwrap();
        assert_eq!(id.as_str(), "tx-1");
        assert_eq!(id.to_string(), "tx-1");
    }
}
