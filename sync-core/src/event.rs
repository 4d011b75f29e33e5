//! Synchronization events decoded from feed payloads.
//!
//! Feeds carry ordinary pub/sub traffic next to synchronization events, so
//! [`SyncEvent::classify`] treats anything it does not recognise as
//! [`NotASyncEvent`] instead of failing loudly.

use serde_json::Value;
use thiserror::Error;

use objsync_types::{keys, EventAction, SyncError, TimeToken, TransactionId, TRANSACTION_COMPLETE};

use crate::feed::{self, FeedKind};
use crate::path::KeyPath;

/// Payload is not a synchronization event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a synchronization event: {reason}")]
pub struct NotASyncEvent {
    reason: String,
}

impl NotASyncEvent {
    /// Create with a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    /// Why the payload was rejected.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<NotASyncEvent> for SyncError {
    fn from(err: NotASyncEvent) -> Self {
        SyncError::NotASyncEvent(err.reason)
    }
}

/// What a synchronization event does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEventKind {
    /// Deep merge the value at the location.
    Update,
    /// Overwrite the subtree at the location.
    Replace,
    /// Remove the node at the location.
    Delete,
    /// All events of a transaction have been delivered.
    TransactionComplete,
}

impl From<EventAction> for SyncEventKind {
    fn from(action: EventAction) -> Self {
        match action {
            EventAction::Update => SyncEventKind::Update,
            EventAction::Replace => SyncEventKind::Replace,
            EventAction::Delete => SyncEventKind::Delete,
        }
    }
}

/// One decoded synchronization event.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    kind: SyncEventKind,
    object_id: String,
    transaction_id: Option<TransactionId>,
    location: KeyPath,
    time_token: TimeToken,
    value: Option<Value>,
}

impl SyncEvent {
    /// Decode a payload delivered on `feed`.
    ///
    /// # Errors
    ///
    /// [`NotASyncEvent`] if the feed is not a synchronization feed or the
    /// payload lacks a field its kind requires.
    pub fn classify(feed: &str, payload: &Value) -> Result<Self, NotASyncEvent> {
        let kind = feed::classify(feed)
            .ok_or_else(|| NotASyncEvent::new(format!("{feed:?} is not a synchronization feed")))?;
        let object_id = feed::object_id_from(feed)
            .ok_or_else(|| NotASyncEvent::new(format!("no object identifier in {feed:?}")))?
            .to_string();
        let body = payload
            .as_object()
            .ok_or_else(|| NotASyncEvent::new("payload is not an object"))?;

        let time_token = body
            .get(keys::TIME_TOKEN)
            .and_then(TimeToken::from_json)
            .ok_or_else(|| NotASyncEvent::new("missing or invalid time token"))?;
        let transaction_id = match body.get(keys::TRANSACTION_ID) {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) if !id.is_empty() => Some(TransactionId::new(id.as_str())),
            Some(_) => return Err(NotASyncEvent::new("invalid transaction id")),
        };

        let status = body.get(keys::TRANSACTION_STATUS).and_then(Value::as_str);
        if status == Some(TRANSACTION_COMPLETE) {
            let transaction_id = transaction_id
                .ok_or_else(|| NotASyncEvent::new("completion without transaction id"))?;
            return Ok(Self {
                kind: SyncEventKind::TransactionComplete,
                object_id,
                transaction_id: Some(transaction_id),
                location: KeyPath::root(),
                time_token,
                value: None,
            });
        }
        if kind == FeedKind::Transaction {
            return Err(NotASyncEvent::new("transaction feed carries only completion events"));
        }

        let action = body
            .get(keys::ACTION)
            .and_then(Value::as_str)
            .and_then(EventAction::from_tag)
            .ok_or_else(|| NotASyncEvent::new("missing or unknown action"))?;
        let location = body
            .get(keys::LOCATION)
            .and_then(Value::as_str)
            .ok_or_else(|| NotASyncEvent::new("missing location"))?;
        let location = Self::strip_feed_prefix(&object_id, location)?;
        let location = KeyPath::parse(location)
            .map_err(|err| NotASyncEvent::new(format!("bad location: {err}")))?;

        let value = match action {
            EventAction::Delete => None,
            EventAction::Update | EventAction::Replace => Some(
                body.get(keys::VALUE)
                    .cloned()
                    .ok_or_else(|| NotASyncEvent::new("missing value"))?,
            ),
        };

        Ok(Self {
            kind: action.into(),
            object_id,
            transaction_id,
            location,
            time_token,
            value,
        })
    }

    /// Locations may be sent as full feed names; reduce them to key-paths.
    fn strip_feed_prefix<'a>(object_id: &str, location: &'a str) -> Result<&'a str, NotASyncEvent> {
        if !location.starts_with(feed::DATA_FEED_PREFIX) {
            return Ok(location);
        }
        match feed::object_id_from(location) {
            Some(id) if id == object_id => feed::location_from(location)
                .ok_or_else(|| NotASyncEvent::new(format!("bad location {location:?}"))),
            _ => Err(NotASyncEvent::new(format!(
                "location {location:?} does not belong to object {object_id:?}"
            ))),
        }
    }

    /// Event kind.
    pub fn kind(&self) -> SyncEventKind {
        self.kind
    }

    /// Object the event modifies.
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Transaction the event belongs to.
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    /// Absolute location of the modification.
    pub fn location(&self) -> &KeyPath {
        &self.location
    }

    /// Container of the modified node.
    pub fn relative_location(&self) -> KeyPath {
        self.location.parent()
    }

    /// Service time token.
    pub fn time_token(&self) -> TimeToken {
        self.time_token
    }

    /// New value, absent for deletes and completions.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Whether this event marks the end of a transaction.
    pub fn is_transaction_complete(&self) -> bool {
        self.kind == SyncEventKind::TransactionComplete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_event() {
        let payload = json!({
            "action": "update",
            "timetoken": "14169947586481522",
            "location": "boards.a",
            "value": {"x": 1},
            "trans_id": "t1",
        });
        let event = SyncEvent::classify("pn_ds_chess.boards", &payload).unwrap();
        assert_eq!(event.kind(), SyncEventKind::Update);
        assert_eq!(event.object_id(), "chess");
        assert_eq!(event.location().to_string(), "boards.a");
        assert_eq!(event.relative_location().to_string(), "boards");
        assert_eq!(event.time_token(), TimeToken::new(14169947586481522));
        assert_eq!(event.transaction_id(), Some(&TransactionId::new("t1")));
        assert_eq!(event.value(), Some(&json!({"x": 1})));
    }

    #[test]
    fn numeric_time_token_is_accepted() {
        let payload = json!({"action": "delete", "timetoken": 7, "location": "a"});
        let event = SyncEvent::classify("pn_ds_chess", &payload).unwrap();
        assert_eq!(event.kind(), SyncEventKind::Delete);
        assert!(event.value().is_none());
        assert!(event.transaction_id().is_none());
    }

    #[test]
    fn feed_prefixed_location_is_stripped() {
        let payload = json!({
            "action": "replace",
            "timetoken": "1",
            "location": "pn_ds_chess.boards.a",
            "value": 1,
        });
        let event = SyncEvent::classify("pn_ds_chess.*", &payload).unwrap();
        assert_eq!(event.location().to_string(), "boards.a");

        let payload = json!({"action": "delete", "timetoken": "1", "location": "pn_ds_chess"});
        let event = SyncEvent::classify("pn_ds_chess", &payload).unwrap();
        assert!(event.location().is_root());
    }

    #[test]
    fn foreign_object_location_is_rejected() {
        let payload = json!({"action": "delete", "timetoken": "1", "location": "pn_ds_other.a"});
        assert!(SyncEvent::classify("pn_ds_chess", &payload).is_err());
    }

    #[test]
    fn transaction_complete_event() {
        let payload = json!({"status": "complete", "trans_id": "t1", "timetoken": "5"});
        let event = SyncEvent::classify("pn_dstr_chess", &payload).unwrap();
        assert!(event.is_transaction_complete());
        assert_eq!(event.object_id(), "chess");
        assert_eq!(event.transaction_id().unwrap().as_str(), "t1");
    }

    #[test]
    fn benign_traffic_is_not_an_event() {
        let cases = [
            ("lobby", json!({"action": "update", "timetoken": "1", "location": "a", "value": 1})),
            ("pn_ds_chess", json!("hello")),
            ("pn_ds_chess", json!({"text": "hi"})),
            ("pn_ds_chess", json!({"action": "update", "location": "a", "value": 1})),
            (
                "pn_ds_chess",
                json!({"action": "update", "timetoken": "x", "location": "a", "value": 1}),
            ),
            (
                "pn_ds_chess",
                json!({"action": "merge", "timetoken": "1", "location": "a", "value": 1}),
            ),
            ("pn_ds_chess", json!({"action": "update", "timetoken": "1", "value": 1})),
            ("pn_ds_chess", json!({"action": "update", "timetoken": "1", "location": "a"})),
            ("pn_ds_chess", json!({"action": "delete", "timetoken": "1", "location": "a..b"})),
            ("pn_dstr_chess", json!({"status": "complete", "timetoken": "1"})),
            ("pn_dstr_chess", json!({"action": "delete", "timetoken": "1", "location": "a"})),
        ];
        for (feed, payload) in cases {
            assert!(
                SyncEvent::classify(feed, &payload).is_err(),
                "{feed} {payload} should not classify"
            );
        }
    }

    #[test]
    fn converts_into_sync_error() {
        let err: SyncError = NotASyncEvent::new("nope").into();
        assert!(matches!(err, SyncError::NotASyncEvent(reason) if reason == "nope"));
    }
}
