//! FeedMessage - a payload delivered on a channel.

use serde::{Deserialize, Serialize};

use crate::SyncError;

/// A message delivered by the pub/sub transport.
///
/// The transport guarantees per-channel ordering only. Synchronization feeds
/// and ordinary channels share the same delivery path, so the payload may or
/// may not be a synchronization event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    /// Channel (feed) the message was delivered on.
    pub feed: String,
    /// Decoded JSON payload.
    pub payload: serde_json::Value,
}

impl FeedMessage {
    /// Create a message for a feed.
    pub fn new(feed: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            feed: feed.into(),
            payload,
        }
    }

    /// Decode a message whose payload is raw JSON bytes.
    pub fn from_json_bytes(feed: impl Into<String>, bytes: &[u8]) -> Result<Self, SyncError> {
        let payload = serde_json::from_slice(bytes).map_err(SyncError::Deserialization)?;
        Ok(Self::new(feed, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_payload_bytes() {
        let msg = FeedMessage::from_json_bytes("pn_ds_chess", br#"{"action":"delete"}"#).unwrap();
        assert_eq!(msg.feed, "pn_ds_chess");
        assert_eq!(msg.payload, json!({"action": "delete"}));
    }

    #[test]
    fn invalid_payload_bytes_fail() {
        assert!(FeedMessage::from_json_bytes("pn_ds_chess", b"{").is_err());
    }
}
