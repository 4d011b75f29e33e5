//! Payload shapes exchanged with the synchronization service.
//!
//! Change notifications arrive as loosely typed JSON maps on sync feeds
//! (see [`keys`]); fetch and modification requests are strongly typed here.

use serde::{Deserialize, Serialize};

use crate::{SyncError, TimeToken};

/// Field names used by the service in change notification payloads.
pub mod keys {
    /// Type of modification (`update`, `replace`, `delete`).
    pub const ACTION: &str = "action";
    /// Modification time token.
    pub const TIME_TOKEN: &str = "timetoken";
    /// Key-path of the modified node.
    pub const LOCATION: &str = "location";
    /// New data for `update` and `replace`.
    pub const VALUE: &str = "value";
    /// Transaction status (`complete` closes a transaction).
    pub const TRANSACTION_STATUS: &str = "status";
    /// Transaction identifier.
    pub const TRANSACTION_ID: &str = "trans_id";
}

/// Transaction status value which closes a transaction.
pub const TRANSACTION_COMPLETE: &str = "complete";

/// Modification performed on remote object data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    /// Merge value into the node at location.
    Update,
    /// Overwrite the node at location.
    Replace,
    /// Remove the node at location.
    Delete,
}

impl EventAction {
    /// Parse the wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "update" => Some(Self::Update),
            "replace" => Some(Self::Replace),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Wire tag for this action.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        }
    }
}

/// Request for one page of remote object data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Remote object identifier.
    pub object_id: String,
    /// Key-path to fetch (empty string for the whole object).
    pub location: String,
    /// Only changes since this time token, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_time_token: Option<TimeToken>,
    /// Continuation token from the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
}

/// One page of remote object data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Data stored at `location`.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Key-path the data belongs to.
    #[serde(default)]
    pub location: String,
    /// Present while more pages are available for `location`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
}

impl FetchResponse {
    /// Build a response page.
    pub fn new(location: &str, data: serde_json::Value, next_page: Option<&str>) -> Self {
        Self {
            data,
            location: location.to_string(),
            next_page: next_page.map(str::to_string),
        }
    }

    /// Parse a service response body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(SyncError::Deserialization)
    }

    /// Whether this is the last page for its location.
    pub fn is_last_page(&self) -> bool {
        self.next_page.is_none()
    }
}

/// Kind of change requested on remote object data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationKind {
    /// Merge data into the node at location.
    Push,
    /// Append entries to the list at location.
    PushToList,
    /// Overwrite the node at location.
    Replace,
    /// Remove the node at location.
    Remove,
}

/// Request to change remote object data.
///
/// The service answers with a synchronization event; a synchronized object
/// only changes once that event arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationRequest {
    /// Remote object identifier.
    pub object_id: String,
    /// Key-path to modify (empty string for the whole object).
    pub location: String,
    /// What to do at `location`.
    pub kind: ModificationKind,
    /// New data; a JSON array of entries for [`ModificationKind::PushToList`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Sort key for a single pushed list entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
}

impl ModificationRequest {
    fn new(object_id: &str, location: &str, kind: ModificationKind) -> Self {
        Self {
            object_id: object_id.to_string(),
            location: location.to_string(),
            kind,
            data: None,
            sort_key: None,
        }
    }

    /// Merge `data` into the node at `location`.
    pub fn push(object_id: &str, location: &str, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(object_id, location, ModificationKind::Push)
        }
    }

    /// Append `entries` to the list at `location`.
    ///
    /// The sort key only applies when exactly one entry is pushed and is
    /// dropped otherwise.
    pub fn push_to_list(
        object_id: &str,
        location: &str,
        entries: Vec<serde_json::Value>,
        sort_key: Option<&str>,
    ) -> Self {
        let sort_key = sort_key.filter(|_| entries.len() == 1).map(str::to_string);
        Self {
            data: Some(serde_json::Value::Array(entries)),
            sort_key,
            ..Self::new(object_id, location, ModificationKind::PushToList)
        }
    }

    /// Overwrite the node at `location` with `data`.
    pub fn replace(object_id: &str, location: &str, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(object_id, location, ModificationKind::Replace)
        }
    }

    /// Remove the node at `location`.
    pub fn remove(object_id: &str, location: &str) -> Self {
        Self::new(object_id, location, ModificationKind::Remove)
    }

    /// Check the request carries what its kind needs.
    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |reason: &str| Err(SyncError::InvalidModification(reason.to_string()));
        match (self.kind, &self.data) {
            (ModificationKind::Remove, Some(_)) => return invalid("remove carries no data"),
            (ModificationKind::Remove, None) => {}
            (ModificationKind::PushToList, Some(serde_json::Value::Array(entries))) => {
                if entries.is_empty() {
                    return invalid("no entries to push");
                }
            }
            (ModificationKind::PushToList, _) => return invalid("entries must be a list"),
            (_, None) => return invalid("missing data"),
            (_, Some(_)) => {}
        }
        if let Some(key) = &self.sort_key {
            if self.kind != ModificationKind::PushToList {
                return invalid("sort key only applies to list pushes");
            }
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(SyncError::InvalidModification(format!(
                    "sort key {key:?} must be ASCII letters only"
                )));
            }
        }
        Ok(())
    }
}
