//! Transaction buffer.
//!
//! Events that belong to a transaction are held here until the
//! transaction-complete event arrives, then released as one group so the
//! cache never observes half of a transaction.
//!
//! - Groups are keyed by (object identifier, transaction identifier)
//! - Released events are ordered by time token
//! - Max size covers all groups to prevent unbounded memory growth

use std::collections::HashMap;

use objsync_types::{SyncError, TransactionId};

use crate::event::SyncEvent;

/// Error type for buffer operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Buffer is at capacity.
    Full {
        /// Current buffer capacity.
        capacity: usize,
    },
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Full { capacity } => {
                write!(f, "transaction buffer full (capacity: {})", capacity)
            }
        }
    }
}

impl std::error::Error for BufferError {}

impl From<BufferError> for SyncError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Full { capacity } => SyncError::TransactionOverflow { capacity },
        }
    }
}

type GroupKey = (String, TransactionId);

/// Events of open transactions.
#[derive(Debug)]
pub struct TransactionBuffer {
    /// Maximum number of events across all open transactions.
    max_size: usize,
    /// Events per open transaction, in arrival order.
    groups: HashMap<GroupKey, Vec<SyncEvent>>,
    /// Running total of buffered events.
    total: usize,
}

impl TransactionBuffer {
    /// Create a new buffer with the given maximum size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            groups: HashMap::new(),
            total: 0,
        }
    }

    /// Hold an event until its transaction completes.
    ///
    /// Events without a transaction identifier are not buffered and are
    /// handed back unchanged in `Ok(Some(_))`.
    pub fn enqueue(&mut self, event: SyncEvent) -> Result<Option<SyncEvent>, BufferError> {
        let Some(transaction_id) = event.transaction_id().cloned() else {
            return Ok(Some(event));
        };
        if self.total >= self.max_size {
            return Err(BufferError::Full {
                capacity: self.max_size,
            });
        }
        self.groups
            .entry((event.object_id().to_string(), transaction_id))
            .or_default()
            .push(event);
        self.total += 1;
        Ok(None)
    }

    /// Release the events of a transaction, ordered by time token.
    ///
    /// Returns an empty list for unknown transactions.
    pub fn take(&mut self, object_id: &str, transaction_id: &TransactionId) -> Vec<SyncEvent> {
        let key = (object_id.to_string(), transaction_id.clone());
        let mut events = self.groups.remove(&key).unwrap_or_default();
        self.total -= events.len();
        // Stable: equal time tokens keep arrival order.
        events.sort_by_key(SyncEvent::time_token);
        events
    }

    /// Drop every open transaction of an object.
    pub fn discard_object(&mut self, object_id: &str) -> usize {
        let before = self.total;
        self.groups.retain(|(id, _), events| {
            if id == object_id {
                self.total -= events.len();
                false
            } else {
                true
            }
        });
        before - self.total
    }

    /// Whether a transaction has buffered events.
    pub fn is_open(&self, object_id: &str, transaction_id: &TransactionId) -> bool {
        self.groups
            .contains_key(&(object_id.to_string(), transaction_id.clone()))
    }

    /// Number of open transactions.
    pub fn open_transactions(&self) -> usize {
        self.groups.len()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.total
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Drop all open transactions.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.total = 0;
    }
}
