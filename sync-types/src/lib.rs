//! # sync-types
//!
//! Wire format types for remote object data synchronization.
//!
//! This crate provides the foundational types used across all objsync crates:
//! - [`TimeToken`], [`TransactionId`] - Ordering and grouping types
//! - [`FeedMessage`] - Payload delivered on a channel
//! - [`EventAction`], [`FetchRequest`], [`FetchResponse`] - Service payloads
//! - [`ModificationRequest`] - Changes sent to the service
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;

pub use envelope::FeedMessage;
pub use error::SyncError;
pub use ids::{TimeToken, TransactionId};
pub use messages::{
    keys, EventAction, FetchRequest, FetchResponse, ModificationKind, ModificationRequest,
    TRANSACTION_COMPLETE,
};
