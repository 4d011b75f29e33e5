//! # sync-core
//!
//! Pure logic for remote object synchronization (no I/O, instant tests).
//!
//! This crate implements the object tree, feed naming, task state machine
//! and event handling without any network access, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about task transitions
//!
//! The actual I/O (subscribe, unsubscribe, fetch) is performed by
//! `sync-client`, which executes the plans produced by [`SyncState`] and
//! reports the outcome back.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod cache;
pub mod event;
pub mod feed;
pub mod path;
pub mod state;
pub mod task;
pub mod tree;

pub use buffer::{BufferError, TransactionBuffer};
pub use cache::{ObjectCache, ObjectHandle, RemoteObject};
pub use event::{NotASyncEvent, SyncEvent, SyncEventKind};
pub use feed::FeedKind;
pub use path::{KeyPath, ListIndex, PathSegment};
pub use state::{FailedTask, FeedPlan, SyncOptions, SyncState, SyncStats, SyncUpdate};
pub use task::{Step, SyncRequest, SyncTask, TaskKind};
pub use tree::{ListEntry, Node};
