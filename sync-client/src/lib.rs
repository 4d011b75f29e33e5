//! # sync-client
//!
//! Client library for remote object data synchronization.
//!
//! This is the main library that applications use to mirror remote
//! objects and keep them current from pub/sub feeds.
//!
//! ## Features
//!
//! - **Object Cache**: Synchronized objects stay readable while updates stream in
//! - **Transactions**: Grouped changes are applied all at once on completion
//! - **Transport Abstraction**: Pluggable transport layer (SDK client, mock)
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use objsync_client::{DataSyncConfig, SyncClient};
//!
//! let config = DataSyncConfig::from_file(Path::new("objsync.toml"))?;
//! let client = SyncClient::new(transport, &config);
//!
//! // Mirror part of an object
//! let chess = client.start_synchronization("chess", ["boards"]).await?;
//!
//! // Route feed traffic
//! client.handle_message(&message).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod manager;
pub mod transport;

pub use client::{ClientError, SyncClient};
pub use config::{ConfigError, DataSyncConfig};
pub use manager::DataSyncManager;
pub use transport::{FeedTransport, MockTransport, TransportCall, TransportError};
