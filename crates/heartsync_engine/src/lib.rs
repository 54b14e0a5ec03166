//! # HeartSync Engine
//!
//! Durable staging and remote synchronization for HeartSync.
//!
//! This crate provides:
//! - [`StagingStore`]: typed blobs for records, pending queues and change tokens
//! - [`SyncEngine`]: zone provisioning, subscription setup, incremental change
//!   fetch and batched mutation push against a [`RemoteDatabase`]
//! - Retry scheduling driven by server hints ([`next_delay`])
//! - [`background_fetch`]: a change fetch raced against a deadline
//!
//! ## Architecture
//!
//! One worker task owns the [`SyncState`] and handles jobs one at a time in
//! the order they were queued. Remote calls run in their own tasks and hand
//! their outcome back to the worker as another job, so queues and tokens are
//! only ever touched from the worker.
//!
//! Every retryable call is a step value carrying the delay it was last
//! scheduled with. A retry re-queues the same step after
//! `hint × max(previous, 1s)`. There is no retry limit.
//!
//! ## Key Invariants
//!
//! - A pending save leaves the queue only once the server acknowledged the
//!   exact value that is staged
//! - A pending delete overrides a pending save of the same id
//! - Change tokens are persisted as soon as each page is applied
//! - Each engine operation resolves its [`Ack`] exactly once
//!
//! [`RemoteDatabase`]: heartsync_protocol::RemoteDatabase

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod background;
mod backoff;
mod completion;
mod config;
mod engine;
mod error;
mod events;
mod staging;
mod steps;
mod worker;

pub use background::{background_fetch, FetchResult};
pub use backoff::next_delay;
pub use completion::Ack;
pub use config::{BackgroundFetchConfig, SyncConfig};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use events::SyncEvent;
pub use staging::{keys, StagedState, StagingStore, SyncState};
