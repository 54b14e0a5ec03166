//! # HeartSync Server
//!
//! In-memory remote record store for HeartSync.
//!
//! This crate provides:
//! - Per-account private databases with record zones
//! - Database and zone change feeds with opaque, expirable tokens
//! - Paging, the modify operation ceiling and authentication checks
//! - Fault injection and a call log for tests
//!
//! # Architecture
//!
//! [`CloudServer`] implements [`heartsync_protocol::RemoteDatabase`]. Every
//! call is answered under one lock, so the server behaves like a strongly
//! consistent backend. Record writes append to the zone's change log and
//! mark the zone changed in the database log.
//!
//! # Tokens
//!
//! Change tokens encode a log id, an epoch and a position. Expiring tokens
//! bumps the epoch, which makes every earlier token fail with
//! `ChangeTokenExpired`; the client then refetches from the beginning.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod calls;
mod changelog;
mod config;
mod database;
mod error;
mod server;

pub use calls::{Call, CallLog, OperationKind};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::CloudServer;
