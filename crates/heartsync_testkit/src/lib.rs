//! # HeartSync Testkit
//!
//! Test utilities for HeartSync.
//!
//! This crate provides:
//! - Fixtures pairing an in-memory remote with a local store
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use heartsync_testkit::prelude::*;
//!
//! let backend = TestBackend::new();
//! let app = HeartSyncApp::open(AppConfig::new(), backend.kv(), backend.remote());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
