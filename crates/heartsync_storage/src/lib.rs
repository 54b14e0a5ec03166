//! # HeartSync Storage
//!
//! Durable key-value storage backends for HeartSync.
//!
//! This crate provides the lowest-level persistence abstraction used by the
//! sync engine's staging store. Stores are **opaque blob stores** keyed by
//! string - they do not interpret the bytes they hold.
//!
//! ## Design Principles
//!
//! - Stores are simple keyed blob stores (get, set, remove)
//! - A `set` replaces exactly one key, atomically; a failed write to one key
//!   never disturbs another
//! - Must be `Send + Sync` so the engine worker can own a shared handle
//! - The engine owns all blob format interpretation
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and simulated process restarts
//! - [`FileStore`] - One file per key, written via temp file + rename
//!
//! ## Example
//!
//! ```rust
//! use heartsync_storage::{KeyValueStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! store.set("greeting", b"hello world").unwrap();
//! assert_eq!(store.get("greeting").unwrap(), Some(b"hello world".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::KeyValueStore;
