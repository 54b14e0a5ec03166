//! Test fixtures and backend helpers.
//!
//! Provides a remote/local store pair for scenario tests and a file-backed
//! store in a temporary directory.

use heartsync_protocol::{AccountId, HeartRateRecord, RemoteDatabase};
use heartsync_server::{CloudServer, ServerConfig};
use heartsync_storage::{FileStore, InMemoryStore, KeyValueStore};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};

/// Account signed in by [`TestBackend::new`].
pub const TEST_ACCOUNT: &str = "alice";

/// An in-memory remote and local store, shared with whatever is under test.
///
/// Both halves are handles; clones of the fixture see the same state, so a
/// test can restart the code under test over the same store and inspect the
/// server afterwards.
#[derive(Debug, Clone)]
pub struct TestBackend {
    /// The remote record store.
    pub server: CloudServer,
    /// The local key-value store.
    pub store: InMemoryStore,
}

impl TestBackend {
    /// Creates a backend with [`TEST_ACCOUNT`] signed in.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::new())
    }

    /// Creates a backend whose server uses `config`, with [`TEST_ACCOUNT`]
    /// signed in.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            server: CloudServer::new(config).with_account(AccountId::new(TEST_ACCOUNT)),
            store: InMemoryStore::new(),
        }
    }

    /// Creates a backend with nobody signed in.
    pub fn signed_out() -> Self {
        Self {
            server: CloudServer::default(),
            store: InMemoryStore::new(),
        }
    }

    /// Returns the server as a [`RemoteDatabase`].
    pub fn remote(&self) -> Arc<dyn RemoteDatabase> {
        Arc::new(self.server.clone())
    }

    /// Returns the local store as a [`KeyValueStore`].
    pub fn kv(&self) -> Arc<dyn KeyValueStore> {
        Arc::new(self.store.clone())
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// A file-backed store in a temporary directory, removed on drop.
pub struct TempStore {
    /// The store.
    pub store: Arc<FileStore>,
    _temp_dir: TempDir,
}

impl TempStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        }
    }

    /// Returns the directory holding the store.
    pub fn path(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Opens a second store over the same directory.
    pub fn reopen(&self) -> Arc<FileStore> {
        Arc::new(FileStore::open(self.path()).expect("Failed to reopen file store"))
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds records with the given values, one minute apart starting at `start`.
pub fn records_at(start: OffsetDateTime, values: &[i64]) -> Vec<HeartRateRecord> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| HeartRateRecord::new(value, start + Duration::minutes(i as i64)))
        .collect()
}
