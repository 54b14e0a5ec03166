//! Application wiring and lifecycle hooks.

use crate::config::AppConfig;
use crate::error::CoreResult;
use crate::manager::RecordManager;
use heartsync_engine::{background_fetch, FetchResult, StagingStore, SyncEngine, SyncState};
use heartsync_protocol::{AccountId, RemoteDatabase};
use heartsync_storage::{FileStore, KeyValueStore};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running HeartSync instance.
///
/// Owns the sync engine and the record manager and forwards application
/// lifecycle events to them. Construct one per process.
///
/// # Example
///
/// ```rust,ignore
/// let app = HeartSyncApp::open(AppConfig::new(), store, remote);
/// app.did_finish_launching();
/// app.records().save(vec![record]);
/// app.will_resign_active();
/// app.shutdown().await;
/// ```
#[derive(Debug)]
pub struct HeartSyncApp {
    config: AppConfig,
    engine: SyncEngine,
    manager: RecordManager,
    events: Option<JoinHandle<()>>,
}

impl HeartSyncApp {
    /// Loads the staged state from `store` and starts the engine.
    ///
    /// Nothing touches the remote until a lifecycle hook asks for it.
    /// Must be called from within a tokio runtime.
    pub fn open(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteDatabase>,
    ) -> Self {
        let staging = StagingStore::new(store);
        let records = staging.load_records();
        tracing::info!(records = records.len(), "opening heartsync");
        let (engine, events) = SyncEngine::spawn(config.sync.clone(), staging, remote);
        let manager = RecordManager::new(engine.clone(), records, config.manager);
        let events = manager.attach(events);
        Self {
            config,
            engine,
            manager,
            events: Some(events),
        }
    }

    /// Opens an instance backed by a [`FileStore`] in `dir`.
    pub fn open_dir(
        dir: &Path,
        config: AppConfig,
        remote: Arc<dyn RemoteDatabase>,
    ) -> CoreResult<Self> {
        let store = FileStore::open(dir)?;
        Ok(Self::open(config, Arc::new(store), remote))
    }

    /// Returns the record manager.
    pub fn records(&self) -> &RecordManager {
        &self.manager
    }

    /// Returns the sync engine.
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Returns a copy of the engine's sync state.
    pub async fn sync_state(&self) -> CoreResult<SyncState> {
        Ok(self.engine.snapshot().await?)
    }

    /// Checks the signed-in account and starts syncing.
    pub fn did_finish_launching(&self) {
        self.engine.refresh_account();
        self.engine.start_sync();
    }

    /// Starts syncing when the app comes to the foreground.
    pub fn did_become_active(&self) {
        self.engine.start_sync();
    }

    /// Persists records and sync state before the app goes inactive.
    pub fn will_resign_active(&self) {
        self.manager.application_will_resign_active();
    }

    /// Pushes pending operations, if any, when the app enters the background.
    ///
    /// Returns true if nothing was pending or the push succeeded.
    pub async fn did_enter_background(&self) -> CoreResult<bool> {
        if !self.engine.snapshot().await?.has_pending() {
            return Ok(true);
        }
        Ok(self.engine.drain_pending().await)
    }

    /// Handles a change of the signed-in account reported by the platform.
    pub fn account_changed(&self, account: AccountId) {
        self.engine.account_changed(account);
    }

    /// Runs an OS-granted background fetch.
    pub async fn background_fetch(&self) -> FetchResult {
        background_fetch(&self.engine, &self.config.background).await
    }

    /// Handles a push notification about remote changes.
    pub async fn remote_notification(&self) -> FetchResult {
        self.background_fetch().await
    }

    /// Persists everything and stops the engine.
    pub async fn shutdown(mut self) {
        self.manager.application_will_resign_active();
        self.engine.shutdown().await;
        if let Some(events) = self.events.take() {
            let _ = events.await;
        }
        tracing::info!("heartsync stopped");
    }
}

impl Drop for HeartSyncApp {
    fn drop(&mut self) {
        // The event task holds an engine handle; stop it so the worker can exit.
        if let Some(events) = self.events.take() {
            events.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heartsync_engine::keys;
    use heartsync_protocol::HeartRateRecord;
    use heartsync_server::CloudServer;
    use heartsync_storage::InMemoryStore;
    use time::macros::datetime;

    #[tokio::test]
    async fn open_loads_staged_records() {
        let store = Arc::new(InMemoryStore::new());
        let remote = Arc::new(CloudServer::default());
        let record = HeartRateRecord::new(72, datetime!(2024-01-01 10:00 UTC));

        let app = HeartSyncApp::open(AppConfig::new(), store.clone(), remote.clone());
        let _ = app.records().save(vec![record.clone()]);
        app.shutdown().await;
        assert!(store.get(keys::RECORDS).unwrap().is_some());

        let app = HeartSyncApp::open(AppConfig::new(), store, remote);
        assert_eq!(&app.records().records()[..], &[record]);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn background_with_nothing_pending_skips_push() {
        let remote = Arc::new(CloudServer::default());
        let app = HeartSyncApp::open(
            AppConfig::new(),
            Arc::new(InMemoryStore::new()),
            remote.clone(),
        );
        assert!(app.did_enter_background().await.unwrap());
        assert!(remote.calls().calls().is_empty());
        app.shutdown().await;
    }

    #[tokio::test]
    async fn open_dir_uses_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let app = HeartSyncApp::open_dir(
            dir.path(),
            AppConfig::new(),
            Arc::new(CloudServer::default()),
        )
        .unwrap();
        let _ = app
            .records()
            .save(vec![HeartRateRecord::new(60, datetime!(2024-01-01 10:00 UTC))]);
        app.shutdown().await;
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_some());
    }
}
