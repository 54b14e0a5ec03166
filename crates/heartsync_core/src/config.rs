//! Configuration for the application layer.

use heartsync_engine::{BackgroundFetchConfig, SyncConfig};

/// What happens to locally cached records when the signed-in account changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountChangePolicy {
    /// Keep the cache and save every record to the new account.
    #[default]
    ReuploadLocal,
    /// Drop the cache and let the fetch for the new account repopulate it.
    WipeLocal,
}

/// Configuration for the [`RecordManager`](crate::RecordManager).
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerConfig {
    /// Handling of the local cache on an account change.
    pub account_change_policy: AccountChangePolicy,
}

impl ManagerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the account change policy.
    pub fn with_account_change_policy(mut self, policy: AccountChangePolicy) -> Self {
        self.account_change_policy = policy;
        self
    }
}

/// Configuration for a [`HeartSyncApp`](crate::HeartSyncApp).
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Sync engine settings.
    pub sync: SyncConfig,
    /// Record manager settings.
    pub manager: ManagerConfig,
    /// Background fetch timing.
    pub background: BackgroundFetchConfig,
}

impl AppConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sync engine configuration.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the record manager configuration.
    pub fn with_manager(mut self, manager: ManagerConfig) -> Self {
        self.manager = manager;
        self
    }

    /// Sets the background fetch timing.
    pub fn with_background(mut self, background: BackgroundFetchConfig) -> Self {
        self.background = background;
        self
    }
}
