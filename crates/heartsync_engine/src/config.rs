//! Configuration for the sync engine.

use heartsync_protocol::{OperationOptions, SavePolicy, Subscription, ZoneId};
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Zone records are stored in.
    pub zone: ZoneId,
    /// Push subscription registered for database changes.
    pub subscription: Subscription,
    /// Maximum saves plus deletes sent in one modify call.
    pub operation_limit: usize,
    /// Timeouts attached to every remote operation.
    pub options: OperationOptions,
    /// Conflict policy for record saves.
    pub save_policy: SavePolicy,
}

impl SyncConfig {
    /// Server ceiling on operations per modify call.
    pub const DEFAULT_OPERATION_LIMIT: usize = 400;

    /// Creates a configuration for `zone`.
    pub fn new(zone: ZoneId) -> Self {
        Self {
            zone,
            subscription: Subscription::default(),
            operation_limit: Self::DEFAULT_OPERATION_LIMIT,
            options: OperationOptions::default(),
            save_policy: SavePolicy::ChangedKeys,
        }
    }

    /// Sets the subscription.
    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = subscription;
        self
    }

    /// Sets the operation ceiling. Values below 1 are raised to 1.
    pub fn with_operation_limit(mut self, limit: usize) -> Self {
        self.operation_limit = limit.max(1);
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    /// Sets the resource timeout.
    pub fn with_resource_timeout(mut self, timeout: Duration) -> Self {
        self.options.resource_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(ZoneId::default_zone())
    }
}

/// Timing for an OS-granted background fetch.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundFetchConfig {
    /// Time after which the fetch reports no new data.
    pub deadline: Duration,
    /// Extra time given to outstanding work after the fetch completes.
    pub grace: Duration,
}

impl BackgroundFetchConfig {
    /// Creates a configuration with the default 25 second deadline and 2 second grace.
    pub fn new() -> Self {
        Self {
            deadline: Duration::from_secs(25),
            grace: Duration::from_secs(2),
        }
    }

    /// Sets the deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sets the grace window.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl Default for BackgroundFetchConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.zone, ZoneId::default_zone());
        assert_eq!(config.operation_limit, 400);
        assert_eq!(config.options.request_timeout, Duration::from_secs(30));
        assert_eq!(config.options.resource_timeout, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.save_policy, SavePolicy::ChangedKeys);
        assert_eq!(config.subscription.id, "shared-changes");
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new(ZoneId::new("Other"))
            .with_operation_limit(0)
            .with_request_timeout(Duration::from_secs(5));
        assert_eq!(config.zone.name(), "Other");
        assert_eq!(config.operation_limit, 1);
        assert_eq!(config.options.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn background_defaults() {
        let config = BackgroundFetchConfig::default();
        assert_eq!(config.deadline, Duration::from_secs(25));
        assert_eq!(config.grace, Duration::from_secs(2));
    }
}
