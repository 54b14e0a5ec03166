//! Remote record store abstraction.

use crate::error::RemoteError;
use crate::messages::{
    DatabaseChanges, ModifyRecords, ModifyRecordsResult, OperationOptions, ZoneChanges, ZoneFetch,
};
use crate::zone::{AccountId, ChangeToken, Subscription, ZoneId};
use async_trait::async_trait;
use std::sync::Arc;

/// A remote record store holding one private database per account.
///
/// This trait abstracts the cloud backend so the sync engine can run
/// against the in-memory server in tests or a real service adapter.
/// Every call is asynchronous and may fail with a [`RemoteError`] that
/// carries a retry-after hint.
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    /// Returns the identity of the signed-in account.
    async fn fetch_user_identity(&self) -> Result<AccountId, RemoteError>;

    /// Looks up zones by id.
    ///
    /// Missing zones are reported as a `PartialFailure` whose per-zone
    /// entry is `ZoneNotFound`.
    async fn fetch_zones(
        &self,
        zones: &[ZoneId],
        options: &OperationOptions,
    ) -> Result<Vec<ZoneId>, RemoteError>;

    /// Creates a zone. Creating an existing zone succeeds.
    async fn save_zone(&self, zone: &ZoneId, options: &OperationOptions)
        -> Result<(), RemoteError>;

    /// Registers or replaces a push subscription.
    async fn save_subscription(
        &self,
        subscription: &Subscription,
        options: &OperationOptions,
    ) -> Result<(), RemoteError>;

    /// Fetches one page of database-level changes since `token`.
    async fn fetch_database_changes(
        &self,
        token: Option<&ChangeToken>,
        options: &OperationOptions,
    ) -> Result<DatabaseChanges, RemoteError>;

    /// Fetches one page of record-level changes for each requested zone.
    ///
    /// Per-zone failures are reported inside [`ZoneChanges::outcome`]; the
    /// outer error is reserved for failures of the whole request.
    async fn fetch_zone_changes(
        &self,
        fetches: &[ZoneFetch],
        options: &OperationOptions,
    ) -> Result<Vec<ZoneChanges>, RemoteError>;

    /// Saves and deletes records in one batch.
    async fn modify_records(&self, request: ModifyRecords) -> ModifyRecordsResult;
}

#[async_trait]
impl<T: RemoteDatabase + ?Sized> RemoteDatabase for Arc<T> {
    async fn fetch_user_identity(&self) -> Result<AccountId, RemoteError> {
        (**self).fetch_user_identity().await
    }

    async fn fetch_zones(
        &self,
        zones: &[ZoneId],
        options: &OperationOptions,
    ) -> Result<Vec<ZoneId>, RemoteError> {
        (**self).fetch_zones(zones, options).await
    }

    async fn save_zone(
        &self,
        zone: &ZoneId,
        options: &OperationOptions,
    ) -> Result<(), RemoteError> {
        (**self).save_zone(zone, options).await
    }

    async fn save_subscription(
        &self,
        subscription: &Subscription,
        options: &OperationOptions,
    ) -> Result<(), RemoteError> {
        (**self).save_subscription(subscription, options).await
    }

    async fn fetch_database_changes(
        &self,
        token: Option<&ChangeToken>,
        options: &OperationOptions,
    ) -> Result<DatabaseChanges, RemoteError> {
        (**self).fetch_database_changes(token, options).await
    }

    async fn fetch_zone_changes(
        &self,
        fetches: &[ZoneFetch],
        options: &OperationOptions,
    ) -> Result<Vec<ZoneChanges>, RemoteError> {
        (**self).fetch_zone_changes(fetches, options).await
    }

    async fn modify_records(&self, request: ModifyRecords) -> ModifyRecordsResult {
        (**self).modify_records(request).await
    }
}
