//! Request and response messages exchanged with the remote record store.

use crate::error::RemoteError;
use crate::record::{RecordId, RemoteRecord};
use crate::zone::{ChangeToken, ZoneId};
use std::time::Duration;

/// Timeouts applied to every remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationOptions {
    /// Timeout for a single network request.
    pub request_timeout: Duration,
    /// Timeout for the whole operation including retries by the transport.
    pub resource_timeout: Duration,
}

impl OperationOptions {
    /// Default request timeout (30 seconds).
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default resource timeout (7 days).
    pub const DEFAULT_RESOURCE_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            resource_timeout: Self::DEFAULT_RESOURCE_TIMEOUT,
        }
    }
}

/// How the server treats a saved record that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavePolicy {
    /// Overwrite only the fields carried by the request, without a revision check.
    #[default]
    ChangedKeys,
    /// Reject the save if the server revision differs from the one sent.
    IfServerRecordUnchanged,
    /// Replace every field, without a revision check.
    AllKeys,
}

/// One page of database-level changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseChanges {
    /// Zones with changed records since the previous token.
    pub changed_zones: Vec<ZoneId>,
    /// Zones deleted since the previous token.
    pub deleted_zones: Vec<ZoneId>,
    /// Token to resume from after this page.
    pub token: ChangeToken,
    /// True if another page is available.
    pub more_coming: bool,
}

/// Request for record-level changes in one zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneFetch {
    /// Zone to fetch.
    pub zone: ZoneId,
    /// Resume point, or `None` to fetch everything.
    pub token: Option<ChangeToken>,
}

/// One page of record-level changes in a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneChangesPage {
    /// Records created or changed.
    pub changed: Vec<RemoteRecord>,
    /// Ids of deleted records.
    pub deleted: Vec<RecordId>,
    /// Token to resume from after this page.
    pub token: ChangeToken,
    /// True if another page is available.
    pub more_coming: bool,
}

/// Per-zone result of a zone changes fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneChanges {
    /// The zone this result belongs to.
    pub zone: ZoneId,
    /// The page, or the error that stopped this zone.
    pub outcome: Result<ZoneChangesPage, RemoteError>,
}

/// A batch of record saves and deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyRecords {
    /// Zone the deletes target.
    pub zone: ZoneId,
    /// Records to save.
    pub saves: Vec<RemoteRecord>,
    /// Records to delete.
    pub deletes: Vec<RecordId>,
    /// Conflict policy for saves.
    pub policy: SavePolicy,
    /// Operation timeouts.
    pub options: OperationOptions,
}

impl ModifyRecords {
    /// Creates a batch with the default policy and options.
    #[must_use]
    pub fn new(zone: ZoneId, saves: Vec<RemoteRecord>, deletes: Vec<RecordId>) -> Self {
        Self {
            zone,
            saves,
            deletes,
            policy: SavePolicy::ChangedKeys,
            options: OperationOptions::default(),
        }
    }

    /// Total number of operations in the batch.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.saves.len() + self.deletes.len()
    }
}

/// Result of a modify call.
///
/// Partial success is possible: `saved` and `deleted` list what the server
/// applied even when `error` is set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModifyRecordsResult {
    /// Records the server stored, with their new revisions.
    pub saved: Vec<RemoteRecord>,
    /// Ids the server deleted.
    pub deleted: Vec<RecordId>,
    /// Error for the batch or for individual items.
    pub error: Option<RemoteError>,
}

impl ModifyRecordsResult {
    /// Creates a result that failed as a whole.
    #[must_use]
    pub fn failed(error: RemoteError) -> Self {
        Self {
            saved: Vec::new(),
            deleted: Vec::new(),
            error: Some(error),
        }
    }
}
