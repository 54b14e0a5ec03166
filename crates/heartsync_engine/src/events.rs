//! Notifications emitted by the sync engine.

use heartsync_protocol::{AccountId, RecordId, RemoteRecord, ZoneId};

/// Something the engine learned from the remote store.
///
/// Events arrive in the order the worker produced them. `RecordChanged` and
/// `RecordDeleted` for one zone are always followed by a `ChangesSettled`
/// for that zone once its token has been persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A record was created or updated remotely.
    RecordChanged(RemoteRecord),
    /// A record was deleted remotely.
    RecordDeleted(RecordId),
    /// A page of zone changes has been applied and its token stored.
    ChangesSettled(ZoneId),
    /// The account changed and all sync state was invalidated.
    ///
    /// Emitted before the engine re-provisions and fetches for the new account.
    AccountChanged(AccountId),
    /// Pending saves rejected as conflicts and dropped from the queue.
    ConflictsDropped(Vec<RecordId>),
}
