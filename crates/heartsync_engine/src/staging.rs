//! Durable staging of records, pending operations and sync cursors.

use crate::error::SyncResult;
use heartsync_protocol::{
    from_cbor, to_cbor, AccountId, ChangeToken, HeartRateRecord, RecordId, ZoneId,
};
use heartsync_storage::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Fixed keys of the staged blobs.
pub mod keys {
    /// Authoritative record set.
    pub const RECORDS: &str = "heartsync.records";
    /// Records awaiting a remote save.
    pub const PENDING_SAVES: &str = "heartsync.pending_saves";
    /// Ids awaiting a remote delete.
    pub const PENDING_DELETES: &str = "heartsync.pending_deletes";
    /// Zones known to exist remotely.
    pub const SAVED_ZONES: &str = "heartsync.saved_zones";
    /// Whether the database subscription is registered.
    pub const SUBSCRIPTION_REGISTERED: &str = "heartsync.subscription_registered";
    /// Database-level change token.
    pub const DATABASE_TOKEN: &str = "heartsync.database_token";
    /// Per-zone change tokens.
    pub const ZONE_TOKENS: &str = "heartsync.zone_tokens";
    /// Identity of the last seen account.
    pub const ACCOUNT_ID: &str = "heartsync.account_id";

    /// Every key, in a stable order.
    pub const ALL: [&str; 8] = [
        RECORDS,
        PENDING_SAVES,
        PENDING_DELETES,
        SAVED_ZONES,
        SUBSCRIPTION_REGISTERED,
        DATABASE_TOKEN,
        ZONE_TOKENS,
        ACCOUNT_ID,
    ];
}

/// Sync state owned by the engine worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Records awaiting a remote save, one per id.
    pub pending_saves: BTreeMap<RecordId, HeartRateRecord>,
    /// Ids awaiting a remote delete.
    pub pending_deletes: BTreeSet<RecordId>,
    /// Zones known to exist remotely.
    pub saved_zones: BTreeSet<ZoneId>,
    /// Whether the database subscription is registered.
    pub subscription_registered: bool,
    /// Database-level change token.
    pub database_token: Option<ChangeToken>,
    /// Per-zone change tokens.
    pub zone_tokens: BTreeMap<ZoneId, ChangeToken>,
    /// Identity of the last seen account.
    pub account: Option<AccountId>,
}

impl SyncState {
    /// Returns true if any save or delete awaits acknowledgement.
    pub fn has_pending(&self) -> bool {
        !self.pending_saves.is_empty() || !self.pending_deletes.is_empty()
    }

    /// Stages saves. A later save of the same id replaces the earlier one.
    pub fn stage_saves(&mut self, records: impl IntoIterator<Item = HeartRateRecord>) {
        for record in records {
            self.pending_saves.insert(record.id, record);
        }
    }

    /// Stages deletes and drops pending saves of the same ids.
    pub fn stage_deletes(&mut self, ids: impl IntoIterator<Item = RecordId>) {
        for id in ids {
            self.pending_saves.remove(&id);
            self.pending_deletes.insert(id);
        }
    }

    /// Returns the saves to push, excluding ids slated for deletion.
    pub fn saves_to_push(&self) -> Vec<HeartRateRecord> {
        self.pending_saves
            .values()
            .filter(|r| !self.pending_deletes.contains(&r.id))
            .cloned()
            .collect()
    }

    /// Drops a pending save only if the staged record equals `pushed`.
    ///
    /// Returns true if the entry was removed.
    pub fn acknowledge_save(&mut self, pushed: &HeartRateRecord) -> bool {
        if self.pending_saves.get(&pushed.id) == Some(pushed) {
            self.pending_saves.remove(&pushed.id);
            true
        } else {
            false
        }
    }

    /// Drops a pending delete.
    pub fn acknowledge_delete(&mut self, id: &RecordId) -> bool {
        self.pending_deletes.remove(id)
    }

    /// Clears every cursor, flag and pending operation tied to an account.
    pub fn reset_for_account(&mut self, account: AccountId) {
        *self = SyncState {
            account: Some(account),
            ..SyncState::default()
        };
    }
}

/// Everything loaded from the staging store at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedState {
    /// The authoritative record set.
    pub records: Vec<HeartRateRecord>,
    /// The engine's sync state.
    pub sync: SyncState,
}

/// Typed access to staged blobs in a [`KeyValueStore`].
///
/// Every namespace lives under its own key and is written with a single
/// `set`, so a failed write never disturbs another namespace. A missing or
/// undecodable blob loads as empty.
#[derive(Clone)]
pub struct StagingStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for StagingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingStore").finish_non_exhaustive()
    }
}

impl StagingStore {
    /// Wraps a key-value store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Loads the records and the sync state.
    pub fn load(&self) -> StagedState {
        StagedState {
            records: self.load_records(),
            sync: self.load_sync_state(),
        }
    }

    /// Loads the authoritative record set.
    pub fn load_records(&self) -> Vec<HeartRateRecord> {
        self.read(keys::RECORDS).unwrap_or_default()
    }

    /// Loads the sync state.
    pub fn load_sync_state(&self) -> SyncState {
        let mut state = SyncState::default();
        let saves: Vec<HeartRateRecord> = self.read(keys::PENDING_SAVES).unwrap_or_default();
        state.stage_saves(saves);
        state.pending_deletes = self.read(keys::PENDING_DELETES).unwrap_or_default();
        state.saved_zones = self.read(keys::SAVED_ZONES).unwrap_or_default();
        state.subscription_registered = self
            .read(keys::SUBSCRIPTION_REGISTERED)
            .unwrap_or_default();
        state.database_token = self.read(keys::DATABASE_TOKEN);
        state.zone_tokens = self.read(keys::ZONE_TOKENS).unwrap_or_default();
        state.account = self.read(keys::ACCOUNT_ID);
        state
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read staged blob");
                return None;
            }
        };
        match from_cbor(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding corrupt staged blob");
                None
            }
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> SyncResult<()> {
        let bytes = to_cbor(value)?;
        self.store.set(key, &bytes)?;
        Ok(())
    }

    fn write_optional<T: Serialize>(&self, key: &str, value: Option<&T>) -> SyncResult<()> {
        match value {
            Some(value) => self.write(key, value),
            None => Ok(self.store.remove(key)?),
        }
    }

    /// Writes the authoritative record set.
    pub fn save_records(&self, records: &[HeartRateRecord]) -> SyncResult<()> {
        self.write(keys::RECORDS, records)
    }

    /// Writes both pending queues.
    ///
    /// The queues are separate namespaces; the delete queue is written even
    /// if the save queue fails.
    pub fn save_queues(&self, state: &SyncState) -> SyncResult<()> {
        let saves: Vec<&HeartRateRecord> = state.pending_saves.values().collect();
        let saved = self.write(keys::PENDING_SAVES, &saves);
        let deleted = self.write(keys::PENDING_DELETES, &state.pending_deletes);
        saved.and(deleted)
    }

    /// Writes the saved-zone set.
    pub fn save_zones(&self, state: &SyncState) -> SyncResult<()> {
        self.write(keys::SAVED_ZONES, &state.saved_zones)
    }

    /// Writes the subscription flag.
    pub fn save_subscription_flag(&self, state: &SyncState) -> SyncResult<()> {
        self.write(keys::SUBSCRIPTION_REGISTERED, &state.subscription_registered)
    }

    /// Writes the database change token.
    pub fn save_database_token(&self, state: &SyncState) -> SyncResult<()> {
        self.write_optional(keys::DATABASE_TOKEN, state.database_token.as_ref())
    }

    /// Writes the per-zone change tokens.
    pub fn save_zone_tokens(&self, state: &SyncState) -> SyncResult<()> {
        self.write(keys::ZONE_TOKENS, &state.zone_tokens)
    }

    /// Writes the account identity.
    pub fn save_account(&self, state: &SyncState) -> SyncResult<()> {
        self.write_optional(keys::ACCOUNT_ID, state.account.as_ref())
    }

    /// Writes every sync namespace, returning the first failure.
    pub fn save_sync_state(&self, state: &SyncState) -> SyncResult<()> {
        let results = [
            self.save_queues(state),
            self.save_zones(state),
            self.save_subscription_flag(state),
            self.save_database_token(state),
            self.save_zone_tokens(state),
            self.save_account(state),
        ];
        results.into_iter().collect()
    }

    /// Removes every staged blob.
    pub fn clear(&self) -> SyncResult<()> {
        for key in keys::ALL {
            self.store.remove(key)?;
        }
        Ok(())
    }
}
