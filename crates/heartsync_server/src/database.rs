//! Per-account private database state.

use crate::changelog::ChangeLog;
use heartsync_protocol::{
    ChangeToken, DatabaseChanges, RecordId, RemoteError, RemoteErrorCode, RemoteRecord, SavePolicy,
    Subscription, ZoneChangesPage, ZoneFetch, ZoneId,
};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ZoneEvent {
    Changed(ZoneId),
    Deleted(ZoneId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordEvent {
    Changed(RecordId),
    Deleted(RecordId),
}

#[derive(Debug)]
pub(crate) struct Zone {
    records: BTreeMap<RecordId, RemoteRecord>,
    log: ChangeLog<RecordEvent>,
}

/// One account's private database.
#[derive(Debug)]
pub(crate) struct AccountDatabase {
    zones: BTreeMap<ZoneId, Zone>,
    log: ChangeLog<ZoneEvent>,
    subscriptions: BTreeMap<String, Subscription>,
    next_revision: u64,
}

fn zone_not_found(zone: &ZoneId) -> RemoteError {
    RemoteError::new(
        RemoteErrorCode::ZoneNotFound,
        format!("zone {zone} does not exist"),
    )
}

impl AccountDatabase {
    pub fn new(log_id: u64) -> Self {
        Self {
            zones: BTreeMap::new(),
            log: ChangeLog::new(log_id),
            subscriptions: BTreeMap::new(),
            next_revision: 1,
        }
    }

    pub fn has_zone(&self, zone: &ZoneId) -> bool {
        self.zones.contains_key(zone)
    }

    /// Creates `zone` if missing. Returns true if it was created.
    pub fn create_zone(&mut self, zone: &ZoneId, log_id: u64) -> bool {
        if self.zones.contains_key(zone) {
            return false;
        }
        self.zones.insert(
            zone.clone(),
            Zone {
                records: BTreeMap::new(),
                log: ChangeLog::new(log_id),
            },
        );
        self.log.append(ZoneEvent::Changed(zone.clone()));
        true
    }

    /// Deletes `zone` and every record in it. Returns true if it existed.
    pub fn delete_zone(&mut self, zone: &ZoneId) -> bool {
        if self.zones.remove(zone).is_none() {
            return false;
        }
        self.log.append(ZoneEvent::Deleted(zone.clone()));
        true
    }

    pub fn save_subscription(&mut self, subscription: &Subscription) {
        self.subscriptions
            .insert(subscription.id.clone(), subscription.clone());
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.values().cloned().collect()
    }

    pub fn expire_database_tokens(&mut self) {
        self.log.expire_tokens();
    }

    pub fn expire_zone_tokens(&mut self, zone: &ZoneId) -> bool {
        match self.zones.get_mut(zone) {
            Some(z) => {
                z.log.expire_tokens();
                true
            }
            None => false,
        }
    }

    fn note_zone_changed(&mut self, zone: &ZoneId) {
        // One entry per write; pages collapse repeats of the same zone.
        self.log.append(ZoneEvent::Changed(zone.clone()));
    }

    /// Stores `record` under `policy`, returning the stored version.
    pub fn save_record(
        &mut self,
        record: RemoteRecord,
        policy: SavePolicy,
    ) -> Result<RemoteRecord, RemoteError> {
        let zone_id = record.zone.clone();
        let revision = self.next_revision;
        let zone = self
            .zones
            .get_mut(&zone_id)
            .ok_or_else(|| zone_not_found(&zone_id))?;

        let stored = match (zone.records.get(&record.id), policy) {
            (Some(existing), SavePolicy::IfServerRecordUnchanged)
                if existing.revision != record.revision =>
            {
                return Err(RemoteError::new(
                    RemoteErrorCode::ServerRecordChanged,
                    format!("record {} changed on the server", record.id),
                ));
            }
            (Some(existing), SavePolicy::ChangedKeys) => {
                let mut merged = existing.clone();
                merged.fields.extend(record.fields);
                merged.record_type = record.record_type;
                merged
            }
            _ => record,
        }
        .with_revision(revision);

        self.next_revision += 1;
        zone.records.insert(stored.id, stored.clone());
        zone.log.append(RecordEvent::Changed(stored.id));
        self.note_zone_changed(&zone_id);
        Ok(stored)
    }

    /// Deletes a record. Deleting a missing record succeeds.
    pub fn delete_record(&mut self, zone_id: &ZoneId, id: RecordId) -> Result<(), RemoteError> {
        let zone = self
            .zones
            .get_mut(zone_id)
            .ok_or_else(|| zone_not_found(zone_id))?;
        if zone.records.remove(&id).is_some() {
            zone.log.append(RecordEvent::Deleted(id));
            self.note_zone_changed(zone_id);
        }
        Ok(())
    }

    pub fn records(&self, zone: &ZoneId) -> Option<Vec<RemoteRecord>> {
        self.zones
            .get(zone)
            .map(|z| z.records.values().cloned().collect())
    }

    pub fn record(&self, zone: &ZoneId, id: &RecordId) -> Option<RemoteRecord> {
        self.zones.get(zone)?.records.get(id).cloned()
    }

    pub fn database_changes(
        &self,
        token: Option<&ChangeToken>,
        page_size: usize,
    ) -> Result<DatabaseChanges, RemoteError> {
        let position = self.log.resolve(token)?;
        let page = self.log.page(position, page_size);

        let mut changed = BTreeSet::new();
        let mut deleted = BTreeSet::new();
        for event in page.entries {
            match event {
                ZoneEvent::Changed(zone) => {
                    deleted.remove(zone);
                    changed.insert(zone.clone());
                }
                ZoneEvent::Deleted(zone) => {
                    changed.remove(zone);
                    deleted.insert(zone.clone());
                }
            }
        }

        Ok(DatabaseChanges {
            changed_zones: changed.into_iter().collect(),
            deleted_zones: deleted.into_iter().collect(),
            token: page.token,
            more_coming: page.more_coming,
        })
    }

    pub fn zone_changes(
        &self,
        fetch: &ZoneFetch,
        page_size: usize,
    ) -> Result<ZoneChangesPage, RemoteError> {
        let zone = self
            .zones
            .get(&fetch.zone)
            .ok_or_else(|| zone_not_found(&fetch.zone))?;
        let position = zone.log.resolve(fetch.token.as_ref())?;
        let page = zone.log.page(position, page_size);

        // Last event per record within the page wins.
        let mut latest: BTreeMap<RecordId, RecordEvent> = BTreeMap::new();
        for event in page.entries {
            let id = match event {
                RecordEvent::Changed(id) | RecordEvent::Deleted(id) => *id,
            };
            latest.insert(id, *event);
        }

        let mut changed = Vec::new();
        let mut deleted = Vec::new();
        for (id, event) in latest {
            match event {
                RecordEvent::Changed(_) => {
                    // A record deleted after this page is reported by a later page.
                    if let Some(record) = zone.records.get(&id) {
                        changed.push(record.clone());
                    }
                }
                RecordEvent::Deleted(_) => deleted.push(id),
            }
        }

        Ok(ZoneChangesPage {
            changed,
            deleted,
            token: page.token,
            more_coming: page.more_coming,
        })
    }
}
