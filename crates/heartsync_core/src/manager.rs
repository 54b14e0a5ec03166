//! The authoritative record set and its published view.
//!
//! [`RecordManager`] keeps every known record in a map keyed by id and
//! publishes a view of the map sorted newest first. Local mutations update
//! the map, republish the view and hand the change to the [`SyncEngine`].
//! Remote changes arrive as [`SyncEvent`]s; they are merged into the map as
//! they come in and published once their page has settled.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (engine, events) = SyncEngine::spawn(config, staging, remote);
//! let manager = RecordManager::new(engine, staged.records, ManagerConfig::new());
//! manager.attach(events);
//!
//! manager.on_records_changed(|records| println!("{} records", records.len()));
//! manager.save(vec![HeartRateRecord::new(72, OffsetDateTime::now_utc())]);
//! ```

use crate::config::{AccountChangePolicy, ManagerConfig};
use heartsync_engine::{Ack, SyncEngine, SyncEvent};
use heartsync_protocol::{sort_newest_first, AccountId, HeartRateRecord, RecordId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A published snapshot of the records, newest first.
pub type RecordsView = Arc<[HeartRateRecord]>;

type RecordsHandler = Arc<dyn Fn(&[HeartRateRecord]) + Send + Sync>;
type AccountHandler = Arc<dyn Fn(&AccountId) + Send + Sync>;
type ConflictHandler = Arc<dyn Fn(&[RecordId]) + Send + Sync>;

/// Identifies a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Observers {
    next_id: u64,
    records: Vec<(ObserverId, RecordsHandler)>,
    account: Vec<(ObserverId, AccountHandler)>,
    conflicts: Vec<(ObserverId, ConflictHandler)>,
}

impl Observers {
    fn next(&mut self) -> ObserverId {
        self.next_id += 1;
        ObserverId(self.next_id)
    }
}

struct Records {
    by_id: HashMap<RecordId, HeartRateRecord>,
    view: RecordsView,
}

impl Records {
    fn new(records: Vec<HeartRateRecord>) -> Self {
        let by_id: HashMap<_, _> = records.into_iter().map(|r| (r.id, r)).collect();
        let view = sorted(&by_id);
        Self { by_id, view }
    }

    /// Rebuilds the view from the map. Returns the new view if it differs.
    fn rebuild(&mut self) -> Option<RecordsView> {
        let view = sorted(&self.by_id);
        if view == self.view {
            return None;
        }
        self.view = Arc::clone(&view);
        Some(view)
    }

    fn values(&self) -> Vec<HeartRateRecord> {
        self.by_id.values().cloned().collect()
    }
}

fn sorted(by_id: &HashMap<RecordId, HeartRateRecord>) -> RecordsView {
    let mut records: Vec<_> = by_id.values().cloned().collect();
    sort_newest_first(&mut records);
    records.into()
}

struct Inner {
    engine: SyncEngine,
    config: ManagerConfig,
    records: RwLock<Records>,
    observers: Mutex<Observers>,
}

/// Owns the authoritative record set.
///
/// Cloning the manager is cheap; clones share the same records, observers
/// and engine.
#[derive(Clone)]
pub struct RecordManager {
    inner: Arc<Inner>,
}

impl RecordManager {
    /// Creates a manager over `records`, usually the set loaded from the
    /// staging store at startup.
    pub fn new(engine: SyncEngine, records: Vec<HeartRateRecord>, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                config,
                records: RwLock::new(Records::new(records)),
                observers: Mutex::new(Observers::default()),
            }),
        }
    }

    /// Returns the engine the manager pushes to.
    pub fn engine(&self) -> &SyncEngine {
        &self.inner.engine
    }

    /// Returns the published view, newest first.
    pub fn records(&self) -> RecordsView {
        Arc::clone(&self.inner.records.read().view)
    }

    /// Returns the newest record.
    pub fn latest(&self) -> Option<HeartRateRecord> {
        self.inner.records.read().view.first().cloned()
    }

    /// Looks up a record by id.
    pub fn get(&self, id: &RecordId) -> Option<HeartRateRecord> {
        self.inner.records.read().by_id.get(id).cloned()
    }

    /// Returns the number of records in the authoritative set.
    pub fn len(&self) -> usize {
        self.inner.records.read().by_id.len()
    }

    /// Returns true if the authoritative set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Saves records locally and schedules their push.
    ///
    /// The published view includes the records before this returns. The
    /// returned [`Ack`] resolves once the push settles; the records stay
    /// queued for the next drain if it fails.
    pub fn save(&self, records: Vec<HeartRateRecord>) -> Ack {
        tracing::debug!(count = records.len(), "saving records");
        let (view, ack) = {
            let mut state = self.inner.records.write();
            for record in &records {
                state.by_id.insert(record.id, record.clone());
            }
            // Queued under the lock so snapshots reach the engine in mutation order.
            self.inner.engine.persist_records(state.values());
            (state.rebuild(), self.inner.engine.save_records(records))
        };
        self.publish(view);
        ack
    }

    /// Deletes records locally and schedules the remote delete.
    pub fn delete(&self, ids: Vec<RecordId>) -> Ack {
        tracing::debug!(count = ids.len(), "deleting records");
        let (view, ack) = {
            let mut state = self.inner.records.write();
            for id in &ids {
                state.by_id.remove(id);
            }
            self.inner.engine.persist_records(state.values());
            (state.rebuild(), self.inner.engine.delete_records(ids))
        };
        self.publish(view);
        ack
    }

    /// Deletes every record.
    pub fn delete_all(&self) -> Ack {
        let ids: Vec<_> = self.inner.records.read().by_id.keys().copied().collect();
        self.delete(ids)
    }

    /// Persists the record set and the sync state before the app goes inactive.
    pub fn application_will_resign_active(&self) {
        let state = self.inner.records.read();
        self.inner.engine.persist_records(state.values());
        self.inner.engine.persist_now();
    }

    /// Registers a handler called with the full view whenever it changes.
    pub fn on_records_changed<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&[HeartRateRecord]) + Send + Sync + 'static,
    {
        let mut observers = self.inner.observers.lock();
        let id = observers.next();
        observers.records.push((id, Arc::new(handler)));
        id
    }

    /// Registers a handler called after an account change invalidated the
    /// sync state and before the local records are uploaded again.
    pub fn on_account_changed<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&AccountId) + Send + Sync + 'static,
    {
        let mut observers = self.inner.observers.lock();
        let id = observers.next();
        observers.account.push((id, Arc::new(handler)));
        id
    }

    /// Registers a handler called with the ids of saves dropped as conflicts.
    pub fn on_conflicts_dropped<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&[RecordId]) + Send + Sync + 'static,
    {
        let mut observers = self.inner.observers.lock();
        let id = observers.next();
        observers.conflicts.push((id, Arc::new(handler)));
        id
    }

    /// Removes an observer. Returns false if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.lock();
        let before =
            observers.records.len() + observers.account.len() + observers.conflicts.len();
        observers.records.retain(|(o, _)| *o != id);
        observers.account.retain(|(o, _)| *o != id);
        observers.conflicts.retain(|(o, _)| *o != id);
        before != observers.records.len() + observers.account.len() + observers.conflicts.len()
    }

    /// Spawns a task applying engine events until the stream closes.
    pub fn attach(&self, mut events: mpsc::UnboundedReceiver<SyncEvent>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.apply(event);
            }
            tracing::debug!("sync event stream closed");
        })
    }

    /// Applies one engine event.
    ///
    /// Remote changes overwrite by id and become visible on the next
    /// [`SyncEvent::ChangesSettled`].
    pub fn apply(&self, event: SyncEvent) {
        match event {
            SyncEvent::RecordChanged(remote) => match HeartRateRecord::from_remote(&remote) {
                Some(record) => {
                    self.inner.records.write().by_id.insert(record.id, record);
                }
                None => {
                    tracing::warn!(
                        id = %remote.id,
                        record_type = %remote.record_type,
                        "ignoring unreadable remote record"
                    );
                }
            },
            SyncEvent::RecordDeleted(id) => {
                self.inner.records.write().by_id.remove(&id);
            }
            SyncEvent::ChangesSettled(zone) => {
                let view = {
                    let mut state = self.inner.records.write();
                    let view = state.rebuild();
                    if view.is_some() {
                        self.inner.engine.persist_records(state.values());
                    }
                    view
                };
                if view.is_some() {
                    tracing::debug!(zone = %zone, "remote changes settled");
                    self.publish(view);
                }
            }
            SyncEvent::AccountChanged(account) => self.account_changed(&account),
            SyncEvent::ConflictsDropped(ids) => {
                tracing::warn!(count = ids.len(), "local saves dropped as conflicts");
                let handlers: Vec<_> = self
                    .inner
                    .observers
                    .lock()
                    .conflicts
                    .iter()
                    .map(|(_, h)| Arc::clone(h))
                    .collect();
                for handler in handlers {
                    handler(&ids);
                }
            }
        }
    }

    fn account_changed(&self, account: &AccountId) {
        let policy = self.inner.config.account_change_policy;
        tracing::info!(account = %account, ?policy, "account changed");

        if policy == AccountChangePolicy::WipeLocal {
            let view = {
                let mut state = self.inner.records.write();
                state.by_id.clear();
                self.inner.engine.persist_records(Vec::new());
                state.rebuild()
            };
            self.publish(view);
        }

        let handlers: Vec<_> = self
            .inner
            .observers
            .lock()
            .account
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(account);
        }

        if policy == AccountChangePolicy::ReuploadLocal {
            let state = self.inner.records.read();
            if !state.by_id.is_empty() {
                tracing::info!(
                    count = state.by_id.len(),
                    "uploading local records to new account"
                );
                let _ = self.inner.engine.save_records(state.values());
            }
        }
    }

    /// Notifies record observers. Handlers run without any lock held.
    fn publish(&self, view: Option<RecordsView>) {
        let Some(view) = view else {
            return;
        };
        let handlers: Vec<_> = self
            .inner
            .observers
            .lock()
            .records
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(&view);
        }
    }
}

impl fmt::Debug for RecordManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordManager")
            .field("records", &self.len())
            .field("config", &self.inner.config)
            .finish()
    }
}
