//! Sync engine scenarios against the in-memory remote store.
//!
//! Every test runs with a paused clock, so retry delays elapse instantly
//! and can be measured exactly.

use async_trait::async_trait;
use heartsync_engine::{
    background_fetch, BackgroundFetchConfig, FetchResult, StagingStore, SyncConfig, SyncEngine,
    SyncEvent, SyncState,
};
use heartsync_protocol::{
    AccountId, ChangeToken, DatabaseChanges, HeartRateRecord, ModifyRecords, ModifyRecordsResult,
    OperationOptions, RecordId, RemoteDatabase, RemoteError, RemoteErrorCode, RemoteRecord,
    Subscription, ZoneChanges, ZoneFetch, ZoneId,
};
use heartsync_server::{CloudServer, OperationKind, ServerConfig};
use heartsync_storage::InMemoryStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use time::macros::datetime;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

struct Harness {
    server: CloudServer,
    store: InMemoryStore,
    engine: SyncEngine,
    events: UnboundedReceiver<SyncEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_server(
            CloudServer::new(ServerConfig::new()).with_account(AccountId::new("alice")),
        )
    }

    fn with_server(server: CloudServer) -> Self {
        let store = InMemoryStore::new();
        let (engine, events) = spawn(&server, &store);
        Self {
            server,
            store,
            engine,
            events,
        }
    }

    /// Stops the engine and starts a new one over the same store.
    async fn restart(&mut self) {
        self.engine.shutdown().await;
        let (engine, events) = spawn(&self.server, &self.store);
        self.engine = engine;
        self.events = events;
    }

    fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn spawn(
    server: &CloudServer,
    store: &InMemoryStore,
) -> (SyncEngine, UnboundedReceiver<SyncEvent>) {
    SyncEngine::spawn(
        SyncConfig::default(),
        StagingStore::new(Arc::new(store.clone())),
        Arc::new(server.clone()),
    )
}

fn zone() -> ZoneId {
    ZoneId::default_zone()
}

fn record(value: i64) -> HeartRateRecord {
    HeartRateRecord::new(value, datetime!(2024-05-01 09:00 UTC))
}

fn remote(value: i64) -> RemoteRecord {
    HeartRateRecord::new(value, OffsetDateTime::UNIX_EPOCH).to_remote(&zone())
}

/// Lets every spawned call finish. Paused time only advances once the
/// runtime is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Applies record events to a map, as the reconciliation layer would.
fn apply(model: &mut BTreeMap<RecordId, RemoteRecord>, events: Vec<SyncEvent>) {
    for event in events {
        match event {
            SyncEvent::RecordChanged(record) => {
                model.insert(record.id, record);
            }
            SyncEvent::RecordDeleted(id) => {
                model.remove(&id);
            }
            _ => {}
        }
    }
}

#[tokio::test(start_paused = true)]
async fn provisioning_is_idempotent() {
    let h = Harness::new();

    let first = h.engine.ensure_zone();
    let concurrent = h.engine.ensure_zone();
    assert!(first.await);
    assert!(concurrent.await);
    assert!(h.engine.ensure_zone().await);

    assert!(h.server.zone_exists(&zone()));
    assert_eq!(h.server.call_count(OperationKind::FetchZones), 1);
    assert_eq!(h.server.call_count(OperationKind::SaveZone), 1);
    let state = h.engine.snapshot().await.unwrap();
    assert!(state.saved_zones.contains(&zone()));
}

#[tokio::test(start_paused = true)]
async fn existing_zone_is_not_recreated() {
    let h = Harness::new();
    h.server.create_zone(&zone()).unwrap();

    assert!(h.engine.ensure_zone().await);
    assert_eq!(h.server.call_count(OperationKind::SaveZone), 0);
}

#[tokio::test(start_paused = true)]
async fn acknowledged_items_leave_the_queue() {
    let h = Harness::new();
    let (a, b, c) = (record(60), record(61), record(62));
    h.server.inject_record_failure(
        b.id,
        RemoteError::new(RemoteErrorCode::InternalError, "disk full"),
    );

    assert!(h.engine.save_records(vec![a.clone(), b.clone(), c.clone()]).await);

    let state = h.engine.snapshot().await.unwrap();
    let pending: Vec<_> = state.pending_saves.keys().copied().collect();
    assert_eq!(pending, vec![b.id]);
    assert!(h.server.record(&zone(), &a.id).is_some());
    assert!(h.server.record(&zone(), &c.id).is_some());

    // The failed item goes out on the next drain.
    assert!(h.engine.drain_pending().await);
    assert!(h.engine.snapshot().await.unwrap().pending_saves.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deletes_are_acknowledged() {
    let h = Harness::new();
    let a = record(70);
    assert!(h.engine.save_records(vec![a.clone()]).await);
    assert!(h.server.record(&zone(), &a.id).is_some());

    assert!(h.engine.delete_records(vec![a.id]).await);
    assert!(h.server.record(&zone(), &a.id).is_none());
    let state = h.engine.snapshot().await.unwrap();
    assert!(state.pending_deletes.is_empty());
    assert!(state.pending_saves.is_empty());
}

#[tokio::test(start_paused = true)]
async fn oversized_push_is_split_and_completes_once() {
    let h = Harness::new();
    assert!(h.engine.ensure_zone().await);

    let saves: Vec<_> = (0..450).map(record).collect();
    let expected: BTreeSet<RecordId> = saves.iter().map(|r| r.id).collect();
    assert!(h.engine.save_records(saves).await);

    let batches = h.server.calls().modify_batches();
    assert_eq!(batches.len(), 2);
    let mut seen = BTreeSet::new();
    for (saves, deletes) in &batches {
        assert!(saves.len() + deletes.len() <= 400);
        for id in saves.iter().chain(deletes) {
            assert!(seen.insert(*id), "operation {id} pushed twice");
        }
    }
    assert_eq!(seen, expected);
    assert!(h.engine.snapshot().await.unwrap().pending_saves.is_empty());
}

#[tokio::test(start_paused = true)]
async fn split_covers_saves_and_deletes_together() {
    let h = Harness::new();
    assert!(h.engine.ensure_zone().await);
    h.server.set_reachable(false);

    let saves: Vec<_> = (0..300).map(record).collect();
    let deletes: Vec<_> = (0..250).map(|_| RecordId::new()).collect();
    let mut expected: BTreeSet<RecordId> = saves.iter().map(|r| r.id).collect();
    expected.extend(deletes.iter().copied());
    assert!(!h.engine.save_records(saves).await);
    assert!(!h.engine.delete_records(deletes).await);

    h.server.set_reachable(true);
    h.server.clear_calls();
    assert!(h.engine.drain_pending().await);

    let mut seen = BTreeSet::new();
    for (saves, deletes) in h.server.calls().modify_batches() {
        assert!(saves.len() + deletes.len() <= 400);
        for id in saves.into_iter().chain(deletes) {
            assert!(seen.insert(id));
        }
    }
    assert_eq!(seen, expected);
    let state = h.engine.snapshot().await.unwrap();
    assert!(!state.has_pending());
}

#[tokio::test(start_paused = true)]
async fn server_limit_error_splits_batch() {
    let server = CloudServer::new(ServerConfig::new().with_operation_limit(3))
        .with_account(AccountId::new("alice"));
    let h = Harness::with_server(server);

    let saves: Vec<_> = (0..10).map(record).collect();
    assert!(h.engine.save_records(saves).await);

    assert_eq!(h.server.records(&zone()).unwrap().len(), 10);
    assert!(h.server.call_count(OperationKind::ModifyRecords) > 1);
    assert!(h.engine.snapshot().await.unwrap().pending_saves.is_empty());
}

#[tokio::test(start_paused = true)]
async fn retry_delays_compound() {
    let h = Harness::new();
    assert!(h.engine.ensure_zone().await);
    for _ in 0..3 {
        h.server.inject_failure(
            OperationKind::ModifyRecords,
            RemoteError::rate_limited(Duration::from_secs(2)),
        );
    }

    let start = Instant::now();
    assert!(h.engine.save_records(vec![record(80)]).await);

    // 2s, then 2 × 2s, then 2 × 4s.
    assert_eq!(start.elapsed(), Duration::from_secs(14));
    assert_eq!(h.server.call_count(OperationKind::ModifyRecords), 4);
}

#[tokio::test(start_paused = true)]
async fn fetch_retries_on_rate_limit() {
    let h = Harness::new();
    h.server.inject_failure(
        OperationKind::FetchDatabaseChanges,
        RemoteError::new(RemoteErrorCode::ZoneBusy, "busy").with_retry_after(Duration::from_secs(5)),
    );

    let start = Instant::now();
    assert!(h.engine.fetch_changes().await);
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert_eq!(h.server.call_count(OperationKind::FetchDatabaseChanges), 2);
}

#[tokio::test(start_paused = true)]
async fn unrecoverable_fetch_error_reports_failure() {
    let h = Harness::new();
    h.server.set_reachable(false);
    assert!(!h.engine.fetch_changes().await);
    assert!(h.engine.snapshot().await.unwrap().database_token.is_none());
}

#[tokio::test(start_paused = true)]
async fn zone_fetch_recovers_from_expired_token() {
    let server = CloudServer::new(ServerConfig::new().with_page_size(3))
        .with_account(AccountId::new("alice"));
    let mut h = Harness::with_server(server);
    h.server.create_zone(&zone()).unwrap();
    let mut written = Vec::new();
    for value in 0..7 {
        written.push(h.server.save_remote_record(remote(value)).unwrap().id);
    }

    let mut model = BTreeMap::new();
    assert!(h.engine.fetch_changes().await);
    apply(&mut model, h.drain_events());
    assert_eq!(model.len(), 7);
    let first_token = h.engine.snapshot().await.unwrap().zone_tokens[&zone()].clone();

    h.server.delete_remote_record(&zone(), written[0]).unwrap();
    h.server.save_remote_record(remote(10)).unwrap();
    h.server.expire_zone_tokens(&zone()).unwrap();

    assert!(h.engine.fetch_changes().await);
    apply(&mut model, h.drain_events());

    let server_ids: BTreeSet<_> = h
        .server
        .records(&zone())
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(model.keys().copied().collect::<BTreeSet<_>>(), server_ids);
    let token = h.engine.snapshot().await.unwrap().zone_tokens[&zone()].clone();
    assert_ne!(token, first_token);
}

#[tokio::test(start_paused = true)]
async fn database_fetch_recovers_from_expired_token() {
    let mut h = Harness::new();
    h.server.create_zone(&zone()).unwrap();
    h.server.save_remote_record(remote(1)).unwrap();
    assert!(h.engine.fetch_changes().await);
    h.drain_events();

    h.server.save_remote_record(remote(2)).unwrap();
    h.server.expire_database_tokens().unwrap();
    h.server.clear_calls();

    assert!(h.engine.fetch_changes().await);
    assert_eq!(h.server.call_count(OperationKind::FetchDatabaseChanges), 2);
    let changed = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::RecordChanged(_)))
        .count();
    assert_eq!(changed, 1);
}

#[tokio::test(start_paused = true)]
async fn every_page_settles_and_stores_its_token() {
    let server = CloudServer::new(ServerConfig::new().with_page_size(2))
        .with_account(AccountId::new("alice"));
    let mut h = Harness::with_server(server);
    h.server.create_zone(&zone()).unwrap();
    for value in 0..5 {
        h.server.save_remote_record(remote(value)).unwrap();
    }

    assert!(h.engine.fetch_changes().await);
    let events = h.drain_events();
    let settled = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::ChangesSettled(z) if *z == zone()))
        .count();
    assert!(settled >= 3);
    let mut model = BTreeMap::new();
    apply(&mut model, events);
    assert_eq!(model.len(), 5);

    let staged = StagingStore::new(Arc::new(h.store.clone())).load_sync_state();
    assert!(staged.zone_tokens.contains_key(&zone()));
    assert!(staged.database_token.is_some());

    // Tokens were stored, so nothing comes back the second time.
    assert!(h.engine.fetch_changes().await);
    assert!(h
        .drain_events()
        .iter()
        .all(|e| !matches!(e, SyncEvent::RecordChanged(_))));
}

#[tokio::test(start_paused = true)]
async fn overlapping_fetches_coalesce() {
    let h = Harness::new();
    let first = h.engine.fetch_changes();
    let second = h.engine.fetch_changes();
    let third = h.engine.fetch_changes();
    assert!(first.await);
    assert!(second.await);
    assert!(third.await);
    assert_eq!(h.server.call_count(OperationKind::FetchDatabaseChanges), 2);
}

#[tokio::test(start_paused = true)]
async fn resaving_an_id_pushes_one_write() {
    let h = Harness::new();
    h.server.set_reachable(false);
    let first = record(70);
    let second = HeartRateRecord::with_id(first.id, 71, first.timestamp);

    assert!(!h.engine.save_records(vec![first.clone()]).await);
    assert!(!h.engine.save_records(vec![second.clone()]).await);
    let state = h.engine.snapshot().await.unwrap();
    assert_eq!(state.pending_saves.len(), 1);
    assert_eq!(state.pending_saves[&first.id], second);

    h.server.set_reachable(true);
    assert!(h.engine.drain_pending().await);

    let writes = h
        .server
        .calls()
        .modify_batches()
        .into_iter()
        .filter(|(saves, _)| saves.contains(&first.id))
        .count();
    assert_eq!(writes, 1);
    let stored = HeartRateRecord::from_remote(&h.server.record(&zone(), &first.id).unwrap());
    assert_eq!(stored, Some(second));
}

#[tokio::test(start_paused = true)]
async fn offline_save_survives_restart() {
    let mut h = Harness::new();
    h.server.set_reachable(false);
    let a = HeartRateRecord::new(72, OffsetDateTime::from_unix_timestamp(100).unwrap());

    assert!(!h.engine.save_records(vec![a.clone()]).await);
    assert!(h.engine.snapshot().await.unwrap().pending_saves.contains_key(&a.id));
    assert_eq!(h.server.call_count(OperationKind::ModifyRecords), 0);

    h.restart().await;
    let state = h.engine.snapshot().await.unwrap();
    assert_eq!(state.pending_saves.get(&a.id), Some(&a));

    h.server.set_reachable(true);
    assert!(h.engine.drain_pending().await);
    let batches = h.server.calls().modify_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, vec![a.id]);
    assert!(h.engine.snapshot().await.unwrap().pending_saves.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unauthenticated_push_discards_queues() {
    let h = Harness::new();
    assert!(h.engine.ensure_zone().await);
    h.server.sign_out();

    assert!(!h.engine.save_records(vec![record(60)]).await);
    let state = h.engine.snapshot().await.unwrap();
    assert!(!state.has_pending());

    // The cleared queues were persisted.
    let staged = StagingStore::new(Arc::new(h.store.clone())).load_sync_state();
    assert!(!staged.has_pending());
}

#[tokio::test(start_paused = true)]
async fn missing_zone_is_recreated_and_batch_retried() {
    let h = Harness::new();
    assert!(h.engine.ensure_zone().await);
    h.server.delete_zone(&zone()).unwrap();
    h.server.clear_calls();

    let a = record(75);
    assert!(h.engine.save_records(vec![a.clone()]).await);
    assert!(h.server.record(&zone(), &a.id).is_some());
    assert_eq!(h.server.call_count(OperationKind::SaveZone), 1);
    assert_eq!(h.server.call_count(OperationKind::ModifyRecords), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_zone_is_retried_only_once() {
    let h = Harness::new();
    assert!(h.engine.ensure_zone().await);
    let zone_gone = || {
        RemoteError::partial_failure().with_partial_zone(
            zone(),
            RemoteError::new(RemoteErrorCode::ZoneNotFound, "gone"),
        )
    };
    h.server
        .inject_failure(OperationKind::ModifyRecords, zone_gone());
    h.server
        .inject_failure(OperationKind::ModifyRecords, zone_gone());

    assert!(!h.engine.save_records(vec![record(76)]).await);
    assert_eq!(h.server.call_count(OperationKind::ModifyRecords), 2);
    assert_eq!(h.engine.snapshot().await.unwrap().pending_saves.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn conflicts_are_dropped_and_refetched() {
    let mut h = Harness::new();
    let a = record(60);
    assert!(h.engine.save_records(vec![a.clone()]).await);
    h.drain_events();

    let stale = HeartRateRecord::with_id(a.id, 99, a.timestamp);
    h.server.inject_record_failure(
        a.id,
        RemoteError::new(RemoteErrorCode::ServerRecordChanged, "changed"),
    );
    assert!(h.engine.save_records(vec![stale]).await);
    settle().await;

    let state = h.engine.snapshot().await.unwrap();
    assert!(state.pending_saves.is_empty());
    let events = h.drain_events();
    assert!(events.contains(&SyncEvent::ConflictsDropped(vec![a.id])));
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::RecordChanged(r) if r.id == a.id)));
    let stored = HeartRateRecord::from_remote(&h.server.record(&zone(), &a.id).unwrap());
    assert_eq!(stored, Some(a));
}

#[tokio::test(start_paused = true)]
async fn start_sync_provisions_subscribes_and_drains() {
    let h = Harness::new();
    h.server.set_reachable(false);
    let a = record(65);
    assert!(!h.engine.save_records(vec![a.clone()]).await);

    h.server.set_reachable(true);
    h.server.clear_calls();
    h.engine.start_sync();
    settle().await;

    assert!(h.server.zone_exists(&zone()));
    assert_eq!(h.server.subscriptions().len(), 1);
    assert!(h.server.subscriptions()[0].content_available);
    assert!(h.server.record(&zone(), &a.id).is_some());
    let state = h.engine.snapshot().await.unwrap();
    assert!(state.subscription_registered);
    assert!(state.database_token.is_some());
    assert!(!state.has_pending());

    // A second start does not subscribe or provision again.
    h.server.clear_calls();
    h.engine.start_sync();
    settle().await;
    assert_eq!(h.server.call_count(OperationKind::SaveSubscription), 0);
    assert_eq!(h.server.call_count(OperationKind::FetchZones), 0);
}

#[tokio::test(start_paused = true)]
async fn account_change_resets_and_resyncs_once() {
    let mut h = Harness::new();
    h.server.create_zone(&zone()).unwrap();
    h.server.save_remote_record(remote(1)).unwrap();
    h.engine.start_sync();
    settle().await;
    h.server.set_reachable(false);
    assert!(!h.engine.save_records(vec![record(90)]).await);
    assert!(!h.engine.delete_records(vec![RecordId::new()]).await);

    let before = h.engine.snapshot().await.unwrap();
    assert!(before.subscription_registered);
    assert!(before.database_token.is_some());
    assert!(!before.zone_tokens.is_empty());
    assert!(before.has_pending());
    h.drain_events();

    h.server.clear_calls();
    let bob = AccountId::new("bob");
    h.engine.account_changed(bob.clone());
    settle().await;

    let state = h.engine.snapshot().await.unwrap();
    assert_eq!(state.account, Some(bob.clone()));
    assert!(state.database_token.is_none());
    assert!(state.zone_tokens.is_empty());
    assert!(!state.subscription_registered);
    assert!(state.saved_zones.is_empty());
    assert!(!state.has_pending());

    let staged = StagingStore::new(Arc::new(h.store.clone())).load_sync_state();
    assert_eq!(staged, state);

    assert_eq!(h.drain_events(), vec![SyncEvent::AccountChanged(bob)]);
    assert_eq!(h.server.call_count(OperationKind::FetchZones), 1);
    assert_eq!(h.server.call_count(OperationKind::SaveSubscription), 1);
    assert_eq!(h.server.call_count(OperationKind::FetchDatabaseChanges), 1);
    assert_eq!(h.server.call_count(OperationKind::ModifyRecords), 0);
}

/// How long [`Lagging`] holds back a result.
const LAG: Duration = Duration::from_secs(5);

/// Forwards every call to the server right away but holds back the result
/// of selected operations, like a slow network.
#[derive(Clone)]
struct Lagging {
    server: CloudServer,
    held: Arc<Mutex<Vec<OperationKind>>>,
}

impl Lagging {
    fn new(server: CloudServer) -> Self {
        Self {
            server,
            held: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn hold(&self, kinds: &[OperationKind]) {
        *self.held.lock() = kinds.to_vec();
    }

    async fn deliver<T>(&self, kind: OperationKind, result: T) -> T {
        let held = self.held.lock().contains(&kind);
        if held {
            tokio::time::sleep(LAG).await;
        }
        result
    }
}

#[async_trait]
impl RemoteDatabase for Lagging {
    async fn fetch_user_identity(&self) -> Result<AccountId, RemoteError> {
        let result = self.server.fetch_user_identity().await;
        self.deliver(OperationKind::FetchUserIdentity, result).await
    }

    async fn fetch_zones(
        &self,
        zones: &[ZoneId],
        options: &OperationOptions,
    ) -> Result<Vec<ZoneId>, RemoteError> {
        let result = self.server.fetch_zones(zones, options).await;
        self.deliver(OperationKind::FetchZones, result).await
    }

    async fn save_zone(
        &self,
        zone: &ZoneId,
        options: &OperationOptions,
    ) -> Result<(), RemoteError> {
        let result = self.server.save_zone(zone, options).await;
        self.deliver(OperationKind::SaveZone, result).await
    }

    async fn save_subscription(
        &self,
        subscription: &Subscription,
        options: &OperationOptions,
    ) -> Result<(), RemoteError> {
        let result = self.server.save_subscription(subscription, options).await;
        self.deliver(OperationKind::SaveSubscription, result).await
    }

    async fn fetch_database_changes(
        &self,
        token: Option<&ChangeToken>,
        options: &OperationOptions,
    ) -> Result<DatabaseChanges, RemoteError> {
        let result = self.server.fetch_database_changes(token, options).await;
        self.deliver(OperationKind::FetchDatabaseChanges, result).await
    }

    async fn fetch_zone_changes(
        &self,
        fetches: &[ZoneFetch],
        options: &OperationOptions,
    ) -> Result<Vec<ZoneChanges>, RemoteError> {
        let result = self.server.fetch_zone_changes(fetches, options).await;
        self.deliver(OperationKind::FetchZoneChanges, result).await
    }

    async fn modify_records(&self, request: ModifyRecords) -> ModifyRecordsResult {
        let result = self.server.modify_records(request).await;
        self.deliver(OperationKind::ModifyRecords, result).await
    }
}

fn spawn_lagging(lagging: &Lagging) -> (SyncEngine, UnboundedReceiver<SyncEvent>) {
    SyncEngine::spawn(
        SyncConfig::default(),
        StagingStore::new(Arc::new(InMemoryStore::new())),
        Arc::new(lagging.clone()),
    )
}

fn collect(events: &mut UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Asserts that the server accepts every stored token for the account
/// currently signed in.
async fn assert_tokens_accepted(server: &CloudServer, state: &SyncState) {
    let options = OperationOptions::default();
    if let Some(token) = &state.database_token {
        assert!(server
            .fetch_database_changes(Some(token), &options)
            .await
            .is_ok());
    }
    for (zone, token) in &state.zone_tokens {
        let fetch = ZoneFetch {
            zone: zone.clone(),
            token: Some(token.clone()),
        };
        let results = server.fetch_zone_changes(&[fetch], &options).await.unwrap();
        assert!(results.iter().all(|changes| changes.outcome.is_ok()));
    }
}

#[tokio::test(start_paused = true)]
async fn account_change_during_push_reuploads_to_new_account() {
    let server = CloudServer::new(ServerConfig::new()).with_account(AccountId::new("alice"));
    server.create_zone(&zone()).unwrap();
    let alice_only = remote(1);
    server.save_remote_record(alice_only.clone()).unwrap();
    let lagging = Lagging::new(server.clone());
    let (engine, mut events) = spawn_lagging(&lagging);
    assert!(engine.ensure_zone().await);

    lagging.hold(&[OperationKind::ModifyRecords, OperationKind::FetchZoneChanges]);
    let r = record(80);
    let first_push = engine.save_records(vec![r.clone()]);
    let first_fetch = engine.fetch_changes();
    settle().await;
    // Both calls reached alice's database; their results are still on the way.
    assert!(server.record(&zone(), &r.id).is_some());
    assert_eq!(server.call_count(OperationKind::FetchZoneChanges), 1);
    lagging.hold(&[]);

    let bob = AccountId::new("bob");
    server.sign_in(bob.clone());
    engine.account_changed(bob.clone());
    let reupload = engine.save_records(vec![r.clone()]);

    assert!(!first_fetch.await);
    assert!(!first_push.await);
    assert!(reupload.await);
    tokio::time::sleep(LAG * 2).await;

    assert!(server.record(&zone(), &r.id).is_some());
    let state = engine.snapshot().await.unwrap();
    assert_eq!(state.account, Some(bob.clone()));
    assert!(!state.has_pending());
    assert!(state.saved_zones.contains(&zone()));
    assert_tokens_accepted(&server, &state).await;

    let events = collect(&mut events);
    assert!(events.contains(&SyncEvent::AccountChanged(bob)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SyncEvent::RecordChanged(rec) if rec.id == alice_only.id)));
}

#[tokio::test(start_paused = true)]
async fn account_change_during_fetch_keeps_new_account_tokens() {
    let server = CloudServer::new(ServerConfig::new()).with_account(AccountId::new("alice"));
    server.create_zone(&zone()).unwrap();
    let alice_only = remote(1);
    server.save_remote_record(alice_only.clone()).unwrap();
    let lagging = Lagging::new(server.clone());
    let (engine, mut events) = spawn_lagging(&lagging);

    lagging.hold(&[OperationKind::FetchDatabaseChanges, OperationKind::FetchZones]);
    let fetch = engine.fetch_changes();
    let provisioned = engine.ensure_zone();
    settle().await;
    lagging.hold(&[]);

    let bob = AccountId::new("bob");
    server.sign_in(bob.clone());
    engine.account_changed(bob.clone());

    assert!(!fetch.await);
    assert!(!provisioned.await);
    tokio::time::sleep(LAG * 2).await;

    let state = engine.snapshot().await.unwrap();
    assert_eq!(state.account, Some(bob));
    assert!(state.database_token.is_some());
    assert_tokens_accepted(&server, &state).await;
    // Bob's zone was provisioned by the new account's run, not the old one.
    assert_eq!(server.call_count(OperationKind::SaveZone), 1);

    assert!(!collect(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::RecordChanged(rec) if rec.id == alice_only.id)));
}

#[tokio::test(start_paused = true)]
async fn identity_change_triggers_account_change() {
    let mut h = Harness::new();
    h.engine.refresh_account();
    settle().await;
    assert_eq!(
        h.engine.snapshot().await.unwrap().account,
        Some(AccountId::new("alice"))
    );
    assert!(h.drain_events().is_empty());

    h.server.sign_in(AccountId::new("bob"));
    h.engine.refresh_account();
    settle().await;
    assert_eq!(
        h.drain_events().first(),
        Some(&SyncEvent::AccountChanged(AccountId::new("bob")))
    );
}

#[tokio::test(start_paused = true)]
async fn background_fetch_reports_new_data() {
    let h = Harness::new();
    let start = Instant::now();
    let result = background_fetch(&h.engine, &BackgroundFetchConfig::default()).await;
    assert_eq!(result, FetchResult::NewData);
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn background_fetch_times_out() {
    let h = Harness::new();
    h.server.inject_failure(
        OperationKind::FetchDatabaseChanges,
        RemoteError::rate_limited(Duration::from_secs(30)),
    );
    let start = Instant::now();
    let result = background_fetch(&h.engine, &BackgroundFetchConfig::default()).await;
    assert_eq!(result, FetchResult::NoData);
    assert_eq!(start.elapsed(), Duration::from_secs(25));
}

#[tokio::test(start_paused = true)]
async fn shutdown_persists_and_stops() {
    let h = Harness::new();
    h.server.set_reachable(false);
    assert!(!h.engine.save_records(vec![record(50)]).await);
    h.engine.shutdown().await;

    assert!(h.engine.is_stopped());
    assert!(!h.engine.drain_pending().await);
    assert!(h.engine.snapshot().await.is_err());
    let staged = StagingStore::new(Arc::new(h.store.clone())).load_sync_state();
    assert_eq!(staged.pending_saves.len(), 1);
}
