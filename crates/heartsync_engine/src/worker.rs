//! The engine worker: the single owner of sync state.

use crate::backoff::next_delay;
use crate::completion::{complete_all, Completion, Signal};
use crate::config::SyncConfig;
use crate::engine::Job;
use crate::error::SyncResult;
use crate::events::SyncEvent;
use crate::staging::{StagingStore, SyncState};
use crate::steps::{ModifyBatch, Outcome, Step};
use heartsync_protocol::{
    AccountId, DatabaseChanges, HeartRateRecord, ModifyRecords, ModifyRecordsResult, RecordId,
    RemoteDatabase, RemoteError, RemoteErrorCode, RemoteRecord, ZoneChanges, ZoneChangesPage,
    ZoneFetch, ZoneId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::mem;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// What to do once zone provisioning resolves.
#[derive(Debug)]
enum ZoneWaiter {
    Reply(Completion),
    /// Push a batch that was waiting for the zone.
    Push(ModifyBatch),
    /// Drain the pending queues.
    ThenDrain,
}

/// A coarse fetch run. It completes once every database page has been
/// processed and every zone fetch it started has settled.
#[derive(Debug, Default)]
struct CoarseRun {
    running: bool,
    pages_done: bool,
    outstanding_zones: usize,
    failed: bool,
    waiters: Vec<Completion>,
    rerun: Option<Vec<Completion>>,
}

#[derive(Debug, Default)]
struct ZoneRun {
    waiters: Vec<Completion>,
    rerun: Option<Vec<Completion>>,
}

#[derive(Debug, Default)]
struct PushRun {
    running: bool,
    waiters: Vec<Completion>,
    rerun: Option<Vec<Completion>>,
}

pub(crate) struct SyncWorker {
    config: SyncConfig,
    staging: StagingStore,
    remote: Arc<dyn RemoteDatabase>,
    state: SyncState,
    jobs: mpsc::WeakUnboundedSender<Job>,
    events: mpsc::UnboundedSender<SyncEvent>,
    provisioning: Option<Vec<ZoneWaiter>>,
    subscribing: bool,
    identity_pending: bool,
    coarse: CoarseRun,
    fine: BTreeMap<ZoneId, ZoneRun>,
    push: PushRun,
    /// Bumped on every account change. Steps and outcomes from an older
    /// epoch never touch the state.
    epoch: u64,
}

impl SyncWorker {
    pub fn new(
        config: SyncConfig,
        staging: StagingStore,
        remote: Arc<dyn RemoteDatabase>,
        state: SyncState,
        jobs: mpsc::WeakUnboundedSender<Job>,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            config,
            staging,
            remote,
            state,
            jobs,
            events,
            provisioning: None,
            subscribing: false,
            identity_pending: false,
            coarse: CoarseRun::default(),
            fine: BTreeMap::new(),
            push: PushRun::default(),
            epoch: 0,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = rx.recv().await {
            if self.handle(job).is_break() {
                break;
            }
        }
        tracing::info!("sync engine stopped");
    }

    fn handle(&mut self, job: Job) -> ControlFlow<()> {
        match job {
            Job::StartSync => self.start_sync(),
            Job::SaveRecords {
                records,
                completion,
            } => {
                tracing::debug!(count = records.len(), "staging saves");
                self.state.stage_saves(records);
                self.persist_queues();
                self.drain(completion);
            }
            Job::DeleteRecords { ids, completion } => {
                tracing::debug!(count = ids.len(), "staging deletes");
                self.state.stage_deletes(ids);
                self.persist_queues();
                self.drain(completion);
            }
            Job::DrainPending(completion) => self.drain(completion),
            Job::FetchChanges(completion) => self.fetch_changes(completion),
            Job::EnsureZone(completion) => self.provision(ZoneWaiter::Reply(completion), false),
            Job::RefreshAccount => self.refresh_account(),
            Job::AccountChanged(account) => self.account_changed(account),
            Job::PersistRecords(records) => {
                log_write("records", self.staging.save_records(&records));
            }
            Job::PersistNow => self.persist_all(),
            Job::Snapshot(reply) => {
                let _ = reply.send(self.state.clone());
            }
            Job::Run { epoch, step } if epoch == self.epoch => self.dispatch(step),
            Job::Run { step, .. } => {
                tracing::debug!(step = step.name(), "dropping step from previous account");
                if let Step::Modify(batch) = step {
                    batch.completion.complete(false);
                }
            }
            Job::Completed { epoch, outcome } if epoch == self.epoch => self.on_outcome(outcome),
            Job::Completed { outcome, .. } => {
                tracing::debug!(step = outcome.name(), "dropping result from previous account");
                if let Outcome::Modified { batch, .. } = outcome {
                    batch.completion.complete(false);
                }
            }
            Job::Signal(Signal::PushSettled, ok) => self.push_settled(ok),
            Job::Signal(Signal::ZoneFetched(epoch), ok) if epoch == self.epoch => {
                self.coarse_zone_settled(ok)
            }
            Job::Signal(Signal::ZoneFetched(_), _) => {}
            Job::Shutdown(done) => {
                self.persist_all();
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    // Persistence

    fn persist_queues(&self) {
        log_write("pending queues", self.staging.save_queues(&self.state));
    }

    fn persist_all(&self) {
        log_write("sync state", self.staging.save_sync_state(&self.state));
    }

    fn emit(&self, event: SyncEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    // Dispatch

    fn dispatch(&mut self, step: Step) {
        let Some(jobs) = self.jobs.upgrade() else {
            tracing::debug!(step = step.name(), "engine closing, dropping step");
            return;
        };
        tracing::debug!(step = step.name(), "dispatching");
        let remote = Arc::clone(&self.remote);
        let options = self.config.options;
        let zone = self.config.zone.clone();
        let epoch = self.epoch;

        match step {
            Step::FetchZone { previous } => spawn_call(jobs, epoch, async move {
                let result = remote.fetch_zones(std::slice::from_ref(&zone), &options).await;
                Outcome::ZoneFetched { previous, result }
            }),
            Step::CreateZone { previous } => spawn_call(jobs, epoch, async move {
                let result = remote.save_zone(&zone, &options).await;
                Outcome::ZoneCreated { previous, result }
            }),
            Step::Subscribe { previous } => {
                let subscription = self.config.subscription.clone();
                spawn_call(jobs, epoch, async move {
                    let result = remote.save_subscription(&subscription, &options).await;
                    Outcome::Subscribed { previous, result }
                })
            }
            Step::FetchDatabaseChanges { previous } => {
                let token = self.state.database_token.clone();
                spawn_call(jobs, epoch, async move {
                    let result = remote.fetch_database_changes(token.as_ref(), &options).await;
                    Outcome::DatabaseChanges { previous, result }
                })
            }
            Step::FetchZoneChanges { zones, previous } => {
                let fetches: Vec<ZoneFetch> = zones
                    .iter()
                    .map(|zone| ZoneFetch {
                        zone: zone.clone(),
                        token: self.state.zone_tokens.get(zone).cloned(),
                    })
                    .collect();
                spawn_call(jobs, epoch, async move {
                    let result = remote.fetch_zone_changes(&fetches, &options).await;
                    Outcome::ZoneChanges {
                        zones,
                        previous,
                        result,
                    }
                })
            }
            Step::Modify(batch) => {
                let mut request = ModifyRecords::new(
                    zone.clone(),
                    batch.saves.iter().map(|r| r.to_remote(&zone)).collect(),
                    batch.deletes.clone(),
                );
                request.policy = self.config.save_policy;
                request.options = options;
                tracing::debug!(
                    saves = batch.saves.len(),
                    deletes = batch.deletes.len(),
                    "pushing batch"
                );
                spawn_call(jobs, epoch, async move {
                    let result = remote.modify_records(request).await;
                    Outcome::Modified { batch, result }
                })
            }
            Step::FetchIdentity => spawn_call(jobs, epoch, async move {
                Outcome::Identity(remote.fetch_user_identity().await)
            }),
        }
    }

    /// Re-dispatches a step after `next_delay(hint, previous)`.
    fn retry_later(
        &self,
        error: &RemoteError,
        hint: Duration,
        previous: Duration,
        step: impl FnOnce(Duration) -> Step,
    ) {
        let delay = next_delay(hint, previous);
        let step = step(delay);
        tracing::warn!(
            step = step.name(),
            code = %error.code,
            retry_after = ?delay,
            "retrying after delay"
        );
        let jobs = self.jobs.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(jobs) = jobs.upgrade() {
                let _ = jobs.send(Job::Run { epoch, step });
            }
        });
    }

    fn on_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::ZoneFetched { previous, result } => self.on_zone_fetched(previous, result),
            Outcome::ZoneCreated { previous, result } => self.on_zone_created(previous, result),
            Outcome::Subscribed { previous, result } => self.on_subscribed(previous, result),
            Outcome::DatabaseChanges { previous, result } => {
                self.on_database_changes(previous, result)
            }
            Outcome::ZoneChanges {
                zones,
                previous,
                result,
            } => self.on_zone_changes(zones, previous, result),
            Outcome::Modified { batch, result } => self.on_modified(batch, result),
            Outcome::Identity(result) => self.on_identity(result),
        }
    }

    // Sync entry points

    fn start_sync(&mut self) {
        tracing::info!(zone = %self.config.zone, "starting sync");
        self.subscribe();
        self.provision(ZoneWaiter::ThenDrain, false);
        self.fetch_changes(Completion::Detached);
    }

    // Zone provisioning

    /// Resolves `waiter` once the zone is known to exist.
    ///
    /// With `known_missing` the existence check is skipped and the zone is
    /// created directly.
    fn provision(&mut self, waiter: ZoneWaiter, known_missing: bool) {
        if !known_missing && self.state.saved_zones.contains(&self.config.zone) {
            self.resolve_waiter(waiter, true);
            return;
        }
        if let Some(waiters) = &mut self.provisioning {
            waiters.push(waiter);
            return;
        }
        self.provisioning = Some(vec![waiter]);
        let previous = Duration::ZERO;
        self.dispatch(if known_missing {
            Step::CreateZone { previous }
        } else {
            Step::FetchZone { previous }
        });
    }

    fn resolve_waiter(&mut self, waiter: ZoneWaiter, ok: bool) {
        match waiter {
            ZoneWaiter::Reply(completion) => completion.complete(ok),
            ZoneWaiter::Push(batch) if ok => self.push_batch(batch),
            ZoneWaiter::Push(batch) => batch.completion.complete(false),
            ZoneWaiter::ThenDrain if ok => self.drain(Completion::Detached),
            ZoneWaiter::ThenDrain => {}
        }
    }

    fn finish_provisioning(&mut self, ok: bool) {
        if ok {
            tracing::info!(zone = %self.config.zone, "zone ready");
            self.state.saved_zones.insert(self.config.zone.clone());
            log_write("saved zones", self.staging.save_zones(&self.state));
        }
        for waiter in self.provisioning.take().unwrap_or_default() {
            self.resolve_waiter(waiter, ok);
        }
    }

    fn on_zone_fetched(&mut self, previous: Duration, result: Result<Vec<ZoneId>, RemoteError>) {
        match result {
            Ok(zones) if zones.contains(&self.config.zone) => self.finish_provisioning(true),
            Ok(_) => self.dispatch(Step::CreateZone {
                previous: Duration::ZERO,
            }),
            Err(e) if e.zone_not_found() => {
                tracing::debug!(zone = %self.config.zone, "zone missing, creating");
                self.dispatch(Step::CreateZone {
                    previous: Duration::ZERO,
                });
            }
            Err(e) => match e.retry_after {
                Some(hint) => self.retry_later(&e, hint, previous, |previous| Step::FetchZone {
                    previous,
                }),
                None => {
                    tracing::error!(zone = %self.config.zone, error = %e, "zone check failed");
                    self.finish_provisioning(false);
                }
            },
        }
    }

    fn on_zone_created(&mut self, previous: Duration, result: Result<(), RemoteError>) {
        match result {
            Ok(()) => self.finish_provisioning(true),
            Err(e) => match e.retry_after {
                Some(hint) => self.retry_later(&e, hint, previous, |previous| Step::CreateZone {
                    previous,
                }),
                None => {
                    tracing::error!(zone = %self.config.zone, error = %e, "zone creation failed");
                    self.finish_provisioning(false);
                }
            },
        }
    }

    // Subscription

    fn subscribe(&mut self) {
        if self.state.subscription_registered || self.subscribing {
            return;
        }
        self.subscribing = true;
        self.dispatch(Step::Subscribe {
            previous: Duration::ZERO,
        });
    }

    fn on_subscribed(&mut self, previous: Duration, result: Result<(), RemoteError>) {
        match result {
            Ok(()) => {
                tracing::info!(id = %self.config.subscription.id, "subscription registered");
                self.subscribing = false;
                self.state.subscription_registered = true;
                log_write(
                    "subscription flag",
                    self.staging.save_subscription_flag(&self.state),
                );
            }
            Err(e) => match e.retry_after {
                Some(hint) => self.retry_later(&e, hint, previous, |previous| Step::Subscribe {
                    previous,
                }),
                None => {
                    tracing::error!(error = %e, "subscription failed");
                    self.subscribing = false;
                }
            },
        }
    }

    // Coarse fetch

    fn fetch_changes(&mut self, completion: Completion) {
        if self.coarse.running {
            tracing::debug!("fetch already running, coalescing");
            self.coarse.rerun.get_or_insert_with(Vec::new).push(completion);
            return;
        }
        self.start_coarse(vec![completion]);
    }

    fn start_coarse(&mut self, waiters: Vec<Completion>) {
        self.coarse = CoarseRun {
            running: true,
            waiters,
            ..CoarseRun::default()
        };
        self.dispatch(Step::FetchDatabaseChanges {
            previous: Duration::ZERO,
        });
    }

    fn on_database_changes(
        &mut self,
        previous: Duration,
        result: Result<DatabaseChanges, RemoteError>,
    ) {
        let changes = match result {
            Ok(changes) => changes,
            Err(e) if e.is_token_expired() => {
                tracing::warn!("database token expired, refetching from scratch");
                self.state.database_token = None;
                log_write("database token", self.staging.save_database_token(&self.state));
                self.dispatch(Step::FetchDatabaseChanges {
                    previous: Duration::ZERO,
                });
                return;
            }
            Err(e) => {
                match e.retry_after {
                    Some(hint) => self.retry_later(&e, hint, previous, |previous| {
                        Step::FetchDatabaseChanges { previous }
                    }),
                    None => {
                        tracing::error!(error = %e, "database change fetch failed");
                        self.coarse.failed = true;
                        self.coarse.pages_done = true;
                        self.maybe_finish_coarse();
                    }
                }
                return;
            }
        };

        tracing::debug!(
            changed = changes.changed_zones.len(),
            deleted = changes.deleted_zones.len(),
            more_coming = changes.more_coming,
            "database changes"
        );
        self.state.database_token = Some(changes.token);
        log_write("database token", self.staging.save_database_token(&self.state));

        if !changes.deleted_zones.is_empty() {
            for zone in &changes.deleted_zones {
                tracing::info!(zone = %zone, "zone deleted remotely");
                self.state.zone_tokens.remove(zone);
                self.state.saved_zones.remove(zone);
            }
            log_write("zone tokens", self.staging.save_zone_tokens(&self.state));
            log_write("saved zones", self.staging.save_zones(&self.state));
        }

        if !changes.changed_zones.is_empty() {
            self.coarse.outstanding_zones += 1;
            let completion = Completion::Signal(self.jobs.clone(), Signal::ZoneFetched(self.epoch));
            self.fetch_zone_changes(changes.changed_zones, completion);
        }

        if changes.more_coming {
            self.dispatch(Step::FetchDatabaseChanges {
                previous: Duration::ZERO,
            });
        } else {
            self.coarse.pages_done = true;
            self.maybe_finish_coarse();
        }
    }

    fn coarse_zone_settled(&mut self, ok: bool) {
        self.coarse.outstanding_zones = self.coarse.outstanding_zones.saturating_sub(1);
        self.coarse.failed |= !ok;
        self.maybe_finish_coarse();
    }

    fn maybe_finish_coarse(&mut self) {
        let run = &self.coarse;
        if !run.running || !run.pages_done || run.outstanding_zones > 0 {
            return;
        }
        let run = mem::take(&mut self.coarse);
        tracing::debug!(ok = !run.failed, "fetch finished");
        complete_all(run.waiters, !run.failed);
        if let Some(waiters) = run.rerun {
            self.start_coarse(waiters);
        }
    }

    // Fine fetch

    /// Fetches record changes for `zones`. `completion` resolves once every
    /// zone has settled.
    fn fetch_zone_changes(&mut self, zones: Vec<ZoneId>, completion: Completion) {
        let zones: Vec<ZoneId> = zones
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let completions = completion.fan_out(zones.len());

        let mut start = Vec::new();
        for (zone, completion) in zones.into_iter().zip(completions) {
            match self.fine.get_mut(&zone) {
                Some(run) => run.rerun.get_or_insert_with(Vec::new).push(completion),
                None => {
                    self.fine.insert(
                        zone.clone(),
                        ZoneRun {
                            waiters: vec![completion],
                            rerun: None,
                        },
                    );
                    start.push(zone);
                }
            }
        }
        if !start.is_empty() {
            self.dispatch(Step::FetchZoneChanges {
                zones: start,
                previous: Duration::ZERO,
            });
        }
    }

    fn finish_zone(&mut self, zone: &ZoneId, ok: bool) {
        let Some(run) = self.fine.remove(zone) else {
            return;
        };
        complete_all(run.waiters, ok);
        if let Some(waiters) = run.rerun {
            self.fine.insert(
                zone.clone(),
                ZoneRun {
                    waiters,
                    rerun: None,
                },
            );
            self.dispatch(Step::FetchZoneChanges {
                zones: vec![zone.clone()],
                previous: Duration::ZERO,
            });
        }
    }

    fn clear_zone_tokens(&mut self, zones: &[ZoneId]) {
        for zone in zones {
            tracing::warn!(zone = %zone, "zone token expired, refetching from scratch");
            self.state.zone_tokens.remove(zone);
        }
        log_write("zone tokens", self.staging.save_zone_tokens(&self.state));
    }

    /// Applies one page and returns true if more pages follow.
    fn apply_page(&mut self, zone: &ZoneId, page: ZoneChangesPage) -> bool {
        tracing::debug!(
            zone = %zone,
            changed = page.changed.len(),
            deleted = page.deleted.len(),
            more_coming = page.more_coming,
            "zone changes"
        );
        for record in page.changed {
            self.emit(SyncEvent::RecordChanged(record));
        }
        for id in page.deleted {
            self.emit(SyncEvent::RecordDeleted(id));
        }
        self.state.zone_tokens.insert(zone.clone(), page.token);
        log_write("zone tokens", self.staging.save_zone_tokens(&self.state));
        self.emit(SyncEvent::ChangesSettled(zone.clone()));
        page.more_coming
    }

    fn retry_zones_or_fail(&mut self, zones: Vec<ZoneId>, error: &RemoteError, previous: Duration) {
        if zones.is_empty() {
            return;
        }
        match error.retry_after {
            Some(hint) => self.retry_later(error, hint, previous, |previous| {
                Step::FetchZoneChanges { zones, previous }
            }),
            None => {
                tracing::error!(error = %error, "zone change fetch failed");
                for zone in &zones {
                    self.finish_zone(zone, false);
                }
            }
        }
    }

    fn on_zone_changes(
        &mut self,
        zones: Vec<ZoneId>,
        previous: Duration,
        result: Result<Vec<ZoneChanges>, RemoteError>,
    ) {
        let results = match result {
            Ok(results) => results,
            Err(e) if e.is_token_expired() => {
                self.clear_zone_tokens(&zones);
                self.dispatch(Step::FetchZoneChanges {
                    zones,
                    previous: Duration::ZERO,
                });
                return;
            }
            Err(e) => {
                let expired: Vec<ZoneId> = e
                    .expired_zones()
                    .into_iter()
                    .filter(|zone| zones.contains(zone))
                    .collect();
                let rest: Vec<ZoneId> = zones
                    .into_iter()
                    .filter(|zone| !expired.contains(zone))
                    .collect();
                if !expired.is_empty() {
                    self.clear_zone_tokens(&expired);
                    self.dispatch(Step::FetchZoneChanges {
                        zones: expired,
                        previous: Duration::ZERO,
                    });
                }
                self.retry_zones_or_fail(rest, &e, previous);
                return;
            }
        };

        let mut unanswered: BTreeSet<ZoneId> = zones.into_iter().collect();
        let mut next = Vec::new();
        for changes in results {
            if !unanswered.remove(&changes.zone) {
                continue;
            }
            let zone = changes.zone;
            match changes.outcome {
                Ok(page) => {
                    if self.apply_page(&zone, page) {
                        next.push(zone);
                    } else {
                        self.finish_zone(&zone, true);
                    }
                }
                Err(e) if e.is_token_expired() => {
                    self.clear_zone_tokens(std::slice::from_ref(&zone));
                    next.push(zone);
                }
                Err(e) => self.retry_zones_or_fail(vec![zone], &e, previous),
            }
        }
        for zone in unanswered {
            tracing::warn!(zone = %zone, "no changes returned for zone");
            self.finish_zone(&zone, false);
        }
        if !next.is_empty() {
            self.dispatch(Step::FetchZoneChanges {
                zones: next,
                previous: Duration::ZERO,
            });
        }
    }

    // Push

    fn drain(&mut self, completion: Completion) {
        if self.push.running {
            self.push.rerun.get_or_insert_with(Vec::new).push(completion);
            return;
        }
        self.start_push(vec![completion]);
    }

    fn start_push(&mut self, waiters: Vec<Completion>) {
        self.push = PushRun {
            running: true,
            waiters,
            rerun: None,
        };
        let batch = ModifyBatch::new(
            self.state.saves_to_push(),
            self.state.pending_deletes.iter().copied().collect(),
            Completion::Signal(self.jobs.clone(), Signal::PushSettled),
        );
        self.push_batch(batch);
    }

    fn push_settled(&mut self, ok: bool) {
        let run = mem::take(&mut self.push);
        complete_all(run.waiters, ok);
        if let Some(waiters) = run.rerun {
            self.start_push(waiters);
        }
    }

    fn push_batch(&mut self, batch: ModifyBatch) {
        if batch.is_empty() {
            batch.completion.complete(true);
            return;
        }
        if batch.len() > self.config.operation_limit {
            tracing::debug!(
                count = batch.len(),
                limit = self.config.operation_limit,
                "splitting batch"
            );
            let (first, second) = batch.split();
            self.push_batch(first);
            self.push_batch(second);
            return;
        }
        if !self.state.saved_zones.contains(&self.config.zone) {
            self.provision(ZoneWaiter::Push(batch), false);
            return;
        }
        self.dispatch(Step::Modify(batch));
    }

    /// Drops every acknowledged item from the pending queues.
    fn acknowledge(&mut self, batch: &ModifyBatch, saved: &[RemoteRecord], deleted: &[RecordId]) {
        let pushed: BTreeMap<RecordId, &HeartRateRecord> =
            batch.saves.iter().map(|r| (r.id, r)).collect();
        let saves = saved
            .iter()
            .filter_map(|r| pushed.get(&r.id))
            .filter(|r| self.state.acknowledge_save(r))
            .count();
        let deletes = deleted
            .iter()
            .filter(|id| batch.deletes.contains(id))
            .filter(|id| self.state.acknowledge_delete(id))
            .count();
        if saves + deletes > 0 {
            tracing::info!(saves, deletes, "acknowledged");
            self.persist_queues();
        }
    }

    fn on_modified(&mut self, mut batch: ModifyBatch, result: ModifyRecordsResult) {
        let ModifyRecordsResult {
            saved,
            deleted,
            error,
        } = result;
        let Some(error) = error else {
            self.acknowledge(&batch, &saved, &deleted);
            batch.completion.complete(true);
            return;
        };

        if error.code == RemoteErrorCode::NotAuthenticated {
            tracing::warn!(
                saves = self.state.pending_saves.len(),
                deletes = self.state.pending_deletes.len(),
                "not authenticated, discarding pending operations"
            );
            self.state.pending_saves.clear();
            self.state.pending_deletes.clear();
            self.persist_queues();
            batch.completion.complete(false);
            return;
        }

        if error.zone_not_found() {
            self.acknowledge(&batch, &saved, &deleted);
            self.state.saved_zones.remove(&self.config.zone);
            log_write("saved zones", self.staging.save_zones(&self.state));
            if batch.zone_retry_used {
                tracing::error!(zone = %self.config.zone, "zone still missing after retry");
                batch.completion.complete(false);
                return;
            }
            tracing::warn!(zone = %self.config.zone, "zone missing, recreating before retry");
            batch.zone_retry_used = true;
            batch.previous = Duration::ZERO;
            self.provision(ZoneWaiter::Push(batch), true);
            return;
        }

        if error.code == RemoteErrorCode::LimitExceeded {
            if batch.len() > 1 {
                let (first, second) = batch.split();
                self.push_batch(first);
                self.push_batch(second);
            } else {
                tracing::error!(error = %error, "single operation exceeds the limit");
                batch.completion.complete(false);
            }
            return;
        }

        if let Some(hint) = error.retry_after {
            let previous = batch.previous;
            self.retry_later(&error, hint, previous, move |previous| {
                batch.previous = previous;
                Step::Modify(batch)
            });
            return;
        }

        self.acknowledge(&batch, &saved, &deleted);
        if error.code == RemoteErrorCode::PartialFailure {
            self.drop_conflicts(&batch, &error);
            batch.completion.complete(true);
            return;
        }

        tracing::error!(error = %error, "push failed");
        batch.completion.complete(false);
    }

    /// Drops saves the server rejected as conflicts, then refetches the zone
    /// so the server's version replaces the local one.
    fn drop_conflicts(&mut self, batch: &ModifyBatch, error: &RemoteError) {
        let conflicted = error.conflicted_records();
        let dropped: Vec<RecordId> = batch
            .saves
            .iter()
            .filter(|r| conflicted.contains(&r.id))
            .filter(|r| self.state.acknowledge_save(r))
            .map(|r| r.id)
            .collect();
        let kept = error.partial_records.len() - conflicted.len();
        if kept > 0 {
            tracing::warn!(count = kept, "item failures left queued");
        }
        if dropped.is_empty() {
            return;
        }
        tracing::warn!(count = dropped.len(), "dropping conflicted saves");
        self.persist_queues();
        self.emit(SyncEvent::ConflictsDropped(dropped));
        self.fetch_zone_changes(vec![self.config.zone.clone()], Completion::Detached);
    }

    // Account

    fn refresh_account(&mut self) {
        if self.identity_pending {
            return;
        }
        self.identity_pending = true;
        self.dispatch(Step::FetchIdentity);
    }

    fn on_identity(&mut self, result: Result<AccountId, RemoteError>) {
        self.identity_pending = false;
        match result {
            Ok(account) => match &self.state.account {
                Some(current) if *current == account => {}
                Some(_) => self.account_changed(account),
                None => {
                    tracing::info!(account = %account, "account recorded");
                    self.state.account = Some(account);
                    log_write("account", self.staging.save_account(&self.state));
                }
            },
            Err(e) => tracing::warn!(error = %e, "account lookup failed"),
        }
    }

    fn account_changed(&mut self, account: AccountId) {
        tracing::info!(account = %account, "account changed, resetting sync state");
        self.epoch += 1;
        let mut fetch_waiters = self.abandon_in_flight();
        self.state.reset_for_account(account.clone());
        self.persist_all();
        self.emit(SyncEvent::AccountChanged(account));
        self.subscribe();
        self.provision(ZoneWaiter::Reply(Completion::Detached), false);
        fetch_waiters.push(Completion::Detached);
        self.start_coarse(fetch_waiters);
    }

    /// Fails the runs whose remote calls were issued for the previous
    /// account; their results arrive with an old epoch and are dropped.
    /// Returns the callers queued for a follow-up coarse fetch.
    ///
    /// The push run is left alone. Its in-flight batch fails when its result
    /// comes back, and a coalesced rerun then pushes the new account's queue.
    fn abandon_in_flight(&mut self) -> Vec<Completion> {
        self.subscribing = false;
        self.identity_pending = false;
        for waiter in self.provisioning.take().unwrap_or_default() {
            self.resolve_waiter(waiter, false);
        }
        for (_, run) in mem::take(&mut self.fine) {
            complete_all(run.waiters, false);
            complete_all(run.rerun.unwrap_or_default(), false);
        }
        let coarse = mem::take(&mut self.coarse);
        complete_all(coarse.waiters, false);
        coarse.rerun.unwrap_or_default()
    }
}

fn spawn_call<F>(jobs: mpsc::UnboundedSender<Job>, epoch: u64, call: F)
where
    F: Future<Output = Outcome> + Send + 'static,
{
    tokio::spawn(async move {
        let outcome = call.await;
        let _ = jobs.send(Job::Completed { epoch, outcome });
    });
}

fn log_write(what: &'static str, result: SyncResult<()>) {
    if let Err(e) = result {
        tracing::warn!(what, error = %e, "failed to persist");
    }
}
