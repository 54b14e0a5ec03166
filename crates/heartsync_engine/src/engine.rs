//! The sync engine handle.

use crate::completion::{Ack, Completion, Signal};
use crate::config::SyncConfig;
use crate::events::SyncEvent;
use crate::staging::{StagingStore, SyncState};
use crate::steps::{Outcome, Step};
use crate::worker::SyncWorker;
use heartsync_protocol::{AccountId, HeartRateRecord, RecordId, RemoteDatabase};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Work items processed by the worker, one at a time, in order.
#[derive(Debug)]
pub(crate) enum Job {
    StartSync,
    SaveRecords {
        records: Vec<HeartRateRecord>,
        completion: Completion,
    },
    DeleteRecords {
        ids: Vec<RecordId>,
        completion: Completion,
    },
    DrainPending(Completion),
    FetchChanges(Completion),
    EnsureZone(Completion),
    RefreshAccount,
    AccountChanged(AccountId),
    PersistRecords(Vec<HeartRateRecord>),
    PersistNow,
    Snapshot(oneshot::Sender<SyncState>),
    /// A step whose retry delay elapsed, stamped with the account epoch it
    /// was scheduled in.
    Run { epoch: u64, step: Step },
    /// A remote call returned, stamped with the account epoch it was issued in.
    Completed { epoch: u64, outcome: Outcome },
    Signal(Signal, bool),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running sync engine.
///
/// The engine reconciles the staged queues and change tokens against a
/// [`RemoteDatabase`]. All state lives in one worker task; the handle only
/// queues jobs, so it is cheap to clone and never blocks.
///
/// Operations returning [`Ack`] are queued immediately. Awaiting the `Ack`
/// yields `true` on success and `false` on failure or if the engine stopped.
///
/// # Example
///
/// ```rust,ignore
/// let (engine, mut events) = SyncEngine::spawn(config, staging, remote);
/// engine.start_sync();
/// if !engine.save_records(vec![record]).await {
///     // still queued, retried on the next drain
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SyncEngine {
    jobs: mpsc::UnboundedSender<Job>,
}

impl SyncEngine {
    /// Loads the staged sync state and starts the worker task.
    ///
    /// Must be called from within a tokio runtime. The worker runs until
    /// [`shutdown`](Self::shutdown) is called or every handle is dropped.
    pub fn spawn(
        config: SyncConfig,
        staging: StagingStore,
        remote: Arc<dyn RemoteDatabase>,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (jobs, rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let state = staging.load_sync_state();
        tracing::info!(
            zone = %config.zone,
            pending_saves = state.pending_saves.len(),
            pending_deletes = state.pending_deletes.len(),
            "sync engine starting"
        );
        let worker = SyncWorker::new(config, staging, remote, state, jobs.downgrade(), events);
        tokio::spawn(worker.run(rx));
        (Self { jobs }, events_rx)
    }

    fn send(&self, job: Job) -> bool {
        self.jobs.send(job).is_ok()
    }

    fn send_with_ack(&self, job: impl FnOnce(Completion) -> Job) -> Ack {
        let (completion, ack) = Completion::reply();
        // A rejected job drops its completion, which resolves the ack to false.
        self.send(job(completion));
        ack
    }

    /// Provisions the zone, registers the subscription, fetches changes and
    /// drains the pending queues.
    pub fn start_sync(&self) {
        self.send(Job::StartSync);
    }

    /// Stages records for saving and pushes every pending operation.
    pub fn save_records(&self, records: Vec<HeartRateRecord>) -> Ack {
        self.send_with_ack(|completion| Job::SaveRecords {
            records,
            completion,
        })
    }

    /// Stages ids for deletion and pushes every pending operation.
    pub fn delete_records(&self, ids: Vec<RecordId>) -> Ack {
        self.send_with_ack(|completion| Job::DeleteRecords { ids, completion })
    }

    /// Pushes every pending operation.
    pub fn drain_pending(&self) -> Ack {
        self.send_with_ack(Job::DrainPending)
    }

    /// Fetches database and zone changes since the stored tokens.
    pub fn fetch_changes(&self) -> Ack {
        self.send_with_ack(Job::FetchChanges)
    }

    /// Makes sure the configured zone exists remotely.
    pub fn ensure_zone(&self) -> Ack {
        self.send_with_ack(Job::EnsureZone)
    }

    /// Looks up the signed-in account and handles a change of identity.
    pub fn refresh_account(&self) {
        self.send(Job::RefreshAccount);
    }

    /// Invalidates every token, flag and queue, then resynchronizes for `account`.
    pub fn account_changed(&self, account: AccountId) {
        self.send(Job::AccountChanged(account));
    }

    /// Writes the authoritative record set to the staging store.
    pub fn persist_records(&self, records: Vec<HeartRateRecord>) {
        self.send(Job::PersistRecords(records));
    }

    /// Writes the complete sync state to the staging store.
    pub fn persist_now(&self) {
        self.send(Job::PersistNow);
    }

    /// Returns a copy of the worker's sync state.
    pub async fn snapshot(&self) -> crate::SyncResult<SyncState> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Job::Snapshot(tx)) {
            return Err(crate::SyncError::EngineStopped);
        }
        rx.await.map_err(|_| crate::SyncError::EngineStopped)
    }

    /// Persists the sync state and stops the worker.
    ///
    /// Jobs queued before the call are processed first. Scheduled retries
    /// are dropped.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Job::Shutdown(tx)) {
            let _ = rx.await;
        }
    }

    /// Returns true once the worker has stopped.
    pub fn is_stopped(&self) -> bool {
        self.jobs.is_closed()
    }
}
