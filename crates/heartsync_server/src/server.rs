//! The in-memory cloud server.

use crate::calls::{Call, CallLog, Faults, OperationKind};
use crate::config::ServerConfig;
use crate::database::AccountDatabase;
use crate::error::{ServerError, ServerResult};
use async_trait::async_trait;
use heartsync_protocol::{
    AccountId, ChangeToken, DatabaseChanges, ModifyRecords, ModifyRecordsResult, OperationOptions,
    RecordId, RemoteDatabase, RemoteError, RemoteErrorCode, RemoteRecord, SavePolicy,
    Subscription, ZoneChanges, ZoneFetch, ZoneId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
struct State {
    config: ServerConfig,
    accounts: HashMap<AccountId, AccountDatabase>,
    current: Option<AccountId>,
    reachable: bool,
    next_log_id: u64,
    faults: Faults,
    calls: CallLog,
}

impl State {
    fn allocate_log_id(&mut self) -> u64 {
        self.next_log_id += 1;
        self.next_log_id
    }

    /// Logs the call, then applies reachability and scripted faults.
    fn begin(&mut self, call: Call) -> Result<(), RemoteError> {
        let kind = call.kind();
        self.calls.push(call);
        if !self.reachable {
            return Err(RemoteError::new(
                RemoteErrorCode::NetworkUnavailable,
                "the network is unreachable",
            ));
        }
        if let Some(error) = self.faults.take_operation(kind) {
            tracing::debug!(?kind, code = %error.code, "injected fault");
            return Err(error);
        }
        Ok(())
    }

    fn database(&mut self) -> Result<&mut AccountDatabase, RemoteError> {
        let account = self.current.as_ref().ok_or(ServerError::NotSignedIn)?;
        self.accounts
            .get_mut(account)
            .ok_or_else(|| ServerError::NotSignedIn.into())
    }

    fn account_database(&self) -> ServerResult<&AccountDatabase> {
        let account = self.current.as_ref().ok_or(ServerError::NotSignedIn)?;
        self.accounts.get(account).ok_or(ServerError::NotSignedIn)
    }
}

/// An in-memory remote record store.
///
/// The server keeps one private database per account and answers the
/// [`RemoteDatabase`] interface the way a cloud backend would: change feeds
/// with opaque tokens, paging, an operation ceiling on modify calls and
/// authentication checks. Test hooks allow signing accounts in and out,
/// expiring tokens, cutting the network and scripting failures.
///
/// Clones share the same state.
///
/// # Example
///
/// ```
/// use heartsync_server::{CloudServer, ServerConfig};
/// use heartsync_protocol::AccountId;
///
/// let server = CloudServer::new(ServerConfig::default())
///     .with_account(AccountId::new("alice"));
/// assert_eq!(server.current_account(), Some(AccountId::new("alice")));
/// ```
#[derive(Debug, Clone)]
pub struct CloudServer {
    state: Arc<Mutex<State>>,
}

impl Default for CloudServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl CloudServer {
    /// Creates a server with no account signed in.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                config,
                accounts: HashMap::new(),
                current: None,
                reachable: true,
                next_log_id: 0,
                faults: Faults::default(),
                calls: CallLog::default(),
            })),
        }
    }

    /// Signs `account` in and returns the server.
    #[must_use]
    pub fn with_account(self, account: AccountId) -> Self {
        self.sign_in(account);
        self
    }

    /// Signs `account` in, creating its database on first use.
    pub fn sign_in(&self, account: AccountId) {
        let mut state = self.state.lock();
        if !state.accounts.contains_key(&account) {
            let log_id = state.allocate_log_id();
            state
                .accounts
                .insert(account.clone(), AccountDatabase::new(log_id));
        }
        tracing::info!(%account, "account signed in");
        state.current = Some(account);
    }

    /// Signs the current account out.
    pub fn sign_out(&self) {
        self.state.lock().current = None;
    }

    /// Returns the signed-in account.
    pub fn current_account(&self) -> Option<AccountId> {
        self.state.lock().current.clone()
    }

    /// Makes every later call fail with `NetworkUnavailable` while false.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Makes the next call of `kind` fail with `error`.
    ///
    /// Several failures for the same kind are consumed in order.
    pub fn inject_failure(&self, kind: OperationKind, error: RemoteError) {
        self.state.lock().faults.push_operation(kind, error);
    }

    /// Makes the next save or delete of record `id` fail with `error`.
    pub fn inject_record_failure(&self, id: RecordId, error: RemoteError) {
        self.state.lock().faults.push_record(id, error);
    }

    /// Returns the number of scripted failures not yet consumed.
    pub fn pending_failures(&self) -> usize {
        self.state.lock().faults.pending()
    }

    /// Drops every scripted failure.
    pub fn clear_failures(&self) {
        self.state.lock().faults.clear();
    }

    /// Invalidates every database change token issued to the current account.
    pub fn expire_database_tokens(&self) -> ServerResult<()> {
        let mut state = self.state.lock();
        state
            .database()
            .map_err(|_| ServerError::NotSignedIn)?
            .expire_database_tokens();
        Ok(())
    }

    /// Invalidates every change token issued for `zone`.
    pub fn expire_zone_tokens(&self, zone: &ZoneId) -> ServerResult<()> {
        let mut state = self.state.lock();
        let db = state.database().map_err(|_| ServerError::NotSignedIn)?;
        if db.expire_zone_tokens(zone) {
            Ok(())
        } else {
            Err(ServerError::UnknownZone(zone.clone()))
        }
    }

    /// Creates a zone directly, as another device would.
    pub fn create_zone(&self, zone: &ZoneId) -> ServerResult<()> {
        let mut state = self.state.lock();
        let log_id = state.allocate_log_id();
        let db = state.database().map_err(|_| ServerError::NotSignedIn)?;
        db.create_zone(zone, log_id);
        Ok(())
    }

    /// Deletes a zone and its records.
    pub fn delete_zone(&self, zone: &ZoneId) -> ServerResult<()> {
        let mut state = self.state.lock();
        let db = state.database().map_err(|_| ServerError::NotSignedIn)?;
        if db.delete_zone(zone) {
            Ok(())
        } else {
            Err(ServerError::UnknownZone(zone.clone()))
        }
    }

    /// Returns true if `zone` exists for the current account.
    pub fn zone_exists(&self, zone: &ZoneId) -> bool {
        self.state
            .lock()
            .account_database()
            .map(|db| db.has_zone(zone))
            .unwrap_or(false)
    }

    /// Saves a record directly, as another device writing to the same account.
    pub fn save_remote_record(&self, record: RemoteRecord) -> ServerResult<RemoteRecord> {
        let mut state = self.state.lock();
        let zone = record.zone.clone();
        let db = state.database().map_err(|_| ServerError::NotSignedIn)?;
        db.save_record(record, SavePolicy::AllKeys)
            .map_err(|e| match e.code {
                RemoteErrorCode::ZoneNotFound => ServerError::UnknownZone(zone),
                _ => ServerError::InvalidRecord(e.message),
            })
    }

    /// Deletes a record directly, as another device would.
    pub fn delete_remote_record(&self, zone: &ZoneId, id: RecordId) -> ServerResult<()> {
        let mut state = self.state.lock();
        let db = state.database().map_err(|_| ServerError::NotSignedIn)?;
        db.delete_record(zone, id)
            .map_err(|_| ServerError::UnknownZone(zone.clone()))
    }

    /// Returns every record in `zone` for the current account.
    pub fn records(&self, zone: &ZoneId) -> ServerResult<Vec<RemoteRecord>> {
        let state = self.state.lock();
        state
            .account_database()?
            .records(zone)
            .ok_or_else(|| ServerError::UnknownZone(zone.clone()))
    }

    /// Returns one record, if present.
    pub fn record(&self, zone: &ZoneId, id: &RecordId) -> Option<RemoteRecord> {
        let state = self.state.lock();
        state.account_database().ok()?.record(zone, id)
    }

    /// Returns the subscriptions registered by the current account.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state
            .lock()
            .account_database()
            .map(AccountDatabase::subscriptions)
            .unwrap_or_default()
    }

    /// Returns a snapshot of the call log.
    pub fn calls(&self) -> CallLog {
        self.state.lock().calls.clone()
    }

    /// Returns how many calls of `kind` the server has received.
    pub fn call_count(&self, kind: OperationKind) -> usize {
        self.state.lock().calls.count(kind)
    }

    /// Clears the call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

#[async_trait]
impl RemoteDatabase for CloudServer {
    async fn fetch_user_identity(&self) -> Result<AccountId, RemoteError> {
        let mut state = self.state.lock();
        state.begin(Call::FetchUserIdentity)?;
        state
            .current
            .clone()
            .ok_or_else(|| ServerError::NotSignedIn.into())
    }

    async fn fetch_zones(
        &self,
        zones: &[ZoneId],
        _options: &OperationOptions,
    ) -> Result<Vec<ZoneId>, RemoteError> {
        let mut state = self.state.lock();
        state.begin(Call::FetchZones(zones.to_vec()))?;
        let db = state.database()?;

        let (found, missing): (Vec<_>, Vec<_>) =
            zones.iter().cloned().partition(|z| db.has_zone(z));
        if missing.is_empty() {
            return Ok(found);
        }
        Err(missing.into_iter().fold(
            RemoteError::partial_failure(),
            |err, zone| {
                let item = RemoteError::new(
                    RemoteErrorCode::ZoneNotFound,
                    format!("zone {zone} does not exist"),
                );
                err.with_partial_zone(zone, item)
            },
        ))
    }

    async fn save_zone(
        &self,
        zone: &ZoneId,
        _options: &OperationOptions,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.begin(Call::SaveZone(zone.clone()))?;
        let log_id = state.allocate_log_id();
        if state.database()?.create_zone(zone, log_id) {
            tracing::debug!(%zone, "zone created");
        }
        Ok(())
    }

    async fn save_subscription(
        &self,
        subscription: &Subscription,
        _options: &OperationOptions,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.begin(Call::SaveSubscription(subscription.id.clone()))?;
        state.database()?.save_subscription(subscription);
        Ok(())
    }

    async fn fetch_database_changes(
        &self,
        token: Option<&ChangeToken>,
        _options: &OperationOptions,
    ) -> Result<DatabaseChanges, RemoteError> {
        let mut state = self.state.lock();
        state.begin(Call::FetchDatabaseChanges)?;
        let page_size = state.config.page_size;
        state.database()?.database_changes(token, page_size)
    }

    async fn fetch_zone_changes(
        &self,
        fetches: &[ZoneFetch],
        _options: &OperationOptions,
    ) -> Result<Vec<ZoneChanges>, RemoteError> {
        let mut state = self.state.lock();
        state.begin(Call::FetchZoneChanges(
            fetches.iter().map(|f| f.zone.clone()).collect(),
        ))?;
        let page_size = state.config.page_size;
        let db = state.database()?;
        Ok(fetches
            .iter()
            .map(|fetch| ZoneChanges {
                zone: fetch.zone.clone(),
                outcome: db.zone_changes(fetch, page_size),
            })
            .collect())
    }

    async fn modify_records(&self, request: ModifyRecords) -> ModifyRecordsResult {
        let mut state = self.state.lock();
        let call = Call::ModifyRecords {
            saves: request.saves.iter().map(|r| r.id).collect(),
            deletes: request.deletes.clone(),
        };
        if let Err(error) = state.begin(call) {
            return ModifyRecordsResult::failed(error);
        }
        if request.operation_count() > state.config.operation_limit {
            return ModifyRecordsResult::failed(RemoteError::new(
                RemoteErrorCode::LimitExceeded,
                format!(
                    "{} operations exceed the limit of {}",
                    request.operation_count(),
                    state.config.operation_limit
                ),
            ));
        }
        if state.current.is_none() {
            return ModifyRecordsResult::failed(ServerError::NotSignedIn.into());
        }

        let State {
            accounts,
            current,
            faults,
            ..
        } = &mut *state;
        let Some(db) = current.as_ref().and_then(|a| accounts.get_mut(a)) else {
            return ModifyRecordsResult::failed(ServerError::NotSignedIn.into());
        };

        let mut result = ModifyRecordsResult::default();
        let mut failure = RemoteError::partial_failure();

        for record in request.saves {
            let id = record.id;
            let outcome = match faults.take_record(&id) {
                Some(error) => Err(error),
                None => db.save_record(record, request.policy),
            };
            match outcome {
                Ok(stored) => result.saved.push(stored),
                Err(error) => failure = failure.with_partial_record(id, error),
            }
        }
        for id in request.deletes {
            let outcome = match faults.take_record(&id) {
                Some(error) => Err(error),
                None => db.delete_record(&request.zone, id),
            };
            match outcome {
                Ok(()) => result.deleted.push(id),
                Err(error) => failure = failure.with_partial_record(id, error),
            }
        }

        if !failure.partial_records.is_empty() {
            tracing::debug!(
                failed = failure.partial_records.len(),
                "modify completed with item failures"
            );
            result.error = Some(failure);
        }
        result
    }
}
