//! Call log and fault injection.

use heartsync_protocol::{RecordId, RemoteError, ZoneId};
use std::collections::{HashMap, VecDeque};

/// The kinds of remote operation the server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// `fetch_user_identity`
    FetchUserIdentity,
    /// `fetch_zones`
    FetchZones,
    /// `save_zone`
    SaveZone,
    /// `save_subscription`
    SaveSubscription,
    /// `fetch_database_changes`
    FetchDatabaseChanges,
    /// `fetch_zone_changes`
    FetchZoneChanges,
    /// `modify_records`
    ModifyRecords,
}

impl OperationKind {
    /// Every operation kind, in protocol order.
    pub const ALL: [OperationKind; 7] = [
        OperationKind::FetchUserIdentity,
        OperationKind::FetchZones,
        OperationKind::SaveZone,
        OperationKind::SaveSubscription,
        OperationKind::FetchDatabaseChanges,
        OperationKind::FetchZoneChanges,
        OperationKind::ModifyRecords,
    ];

    /// Returns the name of the remote operation.
    pub fn name(self) -> &'static str {
        match self {
            OperationKind::FetchUserIdentity => "fetch_user_identity",
            OperationKind::FetchZones => "fetch_zones",
            OperationKind::SaveZone => "save_zone",
            OperationKind::SaveSubscription => "save_subscription",
            OperationKind::FetchDatabaseChanges => "fetch_database_changes",
            OperationKind::FetchZoneChanges => "fetch_zone_changes",
            OperationKind::ModifyRecords => "modify_records",
        }
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Identity lookup.
    FetchUserIdentity,
    /// Zone lookup.
    FetchZones(Vec<ZoneId>),
    /// Zone creation.
    SaveZone(ZoneId),
    /// Subscription registration, by id.
    SaveSubscription(String),
    /// Database changes page request.
    FetchDatabaseChanges,
    /// Zone changes page request.
    FetchZoneChanges(Vec<ZoneId>),
    /// Modify batch, by record id.
    ModifyRecords {
        /// Ids of saved records.
        saves: Vec<RecordId>,
        /// Ids of deleted records.
        deletes: Vec<RecordId>,
    },
}

impl Call {
    /// Returns the operation kind of this call.
    pub fn kind(&self) -> OperationKind {
        match self {
            Call::FetchUserIdentity => OperationKind::FetchUserIdentity,
            Call::FetchZones(_) => OperationKind::FetchZones,
            Call::SaveZone(_) => OperationKind::SaveZone,
            Call::SaveSubscription(_) => OperationKind::SaveSubscription,
            Call::FetchDatabaseChanges => OperationKind::FetchDatabaseChanges,
            Call::FetchZoneChanges(_) => OperationKind::FetchZoneChanges,
            Call::ModifyRecords { .. } => OperationKind::ModifyRecords,
        }
    }
}

/// Every call the server has received, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Vec<Call>,
}

impl CallLog {
    pub(crate) fn push(&mut self, call: Call) {
        tracing::trace!(?call, "remote call");
        self.calls.push(call);
    }

    /// Returns all calls.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Returns the number of calls of one kind.
    pub fn count(&self, kind: OperationKind) -> usize {
        self.calls.iter().filter(|c| c.kind() == kind).count()
    }

    /// Returns the (saves, deletes) of every modify call.
    pub fn modify_batches(&self) -> Vec<(Vec<RecordId>, Vec<RecordId>)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::ModifyRecords { saves, deletes } => Some((saves.clone(), deletes.clone())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.calls.clear();
    }
}

/// Scripted failures, consumed one per matching call.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    operations: HashMap<OperationKind, VecDeque<RemoteError>>,
    records: HashMap<RecordId, VecDeque<RemoteError>>,
}

impl Faults {
    pub fn push_operation(&mut self, kind: OperationKind, error: RemoteError) {
        self.operations.entry(kind).or_default().push_back(error);
    }

    pub fn push_record(&mut self, id: RecordId, error: RemoteError) {
        self.records.entry(id).or_default().push_back(error);
    }

    pub fn take_operation(&mut self, kind: OperationKind) -> Option<RemoteError> {
        self.operations.get_mut(&kind).and_then(VecDeque::pop_front)
    }

    pub fn take_record(&mut self, id: &RecordId) -> Option<RemoteError> {
        self.records.get_mut(id).and_then(VecDeque::pop_front)
    }

    pub fn pending(&self) -> usize {
        self.operations.values().map(VecDeque::len).sum::<usize>()
            + self.records.values().map(VecDeque::len).sum::<usize>()
    }

    pub fn clear(&mut self) {
        self.operations.clear();
        self.records.clear();
    }
}
