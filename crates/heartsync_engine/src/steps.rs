//! Retryable protocol steps and the outcomes of their remote calls.
//!
//! A step is a plain value carrying everything needed to issue its remote
//! call again, including the delay it was last scheduled with. The worker
//! dispatches steps and receives outcomes; nothing captures state between
//! attempts.

use crate::completion::Completion;
use heartsync_protocol::{
    AccountId, DatabaseChanges, HeartRateRecord, ModifyRecordsResult, RecordId, RemoteError,
    ZoneChanges, ZoneId,
};
use std::time::Duration;

/// One remote call the worker can issue.
#[derive(Debug)]
pub(crate) enum Step {
    FetchZone { previous: Duration },
    CreateZone { previous: Duration },
    Subscribe { previous: Duration },
    FetchDatabaseChanges { previous: Duration },
    FetchZoneChanges { zones: Vec<ZoneId>, previous: Duration },
    Modify(ModifyBatch),
    FetchIdentity,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::FetchZone { .. } => "fetch_zone",
            Step::CreateZone { .. } => "create_zone",
            Step::Subscribe { .. } => "subscribe",
            Step::FetchDatabaseChanges { .. } => "fetch_database_changes",
            Step::FetchZoneChanges { .. } => "fetch_zone_changes",
            Step::Modify(_) => "modify_records",
            Step::FetchIdentity => "fetch_identity",
        }
    }
}

/// The result of a dispatched [`Step`], handed back to the worker.
#[derive(Debug)]
pub(crate) enum Outcome {
    ZoneFetched {
        previous: Duration,
        result: Result<Vec<ZoneId>, RemoteError>,
    },
    ZoneCreated {
        previous: Duration,
        result: Result<(), RemoteError>,
    },
    Subscribed {
        previous: Duration,
        result: Result<(), RemoteError>,
    },
    DatabaseChanges {
        previous: Duration,
        result: Result<DatabaseChanges, RemoteError>,
    },
    ZoneChanges {
        zones: Vec<ZoneId>,
        previous: Duration,
        result: Result<Vec<ZoneChanges>, RemoteError>,
    },
    Modified {
        batch: ModifyBatch,
        result: ModifyRecordsResult,
    },
    Identity(Result<AccountId, RemoteError>),
}

impl Outcome {
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::ZoneFetched { .. } => "fetch_zone",
            Outcome::ZoneCreated { .. } => "create_zone",
            Outcome::Subscribed { .. } => "subscribe",
            Outcome::DatabaseChanges { .. } => "fetch_database_changes",
            Outcome::ZoneChanges { .. } => "fetch_zone_changes",
            Outcome::Modified { .. } => "modify_records",
            Outcome::Identity(_) => "fetch_identity",
        }
    }
}

/// A set of saves and deletes pushed in one modify call.
#[derive(Debug)]
pub(crate) struct ModifyBatch {
    pub saves: Vec<HeartRateRecord>,
    pub deletes: Vec<RecordId>,
    pub previous: Duration,
    /// Set once the batch has been retried after a missing zone.
    pub zone_retry_used: bool,
    pub completion: Completion,
}

impl ModifyBatch {
    pub fn new(saves: Vec<HeartRateRecord>, deletes: Vec<RecordId>, completion: Completion) -> Self {
        Self {
            saves,
            deletes,
            previous: Duration::ZERO,
            zone_retry_used: false,
            completion,
        }
    }

    /// Number of operations in the batch.
    pub fn len(&self) -> usize {
        self.saves.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Halves saves and deletes independently.
    ///
    /// The halves partition the batch, and both are non-empty when the batch
    /// holds at least two operations. The parent completion resolves once,
    /// after both halves.
    pub fn split(self) -> (Self, Self) {
        let Self {
            mut saves,
            mut deletes,
            zone_retry_used,
            completion,
            ..
        } = self;
        let later_saves = saves.split_off(saves.len() / 2);
        let later_deletes = deletes.split_off(deletes.len().div_ceil(2));
        let (first, second) = completion.split();
        (
            Self {
                saves,
                deletes,
                previous: Duration::ZERO,
                zone_retry_used,
                completion: first,
            },
            Self {
                saves: later_saves,
                deletes: later_deletes,
                previous: Duration::ZERO,
                zone_retry_used,
                completion: second,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use time::OffsetDateTime;

    fn batch(saves: usize, deletes: usize) -> ModifyBatch {
        ModifyBatch::new(
            (0..saves)
                .map(|v| HeartRateRecord::new(v as i64, OffsetDateTime::UNIX_EPOCH))
                .collect(),
            (0..deletes).map(|_| RecordId::new()).collect(),
            Completion::Detached,
        )
    }

    fn ids(batch: &ModifyBatch) -> BTreeSet<RecordId> {
        batch
            .saves
            .iter()
            .map(|r| r.id)
            .chain(batch.deletes.iter().copied())
            .collect()
    }

    #[test]
    fn one_save_one_delete_splits_into_two_singletons() {
        let (first, second) = batch(1, 1).split();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn split_resets_delay_and_keeps_retry_flag() {
        let mut b = batch(4, 0);
        b.previous = Duration::from_secs(8);
        b.zone_retry_used = true;
        let (first, second) = b.split();
        assert_eq!(first.previous, Duration::ZERO);
        assert!(first.zone_retry_used && second.zone_retry_used);
    }

    proptest! {
        #[test]
        fn split_partitions_operations(saves in 0usize..40, deletes in 0usize..40) {
            prop_assume!(saves + deletes >= 2);
            let whole = batch(saves, deletes);
            let all = ids(&whole);
            let (first, second) = whole.split();

            prop_assert!(!first.is_empty());
            prop_assert!(!second.is_empty());
            prop_assert_eq!(first.len() + second.len(), saves + deletes);
            let a = ids(&first);
            let b = ids(&second);
            prop_assert!(a.is_disjoint(&b));
            prop_assert_eq!(a.union(&b).copied().collect::<BTreeSet<_>>(), all);
        }
    }
}
