//! Property-based test generators using proptest.
//!
//! Timestamps are drawn from a narrow window so generated record sets
//! regularly contain equal timestamps, which exercises the id tie-break of
//! the newest-first ordering.

use heartsync_protocol::{HeartRateRecord, RecordId};
use proptest::prelude::*;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unix time of the first generated timestamp.
pub const EPOCH_START: i64 = 1_700_000_000;

/// Strategy for generating record ids.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    any::<u128>().prop_map(|bits| RecordId::from_uuid(Uuid::from_u128(bits)))
}

/// Strategy for generating capture times within one hour.
pub fn timestamp_strategy() -> impl Strategy<Value = OffsetDateTime> {
    (0i64..3600).prop_map(|offset| {
        OffsetDateTime::from_unix_timestamp(EPOCH_START + offset)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    })
}

/// Strategy for generating plausible heart rates.
pub fn heart_rate_strategy() -> impl Strategy<Value = i64> {
    30i64..220
}

/// Strategy for generating records.
pub fn record_strategy() -> impl Strategy<Value = HeartRateRecord> {
    (record_id_strategy(), heart_rate_strategy(), timestamp_strategy())
        .prop_map(|(id, value, timestamp)| HeartRateRecord::with_id(id, value, timestamp))
}

/// Strategy for generating record sets of up to `max` records.
pub fn record_set_strategy(max: usize) -> impl Strategy<Value = Vec<HeartRateRecord>> {
    prop::collection::vec(record_strategy(), 0..=max)
}

/// A mutation applied to the record set.
#[derive(Debug, Clone)]
pub enum RecordOp {
    /// Save a record locally.
    Save(HeartRateRecord),
    /// Delete the record at this index of the current set, if any.
    Delete(usize),
    /// A record arrives from the remote.
    RemoteChange(HeartRateRecord),
    /// The record at this index of the current set is deleted remotely.
    RemoteDelete(usize),
}

/// Strategy for generating a single operation.
pub fn record_op_strategy() -> impl Strategy<Value = RecordOp> {
    prop_oneof![
        3 => record_strategy().prop_map(RecordOp::Save),
        1 => any::<usize>().prop_map(RecordOp::Delete),
        2 => record_strategy().prop_map(RecordOp::RemoteChange),
        1 => any::<usize>().prop_map(RecordOp::RemoteDelete),
    ]
}

/// Strategy for generating a sequence of up to `max` operations.
///
/// Some saves reuse the id of an earlier record with a new value, so the
/// sequence exercises overwrites as well as inserts.
pub fn record_ops_strategy(max: usize) -> impl Strategy<Value = Vec<RecordOp>> {
    prop::collection::vec((record_op_strategy(), any::<bool>()), 0..=max).prop_map(|ops| {
        let mut seen = Vec::new();
        ops.into_iter()
            .map(|(op, reuse)| match op {
                RecordOp::Save(record) => RecordOp::Save(reissue(record, reuse, &mut seen)),
                RecordOp::RemoteChange(record) => {
                    RecordOp::RemoteChange(reissue(record, reuse, &mut seen))
                }
                other => other,
            })
            .collect()
    })
}

fn reissue(record: HeartRateRecord, reuse: bool, seen: &mut Vec<RecordId>) -> HeartRateRecord {
    if reuse && !seen.is_empty() {
        let id = seen[record.value as usize % seen.len()];
        return HeartRateRecord::with_id(id, record.value, record.timestamp);
    }
    seen.push(record.id);
    record
}
