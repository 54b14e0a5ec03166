//! Heart-rate records and their remote representation.

use crate::zone::ZoneId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Record type name used on the remote store.
pub const HEART_RATE_RECORD_TYPE: &str = "HeartRate";

const VALUE_FIELD: &str = "value";
const TIMESTAMP_FIELD: &str = "timestamp";

/// Stable, globally unique identity of a record.
///
/// Two records with the same id are the same logical entity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A single heart-rate measurement.
///
/// Records are immutable; "editing" one means deleting it and saving a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeartRateRecord {
    /// Stable identity, used as the sync key.
    pub id: RecordId,
    /// Beats per minute.
    pub value: i64,
    /// When the sample was captured.
    pub timestamp: OffsetDateTime,
}

impl HeartRateRecord {
    /// Creates a record with a fresh id.
    #[must_use]
    pub fn new(value: i64, timestamp: OffsetDateTime) -> Self {
        Self::with_id(RecordId::new(), value, timestamp)
    }

    /// Reconstructs a record with a known id.
    #[must_use]
    pub fn with_id(id: RecordId, value: i64, timestamp: OffsetDateTime) -> Self {
        Self {
            id,
            value,
            timestamp,
        }
    }

    /// Builds the remote representation of this record in `zone`.
    #[must_use]
    pub fn to_remote(&self, zone: &ZoneId) -> RemoteRecord {
        let mut fields = BTreeMap::new();
        fields.insert(VALUE_FIELD.to_string(), FieldValue::Integer(self.value));
        fields.insert(
            TIMESTAMP_FIELD.to_string(),
            FieldValue::Timestamp(self.timestamp),
        );
        RemoteRecord {
            id: self.id,
            zone: zone.clone(),
            record_type: HEART_RATE_RECORD_TYPE.to_string(),
            fields,
            revision: None,
        }
    }

    /// Reads a record back from its remote representation.
    ///
    /// Returns `None` for a foreign record type or a missing or mistyped field.
    #[must_use]
    pub fn from_remote(remote: &RemoteRecord) -> Option<Self> {
        if remote.record_type != HEART_RATE_RECORD_TYPE {
            return None;
        }
        let value = match remote.fields.get(VALUE_FIELD)? {
            FieldValue::Integer(v) => *v,
            FieldValue::Timestamp(_) => return None,
        };
        let timestamp = match remote.fields.get(TIMESTAMP_FIELD)? {
            FieldValue::Timestamp(t) => *t,
            FieldValue::Integer(_) => return None,
        };
        Some(Self::with_id(remote.id, value, timestamp))
    }
}

/// Sorts records newest first.
///
/// Records with equal timestamps are ordered by id so the result is deterministic.
pub fn sort_newest_first(records: &mut [HeartRateRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

/// A typed field value on a remote record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    /// A signed integer.
    Integer(i64),
    /// A point in time.
    Timestamp(OffsetDateTime),
}

/// A record as stored by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Record id, unique within the zone.
    pub id: RecordId,
    /// Zone the record lives in.
    pub zone: ZoneId,
    /// Record type name.
    pub record_type: String,
    /// Named field values.
    pub fields: BTreeMap<String, FieldValue>,
    /// Server-assigned revision; `None` until the server has stored the record.
    pub revision: Option<u64>,
}

impl RemoteRecord {
    /// Returns the same record with the given revision.
    #[must_use]
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    #[test]
    fn record_id_display_round_trips() {
        let id = RecordId::new();
        let parsed: RecordId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.to_string().len(), 36);
        assert!("not-a-uuid".parse::<RecordId>().is_err());
    }

    #[test]
    fn new_records_get_distinct_ids() {
        let t = datetime!(2024-01-01 00:00 UTC);
        assert_ne!(HeartRateRecord::new(70, t).id, HeartRateRecord::new(70, t).id);
    }

    #[test]
    fn remote_representation_has_typed_fields() {
        let t = datetime!(2024-03-10 08:30 UTC);
        let record = HeartRateRecord::new(72, t);
        let remote = record.to_remote(&ZoneId::default_zone());

        assert_eq!(remote.record_type, "HeartRate");
        assert_eq!(remote.fields.get("value"), Some(&FieldValue::Integer(72)));
        assert_eq!(
            remote.fields.get("timestamp"),
            Some(&FieldValue::Timestamp(t))
        );
        assert_eq!(remote.revision, None);
        assert_eq!(HeartRateRecord::from_remote(&remote), Some(record));
    }

    #[test]
    fn from_remote_rejects_malformed() {
        let t = datetime!(2024-03-10 08:30 UTC);
        let good = HeartRateRecord::new(72, t).to_remote(&ZoneId::default_zone());

        let mut foreign = good.clone();
        foreign.record_type = "Steps".into();
        assert_eq!(HeartRateRecord::from_remote(&foreign), None);

        let mut missing = good.clone();
        missing.fields.remove("value");
        assert_eq!(HeartRateRecord::from_remote(&missing), None);

        let mut mistyped = good;
        mistyped
            .fields
            .insert("timestamp".into(), FieldValue::Integer(5));
        assert_eq!(HeartRateRecord::from_remote(&mistyped), None);
    }

    #[test]
    fn sort_is_newest_first_with_id_tiebreak() {
        let early = datetime!(2024-01-01 10:00 UTC);
        let late = datetime!(2024-01-01 11:00 UTC);
        let a = HeartRateRecord::new(60, early);
        let b = HeartRateRecord::new(61, late);
        let c = HeartRateRecord::new(62, late);

        let mut records = vec![a.clone(), c.clone(), b.clone()];
        sort_newest_first(&mut records);

        assert_eq!(records[2], a);
        let (first, second) = if b.id < c.id { (&b, &c) } else { (&c, &b) };
        assert_eq!(&records[0], first);
        assert_eq!(&records[1], second);
    }

    #[test]
    fn record_cbor_round_trip() {
        let record = HeartRateRecord::new(88, datetime!(2023-07-04 12:00:30 +02:00));
        let bytes = crate::to_cbor(&record).unwrap();
        let decoded: HeartRateRecord = crate::from_cbor(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    proptest! {
        #[test]
        fn sorted_timestamps_descend(secs in prop::collection::vec(0i64..1_000_000, 0..50)) {
            let mut records: Vec<_> = secs
                .iter()
                .map(|s| HeartRateRecord::new(70, OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(*s)))
                .collect();
            sort_newest_first(&mut records);
            for pair in records.windows(2) {
                prop_assert!(pair[0].timestamp >= pair[1].timestamp);
            }
        }
    }
}
