//! Error types for the protocol crate.

use crate::record::RecordId;
use crate::zone::ZoneId;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Bytes remained after the decoded item.
    #[error("{count} trailing bytes after CBOR item")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },
}

/// Error codes reported by the remote record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorCode {
    /// No network connection.
    NetworkUnavailable,
    /// The connection failed mid-request.
    NetworkFailure,
    /// The service is temporarily unavailable.
    ServiceUnavailable,
    /// Too many requests; wait for the retry-after hint.
    RequestRateLimited,
    /// The zone is busy with other writers.
    ZoneBusy,
    /// A change token is too old for the server to serve incrementally.
    ChangeTokenExpired,
    /// The target zone does not exist.
    ZoneNotFound,
    /// No account is signed in.
    NotAuthenticated,
    /// The request carried more operations than the server accepts.
    LimitExceeded,
    /// The record was changed on the server since the client last saw it.
    ServerRecordChanged,
    /// The item was rejected because another item in its batch failed.
    BatchRequestFailed,
    /// Some items failed; see the per-item errors.
    PartialFailure,
    /// The record does not exist.
    UnknownItem,
    /// An unexpected server-side failure.
    InternalError,
}

impl RemoteErrorCode {
    /// Returns the stable name of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkUnavailable => "network_unavailable",
            Self::NetworkFailure => "network_failure",
            Self::ServiceUnavailable => "service_unavailable",
            Self::RequestRateLimited => "request_rate_limited",
            Self::ZoneBusy => "zone_busy",
            Self::ChangeTokenExpired => "change_token_expired",
            Self::ZoneNotFound => "zone_not_found",
            Self::NotAuthenticated => "not_authenticated",
            Self::LimitExceeded => "limit_exceeded",
            Self::ServerRecordChanged => "server_record_changed",
            Self::BatchRequestFailed => "batch_request_failed",
            Self::PartialFailure => "partial_failure",
            Self::UnknownItem => "unknown_item",
            Self::InternalError => "internal_error",
        }
    }

    /// Returns true for per-item failures that retrying the same write cannot fix.
    #[must_use]
    pub fn is_conflict(self) -> bool {
        matches!(self, Self::ServerRecordChanged | Self::BatchRequestFailed)
    }
}

impl fmt::Display for RemoteErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by the remote record store.
///
/// Partial failures carry per-record and per-zone errors alongside the
/// top-level code.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct RemoteError {
    /// The top-level error code.
    pub code: RemoteErrorCode,
    /// Server-suggested delay before retrying.
    pub retry_after: Option<Duration>,
    /// Human-readable description.
    pub message: String,
    /// Per-record errors for partial failures.
    pub partial_records: BTreeMap<RecordId, RemoteError>,
    /// Per-zone errors for partial failures.
    pub partial_zones: BTreeMap<ZoneId, RemoteError>,
}

impl RemoteError {
    /// Creates an error with no retry hint and no partial items.
    pub fn new(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            retry_after: None,
            message: message.into(),
            partial_records: BTreeMap::new(),
            partial_zones: BTreeMap::new(),
        }
    }

    /// Creates a rate-limit error with the given retry hint.
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::new(RemoteErrorCode::RequestRateLimited, "request rate limited")
            .with_retry_after(retry_after)
    }

    /// Creates a partial failure with no items yet.
    pub fn partial_failure() -> Self {
        Self::new(RemoteErrorCode::PartialFailure, "partial failure")
    }

    /// Sets the retry hint.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Adds a per-record error.
    #[must_use]
    pub fn with_partial_record(mut self, id: RecordId, error: RemoteError) -> Self {
        self.partial_records.insert(id, error);
        self
    }

    /// Adds a per-zone error.
    #[must_use]
    pub fn with_partial_zone(mut self, zone: ZoneId, error: RemoteError) -> Self {
        self.partial_zones.insert(zone, error);
        self
    }

    /// Returns true if the server supplied a retry-after hint.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retry_after.is_some()
    }

    /// Returns true if this error, or any per-item error, is `ZoneNotFound`.
    #[must_use]
    pub fn zone_not_found(&self) -> bool {
        self.code == RemoteErrorCode::ZoneNotFound
            || self
                .partial_zones
                .values()
                .chain(self.partial_records.values())
                .any(|e| e.code == RemoteErrorCode::ZoneNotFound)
    }

    /// Returns true if the top-level code is `ChangeTokenExpired`.
    #[must_use]
    pub fn is_token_expired(&self) -> bool {
        self.code == RemoteErrorCode::ChangeTokenExpired
    }

    /// Returns the zones whose change tokens were reported expired.
    #[must_use]
    pub fn expired_zones(&self) -> Vec<ZoneId> {
        self.partial_zones
            .iter()
            .filter(|(_, e)| e.is_token_expired())
            .map(|(zone, _)| zone.clone())
            .collect()
    }

    /// Returns the records that failed with a conflict code.
    #[must_use]
    pub fn conflicted_records(&self) -> Vec<RecordId> {
        self.partial_records
            .iter()
            .filter(|(_, e)| e.code.is_conflict())
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_hint_makes_error_retryable() {
        let err = RemoteError::new(RemoteErrorCode::ServiceUnavailable, "down");
        assert!(!err.is_retryable());
        assert!(err.with_retry_after(Duration::from_secs(3)).is_retryable());
        assert!(RemoteError::rate_limited(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn zone_not_found_checks_partial_items() {
        let zone = ZoneId::default_zone();
        let top = RemoteError::new(RemoteErrorCode::ZoneNotFound, "missing");
        assert!(top.zone_not_found());

        let nested = RemoteError::partial_failure().with_partial_zone(
            zone,
            RemoteError::new(RemoteErrorCode::ZoneNotFound, "missing"),
        );
        assert!(nested.zone_not_found());

        let item = RemoteError::partial_failure().with_partial_record(
            RecordId::new(),
            RemoteError::new(RemoteErrorCode::ZoneNotFound, "missing"),
        );
        assert!(item.zone_not_found());

        let other = RemoteError::partial_failure().with_partial_record(
            RecordId::new(),
            RemoteError::new(RemoteErrorCode::ServerRecordChanged, "stale"),
        );
        assert!(!other.zone_not_found());
    }

    #[test]
    fn expired_zones_lists_only_expired() {
        let a = ZoneId::new("a");
        let b = ZoneId::new("b");
        let err = RemoteError::partial_failure()
            .with_partial_zone(
                a.clone(),
                RemoteError::new(RemoteErrorCode::ChangeTokenExpired, "expired"),
            )
            .with_partial_zone(b, RemoteError::new(RemoteErrorCode::ZoneBusy, "busy"));
        assert_eq!(err.expired_zones(), vec![a]);
    }

    #[test]
    fn conflicted_records_filters_codes() {
        let stale = RecordId::new();
        let failed = RecordId::new();
        let missing = RecordId::new();
        let err = RemoteError::partial_failure()
            .with_partial_record(
                stale,
                RemoteError::new(RemoteErrorCode::ServerRecordChanged, "stale"),
            )
            .with_partial_record(
                failed,
                RemoteError::new(RemoteErrorCode::BatchRequestFailed, "batch"),
            )
            .with_partial_record(
                missing,
                RemoteError::new(RemoteErrorCode::UnknownItem, "gone"),
            );

        let mut conflicted = err.conflicted_records();
        conflicted.sort();
        let mut expected = vec![stale, failed];
        expected.sort();
        assert_eq!(conflicted, expected);
    }

    #[test]
    fn error_display() {
        let err = RemoteError::new(RemoteErrorCode::NotAuthenticated, "signed out");
        assert_eq!(err.to_string(), "not_authenticated: signed out");
    }
}
