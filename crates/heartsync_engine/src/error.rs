//! Error types for the sync engine.

use heartsync_protocol::{CodecError, RemoteError};
use heartsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The durable store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A staged blob could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The remote store reported an error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The engine worker has stopped.
    #[error("sync engine has stopped")]
    EngineStopped,
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::Storage(StorageError::Io(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heartsync_protocol::RemoteErrorCode;
    use std::time::Duration;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Remote(RemoteError::rate_limited(Duration::from_secs(1))).is_retryable());
        assert!(!SyncError::Remote(RemoteError::new(
            RemoteErrorCode::NotAuthenticated,
            "signed out"
        ))
        .is_retryable());
        assert!(!SyncError::EngineStopped.is_retryable());
        assert!(!SyncError::Storage(StorageError::Closed).is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            SyncError::EngineStopped.to_string(),
            "sync engine has stopped"
        );
        let err: SyncError = RemoteError::new(RemoteErrorCode::ZoneBusy, "busy").into();
        assert_eq!(err.to_string(), "remote error: zone_busy: busy");
    }
}
