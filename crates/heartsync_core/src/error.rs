//! Error types for the application layer.

use heartsync_engine::SyncError;
use heartsync_storage::StorageError;
use thiserror::Error;

/// Result type for application operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the record manager, the telemetry bridge and the app wiring.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The sync engine failed or stopped.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The local store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A device message could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The workout session could not be started.
    #[error("workout failed: {0}")]
    Workout(String),

    /// A workout is already running.
    #[error("workout already running")]
    WorkoutRunning,
}

impl CoreError {
    /// Creates an invalid message error.
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage(reason.into())
    }

    /// Creates a workout error.
    pub fn workout(reason: impl Into<String>) -> Self {
        Self::Workout(reason.into())
    }
}
