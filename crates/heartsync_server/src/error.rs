//! Error types for the server's administrative helpers.

use heartsync_protocol::{RemoteError, RemoteErrorCode, ZoneId};
use thiserror::Error;

/// Result type for server administration.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned by helpers that act on the server directly, outside the
/// remote database interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// No account is signed in.
    #[error("no account is signed in")]
    NotSignedIn,

    /// The zone does not exist for the current account.
    #[error("unknown zone: {0}")]
    UnknownZone(ZoneId),

    /// The record cannot be stored.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl From<ServerError> for RemoteError {
    fn from(err: ServerError) -> Self {
        let code = match err {
            ServerError::NotSignedIn => RemoteErrorCode::NotAuthenticated,
            ServerError::UnknownZone(_) => RemoteErrorCode::ZoneNotFound,
            ServerError::InvalidRecord(_) => RemoteErrorCode::InternalError,
        };
        RemoteError::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_remote_codes() {
        let err: RemoteError = ServerError::NotSignedIn.into();
        assert_eq!(err.code, RemoteErrorCode::NotAuthenticated);

        let err: RemoteError = ServerError::UnknownZone(ZoneId::new("z")).into();
        assert_eq!(err.code, RemoteErrorCode::ZoneNotFound);
        assert!(err.message.contains('z'));
    }
}
