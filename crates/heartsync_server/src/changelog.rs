//! Append-only change logs and the tokens that point into them.

use heartsync_protocol::{ChangeToken, RemoteError, RemoteErrorCode};

const TOKEN_LEN: usize = 24;

/// An append-only log of change events.
///
/// Tokens encode `(log id, epoch, position)`. Bumping the epoch invalidates
/// every token issued so far; the log id keeps tokens from one log from
/// being accepted by another.
#[derive(Debug, Clone)]
pub(crate) struct ChangeLog<E> {
    log_id: u64,
    epoch: u64,
    entries: Vec<E>,
}

/// A page of log entries.
#[derive(Debug)]
pub(crate) struct LogPage<'a, E> {
    pub entries: &'a [E],
    pub token: ChangeToken,
    pub more_coming: bool,
}

impl<E> ChangeLog<E> {
    pub fn new(log_id: u64) -> Self {
        Self {
            log_id,
            epoch: 0,
            entries: Vec::new(),
        }
    }

    pub fn append(&mut self, entry: E) {
        self.entries.push(entry);
    }

    /// Invalidates every previously issued token.
    pub fn expire_tokens(&mut self) {
        self.epoch += 1;
    }

    fn token_at(&self, position: usize) -> ChangeToken {
        let mut bytes = Vec::with_capacity(TOKEN_LEN);
        bytes.extend_from_slice(&self.log_id.to_be_bytes());
        bytes.extend_from_slice(&self.epoch.to_be_bytes());
        bytes.extend_from_slice(&(position as u64).to_be_bytes());
        ChangeToken::from_bytes(bytes)
    }

    /// Maps a token to a log position. `None` means the start of the log.
    pub fn resolve(&self, token: Option<&ChangeToken>) -> Result<usize, RemoteError> {
        let Some(token) = token else {
            return Ok(0);
        };
        let expired = || {
            RemoteError::new(
                RemoteErrorCode::ChangeTokenExpired,
                "change token is no longer valid",
            )
        };
        let bytes = token.as_bytes();
        if bytes.len() != TOKEN_LEN {
            return Err(expired());
        }
        let field = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            u64::from_be_bytes(buf)
        };
        let (log_id, epoch, position) = (field(0), field(1), field(2));
        if log_id != self.log_id || epoch != self.epoch {
            return Err(expired());
        }
        usize::try_from(position)
            .ok()
            .filter(|p| *p <= self.entries.len())
            .ok_or_else(expired)
    }

    /// Returns up to `limit` entries after `position`.
    pub fn page(&self, position: usize, limit: usize) -> LogPage<'_, E> {
        let start = position.min(self.entries.len());
        let end = start.saturating_add(limit).min(self.entries.len());
        LogPage {
            entries: &self.entries[start..end],
            token: self.token_at(end),
            more_coming: end < self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_walks_the_log() {
        let mut log = ChangeLog::new(1);
        for i in 0..5 {
            log.append(i);
        }

        let first = log.page(0, 2);
        assert_eq!(first.entries, &[0, 1]);
        assert!(first.more_coming);

        let pos = log.resolve(Some(&first.token)).unwrap();
        let second = log.page(pos, 10);
        assert_eq!(second.entries, &[2, 3, 4]);
        assert!(!second.more_coming);

        let pos = log.resolve(Some(&second.token)).unwrap();
        assert!(log.page(pos, 10).entries.is_empty());
    }

    #[test]
    fn none_token_is_start() {
        let log: ChangeLog<u8> = ChangeLog::new(1);
        assert_eq!(log.resolve(None).unwrap(), 0);
    }

    #[test]
    fn expired_epoch_rejects_old_tokens() {
        let mut log = ChangeLog::new(1);
        log.append("a");
        let token = log.page(0, 10).token;
        log.expire_tokens();

        let err = log.resolve(Some(&token)).unwrap_err();
        assert_eq!(err.code, RemoteErrorCode::ChangeTokenExpired);

        let fresh = log.page(0, 10).token;
        assert_eq!(log.resolve(Some(&fresh)).unwrap(), 1);
    }

    #[test]
    fn foreign_or_garbage_tokens_rejected() {
        let mut a = ChangeLog::new(1);
        let b: ChangeLog<&str> = ChangeLog::new(2);
        a.append("x");
        let token = a.page(0, 1).token;

        assert!(b.resolve(Some(&token)).is_err());
        assert!(a
            .resolve(Some(&ChangeToken::from_bytes(vec![1, 2, 3])))
            .is_err());
    }
}
