//! CLI command implementations.

pub mod inspect;
pub mod record;
pub mod reset;
pub mod simulate;

use heartsync_protocol::HeartRateRecord;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;

/// A record as printed by the commands.
#[derive(Debug, Serialize)]
pub struct RecordRow {
    /// Record id.
    pub id: String,
    /// Beats per minute.
    pub value: i64,
    /// Capture time, RFC 3339.
    pub timestamp: String,
}

impl From<&HeartRateRecord> for RecordRow {
    fn from(record: &HeartRateRecord) -> Self {
        Self {
            id: record.id.to_string(),
            value: record.value,
            timestamp: record
                .timestamp
                .format(&Rfc3339)
                .unwrap_or_else(|_| record.timestamp.to_string()),
        }
    }
}

/// Builds the current-thread runtime the async commands run on.
pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}
