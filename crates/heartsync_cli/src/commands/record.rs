//! Record command implementation.

use super::RecordRow;
use heartsync_engine::StagingStore;
use heartsync_protocol::HeartRateRecord;
use heartsync_storage::FileStore;
use std::path::Path;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Runs the record command.
///
/// The record is added to the local cache and the pending-save queue, as
/// the app does while offline. The next sync pushes it.
pub fn run(path: &Path, value: i64, at: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let timestamp = match at {
        Some(at) => OffsetDateTime::parse(at, &Rfc3339)?,
        None => OffsetDateTime::now_utc(),
    };
    let record = stage(path, HeartRateRecord::new(value, timestamp))?;
    let row = RecordRow::from(&record);
    println!("Staged {} bpm at {} ({})", row.value, row.timestamp, row.id);
    Ok(())
}

fn stage(path: &Path, record: HeartRateRecord) -> Result<HeartRateRecord, Box<dyn std::error::Error>> {
    if record.value <= 0 {
        return Err(format!("Heart rate must be positive, got {}", record.value).into());
    }

    let staging = StagingStore::new(Arc::new(FileStore::open(path)?));
    let mut staged = staging.load();
    staged.records.retain(|r| r.id != record.id);
    staged.records.push(record.clone());
    staged.sync.stage_saves([record.clone()]);

    staging.save_records(&staged.records)?;
    staging.save_queues(&staged.sync)?;
    tracing::debug!(id = %record.id, "record staged");
    Ok(record)
}
