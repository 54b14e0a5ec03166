//! Inspect command implementation.

use super::RecordRow;
use heartsync_engine::{StagedState, StagingStore};
use heartsync_protocol::sort_newest_first;
use heartsync_storage::FileStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Staged state summary.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory.
    pub path: String,
    /// Number of records in the local cache.
    pub record_count: usize,
    /// Saves waiting to be pushed.
    pub pending_saves: usize,
    /// Deletes waiting to be pushed.
    pub pending_deletes: usize,
    /// Zones known to exist remotely.
    pub saved_zones: Vec<String>,
    /// Whether the change subscription is registered.
    pub subscription_registered: bool,
    /// Whether a database change token is stored.
    pub has_database_token: bool,
    /// Zones with a stored change token.
    pub zone_tokens: Vec<String>,
    /// Account the state belongs to.
    pub account: Option<String>,
    /// Newest records (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<RecordRow>>,
}

impl InspectResult {
    fn new(path: &Path, mut staged: StagedState, show_records: bool, limit: usize) -> Self {
        sort_newest_first(&mut staged.records);
        let sync = staged.sync;
        Self {
            path: path.display().to_string(),
            record_count: staged.records.len(),
            pending_saves: sync.pending_saves.len(),
            pending_deletes: sync.pending_deletes.len(),
            saved_zones: sync.saved_zones.iter().map(|z| z.to_string()).collect(),
            subscription_registered: sync.subscription_registered,
            has_database_token: sync.database_token.is_some(),
            zone_tokens: sync.zone_tokens.keys().map(|z| z.to_string()).collect(),
            account: sync.account.map(|a| a.to_string()),
            records: show_records
                .then(|| staged.records.iter().take(limit).map(RecordRow::from).collect()),
        }
    }
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_records: bool,
    limit: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No data found at {:?}", path).into());
    }

    let staging = StagingStore::new(Arc::new(FileStore::open(path)?));
    let result = InspectResult::new(path, staging.load(), show_records, limit);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("HeartSync Data Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!("Account: {}", result.account.as_deref().unwrap_or("(none)"));
    println!();
    println!("Records:");
    println!("  Cached:          {}", result.record_count);
    println!("  Pending saves:   {}", result.pending_saves);
    println!("  Pending deletes: {}", result.pending_deletes);
    println!();
    println!("Sync:");
    println!("  Saved zones:     {}", join_or_none(&result.saved_zones));
    println!("  Subscription:    {}", result.subscription_registered);
    println!("  Database token:  {}", result.has_database_token);
    println!("  Zone tokens:     {}", join_or_none(&result.zone_tokens));

    if let Some(records) = &result.records {
        println!();
        println!("Newest records:");
        for row in records {
            println!("  {}  {:>3} bpm  {}", row.timestamp, row.value, row.id);
        }
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
