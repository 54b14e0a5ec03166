//! Reset command implementation.

use heartsync_engine::StagingStore;
use heartsync_storage::FileStore;
use std::path::Path;
use std::sync::Arc;

/// Runs the reset command.
pub fn run(path: &Path, confirmed: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirmed {
        return Err("Reset removes every staged record and queued change; pass --yes".into());
    }
    if !path.exists() {
        return Err(format!("No data found at {:?}", path).into());
    }

    let staging = StagingStore::new(Arc::new(FileStore::open(path)?));
    let pending = staging.load_sync_state();
    staging.clear()?;
    println!(
        "Reset {} (dropped {} pending saves, {} pending deletes)",
        path.display(),
        pending.pending_saves.len(),
        pending.pending_deletes.len()
    );
    Ok(())
}
