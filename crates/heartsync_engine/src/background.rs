//! Background fetch bounded by an external deadline.

use crate::config::BackgroundFetchConfig;
use crate::engine::SyncEngine;

/// What a background fetch reports to the scheduler that granted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResult {
    /// The fetch finished within the deadline.
    NewData,
    /// The deadline passed first.
    NoData,
}

/// Fetches changes within `config.deadline`.
///
/// After the fetch completes, outstanding work gets `config.grace` to finish
/// its bookkeeping. If the deadline passes first the result is
/// [`FetchResult::NoData`]; the fetch itself keeps running on the engine.
pub async fn background_fetch(engine: &SyncEngine, config: &BackgroundFetchConfig) -> FetchResult {
    let work = async {
        let ok = engine.fetch_changes().await;
        tokio::time::sleep(config.grace).await;
        ok
    };
    match tokio::time::timeout(config.deadline, work).await {
        Ok(ok) => {
            tracing::info!(ok, "background fetch finished");
            FetchResult::NewData
        }
        Err(_) => {
            tracing::warn!(deadline = ?config.deadline, "background fetch ran out of time");
            FetchResult::NoData
        }
    }
}
