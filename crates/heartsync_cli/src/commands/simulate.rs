//! Simulate command implementation.
//!
//! Opens the data directory as the app would, connects it to a fresh
//! in-memory remote and runs one sync session: launch, an optional live
//! workout, a queue drain and a background fetch.

use super::runtime;
use heartsync_core::{
    AppConfig, CoreResult, HeartSyncApp, LocalChannel, Sample, SimulatedWorkout,
    TelemetryBridge, WorkoutConfig, WorkoutRelay, WorkoutSession,
};
use heartsync_engine::FetchResult;
use heartsync_protocol::{AccountId, ZoneId};
use heartsync_server::{CloudServer, OperationKind, ServerConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Outcome of a simulated session.
#[derive(Debug, Serialize)]
pub struct SimulateResult {
    /// Account signed in on the remote.
    pub account: String,
    /// Samples streamed from the simulated workout.
    pub samples_streamed: usize,
    /// Pending saves before the session.
    pub pending_saves_before: usize,
    /// Pending deletes before the session.
    pub pending_deletes_before: usize,
    /// Whether the final drain succeeded.
    pub drained: bool,
    /// Whether the background fetch finished in time.
    pub fetched_new_data: bool,
    /// Operations still pending afterwards.
    pub pending_after: usize,
    /// Records cached locally afterwards.
    pub local_records: usize,
    /// Records stored remotely afterwards.
    pub remote_records: usize,
    /// Remote calls by operation.
    pub calls: BTreeMap<&'static str, usize>,
}

/// Runs the simulate command.
pub fn run(
    path: &Path,
    samples: usize,
    account: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = runtime()?.block_on(simulate(path, samples, account))?;

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

async fn simulate(path: &Path, samples: usize, account: &str) -> CoreResult<SimulateResult> {
    let server = CloudServer::new(ServerConfig::new()).with_account(AccountId::new(account));
    let app = HeartSyncApp::open_dir(path, AppConfig::new(), Arc::new(server.clone()))?;
    let before = app.sync_state().await?;

    app.did_finish_launching();
    let samples_streamed = if samples > 0 {
        stream_workout(&app, samples).await?
    } else {
        0
    };
    let drained = app.engine().drain_pending().await;
    let fetched = app.background_fetch().await;
    let after = app.sync_state().await?;

    let result = SimulateResult {
        account: account.to_string(),
        samples_streamed,
        pending_saves_before: before.pending_saves.len(),
        pending_deletes_before: before.pending_deletes.len(),
        drained,
        fetched_new_data: fetched == FetchResult::NewData,
        pending_after: after.pending_saves.len() + after.pending_deletes.len(),
        local_records: app.records().len(),
        remote_records: server
            .records(&ZoneId::default_zone())
            .map(|r| r.len())
            .unwrap_or(0),
        calls: OperationKind::ALL
            .iter()
            .map(|kind| (kind.name(), server.call_count(*kind)))
            .collect(),
    };
    app.shutdown().await;
    Ok(result)
}

/// Streams `samples` one-second-apart samples through a relay and bridge
/// pair and waits until every one is saved.
async fn stream_workout(app: &HeartSyncApp, samples: usize) -> CoreResult<usize> {
    let (watch, phone) = LocalChannel::pair();
    let bridge = TelemetryBridge::spawn(app.records().clone(), &phone);
    let workout = Arc::new(SimulatedWorkout::new());
    let relay = WorkoutRelay::new(workout.clone(), Arc::new(watch));
    let start = OffsetDateTime::now_utc();
    let expected = app.records().len() + samples;

    let run = tokio::spawn(async move { relay.run(&WorkoutConfig::default(), start).await });
    while !workout.is_running() && !run.is_finished() {
        tokio::task::yield_now().await;
    }
    for i in 0..samples {
        let value = 60 + (i % 40) as i64;
        workout.capture(Sample::new(value, start + time::Duration::seconds(i as i64)));
    }
    workout.stop();

    let relayed = match run.await {
        Ok(result) => result?,
        Err(err) => {
            tracing::error!(error = %err, "workout relay task failed");
            0
        }
    };

    let saved = tokio::time::timeout(Duration::from_secs(5), async {
        while app.records().len() < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if saved.is_err() {
        tracing::warn!(relayed, "not every sample was saved before the timeout");
    }
    bridge.stop();
    Ok(relayed)
}

fn print_text_output(result: &SimulateResult) {
    println!("HeartSync Simulated Sync");
    println!("========================");
    println!();
    println!("Account: {}", result.account);
    println!();
    println!("Before:");
    println!("  Pending saves:   {}", result.pending_saves_before);
    println!("  Pending deletes: {}", result.pending_deletes_before);
    println!();
    println!("Session:");
    println!("  Samples streamed: {}", result.samples_streamed);
    println!("  Drained:          {}", result.drained);
    println!("  Fetched:          {}", result.fetched_new_data);
    println!();
    println!("After:");
    println!("  Pending:         {}", result.pending_after);
    println!("  Local records:   {}", result.local_records);
    println!("  Remote records:  {}", result.remote_records);
    println!();
    println!("Remote calls:");
    for (name, count) in &result.calls {
        println!("  {:<24} {}", name, count);
    }
}
