//! Live telemetry between the watch and the phone.
//!
//! The watch side runs a [`WorkoutRelay`], which streams samples from a
//! [`WorkoutSession`] and sends one heart-rate message per sample. The phone
//! side runs a [`TelemetryBridge`], which turns each heart-rate message into
//! an ordinary record save through the [`RecordManager`]. Observers only
//! ever see the reconciled view, never raw samples.

use crate::channel::MessageChannel;
use crate::error::CoreResult;
use crate::manager::RecordManager;
use crate::message::{Payload, WatchMessage};
use crate::workout::{WorkoutConfig, WorkoutSession};
use futures::StreamExt;
use heartsync_protocol::HeartRateRecord;
use parking_lot::RwLock;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Streams workout samples to the paired device.
pub struct WorkoutRelay {
    workout: Arc<dyn WorkoutSession>,
    channel: Arc<dyn MessageChannel>,
}

impl WorkoutRelay {
    /// Creates a relay from `workout` to `channel`.
    pub fn new(workout: Arc<dyn WorkoutSession>, channel: Arc<dyn MessageChannel>) -> Self {
        Self { workout, channel }
    }

    /// Starts the workout and relays samples captured at or after `since`
    /// until the workout stops. Returns the number of samples relayed.
    ///
    /// Start, stop and failure notices are transferred so they survive the
    /// peer being unreachable; samples are sent best effort.
    pub async fn run(&self, config: &WorkoutConfig, since: OffsetDateTime) -> CoreResult<usize> {
        if let Err(err) = self.workout.start(config) {
            tracing::warn!(error = %err, "workout did not start");
            self.channel
                .transfer(WatchMessage::WorkoutFailed(err.to_string()).to_payload());
            return Err(err);
        }
        self.channel.transfer(WatchMessage::WorkoutStarted.to_payload());

        let mut samples = self.workout.stream_samples(since);
        let mut relayed = 0;
        while let Some(sample) = samples.next().await {
            let message = WatchMessage::HeartRate {
                value: sample.value,
                timestamp: sample.timestamp,
            };
            if !self.channel.send(message.to_payload()) {
                tracing::debug!(value = sample.value, "sample dropped, peer unreachable");
            }
            relayed += 1;
        }

        self.channel.transfer(WatchMessage::WorkoutStopped.to_payload());
        tracing::info!(relayed, "workout relay finished");
        Ok(relayed)
    }
}

/// What the phone knows about the watch workout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MonitorState {
    /// No workout is running.
    #[default]
    NotStarted,
    /// A workout is running and samples are arriving.
    Running,
    /// The workout failed.
    Failed(String),
}

/// Saves heart-rate messages from the paired device as records.
#[derive(Debug)]
pub struct TelemetryBridge {
    state: Arc<RwLock<MonitorState>>,
    task: JoinHandle<()>,
}

impl TelemetryBridge {
    /// Subscribes to `channel` and spawns the task handling its messages.
    ///
    /// Messages are handled one at a time in arrival order.
    pub fn spawn(manager: RecordManager, channel: &dyn MessageChannel) -> Self {
        let state = Arc::new(RwLock::new(MonitorState::NotStarted));
        let task = tokio::spawn(Self::run(manager, channel.subscribe(), Arc::clone(&state)));
        Self { state, task }
    }

    async fn run(
        manager: RecordManager,
        mut messages: mpsc::UnboundedReceiver<Payload>,
        state: Arc<RwLock<MonitorState>>,
    ) {
        while let Some(payload) = messages.recv().await {
            let message = match WatchMessage::from_payload(&payload) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring device message");
                    continue;
                }
            };
            let next = match message {
                WatchMessage::HeartRate { value, timestamp } => {
                    let _ = manager.save(vec![HeartRateRecord::new(value, timestamp)]);
                    MonitorState::Running
                }
                WatchMessage::WorkoutStarted => MonitorState::Running,
                WatchMessage::WorkoutStopped => MonitorState::NotStarted,
                WatchMessage::WorkoutFailed(reason) => {
                    tracing::warn!(%reason, "watch workout failed");
                    MonitorState::Failed(reason)
                }
            };
            *state.write() = next;
        }
        tracing::debug!("device channel closed");
    }

    /// Returns the current monitor state.
    pub fn state(&self) -> MonitorState {
        self.state.read().clone()
    }

    /// Stops handling messages.
    pub fn stop(self) {
        self.task.abort();
    }
}
