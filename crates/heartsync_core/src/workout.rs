//! Workout sessions producing live heart-rate samples.

use crate::error::{CoreError, CoreResult};
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// Kind of activity being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activity {
    /// Walking.
    #[default]
    Walking,
    /// Running.
    Running,
    /// Cycling.
    Cycling,
}

/// Where the activity takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    /// Indoors.
    Indoor,
    /// Outdoors.
    #[default]
    Outdoor,
}

/// How a workout session is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkoutConfig {
    /// Activity type.
    pub activity: Activity,
    /// Location type.
    pub location: Location,
}

/// One heart-rate measurement from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Beats per minute.
    pub value: i64,
    /// Capture time.
    pub timestamp: OffsetDateTime,
}

impl Sample {
    /// Creates a sample.
    pub fn new(value: i64, timestamp: OffsetDateTime) -> Self {
        Self { value, timestamp }
    }
}

/// A sensor session that captures heart-rate samples while running.
pub trait WorkoutSession: Send + Sync {
    /// Starts the session.
    fn start(&self, config: &WorkoutConfig) -> CoreResult<()>;

    /// Stops the session. Open sample streams end.
    fn stop(&self);

    /// Returns true while the session is running.
    fn is_running(&self) -> bool;

    /// Streams samples captured at or after `since`, then every new sample
    /// until the session stops.
    fn stream_samples(&self, since: OffsetDateTime) -> SampleStream;
}

/// A live stream of samples, in capture order.
#[derive(Debug)]
pub struct SampleStream {
    receiver: mpsc::UnboundedReceiver<Sample>,
}

impl SampleStream {
    /// Wraps a receiver fed by a session.
    pub fn new(receiver: mpsc::UnboundedReceiver<Sample>) -> Self {
        Self { receiver }
    }
}

impl Stream for SampleStream {
    type Item = Sample;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Sample>> {
        self.receiver.poll_recv(cx)
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    running: bool,
    config: Option<WorkoutConfig>,
    samples: Vec<Sample>,
    streams: Vec<mpsc::UnboundedSender<Sample>>,
    fail_next_start: Option<String>,
}

/// A workout session fed by hand, for tests and the command-line simulator.
#[derive(Debug, Default)]
pub struct SimulatedWorkout {
    state: Mutex<SimulatedState>,
}

impl SimulatedWorkout {
    /// Creates a stopped session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next [`start`](WorkoutSession::start) fail with `reason`.
    pub fn fail_next_start(&self, reason: impl Into<String>) {
        self.state.lock().fail_next_start = Some(reason.into());
    }

    /// Records a sample as if the sensor captured it.
    ///
    /// Returns false and drops the sample if the session is not running.
    pub fn capture(&self, sample: Sample) -> bool {
        let mut state = self.state.lock();
        if !state.running {
            return false;
        }
        state.samples.push(sample);
        state.streams.retain(|tx| tx.send(sample).is_ok());
        true
    }

    /// Returns every sample captured in the current or last session.
    pub fn samples(&self) -> Vec<Sample> {
        self.state.lock().samples.clone()
    }

    /// Returns the configuration of the current or last session.
    pub fn config(&self) -> Option<WorkoutConfig> {
        self.state.lock().config
    }
}

impl WorkoutSession for SimulatedWorkout {
    fn start(&self, config: &WorkoutConfig) -> CoreResult<()> {
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next_start.take() {
            return Err(CoreError::workout(reason));
        }
        if state.running {
            return Err(CoreError::WorkoutRunning);
        }
        state.running = true;
        state.config = Some(*config);
        state.samples.clear();
        tracing::info!(activity = ?config.activity, location = ?config.location, "workout started");
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if state.running {
            state.running = false;
            state.streams.clear();
            tracing::info!(samples = state.samples.len(), "workout stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn stream_samples(&self, since: OffsetDateTime) -> SampleStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        for sample in state.samples.iter().filter(|s| s.timestamp >= since) {
            let _ = tx.send(*sample);
        }
        if state.running {
            state.streams.push(tx);
        }
        SampleStream::new(rx)
    }
}
