//! # HeartSync Core
//!
//! The application layer of HeartSync: the authoritative record set, the
//! live telemetry path from the watch and the wiring that ties both to the
//! sync engine.
//!
//! This crate provides:
//! - [`RecordManager`]: the record map, its sorted published view and
//!   observers for records, account changes and dropped conflicts
//! - [`MessageChannel`] and [`LocalChannel`]: the device-to-device link
//! - [`WorkoutSession`], [`WorkoutRelay`] and [`TelemetryBridge`]: samples
//!   streamed from a workout and saved as ordinary records
//! - [`HeartSyncApp`]: startup and lifecycle hooks
//!
//! ## Data flow
//!
//! ```text
//! WorkoutSession -> WorkoutRelay -> MessageChannel -> TelemetryBridge
//!                                                          |
//!                                                          v
//!   observers <- published view <- RecordManager <-> SyncEngine <-> remote
//! ```
//!
//! The published view is always the values of the record map sorted newest
//! first. Local mutations republish it immediately; remote changes are
//! merged as they arrive and republished once their page has settled.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod app;
mod channel;
mod config;
mod error;
mod manager;
mod message;
mod telemetry;
mod workout;

pub use app::HeartSyncApp;
pub use channel::{LocalChannel, MessageChannel};
pub use config::{AccountChangePolicy, AppConfig, ManagerConfig};
pub use error::{CoreError, CoreResult};
pub use manager::{ObserverId, RecordManager, RecordsView};
pub use message::{keys, Payload, PayloadValue, WatchMessage};
pub use telemetry::{MonitorState, TelemetryBridge, WorkoutRelay};
pub use workout::{
    Activity, Location, Sample, SampleStream, SimulatedWorkout, WorkoutConfig, WorkoutSession,
};

/// The crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
