//! Messages exchanged between the watch and the phone.
//!
//! On the wire a message is a [`Payload`]: a map from well-known string keys
//! to values. A workout control message carries a single flag; a heart-rate
//! message carries both the value and the capture time.

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Well-known payload keys.
pub mod keys {
    /// Workout started on the watch.
    pub const WORKOUT_START: &str = "Workout.start";
    /// Workout stopped on the watch.
    pub const WORKOUT_STOP: &str = "Workout.stop";
    /// Workout failed; the value is the reason.
    pub const WORKOUT_ERROR: &str = "Workout.error";
    /// Beats per minute of a heart-rate sample.
    pub const HEART_RATE_VALUE: &str = "HeartRate.value";
    /// Capture time of a heart-rate sample.
    pub const HEART_RATE_TIMESTAMP: &str = "HeartRate.timestamp";
}

/// A value stored under a payload key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadValue {
    /// A flag.
    Flag(bool),
    /// A signed integer.
    Integer(i64),
    /// A point in time.
    Timestamp(OffsetDateTime),
    /// Free text.
    Text(String),
}

/// A message as carried by a [`MessageChannel`](crate::MessageChannel).
pub type Payload = BTreeMap<String, PayloadValue>;

/// A decoded device message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    /// The watch started a workout.
    WorkoutStarted,
    /// The watch stopped the workout.
    WorkoutStopped,
    /// The workout could not be started or failed while running.
    WorkoutFailed(String),
    /// A heart-rate sample captured during the workout.
    HeartRate {
        /// Beats per minute.
        value: i64,
        /// Capture time.
        timestamp: OffsetDateTime,
    },
}

impl WatchMessage {
    /// Encodes the message as a payload.
    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        match self {
            WatchMessage::WorkoutStarted => {
                payload.insert(keys::WORKOUT_START.into(), PayloadValue::Flag(true));
            }
            WatchMessage::WorkoutStopped => {
                payload.insert(keys::WORKOUT_STOP.into(), PayloadValue::Flag(true));
            }
            WatchMessage::WorkoutFailed(reason) => {
                payload.insert(keys::WORKOUT_ERROR.into(), PayloadValue::Text(reason.clone()));
            }
            WatchMessage::HeartRate { value, timestamp } => {
                payload.insert(keys::HEART_RATE_VALUE.into(), PayloadValue::Integer(*value));
                payload.insert(
                    keys::HEART_RATE_TIMESTAMP.into(),
                    PayloadValue::Timestamp(*timestamp),
                );
            }
        }
        payload
    }

    /// Decodes a payload.
    ///
    /// A heart-rate sample takes precedence over workout control keys,
    /// and a stop over a start.
    pub fn from_payload(payload: &Payload) -> CoreResult<Self> {
        let value = payload.get(keys::HEART_RATE_VALUE);
        let timestamp = payload.get(keys::HEART_RATE_TIMESTAMP);
        match (value, timestamp) {
            (Some(PayloadValue::Integer(value)), Some(PayloadValue::Timestamp(timestamp))) => {
                return Ok(WatchMessage::HeartRate {
                    value: *value,
                    timestamp: *timestamp,
                });
            }
            (None, None) => {}
            (Some(_), Some(_)) => {
                return Err(CoreError::invalid_message("mistyped heart-rate fields"));
            }
            (None, Some(_)) => {
                return Err(CoreError::invalid_message(format!(
                    "missing {}",
                    keys::HEART_RATE_VALUE
                )));
            }
            (Some(_), None) => {
                return Err(CoreError::invalid_message(format!(
                    "missing {}",
                    keys::HEART_RATE_TIMESTAMP
                )));
            }
        }

        if payload.contains_key(keys::WORKOUT_STOP) {
            return Ok(WatchMessage::WorkoutStopped);
        }
        if payload.contains_key(keys::WORKOUT_START) {
            return Ok(WatchMessage::WorkoutStarted);
        }
        match payload.get(keys::WORKOUT_ERROR) {
            Some(PayloadValue::Text(reason)) => Ok(WatchMessage::WorkoutFailed(reason.clone())),
            Some(_) => Ok(WatchMessage::WorkoutFailed("unknown error".into())),
            None => Err(CoreError::invalid_message("no recognized keys")),
        }
    }
}
