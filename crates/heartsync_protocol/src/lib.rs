//! # HeartSync Protocol
//!
//! Record model, remote wire types and CBOR codecs for HeartSync.
//!
//! This crate provides:
//! - [`HeartRateRecord`] and its remote representation [`RemoteRecord`]
//! - Zone, change token and account identity types
//! - Remote request/response messages and the [`RemoteError`] taxonomy
//! - The [`RemoteDatabase`] trait implemented by remote backends
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;
mod record;
mod remote;
mod zone;

pub use codec::{from_cbor, to_cbor};
pub use error::{CodecError, ProtocolResult, RemoteError, RemoteErrorCode};
pub use messages::{
    DatabaseChanges, ModifyRecords, ModifyRecordsResult, OperationOptions, SavePolicy,
    ZoneChanges, ZoneChangesPage, ZoneFetch,
};
pub use record::{
    sort_newest_first, FieldValue, HeartRateRecord, RecordId, RemoteRecord, HEART_RATE_RECORD_TYPE,
};
pub use remote::RemoteDatabase;
pub use zone::{AccountId, ChangeToken, Subscription, ZoneId};
