//! CBOR encoding and decoding.

use crate::error::{CodecError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::EncodingFailed {
        message: e.to_string(),
    })?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
///
/// Trailing bytes after the first item are rejected.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR for `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    let mut reader = bytes;
    let value = ciborium::from_reader(&mut reader).map_err(|e| CodecError::DecodingFailed {
        message: e.to_string(),
    })?;
    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes {
            count: reader.len(),
        });
    }
    Ok(value)
}
