//! Zone, change token, subscription and account identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a remote record zone (a partition sharing one change-token scope).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneId(String);

impl ZoneId {
    /// Name of the zone heart-rate records live in.
    pub const DEFAULT_NAME: &'static str = "HeartRate";

    /// Creates a zone id from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the zone heart-rate records are stored in.
    #[must_use]
    pub fn default_zone() -> Self {
        Self::new(Self::DEFAULT_NAME)
    }

    /// Returns the zone name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque, server-issued position in a change feed.
///
/// Tokens are stored and compared by equality only; their bytes are never
/// interpreted on the client.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(#[serde(with = "serde_bytes_vec")] Vec<u8>);

impl ChangeToken {
    /// Wraps raw token bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeToken(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

// Serializes as a CBOR byte string rather than an array of integers.
mod serde_bytes_vec {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
                Ok(v)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
                let mut out = Vec::new();
                while let Some(byte) = seq.next_element()? {
                    out.push(byte);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}

/// The identifier of the signed-in remote account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Creates an account id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A database-wide push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription identifier.
    pub id: String,
    /// Request silent (content-available) delivery.
    pub content_available: bool,
}

impl Subscription {
    /// Identifier of the subscription for any private database change.
    pub const DATABASE_CHANGES_ID: &'static str = "shared-changes";

    /// Creates a silent subscription for any change in the private database.
    pub fn database_changes(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_available: true,
        }
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::database_changes(Self::DATABASE_CHANGES_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_cbor, to_cbor};

    #[test]
    fn default_zone_name() {
        assert_eq!(ZoneId::default_zone().name(), "HeartRate");
        assert_eq!(ZoneId::new("x").to_string(), "x");
    }

    #[test]
    fn change_token_is_cbor_byte_string() {
        let token = ChangeToken::from_bytes(vec![1, 2, 3]);
        let bytes = to_cbor(&token).unwrap();
        // 0x43 = byte string of length 3
        assert_eq!(bytes, vec![0x43, 1, 2, 3]);
        let decoded: ChangeToken = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn change_token_debug_is_hex() {
        let token = ChangeToken::from_bytes(vec![0xab, 0x01]);
        assert_eq!(format!("{token:?}"), "ChangeToken(ab01)");
    }

    #[test]
    fn default_subscription_is_silent() {
        let sub = Subscription::default();
        assert_eq!(sub.id, "shared-changes");
        assert!(sub.content_available);
    }
}
