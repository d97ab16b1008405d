//! Conversions between message bodies, text and timestamps.
//!
//! All functions are pure. Bodies travel over the wire as standard base64.

use crate::error::SerializationError;
use crate::message::Timestamp;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;

/// Encode text as a message body
pub fn to_bytes(text: &str) -> Bytes {
    Bytes::copy_from_slice(text.as_bytes())
}

/// Decode a message body as UTF-8 text
pub fn from_bytes(body: &[u8]) -> Result<String, SerializationError> {
    std::str::from_utf8(body)
        .map(str::to_string)
        .map_err(|_| SerializationError::InvalidUtf8)
}

/// Convert seconds since the Unix epoch into a timestamp
pub fn from_unix_time(seconds: i64) -> Option<Timestamp> {
    Timestamp::from_unix_seconds(seconds)
}

/// Convert a timestamp into seconds since the Unix epoch
pub fn to_unix_time(timestamp: &Timestamp) -> i64 {
    timestamp.unix_seconds()
}

/// Human-readable rendering of a Unix time, or the raw number if out of range
pub fn format_unix_time(seconds: i64) -> String {
    from_unix_time(seconds)
        .map(|ts| ts.to_string())
        .unwrap_or_else(|| seconds.to_string())
}

/// Encode a body for the wire
pub fn encode_body(body: &[u8]) -> String {
    STANDARD.encode(body)
}

/// Decode a wire body
pub fn decode_body(encoded: &str) -> Result<Bytes, SerializationError> {
    STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|e| SerializationError::InvalidBase64 {
            message: e.to_string(),
        })
}

/// Serde adapter storing `Bytes` as base64 text
pub(crate) mod base64_body {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::encode_body(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        super::decode_body(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "converter_tests.rs"]
mod tests;
