//! Key serialization plug-ins.
//!
//! The core never interprets a key beyond the bytes a `Serializer`
//! produces: ordering is decided on the deserialized `K: Ord`, and
//! Record/Reference entries carry a length prefix so padding is never
//! mistaken for data. The tree only depends on the trait below, so a
//! caller can plug in any key type it can serialize to a fixed-size
//! byte string.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{IndexError as Error, Result};

/// Encodes and decodes a fixed-max-size key for storage inside a
/// Record or Reference entry.
pub trait Serializer<K> {
    /// Serialize `key` to at most `key_size` bytes.
    fn serialize(&self, key: &K, key_size: usize) -> Result<Vec<u8>>;

    /// Inverse of `serialize`. `bytes` is exactly the slice that was
    /// produced by `serialize` (length-prefixed by the caller, so no
    /// trailing zero padding leaks in here).
    fn deserialize(&self, bytes: &[u8]) -> Result<K>;
}

/// Serializes `u64` keys as fixed-width little-endian integers,
/// zero-extended to `key_size` bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntSerializer;

impl Serializer<u64> for IntSerializer {
    fn serialize(&self, key: &u64, key_size: usize) -> Result<Vec<u8>> {
        if key_size < 8 {
            return Err(Error::invalid_argument(format!(
                "key_size {key_size} is too small to hold a u64 key"
            )));
        }
        let mut out = vec![0u8; key_size];
        out[..8].copy_from_slice(&key.to_le_bytes());
        Ok(out)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<u64> {
        if bytes.len() < 8 {
            return Err(Error::invalid_argument(
                "key bytes too short to hold a u64 key",
            ));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        Ok(u64::from_le_bytes(buf))
    }
}

/// Serializes UTF-8 strings verbatim, truncation-safe: `serialize`
/// rejects strings longer than `key_size` rather than silently cutting
/// a multi-byte character in half.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrSerializer;

impl Serializer<String> for StrSerializer {
    fn serialize(&self, key: &String, key_size: usize) -> Result<Vec<u8>> {
        let bytes = key.as_bytes();
        if bytes.len() > key_size {
            return Err(Error::invalid_argument(format!(
                "key {key:?} is {} bytes, exceeds key_size {key_size}",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::invalid_argument(format!("key bytes are not valid UTF-8: {e}")))
    }
}

/// Serializes 128-bit UUIDs as their raw big-endian byte representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSerializer;

impl Serializer<Uuid> for UuidSerializer {
    fn serialize(&self, key: &Uuid, key_size: usize) -> Result<Vec<u8>> {
        if key_size < 16 {
            return Err(Error::invalid_argument(format!(
                "key_size {key_size} is too small to hold a UUID key"
            )));
        }
        Ok(key.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Uuid> {
        Uuid::from_slice(bytes)
            .map_err(|e| Error::invalid_argument(format!("key bytes are not a UUID: {e}")))
    }
}

/// Serializes UTC timestamps as nanoseconds-since-epoch, little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatetimeSerializer;

impl Serializer<DateTime<Utc>> for DatetimeSerializer {
    fn serialize(&self, key: &DateTime<Utc>, key_size: usize) -> Result<Vec<u8>> {
        if key_size < 8 {
            return Err(Error::invalid_argument(format!(
                "key_size {key_size} is too small to hold a datetime key"
            )));
        }
        let nanos = key
            .timestamp_nanos_opt()
            .ok_or_else(|| Error::invalid_argument("datetime out of range for nanosecond encoding"))?;
        let mut out = vec![0u8; key_size];
        out[..8].copy_from_slice(&nanos.to_le_bytes());
        Ok(out)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<DateTime<Utc>> {
        if bytes.len() < 8 {
            return Err(Error::invalid_argument(
                "key bytes too short to hold a datetime key",
            ));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        let nanos = i64::from_le_bytes(buf);
        DateTime::from_timestamp(nanos / 1_000_000_000, (nanos.rem_euclid(1_000_000_000)) as u32)
            .ok_or_else(|| Error::invalid_argument("datetime key out of range"))
    }
}
