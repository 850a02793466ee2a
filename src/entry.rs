//! Fixed-width entry codecs stored inside node payloads.
//!
//! A `Record` carries a key and either an inline value or a pointer to an
//! overflow chain. A `Reference` carries a key flanked by the page numbers
//! of the children on either side of it. `OpaqueData` is a single blob that
//! fills the rest of a page, used by overflow chunks.
//!
//! Every entry caches the bytes it was decoded from; `dump` returns that
//! cache verbatim until a setter invalidates it, so re-serializing an
//! untouched entry is a clone rather than a re-encode.

use std::cmp::Ordering;

use crate::error::{IndexError, Result};
use crate::serializer::Serializer;
use crate::types::{
    PageId, TreeConfig, PAGE_REFERENCE_BYTES, USED_KEY_LENGTH_BYTES, USED_VALUE_LENGTH_BYTES,
};

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn pad(out: &mut Vec<u8>, used: usize, total: usize) {
    out.resize(out.len() + (total - used), 0);
}

/// Where a Record's value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    /// Value stored inline, within `value_size` bytes.
    Inline(Vec<u8>),
    /// Value too large to inline; points at the head of an overflow chain.
    Overflow(PageId),
}

/// A key/value pair stored in a Leaf or LonelyRoot node.
#[derive(Debug, Clone)]
pub struct Record<K> {
    pub key: K,
    pub value: RecordValue,
    raw: Option<Vec<u8>>,
}

impl<K: Ord> PartialEq for Record<K> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<K: Ord> Eq for Record<K> {}
impl<K: Ord> PartialOrd for Record<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<K: Ord> Ord for Record<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl<K> Record<K> {
    pub fn new(key: K, value: RecordValue) -> Self {
        Self {
            key,
            value,
            raw: None,
        }
    }

    /// Width in bytes of a Record entry under `conf`, independent of the
    /// actual key and value it holds.
    pub fn encoded_len(conf: &TreeConfig) -> usize {
        USED_KEY_LENGTH_BYTES + conf.key_size + USED_VALUE_LENGTH_BYTES + conf.value_size
            + PAGE_REFERENCE_BYTES
    }

    pub fn load(conf: &TreeConfig, serializer: &dyn Serializer<K>, data: &[u8]) -> Result<Self> {
        let expected = Self::encoded_len(conf);
        if data.len() != expected {
            return Err(IndexError::corrupt(format!(
                "record entry is {} bytes, expected {expected}",
                data.len()
            )));
        }

        let mut pos = 0;
        let used_key_len = read_u16(&data[pos..pos + USED_KEY_LENGTH_BYTES]) as usize;
        pos += USED_KEY_LENGTH_BYTES;
        if used_key_len > conf.key_size {
            return Err(IndexError::corrupt(
                "record key length exceeds configured key_size",
            ));
        }
        let key = serializer.deserialize(&data[pos..pos + used_key_len])?;
        pos += conf.key_size;

        let used_value_len = read_u16(&data[pos..pos + USED_VALUE_LENGTH_BYTES]) as usize;
        pos += USED_VALUE_LENGTH_BYTES;
        if used_value_len > conf.value_size {
            return Err(IndexError::corrupt(
                "record value length exceeds configured value_size",
            ));
        }
        let value_start = pos;
        pos += conf.value_size;

        let overflow_page = read_u32(&data[pos..pos + PAGE_REFERENCE_BYTES]);

        let value = if overflow_page != 0 {
            RecordValue::Overflow(PageId::new(overflow_page))
        } else {
            RecordValue::Inline(data[value_start..value_start + used_value_len].to_vec())
        };

        Ok(Self {
            key,
            value,
            raw: Some(data.to_vec()),
        })
    }

    pub fn dump(&self, conf: &TreeConfig, serializer: &dyn Serializer<K>) -> Result<Vec<u8>> {
        if let Some(raw) = &self.raw {
            return Ok(raw.clone());
        }

        let key_bytes = serializer.serialize(&self.key, conf.key_size)?;
        let (inline_value, overflow_page): (&[u8], u32) = match &self.value {
            RecordValue::Inline(v) => (v.as_slice(), 0),
            RecordValue::Overflow(p) => (&[][..], p.value()),
        };

        let mut out = Vec::with_capacity(Self::encoded_len(conf));
        out.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(&key_bytes);
        pad(&mut out, key_bytes.len(), conf.key_size);
        out.extend_from_slice(&(inline_value.len() as u16).to_le_bytes());
        out.extend_from_slice(inline_value);
        pad(&mut out, inline_value.len(), conf.value_size);
        out.extend_from_slice(&overflow_page.to_le_bytes());
        Ok(out)
    }

    /// Replace the key, invalidating the cached encoding.
    pub fn set_key(&mut self, key: K) {
        self.key = key;
        self.raw = None;
    }

    /// Replace the value, invalidating the cached encoding.
    pub fn set_value(&mut self, value: RecordValue) {
        self.value = value;
        self.raw = None;
    }
}

/// A reference to the two children flanking `key` inside an internal or
/// root node: everything `< key` lives at or under `before`, everything
/// `>= key` at or under `after`.
#[derive(Debug, Clone)]
pub struct Reference<K> {
    pub key: K,
    pub before: PageId,
    pub after: PageId,
    raw: Option<Vec<u8>>,
}

impl<K: Ord> PartialEq for Reference<K> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<K: Ord> Eq for Reference<K> {}
impl<K: Ord> PartialOrd for Reference<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<K: Ord> Ord for Reference<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl<K> Reference<K> {
    pub fn new(key: K, before: PageId, after: PageId) -> Self {
        Self {
            key,
            before,
            after,
            raw: None,
        }
    }

    pub fn encoded_len(conf: &TreeConfig) -> usize {
        2 * PAGE_REFERENCE_BYTES + USED_KEY_LENGTH_BYTES + conf.key_size
    }

    pub fn load(conf: &TreeConfig, serializer: &dyn Serializer<K>, data: &[u8]) -> Result<Self> {
        let expected = Self::encoded_len(conf);
        if data.len() != expected {
            return Err(IndexError::corrupt(format!(
                "reference entry is {} bytes, expected {expected}",
                data.len()
            )));
        }

        let mut pos = 0;
        let before = PageId::new(read_u32(&data[pos..pos + PAGE_REFERENCE_BYTES]));
        pos += PAGE_REFERENCE_BYTES;

        let used_key_len = read_u16(&data[pos..pos + USED_KEY_LENGTH_BYTES]) as usize;
        pos += USED_KEY_LENGTH_BYTES;
        if used_key_len > conf.key_size {
            return Err(IndexError::corrupt(
                "reference key length exceeds configured key_size",
            ));
        }
        let key = serializer.deserialize(&data[pos..pos + used_key_len])?;
        pos += conf.key_size;

        let after = PageId::new(read_u32(&data[pos..pos + PAGE_REFERENCE_BYTES]));

        Ok(Self {
            key,
            before,
            after,
            raw: Some(data.to_vec()),
        })
    }

    pub fn dump(&self, conf: &TreeConfig, serializer: &dyn Serializer<K>) -> Result<Vec<u8>> {
        if let Some(raw) = &self.raw {
            return Ok(raw.clone());
        }

        let key_bytes = serializer.serialize(&self.key, conf.key_size)?;
        let mut out = Vec::with_capacity(Self::encoded_len(conf));
        out.extend_from_slice(&self.before.value().to_le_bytes());
        out.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(&key_bytes);
        pad(&mut out, key_bytes.len(), conf.key_size);
        out.extend_from_slice(&self.after.value().to_le_bytes());
        Ok(out)
    }

    pub fn set_before(&mut self, before: PageId) {
        self.before = before;
        self.raw = None;
    }

    pub fn set_after(&mut self, after: PageId) {
        self.after = after;
        self.raw = None;
    }
}

/// A single blob occupying the whole payload of a page: one chunk of an
/// overflow chain, or the empty body of a freelist node.
#[derive(Debug, Clone, Default)]
pub struct OpaqueData {
    pub data: Vec<u8>,
}

impl OpaqueData {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn load(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    pub fn dump(&self) -> Vec<u8> {
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::IntSerializer;

    fn conf() -> TreeConfig {
        TreeConfig::new(4096, 4, 16, 16)
    }

    #[test]
    fn record_round_trips_inline_value() {
        let conf = conf();
        let ser = IntSerializer;
        let record = Record::new(42u64, RecordValue::Inline(b"hello".to_vec()));
        let bytes = record.dump(&conf, &ser).unwrap();
        assert_eq!(bytes.len(), Record::<u64>::encoded_len(&conf));

        let back = Record::<u64>::load(&conf, &ser, &bytes).unwrap();
        assert_eq!(back.key, 42);
        assert_eq!(back.value, RecordValue::Inline(b"hello".to_vec()));
    }

    #[test]
    fn record_round_trips_overflow_pointer() {
        let conf = conf();
        let ser = IntSerializer;
        let record = Record::new(7u64, RecordValue::Overflow(PageId::new(9)));
        let bytes = record.dump(&conf, &ser).unwrap();
        let back = Record::<u64>::load(&conf, &ser, &bytes).unwrap();
        assert_eq!(back.value, RecordValue::Overflow(PageId::new(9)));
    }

    #[test]
    fn record_dump_is_cached_after_load() {
        let conf = conf();
        let ser = IntSerializer;
        let record = Record::new(1u64, RecordValue::Inline(b"x".to_vec()));
        let bytes = record.dump(&conf, &ser).unwrap();
        let loaded = Record::<u64>::load(&conf, &ser, &bytes).unwrap();
        assert_eq!(loaded.dump(&conf, &ser).unwrap(), bytes);
    }

    #[test]
    fn reference_round_trips() {
        let conf = conf();
        let ser = IntSerializer;
        let reference = Reference::new(5u64, PageId::new(1), PageId::new(2));
        let bytes = reference.dump(&conf, &ser).unwrap();
        assert_eq!(bytes.len(), Reference::<u64>::encoded_len(&conf));

        let back = Reference::<u64>::load(&conf, &ser, &bytes).unwrap();
        assert_eq!(back.key, 5);
        assert_eq!(back.before, PageId::new(1));
        assert_eq!(back.after, PageId::new(2));
    }

    #[test]
    fn opaque_data_round_trips() {
        let data = vec![1, 2, 3, 4, 5];
        let opaque = OpaqueData::new(data.clone());
        assert_eq!(opaque.dump(), data);
        assert_eq!(OpaqueData::load(&data).dump(), data);
    }

    #[test]
    fn records_order_by_key() {
        let a = Record::new(1u64, RecordValue::Inline(vec![]));
        let b = Record::new(2u64, RecordValue::Inline(vec![]));
        assert!(a < b);
    }
}
