//! The record model and its two on-disk layouts.
//!
//! Both layouts share the prefix `[timestamp:8][tombstone:1]`. The
//! uncompressed layout (used for the WAL collaborator and for
//! uncompressed SSTable records) continues with
//! `[keySize:8][valueSize:8][key][value]`, padded with one reserved byte
//! so `size()` lines up with the byte count actually written. The
//! compressed layout continues with `[keyIndex:8]` and, only for
//! non-tombstones, `[valueSize:8][value]`; the key itself lives in the
//! external key dictionary.

use crate::error::{Result, StoreError};
use crate::key_dictionary::KeyDictionary;

/// Fixed header length of the uncompressed layout before key/value bytes.
const UNCOMPRESSED_HEADER_LEN: usize = 26;

/// A single key-value entry, possibly a logical deletion.
///
/// `tombstone == true` marks a logical delete; consumers must ignore
/// `value` in that case even though uncompressed layouts may still carry
/// stale bytes for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
    pub timestamp: u64,
    pub tombstone: bool,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
            tombstone: false,
        }
    }

    pub fn tombstone(key: impl Into<String>, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            timestamp,
            tombstone: true,
        }
    }

    /// Marks the record deleted and clears its payload.
    pub fn mark_deleted(&mut self) {
        self.tombstone = true;
        self.value.clear();
    }

    pub fn is_empty_key(&self) -> bool {
        self.key.is_empty()
    }

    /// Encoded size of the uncompressed layout.
    pub fn size_uncompressed(&self) -> usize {
        UNCOMPRESSED_HEADER_LEN + self.key.len() + self.value.len()
    }

    /// Encoded size of the compressed layout, given the dictionary already
    /// holds this record's key.
    pub fn size_compressed(&self) -> usize {
        if self.tombstone {
            17
        } else {
            25 + self.value.len()
        }
    }

    pub fn serialize_uncompressed(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size_uncompressed());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(self.tombstone as u8);
        buf.push(0); // reserved, always 0
        buf.extend_from_slice(&(self.key.len() as u64).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u64).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&self.value);
        buf
    }

    pub fn deserialize_uncompressed(buf: &[u8]) -> Result<Self> {
        if buf.len() < UNCOMPRESSED_HEADER_LEN {
            return Err(StoreError::CorruptRecord(format!(
                "buffer too short for uncompressed header: {} bytes",
                buf.len()
            )));
        }
        let timestamp = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let tombstone = buf[8] != 0;
        let key_size = u64::from_le_bytes(buf[10..18].try_into().unwrap()) as usize;
        let value_size = u64::from_le_bytes(buf[18..26].try_into().unwrap()) as usize;
        if buf.len() != UNCOMPRESSED_HEADER_LEN + key_size + value_size {
            return Err(StoreError::CorruptRecord(format!(
                "buffer size {} does not match header-declared {}",
                buf.len(),
                UNCOMPRESSED_HEADER_LEN + key_size + value_size
            )));
        }
        let key_start = UNCOMPRESSED_HEADER_LEN;
        let key_end = key_start + key_size;
        let key = String::from_utf8(buf[key_start..key_end].to_vec())
            .map_err(|e| StoreError::CorruptRecord(e.to_string()))?;
        let value = buf[key_end..key_end + value_size].to_vec();
        Ok(Self {
            key,
            value,
            timestamp,
            tombstone,
        })
    }

    /// Serializes using the compressed layout, registering the key with
    /// `dict` if it is not already present.
    pub fn serialize_compressed(&self, dict: &dyn KeyDictionary) -> Result<Vec<u8>> {
        let key_id = match dict.get_entry_id(&self.key) {
            Some(id) => id,
            None => dict.add_entry(&self.key)?,
        };
        let mut buf = Vec::with_capacity(self.size_compressed());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(self.tombstone as u8);
        buf.extend_from_slice(&key_id.to_le_bytes());
        if !self.tombstone {
            buf.extend_from_slice(&(self.value.len() as u64).to_le_bytes());
            buf.extend_from_slice(&self.value);
        }
        Ok(buf)
    }

    /// Deserializes the compressed layout. A key id with no corresponding
    /// dictionary entry is a broken invariant and is fatal, not a
    /// recoverable sentinel.
    pub fn deserialize_compressed(buf: &[u8], dict: &dyn KeyDictionary) -> Result<Self> {
        if buf.len() < 17 {
            return Err(StoreError::CorruptRecord(format!(
                "buffer too short for compressed header: {} bytes",
                buf.len()
            )));
        }
        let timestamp = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let tombstone = buf[8] != 0;
        let key_id = u64::from_le_bytes(buf[9..17].try_into().unwrap());
        let key = dict
            .get_key(key_id)
            .unwrap_or_else(|| panic!("key dictionary missing entry for id {key_id}"));
        if tombstone {
            if buf.len() != 17 {
                return Err(StoreError::CorruptRecord(
                    "trailing bytes after compressed tombstone header".into(),
                ));
            }
            return Ok(Self {
                key,
                value: Vec::new(),
                timestamp,
                tombstone: true,
            });
        }
        if buf.len() < 25 {
            return Err(StoreError::CorruptRecord(
                "buffer too short for compressed value header".into(),
            ));
        }
        let value_size = u64::from_le_bytes(buf[17..25].try_into().unwrap()) as usize;
        if buf.len() != 25 + value_size {
            return Err(StoreError::CorruptRecord(format!(
                "buffer size {} does not match header-declared {}",
                buf.len(),
                25 + value_size
            )));
        }
        let value = buf[25..25 + value_size].to_vec();
        Ok(Self {
            key,
            value,
            timestamp,
            tombstone: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_dictionary::InMemoryKeyDictionary;

    #[test]
    fn uncompressed_round_trip() {
        let r = Record::new("user1", b"v1".to_vec(), 42);
        let buf = r.serialize_uncompressed();
        assert_eq!(buf.len(), r.size_uncompressed());
        let back = Record::deserialize_uncompressed(&buf).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn uncompressed_tombstone_round_trip() {
        let r = Record::tombstone("user1", 42);
        let buf = r.serialize_uncompressed();
        let back = Record::deserialize_uncompressed(&buf).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn compressed_round_trip_value() {
        let dict = InMemoryKeyDictionary::new();
        let r = Record::new("user1", b"v1".to_vec(), 42);
        let buf = r.serialize_compressed(&dict).unwrap();
        assert_eq!(buf.len(), r.size_compressed());
        let back = Record::deserialize_compressed(&buf, &dict).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn compressed_tombstone_erases_value() {
        let dict = InMemoryKeyDictionary::new();
        dict.add_entry("user1").unwrap();
        let r = Record::tombstone("user1", 42);
        let buf = r.serialize_compressed(&dict).unwrap();
        assert_eq!(buf.len(), 17);
        let back = Record::deserialize_compressed(&buf, &dict).unwrap();
        assert_eq!(back.value, Vec::<u8>::new());
        assert!(back.tombstone);
    }

    #[test]
    fn corrupt_buffer_is_rejected() {
        let err = Record::deserialize_uncompressed(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord(_)));
    }
}
