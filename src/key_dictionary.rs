//! Global key-dictionary collaborator.
//!
//! Required only for compressed SSTable records, which store a key id
//! rather than the key bytes. The production dictionary is an external
//! collaborator; this module defines the trait boundary this crate
//! consumes and ships an in-memory implementation sufficient to exercise
//! the compressed record path.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

pub trait KeyDictionary: Send + Sync {
    fn get_entry_id(&self, key: &str) -> Option<u64>;
    fn add_entry(&self, key: &str) -> Result<u64>;
    fn get_key(&self, id: u64) -> Option<String>;
}

#[derive(Default)]
struct Tables {
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

/// In-memory, thread-safe key dictionary. Entries are never evicted, so
/// any compressed record referring to an id remains decodable for the
/// lifetime of the process.
pub struct InMemoryKeyDictionary {
    tables: RwLock<Tables>,
}

impl InMemoryKeyDictionary {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryKeyDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyDictionary for InMemoryKeyDictionary {
    fn get_entry_id(&self, key: &str) -> Option<u64> {
        self.tables.read().key_to_id.get(key).copied()
    }

    fn add_entry(&self, key: &str) -> Result<u64> {
        let mut tables = self.tables.write();
        if let Some(id) = tables.key_to_id.get(key).copied() {
            return Ok(id);
        }
        let id = tables.next_id;
        tables.next_id += 1;
        tables.key_to_id.insert(key.to_string(), id);
        tables.id_to_key.insert(id, key.to_string());
        Ok(id)
    }

    fn get_key(&self, id: u64) -> Option<String> {
        self.tables.read().id_to_key.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_ids() {
        let dict = InMemoryKeyDictionary::new();
        let a = dict.add_entry("a").unwrap();
        let b = dict.add_entry("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(dict.get_entry_id("a"), Some(a));
        assert_eq!(dict.get_key(a), Some("a".to_string()));
        // re-adding is idempotent
        assert_eq!(dict.add_entry("a").unwrap(), a);
    }
}
