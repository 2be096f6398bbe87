//! Hash map memtable variant: O(1) point access, on-demand sort for
//! every ordered operation.

use super::{insert_sorted_dedup, transition_delta, MemtableOps};
use crate::error::{Result, StoreError};
use crate::record::Record;
use crate::witness::WitnessSet;
use std::collections::HashMap;

pub struct HashMapMemtable {
    map: HashMap<String, Record>,
    capacity: usize,
    active: usize,
}

impl HashMapMemtable {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            capacity,
            active: 0,
        }
    }

    fn sorted_keys(&self) -> Vec<&String> {
        let mut keys: Vec<&String> = self.map.keys().collect();
        keys.sort();
        keys
    }
}

impl MemtableOps for HashMapMemtable {
    fn put(&mut self, record: Record) -> Result<()> {
        if record.is_empty_key() {
            return Err(StoreError::InvalidArgument("empty key".into()));
        }
        if let Some(old) = self.map.get(&record.key) {
            let delta = transition_delta(old.tombstone, record.tombstone);
            self.active = (self.active as i64 + delta) as usize;
            self.map.insert(record.key.clone(), record);
            return Ok(());
        }
        if self.map.len() >= self.capacity {
            return Err(StoreError::CapacityExceeded);
        }
        if !record.tombstone {
            self.active += 1;
        }
        self.map.insert(record.key.clone(), record);
        Ok(())
    }

    fn delete(&mut self, mut record: Record) -> bool {
        record.mark_deleted();
        // every delete replaces in-place if the key exists, so the newer timestamp always wins even over an
        // existing tombstone.
        if let Some(old) = self.map.get(&record.key) {
            let delta = transition_delta(old.tombstone, true);
            self.active = (self.active as i64 + delta) as usize;
            self.map.insert(record.key.clone(), record);
            true
        } else {
            let _ = self.put(record);
            false
        }
    }

    fn get(&self, key: &str) -> Option<Record> {
        self.map.get(key).and_then(|r| {
            if r.tombstone {
                None
            } else {
                Some(r.clone())
            }
        })
    }

    fn get_including_tombstone(&self, key: &str) -> Option<Record> {
        self.map.get(key).cloned()
    }

    fn next_for_prefix(
        &self,
        prefix: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record> {
        for key in self.sorted_keys() {
            if after_key.is_some_and(|a| key.as_str() <= a) {
                continue;
            }
            if !key.starts_with(prefix) {
                continue;
            }
            let r = &self.map[key];
            if r.tombstone {
                witness.witness(key);
                continue;
            }
            if witness.contains(key) {
                continue;
            }
            return Some(r.clone());
        }
        None
    }

    fn next_for_range(
        &self,
        start: &str,
        end: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record> {
        for key in self.sorted_keys() {
            if key.as_str() < start || key.as_str() > end {
                continue;
            }
            if after_key.is_some_and(|a| key.as_str() <= a) {
                continue;
            }
            let r = &self.map[key];
            if r.tombstone {
                witness.witness(key);
                continue;
            }
            if witness.contains(key) {
                continue;
            }
            return Some(r.clone());
        }
        None
    }

    fn scan_for_prefix(&self, prefix: &str, witness: &mut WitnessSet, best_keys: &mut Vec<String>) {
        for key in self.sorted_keys() {
            if !key.starts_with(prefix) {
                continue;
            }
            let r = &self.map[key];
            if r.tombstone {
                witness.witness(key);
            } else if !witness.contains(key) {
                insert_sorted_dedup(best_keys, key);
            }
        }
    }

    fn drain_sorted(&self) -> Vec<Record> {
        self.sorted_keys()
            .into_iter()
            .map(|k| self.map[k].clone())
            .collect()
    }

    fn active_records(&self) -> usize {
        self.active
    }

    fn total_records(&self) -> usize {
        self.map.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_keys_are_ascending() {
        let mut m = HashMapMemtable::new(10);
        for k in ["z", "a", "m"] {
            m.put(Record::new(k, b"v".to_vec(), 1)).unwrap();
        }
        let drained = m.drain_sorted();
        let keys: Vec<_> = drained.into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["a", "m", "z"]);
    }
}
