//! Skip list memtable variant, backed by `crossbeam_skiplist::SkipMap`,
//! which already supplies the bounded-max-level, probabilistic-level-
//! distribution structure an ordered memtable needs; this module layers
//! the shared put/delete/counter/witness contract on top.

use super::{insert_sorted_dedup, transition_delta, MemtableOps};
use crate::error::{Result, StoreError};
use crate::record::Record;
use crate::witness::WitnessSet;
use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct SkipListMemtable {
    map: SkipMap<String, Record>,
    capacity: usize,
    total: AtomicUsize,
    active: AtomicUsize,
}

impl SkipListMemtable {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: SkipMap::new(),
            capacity,
            total: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        }
    }

    fn bump_active(&self, delta: i64) {
        if delta >= 0 {
            self.active.fetch_add(delta as usize, Ordering::Relaxed);
        } else {
            self.active.fetch_sub((-delta) as usize, Ordering::Relaxed);
        }
    }
}

impl MemtableOps for SkipListMemtable {
    fn put(&mut self, record: Record) -> Result<()> {
        if record.is_empty_key() {
            return Err(StoreError::InvalidArgument("empty key".into()));
        }
        if let Some(entry) = self.map.get(&record.key) {
            let delta = transition_delta(entry.value().tombstone, record.tombstone);
            self.map.insert(record.key.clone(), record);
            self.bump_active(delta);
            return Ok(());
        }
        if self.total.load(Ordering::Relaxed) >= self.capacity {
            return Err(StoreError::CapacityExceeded);
        }
        let tombstone = record.tombstone;
        self.map.insert(record.key.clone(), record);
        self.total.fetch_add(1, Ordering::Relaxed);
        if !tombstone {
            self.active.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn delete(&mut self, mut record: Record) -> bool {
        record.mark_deleted();
        let existing_tombstone = self.map.get(&record.key).map(|entry| entry.value().tombstone);
        if let Some(old_tombstone) = existing_tombstone {
            let delta = transition_delta(old_tombstone, true);
            self.map.insert(record.key.clone(), record);
            self.bump_active(delta);
            true
        } else {
            let _ = self.put(record);
            false
        }
    }

    fn get(&self, key: &str) -> Option<Record> {
        self.map.get(key).and_then(|e| {
            let r = e.value();
            if r.tombstone {
                None
            } else {
                Some(r.clone())
            }
        })
    }

    fn get_including_tombstone(&self, key: &str) -> Option<Record> {
        self.map.get(key).map(|e| e.value().clone())
    }

    fn next_for_prefix(
        &self,
        prefix: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record> {
        let lower = match after_key {
            Some(a) if a > prefix => a,
            _ => prefix,
        };
        for entry in self.map.range(lower.to_string()..) {
            let r = entry.value();
            if !r.key.starts_with(prefix) {
                // keys sort ascending; once we pass the prefix window there
                // can be no further matches.
                break;
            }
            if after_key.is_some_and(|a| r.key.as_str() <= a) {
                continue;
            }
            if r.tombstone {
                witness.witness(&r.key);
                continue;
            }
            if witness.contains(&r.key) {
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
        let lower = match after_key {
            Some(a) if a > start => a,
            _ => start,
        };
        for entry in self.map.range(lower.to_string()..) {
            let r = entry.value();
            if r.key.as_str() > end {
                break;
            }
            if after_key.is_some_and(|a| r.key.as_str() <= a) {
                continue;
            }
            if r.key.as_str() < start {
                continue;
            }
            if r.tombstone {
                witness.witness(&r.key);
                continue;
            }
            if witness.contains(&r.key) {
                continue;
            }
            return Some(r.clone());
        }
        None
    }

    fn scan_for_prefix(&self, prefix: &str, witness: &mut WitnessSet, best_keys: &mut Vec<String>) {
        for entry in self.map.range(prefix.to_string()..) {
            let r = entry.value();
            if !r.key.starts_with(prefix) {
                break;
            }
            if r.tombstone {
                witness.witness(&r.key);
            } else if !witness.contains(&r.key) {
                insert_sorted_dedup(best_keys, &r.key);
            }
        }
    }

    fn drain_sorted(&self) -> Vec<Record> {
        self.map.iter().map(|e| e.value().clone()).collect()
    }

    fn active_records(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn total_records(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
