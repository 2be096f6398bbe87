//! Memtable façade: one reader-writer lock serializing access
//! to a chosen variant. The variants themselves need no internal locking;
//! this is the sole serialization point.

use super::{MemtableOps, MemtableVariant};
use crate::config::{Config, MemtableVariantKind};
use crate::error::Result;
use crate::record::Record;
use crate::sstable::SsTableStore;
use crate::witness::WitnessSet;
use parking_lot::RwLock;

pub struct MemtableHandle {
    inner: RwLock<MemtableVariant>,
}

impl MemtableHandle {
    pub fn new(config: &Config) -> Self {
        let variant = match config.memtable_variant {
            MemtableVariantKind::Tree => MemtableVariant::Tree(
                super::OrderedTreeMemtable::new(config.tree_order, config.memtable_capacity),
            ),
            MemtableVariantKind::SkipList => {
                MemtableVariant::SkipList(super::SkipListMemtable::new(config.memtable_capacity))
            }
            MemtableVariantKind::HashMap => {
                MemtableVariant::HashMap(super::HashMapMemtable::new(config.memtable_capacity))
            }
        };
        Self {
            inner: RwLock::new(variant),
        }
    }

    pub fn put(&self, record: Record) -> Result<()> {
        self.inner.write().put(record)
    }

    pub fn delete(&self, record: Record) -> bool {
        self.inner.write().delete(record)
    }

    pub fn get(&self, key: &str) -> Option<Record> {
        self.inner.read().get(key)
    }

    pub fn get_including_tombstone(&self, key: &str) -> Option<Record> {
        self.inner.read().get_including_tombstone(key)
    }

    pub fn next_for_prefix(
        &self,
        prefix: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record> {
        self.inner.read().next_for_prefix(prefix, after_key, witness)
    }

    pub fn next_for_range(
        &self,
        start: &str,
        end: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record> {
        self.inner
            .read()
            .next_for_range(start, end, after_key, witness)
    }

    pub fn scan_for_prefix(&self, prefix: &str, witness: &mut WitnessSet, best_keys: &mut Vec<String>) {
        self.inner.read().scan_for_prefix(prefix, witness, best_keys)
    }

    pub fn active_records(&self) -> usize {
        self.inner.read().active_records()
    }

    pub fn total_records(&self) -> usize {
        self.inner.read().total_records()
    }

    pub fn is_full(&self) -> bool {
        self.inner.read().is_full()
    }

    /// Drains the memtable and hands the sorted records to the SSTable
    /// store bound to `assigned_id`.
    pub fn flush(&self, assigned_id: u64, store: &dyn SsTableStore) -> Result<()> {
        let records = self.inner.read().drain_sorted();
        store.persist_memtable(&records, assigned_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_lock_serializes_put_and_delete() {
        let cfg = Config::default();
        let h = MemtableHandle::new(&cfg);
        h.put(Record::new("a", b"1".to_vec(), 1)).unwrap();
        assert_eq!(h.get("a").unwrap().value, b"1");
        assert!(h.delete(Record::tombstone("a", 2)));
        assert!(h.get("a").is_none());
    }
}
