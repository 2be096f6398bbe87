//! Memtable contract shared by the three variants and the
//! tagged-alternative dispatch over them.

mod facade;
mod hashmap;
mod skiplist;
mod tree;

pub use facade::MemtableHandle;
pub use hashmap::HashMapMemtable;
pub use skiplist::SkipListMemtable;
pub use tree::OrderedTreeMemtable;

use crate::error::Result;
use crate::record::Record;
use crate::witness::WitnessSet;

/// Operations every memtable variant must implement identically.
pub trait MemtableOps {
    /// Inserts or updates `record`. New-key admission is rejected with
    /// `CapacityExceeded` when the memtable `is_full`; in-place updates of
    /// an existing key always succeed.
    fn put(&mut self, record: Record) -> Result<()>;

    /// Forces `record` into a tombstone and applies it. Returns `true` if
    /// the key already existed (replaced in place), `false` for a blind
    /// tombstone (delegated to `put`, swallowing any capacity error).
    fn delete(&mut self, record: Record) -> bool;

    /// The latest record for `key`, or `None` if absent or tombstoned.
    fn get(&self, key: &str) -> Option<Record>;

    /// As `get`, but returns a tombstoned entry instead of hiding it.
    /// Used by the controller's layered read to stop descending into
    /// older memtables/SSTables once a newer layer proves the key was
    /// deleted (a plain `get` miss there would be indistinguishable from
    /// "never written here" and incorrectly fall through to stale data).
    fn get_including_tombstone(&self, key: &str) -> Option<Record>;

    /// Smallest non-tombstoned, non-witnessed key greater than `after_key`
    /// with the given prefix. Tombstoned keys encountered in the window
    /// are folded into `witness`.
    fn next_for_prefix(
        &self,
        prefix: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record>;

    /// As `next_for_prefix`, bounded by an inclusive `[start, end]` range.
    fn next_for_range(
        &self,
        start: &str,
        end: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record>;

    /// Walks all keys with `prefix`, inserting non-tombstoned, non-witnessed,
    /// not-yet-collected keys into `best_keys` at their sorted position and
    /// witnessing every tombstoned key encountered.
    fn scan_for_prefix(&self, prefix: &str, witness: &mut WitnessSet, best_keys: &mut Vec<String>);

    /// All entries (including tombstones), ascending by key, with owned
    /// (copied) payload bytes.
    fn drain_sorted(&self) -> Vec<Record>;

    fn active_records(&self) -> usize;
    fn total_records(&self) -> usize;
    fn capacity(&self) -> usize;

    fn is_full(&self) -> bool {
        self.total_records() >= self.capacity()
    }
}

/// Inserts `key` into the sorted, deduplicated `best_keys` vector if absent.
pub(crate) fn insert_sorted_dedup(best_keys: &mut Vec<String>, key: &str) {
    match best_keys.binary_search_by(|k| k.as_str().cmp(key)) {
        Ok(_) => {}
        Err(pos) => best_keys.insert(pos, key.to_string()),
    }
}

/// The active/total counter transition table for `put` on an existing key.
/// Returns the active-count delta.
pub(crate) fn transition_delta(old_tombstone: bool, new_tombstone: bool) -> i64 {
    match (old_tombstone, new_tombstone) {
        (false, false) => 0,
        (false, true) => -1,
        (true, false) => 1,
        (true, true) => 0,
    }
}

/// One of the three interchangeable memtable implementations, matched by
/// the façade rather than boxed behind a trait object.
pub enum MemtableVariant {
    Tree(OrderedTreeMemtable),
    SkipList(SkipListMemtable),
    HashMap(HashMapMemtable),
}

impl MemtableOps for MemtableVariant {
    fn put(&mut self, record: Record) -> Result<()> {
        match self {
            MemtableVariant::Tree(m) => m.put(record),
            MemtableVariant::SkipList(m) => m.put(record),
            MemtableVariant::HashMap(m) => m.put(record),
        }
    }

    fn delete(&mut self, record: Record) -> bool {
        match self {
            MemtableVariant::Tree(m) => m.delete(record),
            MemtableVariant::SkipList(m) => m.delete(record),
            MemtableVariant::HashMap(m) => m.delete(record),
        }
    }

    fn get(&self, key: &str) -> Option<Record> {
        match self {
            MemtableVariant::Tree(m) => m.get(key),
            MemtableVariant::SkipList(m) => m.get(key),
            MemtableVariant::HashMap(m) => m.get(key),
        }
    }

    fn get_including_tombstone(&self, key: &str) -> Option<Record> {
        match self {
            MemtableVariant::Tree(m) => m.get_including_tombstone(key),
            MemtableVariant::SkipList(m) => m.get_including_tombstone(key),
            MemtableVariant::HashMap(m) => m.get_including_tombstone(key),
        }
    }

    fn next_for_prefix(
        &self,
        prefix: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record> {
        match self {
            MemtableVariant::Tree(m) => m.next_for_prefix(prefix, after_key, witness),
            MemtableVariant::SkipList(m) => m.next_for_prefix(prefix, after_key, witness),
            MemtableVariant::HashMap(m) => m.next_for_prefix(prefix, after_key, witness),
        }
    }

    fn next_for_range(
        &self,
        start: &str,
        end: &str,
        after_key: Option<&str>,
        witness: &mut WitnessSet,
    ) -> Option<Record> {
        match self {
            MemtableVariant::Tree(m) => m.next_for_range(start, end, after_key, witness),
            MemtableVariant::SkipList(m) => m.next_for_range(start, end, after_key, witness),
            MemtableVariant::HashMap(m) => m.next_for_range(start, end, after_key, witness),
        }
    }

    fn scan_for_prefix(&self, prefix: &str, witness: &mut WitnessSet, best_keys: &mut Vec<String>) {
        match self {
            MemtableVariant::Tree(m) => m.scan_for_prefix(prefix, witness, best_keys),
            MemtableVariant::SkipList(m) => m.scan_for_prefix(prefix, witness, best_keys),
            MemtableVariant::HashMap(m) => m.scan_for_prefix(prefix, witness, best_keys),
        }
    }

    fn drain_sorted(&self) -> Vec<Record> {
        match self {
            MemtableVariant::Tree(m) => m.drain_sorted(),
            MemtableVariant::SkipList(m) => m.drain_sorted(),
            MemtableVariant::HashMap(m) => m.drain_sorted(),
        }
    }

    fn active_records(&self) -> usize {
        match self {
            MemtableVariant::Tree(m) => m.active_records(),
            MemtableVariant::SkipList(m) => m.active_records(),
            MemtableVariant::HashMap(m) => m.active_records(),
        }
    }

    fn total_records(&self) -> usize {
        match self {
            MemtableVariant::Tree(m) => m.total_records(),
            MemtableVariant::SkipList(m) => m.total_records(),
            MemtableVariant::HashMap(m) => m.total_records(),
        }
    }

    fn capacity(&self) -> usize {
        match self {
            MemtableVariant::Tree(m) => m.capacity(),
            MemtableVariant::SkipList(m) => m.capacity(),
            MemtableVariant::HashMap(m) => m.capacity(),
        }
    }
}

#[cfg(test)]
mod contract_tests {
    use super::*;
    use crate::config::MemtableVariantKind;

    fn make(kind: MemtableVariantKind, capacity: usize) -> MemtableVariant {
        match kind {
            MemtableVariantKind::Tree => {
                MemtableVariant::Tree(OrderedTreeMemtable::new(5, capacity))
            }
            MemtableVariantKind::SkipList => {
                MemtableVariant::SkipList(SkipListMemtable::new(capacity))
            }
            MemtableVariantKind::HashMap => MemtableVariant::HashMap(HashMapMemtable::new(capacity)),
        }
    }

    fn run_scenario_1(kind: MemtableVariantKind) {
        let mut m = make(kind, 100);
        m.put(Record::new("k", b"v1".to_vec(), 1)).unwrap();
        assert_eq!(m.get("k").unwrap().value, b"v1");
        m.put(Record::new("k", b"v2".to_vec(), 2)).unwrap();
        assert_eq!(m.get("k").unwrap().value, b"v2");
        assert!(m.delete(Record::tombstone("k", 3)));
        assert!(m.get("k").is_none());
        m.put(Record::new("k", b"v3".to_vec(), 4)).unwrap();
        assert_eq!(m.get("k").unwrap().value, b"v3");
        assert_eq!(m.total_records(), 1);
        assert_eq!(m.active_records(), 1);
    }

    fn run_scenario_2_capacity(kind: MemtableVariantKind) {
        let mut m = make(kind, 3);
        m.put(Record::new("a", b"1".to_vec(), 1)).unwrap();
        m.put(Record::new("b", b"2".to_vec(), 2)).unwrap();
        m.put(Record::new("c", b"3".to_vec(), 3)).unwrap();
        assert!(m.is_full());
        let err = m.put(Record::new("d", b"4".to_vec(), 4)).unwrap_err();
        assert!(matches!(err, crate::error::StoreError::CapacityExceeded));
        // existing-key update always succeeds even when full
        m.put(Record::new("a", b"11".to_vec(), 5)).unwrap();
        assert_eq!(m.get("a").unwrap().value, b"11");
        assert_eq!(m.total_records(), 3);
        // blind tombstone on absent key collapses a capacity rejection to false
        assert!(!m.delete(Record::tombstone("e", 6)));
        assert_eq!(m.total_records(), 3);
    }

    fn run_scenario_3_drain_sorted(kind: MemtableVariantKind) {
        let mut m = make(kind, 100);
        m.put(Record::new("c", b"cv".to_vec(), 1)).unwrap();
        m.put(Record::new("a", b"av".to_vec(), 2)).unwrap();
        m.put(Record::new("b", b"bv".to_vec(), 3)).unwrap();
        m.delete(Record::tombstone("b", 4));
        let drained = m.drain_sorted();
        let keys: Vec<_> = drained.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(!drained[0].tombstone);
        assert!(drained[1].tombstone);
        assert!(!drained[2].tombstone);
    }

    fn run_prefix_scan(kind: MemtableVariantKind) {
        let mut m = make(kind, 100);
        m.put(Record::new("user1", b"v".to_vec(), 1)).unwrap();
        m.put(Record::new("user2", b"v".to_vec(), 2)).unwrap();
        m.put(Record::new("admin", b"v".to_vec(), 3)).unwrap();
        let mut witness = WitnessSet::new();
        let mut best = Vec::new();
        m.scan_for_prefix("user", &mut witness, &mut best);
        assert_eq!(best, vec!["user1".to_string(), "user2".to_string()]);
    }

    #[test]
    fn all_variants_satisfy_the_contract() {
        for kind in [
            MemtableVariantKind::Tree,
            MemtableVariantKind::SkipList,
            MemtableVariantKind::HashMap,
        ] {
            run_scenario_1(kind);
            run_scenario_2_capacity(kind);
            run_scenario_3_drain_sorted(kind);
            run_prefix_scan(kind);
        }
    }
}
