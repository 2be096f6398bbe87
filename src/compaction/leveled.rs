//! Leveled compaction: once a level exceeds `max_tables_per_level`, its
//! oldest table is pushed into the level below, merged with whichever
//! tables there overlap its key range.

use super::CompactionDriver;
use crate::config::Config;
use crate::error::Result;
use crate::sstable::SsTableStore;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct LeveledCompaction;

fn overlaps(a: &(String, String), b: &(String, String)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

impl CompactionDriver for LeveledCompaction {
    fn maybe_compact(
        &self,
        levels: &mut Vec<Vec<u64>>,
        store: &dyn SsTableStore,
        config: &Config,
        next_id: &AtomicU64,
    ) -> Result<bool> {
        for level in 0..levels.len().saturating_sub(1) {
            if levels[level].len() <= config.max_tables_per_level {
                continue;
            }
            let candidate = levels[level][0];
            let candidate_range = store.get_boundaries(candidate)?;

            let mut overlapping = Vec::new();
            for &id in &levels[level + 1] {
                if overlaps(&candidate_range, &store.get_boundaries(id)?) {
                    overlapping.push(id);
                }
            }

            if overlapping.is_empty() {
                levels[level].remove(0);
                levels[level + 1].push(candidate);
                return Ok(true);
            }

            // newest-first: the level-below entries that already overlap
            // shadow the promoted candidate, so they take precedence.
            let mut ids: Vec<u64> = overlapping.iter().rev().cloned().collect();
            ids.push(candidate);
            let new_id = next_id.fetch_add(1, Ordering::SeqCst);
            store.compact(&ids, new_id)?;

            levels[level].remove(0);
            levels[level + 1].retain(|id| !overlapping.contains(id));
            levels[level + 1].push(new_id);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::sstable::FileSsTableStore;
    use tempfile::tempdir;

    fn config() -> Config {
        Config {
            max_levels: 3,
            max_tables_per_level: 1,
            ..Config::default()
        }
    }

    #[test]
    fn non_overlapping_candidate_moves_without_rewrite() {
        let dir = tempdir().unwrap();
        let store = FileSsTableStore::new(dir.path()).unwrap();
        store.persist_memtable(&[Record::new("a", b"1".to_vec(), 1)], 1).unwrap();
        store.persist_memtable(&[Record::new("z", b"9".to_vec(), 1)], 2).unwrap();
        store.persist_memtable(&[Record::new("m", b"5".to_vec(), 1)], 3).unwrap();

        let cfg = config();
        let mut levels = vec![vec![1, 2], vec![3], vec![]];
        let next_id = AtomicU64::new(4);
        let driver = LeveledCompaction;
        let did = driver.maybe_compact(&mut levels, &store, &cfg, &next_id).unwrap();

        assert!(did);
        assert_eq!(levels[0], vec![2]);
        assert_eq!(levels[1], vec![3, 1]);
        assert_eq!(next_id.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn overlapping_candidate_merges_down() {
        let dir = tempdir().unwrap();
        let store = FileSsTableStore::new(dir.path()).unwrap();
        store.persist_memtable(&[Record::new("b", b"old".to_vec(), 1)], 1).unwrap();
        store.persist_memtable(&[Record::new("x", b"1".to_vec(), 1)], 2).unwrap();
        store.persist_memtable(&[Record::new("b", b"new".to_vec(), 2)], 3).unwrap();

        let cfg = config();
        let mut levels = vec![vec![1, 2], vec![3], vec![]];
        let next_id = AtomicU64::new(4);
        let driver = LeveledCompaction;
        let did = driver.maybe_compact(&mut levels, &store, &cfg, &next_id).unwrap();

        assert!(did);
        assert_eq!(levels[0], vec![2]);
        assert_eq!(levels[1], vec![4]);
        assert_eq!(store.get("b", 4).unwrap().unwrap().value, b"new");
    }
}
